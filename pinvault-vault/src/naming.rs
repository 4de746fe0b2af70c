//! Mapping between record ids and blob names.

/// Default blob name prefix, shared with existing on-device data.
pub const DEFAULT_RECORD_PREFIX: &str = "pin_";

/// Default blob name suffix.
pub const DEFAULT_RECORD_SUFFIX: &str = ".json";

/// Names blobs `prefix + id + suffix`. Enumerating the store and parsing
/// names back is the only catalog of records.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RecordNaming {
    prefix: String,
    suffix: String,
}

impl RecordNaming {
    pub fn new(prefix: impl Into<String>, suffix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            suffix: suffix.into(),
        }
    }

    pub fn name_of(&self, id: &str) -> String {
        format!("{}{id}{}", self.prefix, self.suffix)
    }

    /// The record id encoded in `name`, if it follows the convention.
    pub fn id_of<'a>(&self, name: &'a str) -> Option<&'a str> {
        name.strip_prefix(self.prefix.as_str())?
            .strip_suffix(self.suffix.as_str())
            .filter(|id| !id.is_empty())
    }
}

impl Default for RecordNaming {
    fn default() -> Self {
        Self::new(DEFAULT_RECORD_PREFIX, DEFAULT_RECORD_SUFFIX)
    }
}
