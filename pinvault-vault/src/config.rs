//! Vault configuration.

use crate::error::{VaultError, VaultResult};
use crate::naming::{RecordNaming, DEFAULT_RECORD_PREFIX, DEFAULT_RECORD_SUFFIX};
use pinvault_crypto::{KeyPolicy, PromptInfo, DEFAULT_KEY_ALIAS, DEFAULT_PRESENCE_VALIDITY_SECS};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Configuration for [`crate::open_vault`].
///
/// Every field has a default, so a JSON file only needs the fields it
/// changes.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VaultConfig {
    /// Directory holding one encrypted file per record.
    pub data_dir: PathBuf,

    /// Key store alias of the vault key.
    pub key_alias: String,

    pub record_prefix: String,
    pub record_suffix: String,

    /// Whether a newly generated key demands a presence proof per use.
    /// Existing keys keep the policy they were created with.
    pub require_user_presence: bool,

    /// How long a presence proof stays valid, in seconds.
    pub presence_validity_secs: u64,

    /// Request hardware-isolated key backing when available.
    pub prefer_hardware: bool,

    /// Text of the presence prompt.
    pub prompt: PromptInfo,
}

impl Default for VaultConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("encrypted_files"),
            key_alias: DEFAULT_KEY_ALIAS.to_string(),
            record_prefix: DEFAULT_RECORD_PREFIX.to_string(),
            record_suffix: DEFAULT_RECORD_SUFFIX.to_string(),
            require_user_presence: false,
            presence_validity_secs: DEFAULT_PRESENCE_VALIDITY_SECS,
            prefer_hardware: true,
            prompt: PromptInfo::default(),
        }
    }
}

impl VaultConfig {
    /// Defaults with records stored under `data_dir`.
    pub fn with_data_dir(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            ..Self::default()
        }
    }

    /// Loads and validates a JSON config file.
    pub fn from_json_file(path: impl AsRef<Path>) -> VaultResult<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| VaultError::Config(format!("cannot read {}: {e}", path.display())))?;
        let config: Self = serde_json::from_str(&raw)
            .map_err(|e| VaultError::Config(format!("cannot parse {}: {e}", path.display())))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> VaultResult<()> {
        if self.data_dir.as_os_str().is_empty() {
            return Err(VaultError::Config("data_dir must not be empty".into()));
        }
        if self.key_alias.trim().is_empty() {
            return Err(VaultError::Config("key_alias must not be empty".into()));
        }
        for (field, value) in [
            ("record_prefix", &self.record_prefix),
            ("record_suffix", &self.record_suffix),
        ] {
            if value.contains(['/', '\\', '\0']) {
                return Err(VaultError::Config(format!(
                    "{field} must not contain path separators"
                )));
            }
        }
        if self.record_prefix.starts_with('.') {
            return Err(VaultError::Config(
                "record_prefix must not start with '.'".into(),
            ));
        }
        Ok(())
    }

    /// Policy for keys generated under this config.
    pub fn key_policy(&self) -> KeyPolicy {
        KeyPolicy {
            requires_user_presence: self.require_user_presence,
            presence_validity_secs: self.presence_validity_secs,
            prefer_hardware: self.prefer_hardware,
            ..KeyPolicy::default()
        }
    }

    pub fn naming(&self) -> RecordNaming {
        RecordNaming::new(&self.record_prefix, &self.record_suffix)
    }
}
