//! The stored secret record.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;
use zeroize::Zeroize;

/// A labelled secret value. Immutable once created.
///
/// Serialized as camelCase JSON (`id`, `label`, `value`, `createdAt`).
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecretRecord {
    id: String,
    label: String,
    value: String,
    /// Unix epoch milliseconds, UTC.
    #[serde(default)]
    created_at: i64,
}

impl SecretRecord {
    /// A new record with a random id, stamped with the current time.
    pub fn new(label: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            label: label.into(),
            value: value.into(),
            created_at: Utc::now().timestamp_millis(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn value(&self) -> &str {
        &self.value
    }

    pub fn created_at(&self) -> i64 {
        self.created_at
    }
}

impl fmt::Debug for SecretRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecretRecord")
            .field("id", &self.id)
            .field("label", &self.label)
            .field("value", &"<redacted>")
            .field("created_at", &self.created_at)
            .finish()
    }
}

impl Drop for SecretRecord {
    fn drop(&mut self) {
        self.value.zeroize();
    }
}
