//! Resolved views of the vault's record set.

use crate::record::SecretRecord;

/// A fully resolved view of the vault.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct VaultSnapshot {
    /// Readable records ordered by `(created_at, id)`.
    pub records: Vec<SecretRecord>,
    /// Ids whose blobs could not be decrypted or parsed at the last refresh.
    pub unreadable: Vec<String>,
}

impl VaultSnapshot {
    pub fn new(mut records: Vec<SecretRecord>, mut unreadable: Vec<String>) -> Self {
        records.sort_by(|a, b| order(a).cmp(&order(b)));
        unreadable.sort();
        Self {
            records,
            unreadable,
        }
    }

    pub fn get(&self, id: &str) -> Option<&SecretRecord> {
        self.records.iter().find(|r| r.id() == id)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub(crate) fn upsert(&mut self, record: SecretRecord) {
        self.records.retain(|r| r.id() != record.id());
        self.unreadable.retain(|id| id != record.id());
        let at = self
            .records
            .partition_point(|r| order(r) < order(&record));
        self.records.insert(at, record);
    }

    pub(crate) fn remove(&mut self, id: &str) -> bool {
        let before = self.records.len() + self.unreadable.len();
        self.records.retain(|r| r.id() != id);
        self.unreadable.retain(|u| u != id);
        before != self.records.len() + self.unreadable.len()
    }
}

fn order(record: &SecretRecord) -> (i64, &str) {
    (record.created_at(), record.id())
}
