//! Per-version host buckets.

use rand::Rng;
use relay_version::VersionKey;

use super::record::HostRecord;

/// Backends that registered under the same client version string.
///
/// `total_weight` always equals the sum of the member weights. A table keeps
/// existing after its last member leaves.
#[derive(Debug, Clone)]
pub struct HostTable {
    version_key: VersionKey,
    total_weight: u64,
    records: Vec<HostRecord>,
}

impl HostTable {
    /// Create an empty table for a version.
    pub fn new(version_key: VersionKey) -> Self {
        Self {
            version_key,
            total_weight: 0,
            records: Vec::new(),
        }
    }

    /// Add a record, or refresh the address of an already registered key.
    ///
    /// Re-registering a key only replaces its address; the weight and version
    /// of the existing entry are kept. Returns true if a new member was added.
    pub fn put(&mut self, record: HostRecord) -> bool {
        if let Some(existing) = self.records.iter_mut().find(|r| r.key() == record.key()) {
            existing.set_address(record.address().to_string());
            return false;
        }

        self.total_weight += u64::from(record.weight());
        self.records.push(record);
        true
    }

    /// Remove the member with the given key.
    pub fn delete(&mut self, key: &str) -> bool {
        let Some(idx) = self.records.iter().position(|r| r.key() == key) else {
            return false;
        };

        let removed = self.records.remove(idx);
        self.total_weight -= u64::from(removed.weight());
        true
    }

    /// Pick a member uniformly at random and return its address.
    ///
    /// Weights are tracked but do not influence the pick.
    pub fn select(&self) -> Option<&str> {
        if self.records.is_empty() {
            return None;
        }

        let idx = rand::rng().random_range(0..self.records.len());
        Some(self.records[idx].address())
    }

    pub fn version_key(&self) -> VersionKey {
        self.version_key
    }

    pub fn total_weight(&self) -> u64 {
        self.total_weight
    }

    pub fn records(&self) -> &[HostRecord] {
        &self.records
    }

    pub fn contains(&self, key: &str) -> bool {
        self.records.iter().any(|r| r.key() == key)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
