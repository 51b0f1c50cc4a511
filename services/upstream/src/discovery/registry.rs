//! Version-bucketed host registry.
//!
//! Backends register under the client version they serve. A client is routed
//! to the bucket for its exact version when one exists, otherwise to the
//! highest bucket strictly below its version: newer backends accept older
//! clients, never the reverse.

use std::collections::HashMap;

use relay_version::VersionKey;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use super::record::HostRecord;
use super::table::HostTable;

/// Concurrent map from client version string to its host table.
///
/// Writers (`put`, `delete`) take the lock exclusively; `query` callers share
/// it.
#[derive(Debug, Default)]
pub struct HostRegistry {
    tables: RwLock<HashMap<String, HostTable>>,
}

impl HostRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a record under its version string.
    pub async fn put(&self, record: HostRecord) {
        let mut tables = self.tables.write().await;

        let table = tables
            .entry(record.version().to_string())
            .or_insert_with(|| HostTable::new(record.version_key()));

        let key = record.key().to_string();
        let added = table.put(record);
        debug!(key = %key, added, members = table.len(), "Host registered");
    }

    /// Remove the record with the given key from whichever table holds it.
    ///
    /// Tables left empty are kept. Returns true if a record was removed.
    pub async fn delete(&self, key: &str) -> bool {
        let mut tables = self.tables.write().await;
        tables.values_mut().any(|table| table.delete(key))
    }

    /// Pick a backend address for a client version.
    ///
    /// Returns `None` when no table qualifies, when the qualifying table is
    /// empty, or when the version string is malformed.
    pub async fn query(&self, version: &str) -> Option<String> {
        let tables = self.tables.read().await;

        if tables.is_empty() {
            return None;
        }

        if let Some(table) = tables.get(version) {
            return table.select().map(str::to_string);
        }

        let wanted = match VersionKey::parse(version) {
            Ok(key) => key,
            Err(e) => {
                warn!(version = %version, error = %e, "Invalid version from client");
                return None;
            }
        };

        let mut candidates: Vec<(&String, &HostTable)> = tables.iter().collect();
        candidates.sort_by(|(va, a), (vb, b)| {
            b.version_key()
                .cmp(&a.version_key())
                .then_with(|| va.cmp(vb))
        });

        candidates
            .into_iter()
            .find(|(_, table)| table.version_key() < wanted)
            .and_then(|(_, table)| table.select().map(str::to_string))
    }

    /// Snapshot of the table registered under a version string.
    pub async fn table(&self, version: &str) -> Option<HostTable> {
        self.tables.read().await.get(version).cloned()
    }

    /// Version strings that currently have a table.
    pub async fn versions(&self) -> Vec<String> {
        self.tables.read().await.keys().cloned().collect()
    }

    /// Number of tables, including empty ones.
    pub async fn len(&self) -> usize {
        self.tables.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.tables.read().await.is_empty()
    }
}
