//! Registry synchronization from the coordination store.
//!
//! Each session runs in three steps:
//! 1. Connect to the store.
//! 2. Load every entry under the prefix. One undecodable entry aborts the
//!    session before anything is applied.
//! 3. Watch the prefix and apply PUT/DELETE events until the stream ends.
//!
//! [`RegistryFeed::run`] repeats sessions forever. Failed sessions are retried
//! after a fixed delay; a watch that ends normally reconnects at once.
//! Entries applied by earlier sessions are never rolled back.

use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use tracing::{error, info, warn};

use super::record::HostRecord;
use super::registry::HostRegistry;
use super::store::{CoordinationStore, KeyValue, StoreSession, WatchEvent};
use crate::error::{Result, UpstreamError};

/// Default delay between failed sessions.
pub const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_secs(1);

/// Keeps a [`HostRegistry`] in sync with a coordination store prefix.
pub struct RegistryFeed<S> {
    store: S,
    prefix: String,
    registry: Arc<HostRegistry>,
    retry_interval: Duration,
}

impl<S: CoordinationStore> RegistryFeed<S> {
    pub fn new(store: S, prefix: impl Into<String>, registry: Arc<HostRegistry>) -> Self {
        Self {
            store,
            prefix: prefix.into(),
            registry,
            retry_interval: DEFAULT_RETRY_INTERVAL,
        }
    }

    pub fn with_retry_interval(mut self, retry_interval: Duration) -> Self {
        self.retry_interval = retry_interval;
        self
    }

    pub fn registry(&self) -> &Arc<HostRegistry> {
        &self.registry
    }

    /// Run sessions forever.
    pub async fn run(&self) {
        loop {
            match self.run_once().await {
                Ok(()) => {
                    error!(endpoint = %self.store.endpoint(), "Disconnected from coordination store");
                }
                Err(e) => {
                    error!(
                        endpoint = %self.store.endpoint(),
                        error = %e,
                        retry_in_ms = self.retry_interval.as_millis() as u64,
                        "Registry feed session failed; retrying"
                    );
                    tokio::time::sleep(self.retry_interval).await;
                }
            }
        }
    }

    /// Run a single session.
    ///
    /// Returns `Ok(())` when the watch stream ended after a successful load,
    /// and an error when connecting, loading, or opening the watch failed.
    pub async fn run_once(&self) -> Result<()> {
        info!(endpoint = %self.store.endpoint(), "Connecting to coordination store");
        let mut session = self.store.connect().await?;
        info!(endpoint = %self.store.endpoint(), "Connected to coordination store");

        let result = self.sync_session(session.as_mut()).await;
        session.close().await;
        result
    }

    async fn sync_session(&self, session: &mut dyn StoreSession) -> Result<()> {
        let entries = session.get_prefix(&self.prefix).await?;
        let loaded = self.load_snapshot(entries).await?;
        info!(prefix = %self.prefix, hosts = loaded, "Loaded registry snapshot");

        let mut stream = session.watch_prefix(&self.prefix).await?;
        while let Some(batch) = stream.next().await {
            for event in batch {
                self.apply_event(event).await;
            }
        }

        Ok(())
    }

    async fn load_snapshot(&self, entries: Vec<KeyValue>) -> Result<usize> {
        let records = entries
            .iter()
            .map(|kv| {
                HostRecord::decode(&kv.key, &kv.value).inspect_err(|e| {
                    error!(
                        key = %String::from_utf8_lossy(&kv.key),
                        value = %String::from_utf8_lossy(&kv.value),
                        error = %e,
                        "GET decode error"
                    );
                })
            })
            .collect::<Result<Vec<_>, UpstreamError>>()?;

        let count = records.len();
        for record in records {
            info!(key = %record.key(), address = %record.address(), "GET host");
            self.registry.put(record).await;
        }

        Ok(count)
    }

    async fn apply_event(&self, event: WatchEvent) {
        match event {
            WatchEvent::Put { key, value } => match HostRecord::decode(&key, &value) {
                Ok(record) => {
                    info!(key = %record.key(), address = %record.address(), "PUT host");
                    self.registry.put(record).await;
                }
                Err(e) => {
                    warn!(
                        key = %String::from_utf8_lossy(&key),
                        value = %String::from_utf8_lossy(&value),
                        error = %e,
                        "PUT event decode error"
                    );
                }
            },
            WatchEvent::Delete { key } => {
                let key = String::from_utf8_lossy(&key);
                let removed = self.registry.delete(&key).await;
                info!(key = %key, removed, "DEL host");
            }
            WatchEvent::Unknown { kind } => {
                warn!(kind = %kind, "Unexpected coordination store event");
            }
        }
    }
}
