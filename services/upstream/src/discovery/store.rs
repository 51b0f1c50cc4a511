//! Coordination store interface and implementations.
//!
//! The feed only needs three things from the store: connect, list every
//! entry under a prefix, and watch that prefix for changes. [`EtcdStore`]
//! talks to etcd; [`MockStore`] keeps everything in memory for development
//! and tests.

use std::collections::BTreeMap;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use etcd_client::{Client, ConnectOptions, EventType, GetOptions, WatchOptions};
use futures_core::Stream;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::{debug, warn};

use crate::error::{Result, UpstreamError};

/// Default dial timeout for the coordination store.
pub const DEFAULT_DIAL_TIMEOUT: Duration = Duration::from_secs(5);

/// A raw key/value entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyValue {
    pub key: Vec<u8>,
    pub value: Vec<u8>,
}

/// A change observed on the watched prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchEvent {
    /// A key was created or overwritten.
    Put { key: Vec<u8>, value: Vec<u8> },
    /// A key was removed.
    Delete { key: Vec<u8> },
    /// The store sent something the feed does not understand.
    Unknown { kind: String },
}

/// Batches of watch events. The stream ending means the session is gone.
pub type WatchStream = Pin<Box<dyn Stream<Item = Vec<WatchEvent>> + Send>>;

/// Store that can open sessions.
#[async_trait]
pub trait CoordinationStore: Send + Sync {
    /// Open a new session.
    async fn connect(&self) -> Result<Box<dyn StoreSession>>;

    /// Human-readable endpoint for logs.
    fn endpoint(&self) -> &str;
}

/// An open session with the store.
#[async_trait]
pub trait StoreSession: Send {
    /// List every entry whose key starts with `prefix`.
    async fn get_prefix(&mut self, prefix: &str) -> Result<Vec<KeyValue>>;

    /// Watch every key that starts with `prefix`.
    async fn watch_prefix(&mut self, prefix: &str) -> Result<WatchStream>;

    /// Release the session.
    async fn close(&mut self);
}

// ============================================================================
// etcd
// ============================================================================

/// etcd-backed coordination store.
#[derive(Debug, Clone)]
pub struct EtcdStore {
    endpoint: String,
    dial_timeout: Duration,
}

impl EtcdStore {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            dial_timeout: DEFAULT_DIAL_TIMEOUT,
        }
    }

    pub fn with_dial_timeout(endpoint: impl Into<String>, dial_timeout: Duration) -> Self {
        Self {
            endpoint: endpoint.into(),
            dial_timeout,
        }
    }
}

#[async_trait]
impl CoordinationStore for EtcdStore {
    async fn connect(&self) -> Result<Box<dyn StoreSession>> {
        let options = ConnectOptions::new().with_connect_timeout(self.dial_timeout);
        let client = Client::connect([self.endpoint.as_str()], Some(options)).await?;
        Ok(Box::new(EtcdSession { client }))
    }

    fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

struct EtcdSession {
    client: Client,
}

#[async_trait]
impl StoreSession for EtcdSession {
    async fn get_prefix(&mut self, prefix: &str) -> Result<Vec<KeyValue>> {
        let resp = self
            .client
            .get(prefix, Some(GetOptions::new().with_prefix()))
            .await?;

        Ok(resp
            .kvs()
            .iter()
            .map(|kv| KeyValue {
                key: kv.key().to_vec(),
                value: kv.value().to_vec(),
            })
            .collect())
    }

    async fn watch_prefix(&mut self, prefix: &str) -> Result<WatchStream> {
        let (watcher, stream) = self
            .client
            .watch(prefix, Some(WatchOptions::new().with_prefix()))
            .await?;

        // The watcher travels with the stream; dropping it cancels the watch.
        let events = futures_util::stream::unfold(
            (watcher, stream),
            |(watcher, mut stream)| async move {
                match stream.message().await {
                    Ok(Some(resp)) if resp.canceled() => {
                        warn!(reason = %resp.cancel_reason(), "Watch canceled by store");
                        None
                    }
                    Ok(Some(resp)) => {
                        let batch = resp.events().iter().map(convert_event).collect();
                        Some((batch, (watcher, stream)))
                    }
                    Ok(None) => None,
                    Err(e) => {
                        warn!(error = %e, "Watch stream failed");
                        None
                    }
                }
            },
        );

        Ok(Box::pin(events))
    }

    // etcd-client has no explicit shutdown; the channel closes when the boxed
    // session is dropped by the caller.
    async fn close(&mut self) {
        debug!("Closing etcd session");
    }
}

fn convert_event(event: &etcd_client::Event) -> WatchEvent {
    let Some(kv) = event.kv() else {
        return WatchEvent::Unknown {
            kind: format!("{:?} without key-value", event.event_type()),
        };
    };

    match event.event_type() {
        EventType::Put => WatchEvent::Put {
            key: kv.key().to_vec(),
            value: kv.value().to_vec(),
        },
        EventType::Delete => WatchEvent::Delete {
            key: kv.key().to_vec(),
        },
    }
}

// ============================================================================
// In-memory store
// ============================================================================

#[derive(Default)]
struct MockState {
    entries: BTreeMap<Vec<u8>, Vec<u8>>,
    watchers: Vec<(Vec<u8>, mpsc::UnboundedSender<Vec<WatchEvent>>)>,
    failing_connects: usize,
    failing_gets: usize,
}

/// In-memory coordination store.
///
/// Writes made through [`MockStore::put`] and [`MockStore::delete`] are
/// delivered to open watches. [`MockStore::disconnect`] ends every open watch,
/// which is how a dropped store connection looks to the feed.
#[derive(Clone, Default)]
pub struct MockStore {
    state: Arc<Mutex<MockState>>,
    connects: Arc<AtomicU64>,
    gets: Arc<AtomicU64>,
    watches: Arc<AtomicU64>,
}

impl MockStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Write a key and notify watchers.
    pub fn put(&self, key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) {
        let key = key.into();
        let value = value.into();
        let mut state = self.lock();
        state.entries.insert(key.clone(), value.clone());
        state.notify(&key, WatchEvent::Put { key: key.clone(), value });
    }

    /// Remove a key and notify watchers.
    pub fn delete(&self, key: impl Into<Vec<u8>>) {
        let key = key.into();
        let mut state = self.lock();
        if state.entries.remove(&key).is_some() {
            state.notify(&key, WatchEvent::Delete { key: key.clone() });
        }
    }

    /// Send an arbitrary event to watchers of the key.
    pub fn inject(&self, key: impl Into<Vec<u8>>, event: WatchEvent) {
        let key = key.into();
        self.lock().notify(&key, event);
    }

    /// Write a key without notifying watchers, as if the event was missed.
    pub fn put_silently(&self, key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) {
        self.lock().entries.insert(key.into(), value.into());
    }

    /// End every open watch stream.
    pub fn disconnect(&self) {
        self.lock().watchers.clear();
    }

    /// Make the next `n` connection attempts fail.
    pub fn fail_next_connects(&self, n: usize) {
        self.lock().failing_connects = n;
    }

    /// Make the next `n` prefix listings fail.
    pub fn fail_next_gets(&self, n: usize) {
        self.lock().failing_gets = n;
    }

    pub fn connect_count(&self) -> u64 {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn get_count(&self) -> u64 {
        self.gets.load(Ordering::SeqCst)
    }

    pub fn watch_count(&self) -> u64 {
        self.watches.load(Ordering::SeqCst)
    }

    /// Number of watch streams currently open.
    pub fn active_watchers(&self) -> usize {
        let mut state = self.lock();
        state.watchers.retain(|(_, tx)| !tx.is_closed());
        state.watchers.len()
    }
}

impl MockState {
    fn notify(&mut self, key: &[u8], event: WatchEvent) {
        self.watchers.retain(|(prefix, tx)| {
            if !key.starts_with(prefix) {
                return !tx.is_closed();
            }
            tx.send(vec![event.clone()]).is_ok()
        });
    }
}

#[async_trait]
impl CoordinationStore for MockStore {
    async fn connect(&self) -> Result<Box<dyn StoreSession>> {
        self.connects.fetch_add(1, Ordering::SeqCst);

        {
            let mut state = self.lock();
            if state.failing_connects > 0 {
                state.failing_connects -= 1;
                return Err(UpstreamError::Store("mock store unavailable".to_string()));
            }
        }

        Ok(Box::new(MockSession {
            store: self.clone(),
        }))
    }

    fn endpoint(&self) -> &str {
        "mock://memory"
    }
}

struct MockSession {
    store: MockStore,
}

#[async_trait]
impl StoreSession for MockSession {
    async fn get_prefix(&mut self, prefix: &str) -> Result<Vec<KeyValue>> {
        self.store.gets.fetch_add(1, Ordering::SeqCst);

        let mut state = self.store.lock();
        if state.failing_gets > 0 {
            state.failing_gets -= 1;
            return Err(UpstreamError::Store("mock get failed".to_string()));
        }

        Ok(state
            .entries
            .iter()
            .filter(|(k, _)| k.starts_with(prefix.as_bytes()))
            .map(|(k, v)| KeyValue {
                key: k.clone(),
                value: v.clone(),
            })
            .collect())
    }

    async fn watch_prefix(&mut self, prefix: &str) -> Result<WatchStream> {
        self.store.watches.fetch_add(1, Ordering::SeqCst);

        let (tx, rx) = mpsc::unbounded_channel();
        self.store
            .lock()
            .watchers
            .push((prefix.as_bytes().to_vec(), tx));
        Ok(Box::pin(UnboundedReceiverStream::new(rx)))
    }

    async fn close(&mut self) {}
}
