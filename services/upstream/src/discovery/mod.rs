//! Version-routed host discovery.
//!
//! ## Architecture
//!
//! ```text
//! Coordination store --(GET + WATCH)--> RegistryFeed --put/delete--> HostRegistry
//!                                                                        |
//!                                       ConnectionEstablisher --query----+
//! ```
//!
//! Backends publish a JSON record under a shared key prefix. The feed loads
//! the prefix once per session and then follows its changes; the registry
//! buckets records by the client version they serve.

mod feed;
mod record;
mod registry;
mod store;
mod table;

pub use feed::{RegistryFeed, DEFAULT_RETRY_INTERVAL};
pub use record::{strip_key_sentinel, HostRecord, DEFAULT_RECORD_WEIGHT};
pub use registry::HostRegistry;
pub use store::{
    CoordinationStore, EtcdStore, KeyValue, MockStore, StoreSession, WatchEvent, WatchStream,
    DEFAULT_DIAL_TIMEOUT,
};
pub use table::HostTable;
