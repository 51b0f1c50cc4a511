pub mod config;
pub mod discovery;
pub mod error;
pub mod upstream;

pub use discovery::{
    CoordinationStore, EtcdStore, HostRecord, HostRegistry, HostTable, MockStore, RegistryFeed,
    WatchEvent,
};
pub use error::{Result, UpstreamError};
pub use upstream::{
    AfterConnect, BoxedConnection, ConnectionEstablisher, HandshakeConfig, Handshaker, Host,
    HostGroup, HostSelector, RemoteSession, ResolveRule, RouteConfig, Transport, UpstreamOption,
};
