//! Upstream selection and connection establishment.
//!
//! Two routing strategies live here:
//! - [`ConnectionEstablisher`] routes by client version through the
//!   discovery registry. This is the path client sessions take.
//! - [`RouteConfig`] and [`HostSelector`] route by server name over a
//!   statically configured host list, with an optional DNS resolve rule.

mod connector;
mod option;
mod route;
mod selector;

pub use connector::{
    AfterConnect, BoxedConnection, Connection, ConnectionEstablisher, HandshakeConfig, Handshaker,
    NoopAfterConnect, RemoteSession,
};
pub use option::{ResolveRule, Transport, UpstreamOption};
pub use route::{Host, HostGroup, RouteConfig, RouteSnapshot, DEFAULT_WEIGHT};
pub use selector::{select_from_group, HostSelector};
