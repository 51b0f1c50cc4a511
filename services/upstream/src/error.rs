//! Error types for upstream routing.

use std::io;

use relay_version::VersionError;
use thiserror::Error;

/// Errors produced while tracking, selecting, or connecting to upstream hosts.
#[derive(Debug, Error)]
pub enum UpstreamError {
    /// A version string is not `major.minor.patch`.
    #[error(transparent)]
    InvalidVersion(#[from] VersionError),

    /// A registry entry could not be decoded into a host record.
    #[error("invalid registry entry '{key}': {reason}")]
    Decode { key: String, reason: String },

    /// No backend is available for the request.
    #[error("no host")]
    NoHost,

    /// The coordination store could not be reached or answered with an error.
    #[error("coordination store error: {0}")]
    Store(String),

    /// Dialing a backend failed.
    #[error("connect to {addr} failed: {source}")]
    Connect {
        addr: String,
        #[source]
        source: io::Error,
    },

    /// The secure upgrade of a dialed connection failed.
    #[error("handshake with {addr} failed: {source}")]
    Handshake {
        addr: String,
        #[source]
        source: io::Error,
    },

    /// A configured host address did not resolve.
    #[error("resolve {addr} failed: {source}")]
    Resolve {
        addr: String,
        #[source]
        source: io::Error,
    },

    /// A resolve rule is malformed.
    #[error("invalid resolve rule: {0}")]
    InvalidRule(String),

    /// The post-connect hook rejected the connection.
    #[error("after-connect hook failed: {0}")]
    AfterConnect(String),
}

impl UpstreamError {
    /// Returns true if no backend could be chosen.
    pub fn is_no_host(&self) -> bool {
        matches!(self, UpstreamError::NoHost)
    }
}

impl From<etcd_client::Error> for UpstreamError {
    fn from(err: etcd_client::Error) -> Self {
        UpstreamError::Store(err.to_string())
    }
}

/// Result alias for upstream operations.
pub type Result<T, E = UpstreamError> = std::result::Result<T, E>;
