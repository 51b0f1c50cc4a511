//! Backend connection establishment.
//!
//! For each client session: pick an address from the [`HostRegistry`] by the
//! client's declared version, dial it, upgrade it through the secure
//! handshake when the configured transport asks for one, then give the
//! after-connect hook the final say. A connection is only returned once every
//! step has succeeded; on failure the dialed socket is dropped, which closes
//! it.

use std::io;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tracing::{debug, error, warn};

use super::route::RouteConfig;
use crate::discovery::HostRegistry;
use crate::error::{Result, UpstreamError};

/// A bidirectional byte stream to a backend.
pub trait Connection: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> Connection for T {}

pub type BoxedConnection = Box<dyn Connection>;

/// The inbound client session a backend connection is made for.
pub trait RemoteSession: Send + Sync {
    /// Protocol version the client declared.
    fn version(&self) -> &str;

    /// Server identity the client asked for.
    fn target_server(&self) -> &str;
}

/// Parameters for the client side of the secure handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeConfig {
    pub target_server: String,
    /// Ask the backend not to trust forwarded client addresses.
    pub forbid_forward_ip: bool,
}

/// Client side of the secure session handshake.
#[async_trait]
pub trait Handshaker: Send + Sync {
    /// Upgrade a freshly dialed stream. The stream is consumed either way.
    async fn client_handshake(
        &self,
        stream: TcpStream,
        config: HandshakeConfig,
    ) -> io::Result<BoxedConnection>;
}

/// Hook run once a backend connection is fully established.
#[async_trait]
pub trait AfterConnect: Send + Sync {
    async fn after_connected(
        &self,
        conn: &mut BoxedConnection,
        remote: &dyn RemoteSession,
    ) -> Result<()>;
}

/// Hook that accepts every connection.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopAfterConnect;

#[async_trait]
impl AfterConnect for NoopAfterConnect {
    async fn after_connected(
        &self,
        _conn: &mut BoxedConnection,
        _remote: &dyn RemoteSession,
    ) -> Result<()> {
        Ok(())
    }
}

/// Opens backend connections for client sessions.
#[derive(Clone)]
pub struct ConnectionEstablisher {
    registry: Arc<HostRegistry>,
    routes: Arc<RouteConfig>,
    handshaker: Option<Arc<dyn Handshaker>>,
    after_connect: Arc<dyn AfterConnect>,
}

impl ConnectionEstablisher {
    pub fn new(registry: Arc<HostRegistry>, routes: Arc<RouteConfig>) -> Self {
        Self {
            registry,
            routes,
            handshaker: None,
            after_connect: Arc::new(NoopAfterConnect),
        }
    }

    pub fn with_handshaker(mut self, handshaker: Arc<dyn Handshaker>) -> Self {
        self.handshaker = Some(handshaker);
        self
    }

    pub fn with_after_connect(mut self, hook: Arc<dyn AfterConnect>) -> Self {
        self.after_connect = hook;
        self
    }

    /// Connect to a backend serving `remote`'s version.
    pub async fn new_connection(&self, remote: &dyn RemoteSession) -> Result<BoxedConnection> {
        let Some(addr) = self.registry.query(remote.version()).await else {
            warn!(version = %remote.version(), "No upstream host online for client version");
            return Err(UpstreamError::NoHost);
        };

        let stream = TcpStream::connect(&addr).await.map_err(|source| {
            error!(addr = %addr, error = %source, "Backend connection failed");
            UpstreamError::Connect {
                addr: addr.clone(),
                source,
            }
        })?;
        debug!(addr = %addr, version = %remote.version(), "Connected to backend");

        let mut conn = self.upgrade(stream, &addr, remote).await?;

        self.after_connect.after_connected(&mut conn, remote).await?;
        Ok(conn)
    }

    async fn upgrade(
        &self,
        stream: TcpStream,
        addr: &str,
        remote: &dyn RemoteSession,
    ) -> Result<BoxedConnection> {
        let option = self.routes.option();
        if !option.transport.requires_handshake() {
            return Ok(Box::new(stream));
        }

        let Some(handshaker) = &self.handshaker else {
            error!(addr = %addr, transport = %option.transport, "No handshaker configured");
            return Err(UpstreamError::Handshake {
                addr: addr.to_string(),
                source: io::Error::other("no handshaker configured"),
            });
        };

        let config = HandshakeConfig {
            target_server: remote.target_server().to_string(),
            forbid_forward_ip: true,
        };

        handshaker
            .client_handshake(stream, config)
            .await
            .map_err(|source| {
                error!(addr = %addr, error = %source, "Handshake failed");
                UpstreamError::Handshake {
                    addr: addr.to_string(),
                    source,
                }
            })
    }
}
