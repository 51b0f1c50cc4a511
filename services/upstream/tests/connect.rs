
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use harness::{dead_port, eventually, FakeSession, PreambleHandshaker, RecordingHook, TcpEchoBackend};
use relay_upstream::{
    BoxedConnection, ConnectionEstablisher, HostRecord, HostRegistry, RouteConfig, Transport,
    UpstreamError, UpstreamOption,
};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio_test::assert_ok;

async fn register(registry: &HostRegistry, key: &str, port: u16, version: &str) {
    let record = HostRecord::new(key, "logic", "127.0.0.1", port, 10, version).unwrap();
    registry.put(record).await;
}

fn routes_with(transport: Transport) -> Arc<RouteConfig> {
    let routes = RouteConfig::new();
    routes.set_option(UpstreamOption::new(transport, None));
    Arc::new(routes)
}

fn expect_err(result: Result<BoxedConnection, UpstreamError>) -> UpstreamError {
    match result {
        Ok(_) => panic!("expected the connection attempt to fail"),
        Err(err) => err,
    }
}

async fn echo(conn: &mut BoxedConnection, payload: &[u8]) -> Vec<u8> {
    conn.write_all(payload).await.unwrap();
    let mut buf = vec![0u8; payload.len()];
    conn.read_exact(&mut buf).await.unwrap();
    buf
}

#[tokio::test]
async fn plain_connection_reaches_registered_backend() {
    let backend = TcpEchoBackend::spawn().await.unwrap();
    let registry = Arc::new(HostRegistry::new());
    register(&registry, "/hosts/a", backend.port(), "1.0.0").await;

    let establisher = ConnectionEstablisher::new(Arc::clone(&registry), routes_with(Transport::Tcp));
    let mut conn = assert_ok!(establisher.new_connection(&FakeSession::new("1.0.0", "s1")).await);

    assert_eq!(echo(&mut conn, b"ping").await, b"ping");
    assert_eq!(backend.connections.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn older_client_routes_to_nearest_lower_version() {
    let old = TcpEchoBackend::spawn().await.unwrap();
    let new = TcpEchoBackend::spawn().await.unwrap();
    let registry = Arc::new(HostRegistry::new());
    register(&registry, "/hosts/old", old.port(), "1.0.0").await;
    register(&registry, "/hosts/new", new.port(), "2.0.0").await;

    let establisher = ConnectionEstablisher::new(Arc::clone(&registry), routes_with(Transport::Tcp));
    let mut conn = assert_ok!(establisher.new_connection(&FakeSession::new("1.5.3", "s1")).await);

    assert_eq!(echo(&mut conn, b"v1").await, b"v1");
    assert_eq!(old.connections.load(Ordering::SeqCst), 1);
    assert_eq!(new.connections.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn empty_registry_yields_no_host() {
    let establisher =
        ConnectionEstablisher::new(Arc::new(HostRegistry::new()), routes_with(Transport::Tcp));

    let err = expect_err(establisher.new_connection(&FakeSession::new("1.0.0", "s1")).await);
    assert!(err.is_no_host());
}

#[tokio::test]
async fn version_below_every_table_yields_no_host() {
    let backend = TcpEchoBackend::spawn().await.unwrap();
    let registry = Arc::new(HostRegistry::new());
    register(&registry, "/hosts/a", backend.port(), "2.0.0").await;

    let establisher = ConnectionEstablisher::new(registry, routes_with(Transport::Tcp));
    let err = expect_err(establisher.new_connection(&FakeSession::new("1.0.0", "s1")).await);
    assert!(err.is_no_host());
    assert_eq!(backend.connections.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn unreachable_backend_reports_connect_error() {
    let port = dead_port().await;
    let registry = Arc::new(HostRegistry::new());
    register(&registry, "/hosts/a", port, "1.0.0").await;

    let establisher = ConnectionEstablisher::new(registry, routes_with(Transport::Tcp));
    let err = expect_err(establisher.new_connection(&FakeSession::new("1.0.0", "s1")).await);

    match err {
        UpstreamError::Connect { addr, .. } => assert_eq!(addr, format!("127.0.0.1:{port}")),
        other => panic!("expected connect error, got {other:?}"),
    }
}

#[tokio::test]
async fn secure_transport_runs_handshake_before_returning() {
    let backend = TcpEchoBackend::spawn().await.unwrap();
    let registry = Arc::new(HostRegistry::new());
    register(&registry, "/hosts/a", backend.port(), "1.0.0").await;

    let handshaker = Arc::new(PreambleHandshaker::default());
    let establisher = ConnectionEstablisher::new(registry, routes_with(Transport::Scp))
        .with_handshaker(handshaker.clone());

    let mut conn = assert_ok!(establisher.new_connection(&FakeSession::new("1.0.0", "s7")).await);

    // The backend echoes the preamble written during the handshake.
    let mut preamble = vec![0u8; "HELLO s7\n".len()];
    conn.read_exact(&mut preamble).await.unwrap();
    assert_eq!(preamble, b"HELLO s7\n");
    assert_eq!(echo(&mut conn, b"after").await, b"after");

    let seen = handshaker.seen();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].target_server, "s7");
    assert!(seen[0].forbid_forward_ip);
}

#[tokio::test]
async fn plain_transport_skips_handshake() {
    let backend = TcpEchoBackend::spawn().await.unwrap();
    let registry = Arc::new(HostRegistry::new());
    register(&registry, "/hosts/a", backend.port(), "1.0.0").await;

    let handshaker = Arc::new(PreambleHandshaker::default());
    let establisher = ConnectionEstablisher::new(registry, routes_with(Transport::Tcp))
        .with_handshaker(handshaker.clone());

    let mut conn = assert_ok!(establisher.new_connection(&FakeSession::new("1.0.0", "s1")).await);
    assert_eq!(echo(&mut conn, b"raw").await, b"raw");
    assert!(handshaker.seen().is_empty());
}

#[tokio::test]
async fn failed_handshake_closes_backend_socket() {
    let backend = TcpEchoBackend::spawn().await.unwrap();
    let registry = Arc::new(HostRegistry::new());
    register(&registry, "/hosts/a", backend.port(), "1.0.0").await;

    let hook = Arc::new(RecordingHook::default());
    let establisher = ConnectionEstablisher::new(registry, routes_with(Transport::Scp))
        .with_handshaker(Arc::new(PreambleHandshaker::failing()))
        .with_after_connect(hook.clone());

    let err = expect_err(establisher.new_connection(&FakeSession::new("1.0.0", "s1")).await);
    assert!(matches!(err, UpstreamError::Handshake { .. }));

    let closed = &backend.closed;
    assert!(
        eventually(Duration::from_secs(2), || async move {
            closed.load(Ordering::SeqCst) == 1
        })
        .await
    );
    assert_eq!(hook.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn secure_transport_without_handshaker_fails() {
    let backend = TcpEchoBackend::spawn().await.unwrap();
    let registry = Arc::new(HostRegistry::new());
    register(&registry, "/hosts/a", backend.port(), "1.0.0").await;

    let establisher = ConnectionEstablisher::new(registry, routes_with(Transport::Scp));
    let err = expect_err(establisher.new_connection(&FakeSession::new("1.0.0", "s1")).await);
    assert!(matches!(err, UpstreamError::Handshake { .. }));
}

#[tokio::test]
async fn hook_sees_session_and_can_reject() {
    let backend = TcpEchoBackend::spawn().await.unwrap();
    let registry = Arc::new(HostRegistry::new());
    register(&registry, "/hosts/a", backend.port(), "1.0.0").await;

    let accepting = Arc::new(RecordingHook::default());
    let establisher = ConnectionEstablisher::new(Arc::clone(&registry), routes_with(Transport::Tcp))
        .with_after_connect(accepting.clone());
    assert_ok!(establisher.new_connection(&FakeSession::new("1.0.3", "s1")).await);
    assert_eq!(accepting.calls.load(Ordering::SeqCst), 1);
    assert_eq!(*accepting.versions.lock().unwrap(), vec!["1.0.3".to_string()]);

    let rejecting = Arc::new(RecordingHook {
        reject: true,
        ..Default::default()
    });
    let establisher = ConnectionEstablisher::new(registry, routes_with(Transport::Tcp))
        .with_after_connect(rejecting.clone());
    let err = expect_err(establisher.new_connection(&FakeSession::new("1.0.0", "s1")).await);
    assert!(matches!(err, UpstreamError::AfterConnect(_)));
    assert_eq!(rejecting.calls.load(Ordering::SeqCst), 1);

    // Both the accepted (dropped above) and the rejected connection are closed.
    let closed = &backend.closed;
    assert!(
        eventually(Duration::from_secs(2), || async move {
            closed.load(Ordering::SeqCst) == 2
        })
        .await
    );
}
