//! relay upstream service
//!
//! Keeps the version-routed host registry in sync with the coordination
//! store.
//!
//! This service:
//! - Loads every backend registered under the configured key prefix
//! - Follows registrations and removals through a prefix watch
//! - Reconnects with a fixed delay whenever the store goes away
//! - Optionally loads and resolves a static upstream host list
//!
//! The binary does not accept client sessions itself. A gateway embedding
//! `relay_upstream` shares the registry and route config with its
//! `ConnectionEstablisher` and `HostSelector`; here the static list is only
//! validated, resolved, and reported at startup.

use std::sync::Arc;

use anyhow::Result;
use relay_upstream::config::{Config, UpstreamFile};
use relay_upstream::{EtcdStore, HostRegistry, RegistryFeed};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env()?;

    // Initialize tracing (prefer RUST_LOG, fallback to RELAY_LOG_LEVEL)
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| config.log_level.clone().into()))
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("Starting relay upstream service");
    info!(
        etcd_host = %config.etcd_host,
        etcd_prefix = %config.etcd_prefix,
        retry_interval_ms = config.retry_interval.as_millis() as u64,
        upstream_file = ?config.upstream_file,
        "Configuration loaded"
    );

    let registry = Arc::new(HostRegistry::new());

    if let Some(path) = &config.upstream_file {
        let routes = UpstreamFile::load_routes(path).await?;
        let snapshot = routes.snapshot();
        let mut names: Vec<&str> = snapshot.names().collect();
        names.sort_unstable();
        info!(
            path = %path.display(),
            transport = %snapshot.option().transport,
            hosts = snapshot.all().len(),
            names = ?names,
            resolve_fallback = snapshot.option().resolve.is_some(),
            "Static upstream file validated"
        );
    }

    let store = EtcdStore::with_dial_timeout(config.etcd_host.clone(), config.etcd_dial_timeout);
    let feed = RegistryFeed::new(store, config.etcd_prefix.clone(), Arc::clone(&registry))
        .with_retry_interval(config.retry_interval);
    tokio::spawn(async move { feed.run().await });

    info!(etcd_host = %config.etcd_host, "Waiting for the first upstream host to come online");

    tokio::signal::ctrl_c().await?;
    warn!(
        tables = registry.len().await,
        "Shutdown signal received, exiting"
    );
    Ok(())
}
