//! Upstream service configuration.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::upstream::{Host, RouteConfig, UpstreamOption};

/// Service configuration (env-driven).
#[derive(Debug, Clone)]
pub struct Config {
    /// Coordination store endpoint (example: http://127.0.0.1:2379).
    pub etcd_host: String,

    /// Key prefix backends register under.
    pub etcd_prefix: String,

    /// Dial timeout for the coordination store.
    pub etcd_dial_timeout: Duration,

    /// Delay between failed registry feed sessions.
    pub retry_interval: Duration,

    /// Optional JSON file with statically configured upstream hosts.
    pub upstream_file: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(var: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let etcd_host = var("RELAY_ETCD_HOST")
            .filter(|v| !v.is_empty())
            .context("Missing coordination store endpoint. Set RELAY_ETCD_HOST.")?;

        let etcd_prefix = var("RELAY_ETCD_PREFIX")
            .filter(|v| !v.is_empty())
            .context("Missing registry key prefix. Set RELAY_ETCD_PREFIX.")?;

        let dial_timeout_ms: u64 = var("RELAY_ETCD_DIAL_TIMEOUT_MS")
            .map(|v| v.parse())
            .transpose()
            .context("RELAY_ETCD_DIAL_TIMEOUT_MS must be an integer (milliseconds).")?
            .unwrap_or(5000);

        let retry_interval_ms: u64 = var("RELAY_FEED_RETRY_INTERVAL_MS")
            .map(|v| v.parse())
            .transpose()
            .context("RELAY_FEED_RETRY_INTERVAL_MS must be an integer (milliseconds).")?
            .unwrap_or(1000);

        let upstream_file = var("RELAY_UPSTREAM_FILE")
            .filter(|v| !v.is_empty())
            .map(PathBuf::from);

        let log_level = var("RELAY_LOG_LEVEL").unwrap_or_else(|| "info".to_string());

        Ok(Self {
            etcd_host,
            etcd_prefix,
            etcd_dial_timeout: Duration::from_millis(dial_timeout_ms),
            retry_interval: Duration::from_millis(retry_interval_ms.max(50)),
            upstream_file,
            log_level,
        })
    }
}

/// Static upstream definition.
///
/// ```json
/// { "net": "scp",
///   "resolve": { "prefix": "game-", "suffix": ".svc", "port": "7000", "pattern": "^s\\d+$" },
///   "hosts": [ { "name": "s1", "addr": "10.0.0.1:7000", "weight": 10 } ] }
/// ```
#[derive(Debug, Deserialize)]
pub struct UpstreamFile {
    #[serde(flatten)]
    pub option: UpstreamOption,
    #[serde(default)]
    pub hosts: Vec<Host>,
}

impl UpstreamFile {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("Failed to read upstream file {}", path.display()))?;
        serde_json::from_str(&raw)
            .with_context(|| format!("Invalid upstream file {}", path.display()))
    }

    /// Load the file and publish it into a fresh [`RouteConfig`], resolving
    /// every host.
    pub async fn load_routes(path: &Path) -> Result<RouteConfig> {
        let upstream = Self::load(path)?;
        let routes = RouteConfig::new();
        routes
            .update_hosts(upstream.option, upstream.hosts)
            .await
            .with_context(|| format!("Unusable upstream hosts in {}", path.display()))?;
        Ok(routes)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::io::Write;

    use super::*;
    use crate::upstream::Transport;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn test_required_settings() {
        let err = Config::from_lookup(lookup(&[("RELAY_ETCD_PREFIX", "/hosts/")])).unwrap_err();
        assert!(err.to_string().contains("RELAY_ETCD_HOST"));

        let err = Config::from_lookup(lookup(&[
            ("RELAY_ETCD_HOST", "http://127.0.0.1:2379"),
            ("RELAY_ETCD_PREFIX", ""),
        ]))
        .unwrap_err();
        assert!(err.to_string().contains("RELAY_ETCD_PREFIX"));
    }

    #[test]
    fn test_defaults() {
        let config = Config::from_lookup(lookup(&[
            ("RELAY_ETCD_HOST", "http://127.0.0.1:2379"),
            ("RELAY_ETCD_PREFIX", "/hosts/"),
        ]))
        .unwrap();

        assert_eq!(config.etcd_dial_timeout, Duration::from_secs(5));
        assert_eq!(config.retry_interval, Duration::from_secs(1));
        assert!(config.upstream_file.is_none());
        assert_eq!(config.log_level, "info");
    }

    #[test]
    fn test_overrides_and_floor() {
        let config = Config::from_lookup(lookup(&[
            ("RELAY_ETCD_HOST", "http://127.0.0.1:2379"),
            ("RELAY_ETCD_PREFIX", "/hosts/"),
            ("RELAY_ETCD_DIAL_TIMEOUT_MS", "250"),
            ("RELAY_FEED_RETRY_INTERVAL_MS", "1"),
            ("RELAY_UPSTREAM_FILE", "/etc/relay/upstream.json"),
        ]))
        .unwrap();

        assert_eq!(config.etcd_dial_timeout, Duration::from_millis(250));
        assert_eq!(config.retry_interval, Duration::from_millis(50));
        assert_eq!(
            config.upstream_file,
            Some(PathBuf::from("/etc/relay/upstream.json"))
        );

        let err = Config::from_lookup(lookup(&[
            ("RELAY_ETCD_HOST", "http://127.0.0.1:2379"),
            ("RELAY_ETCD_PREFIX", "/hosts/"),
            ("RELAY_ETCD_DIAL_TIMEOUT_MS", "soon"),
        ]))
        .unwrap_err();
        assert!(err.to_string().contains("RELAY_ETCD_DIAL_TIMEOUT_MS"));
    }

    #[test]
    fn test_load_upstream_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"net":"scp","hosts":[{{"name":"s1","addr":"127.0.0.1:7001"}},{{"addr":"127.0.0.1:7002","weight":3}},{{"addr":"127.0.0.1:7003","weight":-1}}]}}"#
        )
        .unwrap();

        let upstream = UpstreamFile::load(file.path()).unwrap();
        assert_eq!(upstream.option.transport, Transport::Scp);
        assert!(upstream.option.resolve.is_none());
        assert_eq!(upstream.hosts.len(), 3);
        assert_eq!(upstream.hosts[0].weight, 0);
        assert_eq!(upstream.hosts[1].name, "");
        assert_eq!(upstream.hosts[1].weight, 3);
        assert_eq!(upstream.hosts[2].weight, 0);
    }

    #[tokio::test]
    async fn test_load_routes_publishes_hosts() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"net":"scp","hosts":[{{"name":"s1","addr":"127.0.0.1:7001","weight":-3}},{{"name":"s1","addr":"127.0.0.1:7002"}}]}}"#
        )
        .unwrap();

        let routes = UpstreamFile::load_routes(file.path()).await.unwrap();
        let snapshot = routes.snapshot();
        assert_eq!(snapshot.option().transport, Transport::Scp);
        assert_eq!(snapshot.all().len(), 2);
        assert_eq!(snapshot.by_name("s1").unwrap().total_weight(), 200);
    }

    #[tokio::test]
    async fn test_load_routes_rejects_empty_host_list() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"net":"tcp","hosts":[]}}"#).unwrap();

        let err = UpstreamFile::load_routes(file.path()).await.unwrap_err();
        assert!(err.to_string().contains("Unusable upstream hosts"));
    }

    #[test]
    fn test_load_upstream_file_missing() {
        let err = UpstreamFile::load(Path::new("/nonexistent/upstream.json")).unwrap_err();
        assert!(err.to_string().contains("Failed to read upstream file"));
    }
}
