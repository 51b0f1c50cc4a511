//! Statically configured upstream hosts.
//!
//! Hosts are published as one immutable [`RouteSnapshot`] behind an
//! `ArcSwap`: an update builds and resolves the complete snapshot first and
//! then swaps it in, so readers see either the old or the new host set, never
//! a mix.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use arc_swap::ArcSwap;
use serde::{Deserialize, Deserializer};
use tokio::net::lookup_host;
use tracing::{debug, info};

use super::option::UpstreamOption;
use crate::error::{Result, UpstreamError};

/// Weight given to hosts configured without one.
pub const DEFAULT_WEIGHT: u32 = 100;

/// A configured backend server.
#[derive(Debug, Clone, Deserialize)]
pub struct Host {
    #[serde(default)]
    pub name: String,
    pub addr: String,
    /// Selection weight; 0 means unspecified.
    #[serde(default, deserialize_with = "deserialize_weight")]
    pub weight: u32,
    #[serde(skip)]
    socket_addrs: Vec<SocketAddr>,
}

impl Host {
    pub fn new(name: impl Into<String>, addr: impl Into<String>, weight: u32) -> Self {
        Self {
            name: name.into(),
            addr: addr.into(),
            weight,
            socket_addrs: Vec::new(),
        }
    }

    pub(crate) fn resolved(name: &str, addr: String, socket_addrs: Vec<SocketAddr>) -> Self {
        Self {
            name: name.to_string(),
            addr,
            weight: DEFAULT_WEIGHT,
            socket_addrs,
        }
    }

    /// Addresses `addr` resolved to when the host was published.
    pub fn socket_addrs(&self) -> &[SocketAddr] {
        &self.socket_addrs
    }
}

// Non-positive and null weights read as unspecified; oversized ones saturate.
fn deserialize_weight<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u32, D::Error> {
    let weight = Option::<i64>::deserialize(deserializer)?.unwrap_or_default();
    if weight <= 0 {
        Ok(0)
    } else {
        Ok(u32::try_from(weight).unwrap_or(u32::MAX))
    }
}

/// Hosts sharing a selection pool, with their summed weight.
#[derive(Debug, Clone, Default)]
pub struct HostGroup {
    hosts: Vec<Arc<Host>>,
    total_weight: u64,
}

impl HostGroup {
    fn push(&mut self, host: Arc<Host>) {
        self.total_weight += u64::from(host.weight);
        self.hosts.push(host);
    }

    pub fn hosts(&self) -> &[Arc<Host>] {
        &self.hosts
    }

    pub fn total_weight(&self) -> u64 {
        self.total_weight
    }

    pub fn len(&self) -> usize {
        self.hosts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hosts.is_empty()
    }
}

impl FromIterator<Host> for HostGroup {
    fn from_iter<I: IntoIterator<Item = Host>>(iter: I) -> Self {
        let mut group = Self::default();
        for host in iter {
            group.push(Arc::new(host));
        }
        group
    }
}

/// Immutable view of the routing configuration.
#[derive(Debug, Clone, Default)]
pub struct RouteSnapshot {
    option: Arc<UpstreamOption>,
    all: HostGroup,
    by_name: HashMap<String, HostGroup>,
}

impl RouteSnapshot {
    pub fn option(&self) -> &UpstreamOption {
        &self.option
    }

    /// Every configured host.
    pub fn all(&self) -> &HostGroup {
        &self.all
    }

    /// Hosts configured under a name.
    pub fn by_name(&self, name: &str) -> Option<&HostGroup> {
        self.by_name.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.by_name.keys().map(String::as_str)
    }
}

/// Hot-swappable routing configuration.
#[derive(Debug)]
pub struct RouteConfig {
    snapshot: ArcSwap<RouteSnapshot>,
}

impl RouteConfig {
    /// Empty configuration with the default option.
    pub fn new() -> Self {
        Self {
            snapshot: ArcSwap::from_pointee(RouteSnapshot::default()),
        }
    }

    /// Current snapshot.
    pub fn snapshot(&self) -> Arc<RouteSnapshot> {
        self.snapshot.load_full()
    }

    /// Current option.
    pub fn option(&self) -> Arc<UpstreamOption> {
        Arc::clone(&self.snapshot.load().option)
    }

    /// Replace the option, keeping the current hosts.
    pub fn set_option(&self, option: UpstreamOption) {
        let option = Arc::new(option);
        self.snapshot.rcu(|current| RouteSnapshot {
            option: Arc::clone(&option),
            all: current.all.clone(),
            by_name: current.by_name.clone(),
        });
        debug!(transport = %option.transport, "Upstream option updated");
    }

    /// Resolve `hosts` and publish them together with `option`.
    ///
    /// Fails with [`UpstreamError::NoHost`] when the list is empty and no
    /// resolve rule is configured. Any host that does not resolve fails the
    /// whole update and leaves the current snapshot in place.
    pub async fn update_hosts(&self, option: UpstreamOption, hosts: Vec<Host>) -> Result<()> {
        if option.resolve.is_none() && hosts.is_empty() {
            return Err(UpstreamError::NoHost);
        }

        let mut all = HostGroup::default();
        let mut by_name: HashMap<String, HostGroup> = HashMap::new();

        for mut host in hosts {
            host.socket_addrs = resolve(&host.addr).await?;
            if host.weight == 0 {
                host.weight = DEFAULT_WEIGHT;
            }

            let host = Arc::new(host);
            if !host.name.is_empty() {
                by_name
                    .entry(host.name.clone())
                    .or_default()
                    .push(Arc::clone(&host));
            }
            all.push(host);
        }

        let host_count = all.len();
        let name_count = by_name.len();
        self.snapshot.store(Arc::new(RouteSnapshot {
            option: Arc::new(option),
            all,
            by_name,
        }));

        info!(host_count, name_count, "Upstream hosts updated atomically");
        Ok(())
    }
}

impl Default for RouteConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Resolve a `host:port` to every socket address it names.
pub(crate) async fn resolve(hostport: &str) -> Result<Vec<SocketAddr>> {
    let addrs: Vec<SocketAddr> = lookup_host(hostport)
        .await
        .map_err(|source| UpstreamError::Resolve {
            addr: hostport.to_string(),
            source,
        })?
        .collect();

    if addrs.is_empty() {
        return Err(UpstreamError::Resolve {
            addr: hostport.to_string(),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "no addresses"),
        });
    }

    Ok(addrs)
}
