//! Weighted host selection over the static route configuration.

use std::sync::Arc;

use rand::Rng;
use tracing::{debug, error};

use super::option::ResolveRule;
use super::route::{resolve, Host, HostGroup, RouteConfig};

/// Draw a member with probability proportional to its weight.
pub fn select_from_group(group: &HostGroup) -> Option<Arc<Host>> {
    if group.is_empty() || group.total_weight() == 0 {
        return None;
    }

    let mut draw = rand::rng().random_range(0..group.total_weight());
    for host in group.hosts() {
        let weight = u64::from(host.weight);
        if draw < weight {
            return Some(Arc::clone(host));
        }
        draw -= weight;
    }

    None
}

/// Resolve `name` through the rule. Results are not cached.
async fn select_by_resolver(name: &str, rule: &ResolveRule) -> Option<Arc<Host>> {
    if !rule.validate(name) {
        debug!(name = %name, "Name rejected by resolve pattern");
        return None;
    }

    let hostport = rule.full_name(name);
    match resolve(&hostport).await {
        Ok(addrs) => Some(Arc::new(Host::resolved(name, hostport, addrs))),
        Err(e) => {
            debug!(name = %name, error = %e, "Resolve fallback failed");
            None
        }
    }
}

/// Picks hosts from a [`RouteConfig`].
#[derive(Clone)]
pub struct HostSelector {
    routes: Arc<RouteConfig>,
}

impl HostSelector {
    pub fn new(routes: Arc<RouteConfig>) -> Self {
        Self { routes }
    }

    /// Pick among the hosts configured under `name`, falling back to the
    /// resolve rule when none are configured.
    pub async fn select_by_name(&self, name: &str) -> Option<Arc<Host>> {
        let snapshot = self.routes.snapshot();

        if let Some(host) = snapshot.by_name(name).and_then(select_from_group) {
            return Some(host);
        }

        let host = match &snapshot.option().resolve {
            Some(rule) => select_by_resolver(name, rule).await,
            None => None,
        };

        if host.is_none() {
            error!(name = %name, "Preferred name is malformed");
        }
        host
    }

    /// Pick among all configured hosts.
    pub fn select_any(&self) -> Option<Arc<Host>> {
        select_from_group(self.routes.snapshot().all())
    }

    /// Prefer hosts matching `name`, otherwise any host. An empty name only
    /// consults the full host list.
    pub async fn select_preferred(&self, name: &str) -> Option<Arc<Host>> {
        if !name.is_empty() {
            if let Some(host) = self.select_by_name(name).await {
                return Some(host);
            }
        }
        self.select_any()
    }
}
