//! Upstream transport option and name resolve rule.

use std::fmt;

use regex::Regex;
use serde::Deserialize;

use crate::error::{Result, UpstreamError};

/// How a dialed backend connection is handed back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Transport {
    /// Raw TCP connection.
    #[default]
    Tcp,
    /// TCP upgraded through the secure session handshake.
    Scp,
}

impl Transport {
    /// Map a configured network name. Only `scp` requests the upgrade.
    pub fn from_name(name: &str) -> Self {
        if name == "scp" {
            Self::Scp
        } else {
            Self::Tcp
        }
    }

    pub fn requires_handshake(&self) -> bool {
        matches!(self, Self::Scp)
    }
}

impl fmt::Display for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tcp => f.write_str("tcp"),
            Self::Scp => f.write_str("scp"),
        }
    }
}

impl<'de> Deserialize<'de> for Transport {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let name = String::deserialize(deserializer)?;
        Ok(Self::from_name(&name))
    }
}

#[derive(Debug, Deserialize)]
struct RawResolveRule {
    #[serde(default)]
    prefix: String,
    #[serde(default)]
    suffix: String,
    #[serde(default)]
    port: String,
    #[serde(default)]
    pattern: Option<String>,
}

/// Builds backend addresses from a requested server name.
///
/// The host is `prefix + name + suffix`; names must match `pattern` when one
/// is configured.
#[derive(Debug, Clone, Deserialize)]
#[serde(try_from = "RawResolveRule")]
pub struct ResolveRule {
    prefix: String,
    suffix: String,
    port: String,
    pattern: Option<Regex>,
}

impl ResolveRule {
    /// Create a rule. Fails on an empty port or an invalid pattern.
    pub fn new(
        prefix: impl Into<String>,
        suffix: impl Into<String>,
        port: impl Into<String>,
        pattern: Option<&str>,
    ) -> Result<Self> {
        let port = port.into();
        if port.is_empty() {
            return Err(UpstreamError::InvalidRule("no port".to_string()));
        }

        let pattern = match pattern.filter(|p| !p.is_empty()) {
            Some(p) => Some(
                Regex::new(p)
                    .map_err(|e| UpstreamError::InvalidRule(format!("pattern '{p}': {e}")))?,
            ),
            None => None,
        };

        Ok(Self {
            prefix: prefix.into(),
            suffix: suffix.into(),
            port,
            pattern,
        })
    }

    /// `host:port` for a server name. IPv6 literals are bracketed.
    pub fn full_name(&self, name: &str) -> String {
        let host = format!("{}{}{}", self.prefix, name, self.suffix);
        if host.contains(':') {
            format!("[{}]:{}", host, self.port)
        } else {
            format!("{}:{}", host, self.port)
        }
    }

    /// Whether a server name is acceptable. Without a pattern every name is.
    pub fn validate(&self, name: &str) -> bool {
        self.pattern.as_ref().is_none_or(|re| re.is_match(name))
    }

    pub fn port(&self) -> &str {
        &self.port
    }
}

impl TryFrom<RawResolveRule> for ResolveRule {
    type Error = UpstreamError;

    fn try_from(raw: RawResolveRule) -> Result<Self> {
        Self::new(raw.prefix, raw.suffix, raw.port, raw.pattern.as_deref())
    }
}

/// Transport plus the optional resolve fallback.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpstreamOption {
    #[serde(default, rename = "net")]
    pub transport: Transport,
    #[serde(default)]
    pub resolve: Option<ResolveRule>,
}

impl UpstreamOption {
    pub fn new(transport: Transport, resolve: Option<ResolveRule>) -> Self {
        Self { transport, resolve }
    }
}
