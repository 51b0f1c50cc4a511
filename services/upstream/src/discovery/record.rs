//! Host records decoded from registry entries.

use relay_version::VersionKey;
use serde::Deserialize;
use serde_json::{Map, Value};

use crate::error::{Result, UpstreamError};

/// Weight assigned to records that register a non-positive weight.
pub const DEFAULT_RECORD_WEIGHT: u32 = 100;

/// Registry value as published by backends.
///
/// Keys are matched case-insensitively and `null` reads as the zero value.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RegistryValue {
    name: Option<String>,
    host: Option<String>,
    port: Option<u16>,
    weight: Option<i64>,
    version: Option<String>,
}

impl RegistryValue {
    fn parse(value: &[u8]) -> serde_json::Result<Self> {
        let raw: Value = serde_json::from_slice(value)?;
        serde_json::from_value(fold_keys(raw))
    }
}

// Lowercase object keys. An exactly lowercase key wins over its other-cased
// spellings.
fn fold_keys(value: Value) -> Value {
    let Value::Object(fields) = value else {
        return value;
    };

    let mut folded = Map::with_capacity(fields.len());
    for (key, field) in fields {
        let lower = key.to_ascii_lowercase();
        if key == lower || !folded.contains_key(&lower) {
            folded.insert(lower, field);
        }
    }
    Value::Object(folded)
}

/// A backend endpoint registered under one client version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostRecord {
    key: String,
    name: String,
    host: String,
    port: u16,
    weight: u32,
    version: String,
    version_key: VersionKey,
    address: String,
}

impl HostRecord {
    /// Create a record directly.
    pub fn new(
        key: impl Into<String>,
        name: impl Into<String>,
        host: impl Into<String>,
        port: u16,
        weight: i64,
        version: impl Into<String>,
    ) -> Result<Self> {
        let version = version.into();
        let version_key = VersionKey::parse(&version)?;
        let host = host.into();
        let address = format!("{}:{}", host, port);

        Ok(Self {
            key: key.into(),
            name: name.into(),
            host,
            port,
            weight: normalize_weight(weight),
            version,
            version_key,
            address,
        })
    }

    /// Decode a registry key/value pair.
    ///
    /// The value is a JSON object with `name`, `host`, `port`, `weight` and
    /// `version`; missing or `null` fields take their zero value, and an unusable
    /// `version` rejects the entry.
    pub fn decode(key: &[u8], value: &[u8]) -> Result<Self> {
        let key = String::from_utf8_lossy(key).into_owned();

        let raw = RegistryValue::parse(value).map_err(|e| UpstreamError::Decode {
            key: key.clone(),
            reason: e.to_string(),
        })?;

        Self::new(
            key.clone(),
            raw.name.unwrap_or_default(),
            raw.host.unwrap_or_default(),
            raw.port.unwrap_or_default(),
            raw.weight.unwrap_or_default(),
            raw.version.unwrap_or_default(),
        )
        .map_err(|e| UpstreamError::Decode {
            key,
            reason: e.to_string(),
        })
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn weight(&self) -> u32 {
        self.weight
    }

    /// Raw version string the record was registered under.
    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn version_key(&self) -> VersionKey {
        self.version_key
    }

    /// Dialable `host:port`.
    pub fn address(&self) -> &str {
        &self.address
    }

    pub(crate) fn set_address(&mut self, address: String) {
        self.address = address;
    }
}

fn normalize_weight(weight: i64) -> u32 {
    if weight <= 0 {
        DEFAULT_RECORD_WEIGHT
    } else {
        u32::try_from(weight).unwrap_or(u32::MAX)
    }
}

/// Strip the leading sentinel character from a raw registry key.
pub fn strip_key_sentinel(key: &str) -> &str {
    let mut chars = key.chars();
    chars.next();
    chars.as_str()
}
