//! Node addresses used as registry keys

use percent_encoding::{utf8_percent_encode, NON_ALPHANUMERIC};
use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};

/// Network address of a sentinel or data node.
///
/// Compared and hashed by value. IPv6 hosts are stored without brackets and
/// displayed as `[host]:port`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeAddress {
    host: String,
    port: u16,
}

impl NodeAddress {
    #[must_use]
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    #[must_use]
    pub fn host(&self) -> &str {
        &self.host
    }

    #[must_use]
    pub const fn port(&self) -> u16 {
        self.port
    }

    /// Build a `redis://` URL for this address.
    ///
    /// The password is percent-encoded so any character is accepted.
    #[must_use]
    pub fn redis_url(&self, password: Option<&str>, database: Option<i64>) -> String {
        let auth = password
            .map(|p| format!(":{}@", utf8_percent_encode(p, NON_ALPHANUMERIC)))
            .unwrap_or_default();
        let db = database.map(|d| format!("/{d}")).unwrap_or_default();
        format!("redis://{auth}{self}{db}")
    }
}

impl fmt::Display for NodeAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

impl FromStr for NodeAddress {
    type Err = Error;

    /// Parses `host:port` or `[ipv6]:port`.
    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        let invalid = |reason: &str| Error::Configuration(format!("Invalid address '{s}': {reason}"));

        let (host, port) = if let Some(rest) = s.strip_prefix('[') {
            rest.split_once("]:")
                .ok_or_else(|| invalid("expected [host]:port"))?
        } else {
            let (host, port) = s
                .rsplit_once(':')
                .ok_or_else(|| invalid("missing port"))?;
            if host.contains(':') {
                return Err(invalid("IPv6 hosts must be wrapped in brackets"));
            }
            (host, port)
        };

        if host.is_empty() {
            return Err(invalid("empty host"));
        }
        let port: u16 = port.parse().map_err(|_| invalid("port is not a number in 1-65535"))?;
        if port == 0 {
            return Err(invalid("port must not be 0"));
        }

        Ok(Self::new(host, port))
    }
}
