//! Value Objects - Immutable domain primitives
//!
//! Value objects are identified by their value rather than identity.
//! They are immutable and can be freely shared.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Identity of one configured backend: `host:port[:instance]`.
///
/// The key is the string form of a destination as it appears in the
/// configured destination list, and is what routers hand back from
/// `resolve`. The transport address is derived from `host` and `port` only.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DestinationKey {
    host: String,
    port: u16,
    instance: Option<String>,
}

impl DestinationKey {
    /// Create a key from its parts.
    pub fn new(host: impl Into<String>, port: u16, instance: Option<String>) -> Self {
        Self {
            host: host.into(),
            port,
            instance: instance.filter(|i| !i.is_empty()),
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn instance(&self) -> Option<&str> {
        self.instance.as_deref()
    }

    /// Address to connect to, suitable for `TcpStream::connect`.
    pub fn socket_addr(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}

impl fmt::Display for DestinationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.instance {
            Some(instance) => write!(f, "{}:{}:{}", self.host, self.port, instance),
            None => write!(f, "{}:{}", self.host, self.port),
        }
    }
}

/// Error returned when a destination spec is not `host:port[:instance]`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid destination '{0}', expected host:port[:instance]")]
pub struct InvalidDestination(pub String);

impl FromStr for DestinationKey {
    type Err = InvalidDestination;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let spec = s.trim();
        let mut parts = spec.split(':');
        let host = parts.next().filter(|h| !h.is_empty());
        let port = parts.next().and_then(|p| p.parse::<u16>().ok());
        let instance = parts.next().map(str::to_string);

        match (host, port, parts.next()) {
            (Some(host), Some(port), None) if port != 0 => {
                Ok(DestinationKey::new(host, port, instance))
            }
            _ => Err(InvalidDestination(s.to_string())),
        }
    }
}

impl TryFrom<String> for DestinationKey {
    type Error = InvalidDestination;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<DestinationKey> for String {
    fn from(key: DestinationKey) -> Self {
        key.to_string()
    }
}

/// Connection state of a destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No usable connection; a reconnect is pending or in progress
    Disconnected,
    /// Connected and able to drain
    Connected,
}

impl ConnectionState {
    pub(crate) fn as_u8(self) -> u8 {
        match self {
            ConnectionState::Disconnected => 0,
            ConnectionState::Connected => 1,
        }
    }

    pub(crate) fn from_u8(v: u8) -> Self {
        match v {
            1 => ConnectionState::Connected,
            _ => ConnectionState::Disconnected,
        }
    }
}

impl Default for ConnectionState {
    fn default() -> Self {
        Self::Disconnected
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "disconnected"),
            ConnectionState::Connected => write!(f, "connected"),
        }
    }
}
