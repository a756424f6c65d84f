//! Plant endpoint identity.
//!
//! A `PlantAddress` is both the negotiation key of a bidding round and the
//! dedup key for "already monitoring" checks, so equality is purely
//! structural. Its `Display` form (`host:port`) is the call-for-proposal and
//! accept payload.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::ProtocolError;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PlantAddress {
    host: String,
    port: u16,
}

impl PlantAddress {
    /// Build an address, rejecting an empty host or port 0.
    pub fn new(host: impl Into<String>, port: u16) -> Result<Self, ProtocolError> {
        let host = host.into();
        let trimmed = host.trim();
        if trimmed.is_empty() {
            return Err(ProtocolError::InvalidAddress {
                input: format!("{host}:{port}"),
                reason: "host is empty".into(),
            });
        }
        if trimmed.contains(char::is_whitespace) {
            return Err(ProtocolError::InvalidAddress {
                input: format!("{host}:{port}"),
                reason: "host contains whitespace".into(),
            });
        }
        if port == 0 {
            return Err(ProtocolError::InvalidAddress {
                input: format!("{host}:{port}"),
                reason: "port must be between 1 and 65535".into(),
            });
        }
        Ok(Self {
            host: trimmed.to_string(),
            port,
        })
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Payload form used in CFP and Accept messages.
    pub fn to_content(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for PlantAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Parses `host:port`, splitting at the first colon.
impl FromStr for PlantAddress {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (host, port) = s.trim().split_once(':').ok_or_else(|| {
            ProtocolError::InvalidAddress {
                input: s.to_string(),
                reason: "expected host:port".into(),
            }
        })?;
        let port: u16 = port.trim().parse().map_err(|_| ProtocolError::InvalidAddress {
            input: s.to_string(),
            reason: format!("'{}' is not a valid port", port.trim()),
        })?;
        PlantAddress::new(host, port)
    }
}
