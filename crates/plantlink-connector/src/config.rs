//! Connector configuration, loaded from TOML.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use plantlink_protocol::{
    CONNECTING_MARGIN_MS, DEFAULT_ACCEPT_WAIT_MS, IDLE_MARGIN_MS, INGESTER_JOIN_GRACE_MS,
    PLANT_CONNECT_TIMEOUT_MS,
};

use crate::document::DocumentFormat;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectorConfig {
    /// Identity on the message bus and in the directory.
    pub agent_id: String,
    /// Where `plantlink-connector serve` accepts monitor connections.
    pub listen_addr: String,
    pub max_connections: usize,
    pub document: DocumentFormat,
    pub timing: ConnectorTiming,
}

impl Default for ConnectorConfig {
    fn default() -> Self {
        let suffix = uuid::Uuid::new_v4().simple().to_string();
        Self {
            agent_id: format!("connector-{}", &suffix[..8]),
            listen_addr: "127.0.0.1:7700".to_string(),
            max_connections: 64,
            document: DocumentFormat::default(),
            timing: ConnectorTiming::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectorTiming {
    pub connect_timeout_ms: u64,
    pub default_accept_wait_ms: u64,
    pub connecting_margin_ms: u64,
    pub idle_margin_ms: u64,
    pub ingester_join_grace_ms: u64,
}

impl Default for ConnectorTiming {
    fn default() -> Self {
        Self {
            connect_timeout_ms: PLANT_CONNECT_TIMEOUT_MS,
            default_accept_wait_ms: DEFAULT_ACCEPT_WAIT_MS,
            connecting_margin_ms: CONNECTING_MARGIN_MS,
            idle_margin_ms: IDLE_MARGIN_MS,
            ingester_join_grace_ms: INGESTER_JOIN_GRACE_MS,
        }
    }
}

impl ConnectorTiming {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn default_accept_wait(&self) -> Duration {
        Duration::from_millis(self.default_accept_wait_ms)
    }

    pub fn connecting_margin(&self) -> Duration {
        Duration::from_millis(self.connecting_margin_ms)
    }

    pub fn idle_margin(&self) -> Duration {
        Duration::from_millis(self.idle_margin_ms)
    }

    pub fn ingester_join_grace(&self) -> Duration {
        Duration::from_millis(self.ingester_join_grace_ms)
    }
}

impl ConnectorConfig {
    pub fn from_toml_str(contents: &str) -> anyhow::Result<Self> {
        toml::from_str(contents).context("invalid connector config")
    }

    /// `<config_dir>/plantlink/connector.toml`
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("plantlink").join("connector.toml"))
    }

    /// Load `explicit` if given, else the default path if it exists, else
    /// built-in defaults. An explicit path that cannot be read is an error.
    pub fn load(explicit: Option<&Path>) -> anyhow::Result<Self> {
        let path = match explicit {
            Some(path) => path.to_path_buf(),
            None => match Self::default_path().filter(|p| p.exists()) {
                Some(path) => path,
                None => return Ok(Self::default()),
            },
        };
        let contents = std::fs::read_to_string(&path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let config = Self::from_toml_str(&contents)
            .with_context(|| format!("failed to parse {}", path.display()))?;
        tracing::debug!(path = %path.display(), "Connector config loaded");
        Ok(config)
    }
}
