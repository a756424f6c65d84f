//! Monitor configuration, loaded from TOML.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use plantlink_protocol::{
    ACCEPT_REPLY_MS, CANCEL_REPLY_MS, CFP_REPLY_MS, CONNECTOR_CONNECT_MS, DISCOVERY_RETRY_MS,
    SUBSCRIBE_REPLY_MS,
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    pub monitor_id: String,
    /// Remote connectors reachable over TCP. They form the static directory.
    pub connectors: Vec<ConnectorRoute>,
    pub timing: MonitorTiming,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        let suffix = uuid::Uuid::new_v4().simple().to_string();
        Self {
            monitor_id: format!("monitor-{}", &suffix[..8]),
            connectors: Vec::new(),
            timing: MonitorTiming::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectorRoute {
    pub id: String,
    /// `ip:port` the connector's `serve` command listens on.
    pub addr: String,
}

/// Reply windows and retry pacing for the negotiation exchange.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorTiming {
    pub discovery_retry_ms: u64,
    pub cfp_reply_ms: u64,
    pub accept_reply_ms: u64,
    pub subscribe_reply_ms: u64,
    pub cancel_reply_ms: u64,
    pub connector_connect_ms: u64,
}

impl Default for MonitorTiming {
    fn default() -> Self {
        Self {
            discovery_retry_ms: DISCOVERY_RETRY_MS,
            cfp_reply_ms: CFP_REPLY_MS,
            accept_reply_ms: ACCEPT_REPLY_MS,
            subscribe_reply_ms: SUBSCRIBE_REPLY_MS,
            cancel_reply_ms: CANCEL_REPLY_MS,
            connector_connect_ms: CONNECTOR_CONNECT_MS,
        }
    }
}

impl MonitorTiming {
    pub fn discovery_retry(&self) -> Duration {
        Duration::from_millis(self.discovery_retry_ms)
    }

    pub fn cfp_reply(&self) -> Duration {
        Duration::from_millis(self.cfp_reply_ms)
    }

    pub fn accept_reply(&self) -> Duration {
        Duration::from_millis(self.accept_reply_ms)
    }

    pub fn subscribe_reply(&self) -> Duration {
        Duration::from_millis(self.subscribe_reply_ms)
    }

    pub fn cancel_reply(&self) -> Duration {
        Duration::from_millis(self.cancel_reply_ms)
    }

    pub fn connector_connect(&self) -> Duration {
        Duration::from_millis(self.connector_connect_ms)
    }
}

impl MonitorConfig {
    pub fn from_toml_str(contents: &str) -> anyhow::Result<Self> {
        toml::from_str(contents).context("invalid monitor config")
    }

    /// `<config_dir>/plantlink/monitor.toml`
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("plantlink").join("monitor.toml"))
    }

    /// `<data_local_dir>/plantlink/monitor.log`, used while the console owns
    /// the terminal.
    pub fn log_path() -> Option<PathBuf> {
        dirs::data_local_dir().map(|dir| dir.join("plantlink").join("monitor.log"))
    }

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
        tracing::debug!(
            path = %path.display(),
            connectors = config.connectors.len(),
            "Monitor config loaded"
        );
        Ok(config)
    }
}
