//! plantlink monitor - watches plant variables through connector agents.
//!
//! The [`MonitorSupervisor`] owns one [`NegotiationCoordinator`] per watched
//! plant address. Each coordinator discovers connectors, runs a bidding round,
//! subscribes to the winner and forwards value updates to a [`DisplaySink`].

pub mod config;
pub mod console;
pub mod coordinator;
pub mod display;
pub mod supervisor;

pub use config::{ConnectorRoute, MonitorConfig, MonitorTiming};
pub use console::{run_console, ConsoleSink};
pub use coordinator::NegotiationCoordinator;
pub use display::{DisplayEvent, DisplaySink, LogSink, RecordingSink};
pub use supervisor::{MonitorSupervisor, SessionInfo};

use plantlink_protocol::{PlantAddress, ProtocolError};

/// Errors surfaced by the monitor to its callers.
#[derive(Debug, thiserror::Error)]
pub enum MonitorError {
    #[error("monitoring of {0} has already begun")]
    AlreadyMonitoring(PlantAddress),

    #[error("no session with id '{0}'")]
    UnknownSession(String),

    #[error("connection surface is closed, no new sessions can start")]
    SupervisorClosed,

    #[error(transparent)]
    InvalidAddress(#[from] ProtocolError),
}
