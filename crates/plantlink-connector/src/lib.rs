//! plantlink connector - owns one plant connection and serves it to monitors.
//!
//! A [`ConnectionAgent`] answers bids for plant addresses, opens the plant
//! socket when it wins, and fans parsed snapshots out to subscribers. The
//! socket itself is read by a [`StreamIngester`] on a dedicated thread.

pub mod agent;
pub mod config;
pub mod document;
pub mod host;
pub mod ingester;
pub mod sim;

pub use agent::{AgentLifecycle, ConnectionAgent};
pub use config::{ConnectorConfig, ConnectorTiming};
pub use document::{parse_document, DocumentAssembler, DocumentFormat};
pub use host::spawn_local_connector;
pub use ingester::{IngestEvent, IngesterHandle, StreamIngester, TerminationCause};
pub use sim::{PlantSimulator, SimulatorConfig};

use plantlink_network::NetworkError;
use plantlink_protocol::{PlantAddress, ProtocolError};
use plantlink_state::StateError;

/// Errors raised inside a connector.
#[derive(Debug, thiserror::Error)]
pub enum ConnectorError {
    #[error("cannot connect to plant {address}: {reason}")]
    PlantConnect {
        address: PlantAddress,
        reason: String,
    },

    #[error("malformed plant document: {0}")]
    MalformedDocument(String),

    #[error("agent is shutting down")]
    ShuttingDown,

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error(transparent)]
    State(#[from] StateError),

    #[error(transparent)]
    Network(#[from] NetworkError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
