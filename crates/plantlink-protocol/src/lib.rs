//! plantlink protocol - core types and message definitions
//!
//! Shared vocabulary for monitors and connectors: plant addresses, agent
//! identities, the connector connection state, the performative-tagged
//! message envelope and the legacy `content` payload encodings.

pub mod address;
pub mod constants;
pub mod error;
pub mod identity;
pub mod messages;
pub mod types;

pub use address::*;
pub use constants::*;
pub use error::*;
pub use identity::*;
pub use messages::*;
pub use types::*;
