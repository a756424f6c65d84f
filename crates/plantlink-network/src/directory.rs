//! Capability directory used to discover connectors.

use indexmap::IndexMap;
use parking_lot::RwLock;

use plantlink_protocol::AgentId;

use crate::NetworkError;

/// Lookup of agents by advertised capability.
pub trait Directory: Send + Sync {
    /// Agents advertising `capability`, in registration order.
    fn find(&self, capability: &str) -> Result<Vec<AgentId>, NetworkError>;

    fn register(&self, agent: &AgentId, capability: &str) -> Result<(), NetworkError>;

    /// Remove every registration of `agent`. Unknown agents are not an error.
    fn deregister(&self, agent: &AgentId) -> Result<(), NetworkError>;
}

/// In-memory directory shared by agents in one process.
#[derive(Default)]
pub struct LocalDirectory {
    entries: RwLock<IndexMap<AgentId, Vec<String>>>,
}

impl LocalDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

impl Directory for LocalDirectory {
    fn find(&self, capability: &str) -> Result<Vec<AgentId>, NetworkError> {
        Ok(self
            .entries
            .read()
            .iter()
            .filter(|(_, caps)| caps.iter().any(|c| c == capability))
            .map(|(id, _)| id.clone())
            .collect())
    }

    fn register(&self, agent: &AgentId, capability: &str) -> Result<(), NetworkError> {
        let mut entries = self.entries.write();
        let caps = entries.entry(agent.clone()).or_default();
        if !caps.iter().any(|c| c == capability) {
            caps.push(capability.to_string());
        }
        tracing::info!(agent = %agent, capability, "Registered in directory");
        Ok(())
    }

    fn deregister(&self, agent: &AgentId) -> Result<(), NetworkError> {
        if self.entries.write().shift_remove(agent).is_some() {
            tracing::info!(agent = %agent, "Deregistered from directory");
        }
        Ok(())
    }
}

/// Fixed directory built from configuration. Every listed agent advertises
/// one capability; registrations from remote agents are ignored.
pub struct StaticDirectory {
    capability: String,
    agents: Vec<AgentId>,
}

impl StaticDirectory {
    pub fn new(capability: impl Into<String>, agents: Vec<AgentId>) -> Self {
        Self {
            capability: capability.into(),
            agents,
        }
    }
}

impl Directory for StaticDirectory {
    fn find(&self, capability: &str) -> Result<Vec<AgentId>, NetworkError> {
        if capability == self.capability {
            Ok(self.agents.clone())
        } else {
            Ok(Vec::new())
        }
    }

    fn register(&self, agent: &AgentId, capability: &str) -> Result<(), NetworkError> {
        tracing::debug!(agent = %agent, capability, "Static directory ignores registration");
        Ok(())
    }

    fn deregister(&self, agent: &AgentId) -> Result<(), NetworkError> {
        tracing::debug!(agent = %agent, "Static directory ignores deregistration");
        Ok(())
    }
}
