//! Hosting a connector inside a process that already runs a [`LocalBus`].

use std::sync::Arc;

use plantlink_network::{Directory, LocalBus};
use plantlink_protocol::PLANT_CONNECTION_CAPABILITY;

use crate::agent::ConnectionAgent;
use crate::config::ConnectorConfig;
use crate::ConnectorError;

/// Attach a new agent to `bus`, advertise it in `directory`, and withdraw
/// both once the agent terminates.
pub fn spawn_local_connector(
    bus: &LocalBus,
    directory: Arc<dyn Directory>,
    config: ConnectorConfig,
) -> Result<ConnectionAgent, ConnectorError> {
    let agent = ConnectionAgent::new(config);
    let id = agent.id().clone();

    bus.register(id.clone(), Arc::new(agent.clone()));
    if let Err(e) = directory.register(&id, PLANT_CONNECTION_CAPABILITY) {
        bus.deregister(&id);
        return Err(e.into());
    }
    tracing::info!(agent = %id, "Local connector started");

    let watcher = agent.clone();
    let bus = bus.clone();
    tokio::spawn(async move {
        watcher.terminated().await;
        if let Err(e) = directory.deregister(&id) {
            tracing::warn!(agent = %id, error = %e, "Directory deregistration failed");
        }
        bus.deregister(&id);
        tracing::info!(agent = %id, "Local connector withdrawn");
    });

    Ok(agent)
}
