//! Session ownership and the monitor's lifecycle decision.
//!
//! The supervisor holds one entry per watched [`PlantAddress`]; the entry is
//! the only record of "already monitoring", so the duplicate check and the
//! insertion happen under one lock. Each entry carries the stop flag of its
//! coordinator task.
//!
//! The monitor is finished once no session remains and both user surfaces
//! (the connection input and the results view) are closed.

use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::Mutex;
use tokio::sync::watch;

use plantlink_bidding::SessionState;
use plantlink_network::{Directory, Transport};
use plantlink_protocol::{AgentId, ConnectorId, PlantAddress, ProtocolError};

use crate::config::MonitorTiming;
use crate::coordinator::NegotiationCoordinator;
use crate::display::DisplaySink;
use crate::MonitorError;

pub const DUPLICATE_SESSION_TEXT: &str = "Monitoring of that plant has already begun.";
pub const CONNECTION_SURFACE_CLOSED_TEXT: &str =
    "Connection surface closed, cannot establish new connections.";

/// Point-in-time view of one session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionInfo {
    pub id: String,
    pub address: PlantAddress,
    pub state: SessionState,
    pub owner: Option<ConnectorId>,
}

struct SessionEntry {
    info: SessionInfo,
    stop: watch::Sender<bool>,
}

struct SupervisorState {
    sessions: IndexMap<PlantAddress, SessionEntry>,
    connection_open: bool,
    results_open: bool,
}

impl SupervisorState {
    fn work_remains(&self) -> bool {
        !self.sessions.is_empty() || self.connection_open || self.results_open
    }
}

struct SupervisorInner {
    monitor_id: AgentId,
    transport: Arc<dyn Transport>,
    directory: Arc<dyn Directory>,
    display: Arc<dyn DisplaySink>,
    timing: MonitorTiming,
    state: Mutex<SupervisorState>,
    finished: watch::Sender<bool>,
}

/// Routes start/stop commands to coordinators and decides when the monitor
/// has nothing left to do. Cheap to clone.
#[derive(Clone)]
pub struct MonitorSupervisor {
    inner: Arc<SupervisorInner>,
}

impl MonitorSupervisor {
    pub fn new(
        monitor_id: AgentId,
        transport: Arc<dyn Transport>,
        directory: Arc<dyn Directory>,
        display: Arc<dyn DisplaySink>,
        timing: MonitorTiming,
    ) -> Self {
        let (finished, _) = watch::channel(false);
        Self {
            inner: Arc::new(SupervisorInner {
                monitor_id,
                transport,
                directory,
                display,
                timing,
                state: Mutex::new(SupervisorState {
                    sessions: IndexMap::new(),
                    connection_open: true,
                    results_open: false,
                }),
                finished,
            }),
        }
    }

    pub fn monitor_id(&self) -> &AgentId {
        &self.inner.monitor_id
    }

    pub(crate) fn transport(&self) -> Arc<dyn Transport> {
        self.inner.transport.clone()
    }

    pub(crate) fn directory(&self) -> &dyn Directory {
        self.inner.directory.as_ref()
    }

    pub(crate) fn display(&self) -> &dyn DisplaySink {
        self.inner.display.as_ref()
    }

    pub(crate) fn timing(&self) -> &MonitorTiming {
        &self.inner.timing
    }

    // -----------------------------------------------------------------------
    // Commands from the connection surface
    // -----------------------------------------------------------------------

    /// Start watching `host:port`. Returns the new session id.
    pub fn start_monitoring(&self, host: &str, port: u16) -> Result<String, MonitorError> {
        let address = PlantAddress::new(host, port).map_err(|e| self.invalid_address(e))?;
        self.start(address)
    }

    /// Same as [`start_monitoring`](Self::start_monitoring) for `host:port`
    /// text typed by the user.
    pub fn start_monitoring_str(&self, input: &str) -> Result<String, MonitorError> {
        let address: PlantAddress = input.parse().map_err(|e| self.invalid_address(e))?;
        self.start(address)
    }

    fn invalid_address(&self, error: ProtocolError) -> MonitorError {
        let detail = match &error {
            ProtocolError::InvalidAddress { reason, .. } => reason.clone(),
            other => other.to_string(),
        };
        self.display()
            .show_info(&format!("Invalid plant address: {detail}"));
        error.into()
    }

    fn start(&self, address: PlantAddress) -> Result<String, MonitorError> {
        let session_id = format!("{}_{}", address, self.inner.monitor_id);
        let stop_rx = {
            let mut state = self.inner.state.lock();
            if !state.connection_open {
                return Err(MonitorError::SupervisorClosed);
            }
            if state.sessions.contains_key(&address) {
                None
            } else {
                let (stop, stop_rx) = watch::channel(false);
                state.sessions.insert(
                    address.clone(),
                    SessionEntry {
                        info: SessionInfo {
                            id: session_id.clone(),
                            address: address.clone(),
                            state: SessionState::Discovering,
                            owner: None,
                        },
                        stop,
                    },
                );
                Some(stop_rx)
            }
        };

        let Some(stop_rx) = stop_rx else {
            tracing::info!(address = %address, "Duplicate monitoring request rejected");
            self.display().show_info(DUPLICATE_SESSION_TEXT);
            return Err(MonitorError::AlreadyMonitoring(address));
        };

        tracing::info!(session = %session_id, address = %address, "Monitoring started");
        let coordinator =
            NegotiationCoordinator::new(self.clone(), address, session_id.clone(), stop_rx);
        tokio::spawn(coordinator.run());
        Ok(session_id)
    }

    /// Flag a session as stopped by the user. The coordinator honours the
    /// flag at its next checkpoint.
    pub fn stop_monitoring(&self, session_id: &str) -> Result<(), MonitorError> {
        let state = self.inner.state.lock();
        let entry = state
            .sessions
            .values()
            .find(|entry| entry.info.id == session_id)
            .ok_or_else(|| MonitorError::UnknownSession(session_id.to_string()))?;
        entry.stop.send_replace(true);
        tracing::info!(session = %session_id, "Stop requested");
        Ok(())
    }

    pub fn stop_all(&self) {
        let state = self.inner.state.lock();
        for entry in state.sessions.values() {
            entry.stop.send_replace(true);
        }
        if !state.sessions.is_empty() {
            tracing::info!(sessions = state.sessions.len(), "Stop requested for every session");
        }
    }

    pub fn sessions(&self) -> Vec<SessionInfo> {
        self.inner
            .state
            .lock()
            .sessions
            .values()
            .map(|entry| entry.info.clone())
            .collect()
    }

    pub fn session_count(&self) -> usize {
        self.inner.state.lock().sessions.len()
    }

    // -----------------------------------------------------------------------
    // Surface lifecycle
    // -----------------------------------------------------------------------

    /// The user closed the address input; no new sessions can start.
    pub fn on_connection_surface_closed(&self) {
        let results_open = {
            let mut state = self.inner.state.lock();
            state.connection_open = false;
            state.results_open
        };
        tracing::info!(monitor = %self.inner.monitor_id, "Connection surface closed");
        if results_open {
            self.display().show_info(CONNECTION_SURFACE_CLOSED_TEXT);
        }
        self.check_finished();
    }

    /// The user closed the results view; every session is stopped.
    pub fn on_results_surface_closed(&self) {
        self.inner.state.lock().results_open = false;
        tracing::info!(monitor = %self.inner.monitor_id, "Results surface closed");
        self.stop_all();
        self.check_finished();
    }

    pub fn is_connection_surface_open(&self) -> bool {
        self.inner.state.lock().connection_open
    }

    pub fn is_results_surface_open(&self) -> bool {
        self.inner.state.lock().results_open
    }

    pub fn is_finished(&self) -> bool {
        *self.inner.finished.borrow()
    }

    /// Resolves once no session remains and both surfaces are closed.
    pub async fn finished(&self) {
        let mut rx = self.inner.finished.subscribe();
        let _ = rx.wait_for(|done| *done).await;
    }

    fn check_finished(&self) {
        if self.inner.state.lock().work_remains() {
            return;
        }
        if !self.inner.finished.send_replace(true) {
            tracing::info!(monitor = %self.inner.monitor_id, "Nothing left to monitor");
        }
    }

    // -----------------------------------------------------------------------
    // Coordinator callbacks
    // -----------------------------------------------------------------------

    pub(crate) fn record_state(&self, address: &PlantAddress, session_state: SessionState) {
        if let Some(entry) = self.inner.state.lock().sessions.get_mut(address) {
            entry.info.state = session_state;
        }
    }

    pub(crate) fn record_owner(&self, address: &PlantAddress, owner: &ConnectorId) {
        if let Some(entry) = self.inner.state.lock().sessions.get_mut(address) {
            entry.info.owner = Some(owner.clone());
        }
    }

    /// Show the results surface unless it is already visible.
    pub(crate) fn ensure_results_visible(&self) {
        let newly_opened = {
            let mut state = self.inner.state.lock();
            !std::mem::replace(&mut state.results_open, true)
        };
        if newly_opened {
            self.display().show_results();
        }
    }

    /// Drop the session for `address` once its coordinator reached Terminated.
    pub(crate) fn finish_session(&self, address: &PlantAddress) {
        let removed = self.inner.state.lock().sessions.shift_remove(address);
        if let Some(entry) = removed {
            tracing::info!(session = %entry.info.id, "Session finished");
        }
        self.check_finished();
    }
}
