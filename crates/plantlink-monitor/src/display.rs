//! Where sessions put what the user sees.

use std::time::{Duration, Instant};

use parking_lot::Mutex;

/// Display collaborator driven by the coordinators.
///
/// A channel is one session's panel of variables. Implementations must not
/// call back into the supervisor from these methods.
pub trait DisplaySink: Send + Sync {
    fn create_channel(&self, session_id: &str, display_id: &str, variables: &[String]);

    fn update_value(&self, session_id: &str, variable: &str, value: &str);

    fn remove_channel(&self, session_id: &str);

    /// General notice, e.g. a rejected command.
    fn show_info(&self, text: &str);

    /// The session ended abnormally.
    fn show_disconnect(&self, session_id: &str);

    /// Make the results surface visible. Called before the first channel is
    /// created and again after the user closed it.
    fn show_results(&self) {}
}

/// One call made on a [`RecordingSink`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisplayEvent {
    ChannelCreated {
        session_id: String,
        display_id: String,
        variables: Vec<String>,
    },
    ValueUpdated {
        session_id: String,
        variable: String,
        value: String,
    },
    ChannelRemoved {
        session_id: String,
    },
    Info(String),
    Disconnect {
        session_id: String,
    },
    ResultsShown,
}

/// Keeps every call in order. Used by tests and scripted runs.
#[derive(Default)]
pub struct RecordingSink {
    events: Mutex<Vec<DisplayEvent>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<DisplayEvent> {
        self.events.lock().clone()
    }

    pub fn count(&self, matches: impl Fn(&DisplayEvent) -> bool) -> usize {
        self.events.lock().iter().filter(|e| matches(e)).count()
    }

    /// Poll until `condition` holds over the recorded events or `timeout`
    /// passes. Returns whether it held.
    pub async fn wait_until(
        &self,
        timeout: Duration,
        condition: impl Fn(&[DisplayEvent]) -> bool,
    ) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if condition(self.events.lock().as_slice()) {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    fn push(&self, event: DisplayEvent) {
        self.events.lock().push(event);
    }
}

impl DisplaySink for RecordingSink {
    fn create_channel(&self, session_id: &str, display_id: &str, variables: &[String]) {
        self.push(DisplayEvent::ChannelCreated {
            session_id: session_id.to_string(),
            display_id: display_id.to_string(),
            variables: variables.to_vec(),
        });
    }

    fn update_value(&self, session_id: &str, variable: &str, value: &str) {
        self.push(DisplayEvent::ValueUpdated {
            session_id: session_id.to_string(),
            variable: variable.to_string(),
            value: value.to_string(),
        });
    }

    fn remove_channel(&self, session_id: &str) {
        self.push(DisplayEvent::ChannelRemoved {
            session_id: session_id.to_string(),
        });
    }

    fn show_info(&self, text: &str) {
        self.push(DisplayEvent::Info(text.to_string()));
    }

    fn show_disconnect(&self, session_id: &str) {
        self.push(DisplayEvent::Disconnect {
            session_id: session_id.to_string(),
        });
    }

    fn show_results(&self) {
        self.push(DisplayEvent::ResultsShown);
    }
}

/// Headless display: everything goes to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl DisplaySink for LogSink {
    fn create_channel(&self, session_id: &str, display_id: &str, variables: &[String]) {
        tracing::info!(
            session = %session_id,
            display = %display_id,
            variables = %variables.join(", "),
            "Channel opened"
        );
    }

    fn update_value(&self, session_id: &str, variable: &str, value: &str) {
        tracing::info!(session = %session_id, variable, value, "Value");
    }

    fn remove_channel(&self, session_id: &str) {
        tracing::info!(session = %session_id, "Channel closed");
    }

    fn show_info(&self, text: &str) {
        tracing::warn!("{text}");
    }

    fn show_disconnect(&self, session_id: &str) {
        tracing::warn!(session = %session_id, "Connection to plant lost");
    }
}
