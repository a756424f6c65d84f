//! Blocking plant reader.
//!
//! One named OS thread per plant socket. It is the only code that blocks on
//! the socket. It folds each document into the [`SharedLink`], publishes
//! every document after the first, and on a terminal condition fails all
//! subscribers before reporting back through the event callback.

use std::io::{BufRead, BufReader, Read};
use std::net::{Shutdown, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use plantlink_protocol::FailureReason;
use plantlink_state::{DocumentOutcome, LinkEvent, SharedLink, SubscriptionRegistry};

use crate::document::{parse_document, DocumentAssembler, DocumentFormat};
use crate::ConnectorError;

/// Why the read loop ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TerminationCause {
    /// Document failed to parse.
    Malformed(String),
    /// Document parsed to zero variables.
    EmptyDocument,
    /// Socket read failed or the plant closed it.
    PlantDisconnected(String),
    /// The owning agent asked the loop to stop.
    Shutdown,
}

impl TerminationCause {
    fn failure_reason(&self) -> Option<FailureReason> {
        match self {
            Self::Malformed(_) | Self::EmptyDocument => Some(FailureReason::ConnectorTerminated),
            Self::PlantDisconnected(_) => Some(FailureReason::PlantDisconnected),
            Self::Shutdown => None,
        }
    }

    fn link_event(&self) -> LinkEvent {
        match self {
            Self::Malformed(_) => LinkEvent::MalformedDocument,
            Self::EmptyDocument => LinkEvent::EmptyDocument,
            Self::PlantDisconnected(_) => LinkEvent::StreamLost,
            Self::Shutdown => LinkEvent::Shutdown,
        }
    }
}

/// Progress reported to the owning agent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestEvent {
    /// First document parsed; the link is Streaming.
    Streaming { variables: Vec<String> },
    /// A later document was published.
    Published { generation: u64, delivered: usize },
    /// The loop is about to exit.
    Terminated(TerminationCause),
}

pub type EventCallback = Arc<dyn Fn(IngestEvent) + Send + Sync>;

pub struct StreamIngester {
    reader: BufReader<TcpStream>,
    link: Arc<SharedLink>,
    registry: Arc<SubscriptionRegistry>,
    format: DocumentFormat,
    stopping: Arc<AtomicBool>,
    on_event: EventCallback,
}

impl StreamIngester {
    /// Start reading `stream` on a new thread named `name`.
    pub fn spawn(
        name: String,
        stream: TcpStream,
        link: Arc<SharedLink>,
        registry: Arc<SubscriptionRegistry>,
        format: DocumentFormat,
        on_event: EventCallback,
    ) -> Result<IngesterHandle, ConnectorError> {
        let control = stream.try_clone()?;
        let stopping = Arc::new(AtomicBool::new(false));

        let ingester = StreamIngester {
            reader: BufReader::new(stream),
            link,
            registry,
            format,
            stopping: Arc::clone(&stopping),
            on_event,
        };

        let join = thread::Builder::new()
            .name(name)
            .spawn(move || ingester.run())?;

        Ok(IngesterHandle {
            join: Some(join),
            control,
            stopping,
        })
    }

    fn run(mut self) {
        tracing::debug!("Plant reader started");
        let cause = self.read_loop();
        let cause = if self.stopping.load(Ordering::Acquire) {
            TerminationCause::Shutdown
        } else {
            cause
        };

        if let Some(reason) = cause.failure_reason() {
            self.link.terminate(cause.link_event());
            let notified = self.registry.fail_all(reason);
            tracing::error!(?cause, notified, "Plant stream terminated");
        } else {
            tracing::debug!("Plant reader stopped on request");
        }
        (self.on_event)(IngestEvent::Terminated(cause));
    }

    fn read_loop(&mut self) -> TerminationCause {
        let mut assembler = DocumentAssembler::with_limit(
            self.format.closing_marker.clone(),
            self.format.max_document_bytes,
        );
        let line_limit = self.format.max_document_bytes as u64 + 1;
        let mut raw = Vec::new();

        loop {
            raw.clear();
            match self.reader.by_ref().take(line_limit).read_until(b'\n', &mut raw) {
                Ok(0) => {
                    return TerminationCause::PlantDisconnected("plant closed the stream".into())
                }
                Ok(n) if n as u64 == line_limit && !raw.ends_with(b"\n") => {
                    return TerminationCause::Malformed(format!(
                        "line longer than {} bytes",
                        self.format.max_document_bytes
                    ))
                }
                Ok(_) => {}
                Err(e) => return TerminationCause::PlantDisconnected(e.to_string()),
            }

            // Plants send Latin-1 unit labels; undecodable bytes become U+FFFD.
            let line = String::from_utf8_lossy(&raw);
            let document = match assembler.push_line(line.trim_end_matches(['\r', '\n'])) {
                Ok(Some(document)) => document,
                Ok(None) => continue,
                Err(e) => return TerminationCause::Malformed(e.to_string()),
            };

            let pairs = match parse_document(&document, &self.format) {
                Ok(pairs) => pairs,
                Err(e) => return TerminationCause::Malformed(e.to_string()),
            };

            match self.link.apply_document(pairs) {
                Ok(DocumentOutcome::First(variables)) => {
                    tracing::info!(count = variables.len(), "First plant document parsed, streaming");
                    (self.on_event)(IngestEvent::Streaming { variables });
                }
                Ok(DocumentOutcome::Update(snapshot)) => {
                    let delivered = self.registry.publish(&snapshot.encode_values());
                    tracing::debug!(generation = snapshot.generation(), delivered, "Snapshot published");
                    (self.on_event)(IngestEvent::Published {
                        generation: snapshot.generation(),
                        delivered,
                    });
                }
                Ok(DocumentOutcome::Empty) => return TerminationCause::EmptyDocument,
                Err(e) => {
                    // Link already terminal: the agent is tearing down.
                    tracing::debug!(error = %e, "Link no longer accepts documents");
                    return TerminationCause::Shutdown;
                }
            }
        }
    }
}

/// Owner's handle on a running ingester thread.
pub struct IngesterHandle {
    join: Option<JoinHandle<()>>,
    control: TcpStream,
    stopping: Arc<AtomicBool>,
}

impl IngesterHandle {
    pub fn is_finished(&self) -> bool {
        self.join.as_ref().map_or(true, JoinHandle::is_finished)
    }

    /// Stop the reader: shut the socket's read side, wait up to `grace` for
    /// the thread, then release the socket. Returns `false` when the thread
    /// overran `grace` and was detached. Blocks the calling thread.
    pub fn shutdown(mut self, grace: Duration) -> bool {
        self.stopping.store(true, Ordering::Release);
        if let Err(e) = self.control.shutdown(Shutdown::Read) {
            tracing::debug!(error = %e, "Plant socket read side already closed");
        }

        let deadline = Instant::now() + grace;
        while !self.is_finished() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(10));
        }

        let joined = match self.join.take() {
            Some(join) if join.is_finished() => {
                let _ = join.join();
                true
            }
            Some(_) => {
                tracing::warn!(?grace, "Plant reader overran its grace period, detaching");
                false
            }
            None => true,
        };

        let _ = self.control.shutdown(Shutdown::Both);
        joined
    }
}
