//! JSON-lines transport over TCP.
//!
//! Every conversation gets its own connection. The requester writes one
//! envelope line and keeps the socket open while it still reads replies;
//! closing the socket ends the conversation on both sides.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;

use plantlink_protocol::{AgentId, PlantMessage};

use crate::transport::{BoxFuture, Endpoint, ReplyStream, Transport};
use crate::NetworkError;

/// Dials agents at statically configured socket addresses.
pub struct TcpTransport {
    routes: RwLock<HashMap<AgentId, SocketAddr>>,
    connect_timeout: Duration,
}

impl TcpTransport {
    pub fn new(connect_timeout: Duration) -> Self {
        Self {
            routes: RwLock::new(HashMap::new()),
            connect_timeout,
        }
    }

    pub fn add_route(&self, id: AgentId, addr: SocketAddr) {
        self.routes.write().insert(id, addr);
    }

    fn route(&self, id: &AgentId) -> Result<SocketAddr, NetworkError> {
        self.routes
            .read()
            .get(id)
            .copied()
            .ok_or_else(|| NetworkError::UnknownRecipient(id.clone()))
    }
}

impl Transport for TcpTransport {
    fn open_stream<'a>(
        &'a self,
        to: &'a AgentId,
        message: PlantMessage,
    ) -> BoxFuture<'a, Result<ReplyStream, NetworkError>> {
        Box::pin(async move {
            let addr = self.route(to)?;
            let stream = tokio::time::timeout(self.connect_timeout, TcpStream::connect(addr))
                .await
                .map_err(|_| {
                    NetworkError::Connection(format!(
                        "connect to {to} at {addr} timed out after {:?}",
                        self.connect_timeout
                    ))
                })??;

            let (reader, mut writer) = stream.into_split();
            let mut line = serde_json::to_string(&message)?;
            line.push('\n');
            writer.write_all(line.as_bytes()).await?;
            writer.flush().await?;

            let (tx, rx) = mpsc::unbounded_channel();
            let peer = to.clone();
            tokio::spawn(async move {
                // Holding the write half keeps the conversation open.
                let _writer = writer;
                let mut lines = BufReader::new(reader).lines();
                loop {
                    tokio::select! {
                        _ = tx.closed() => break,
                        next = lines.next_line() => match next {
                            Ok(Some(line)) => match serde_json::from_str::<PlantMessage>(&line) {
                                Ok(reply) => {
                                    if tx.send(reply).is_err() {
                                        break;
                                    }
                                }
                                Err(e) => {
                                    tracing::warn!(peer = %peer, error = %e, "Dropping malformed reply line");
                                }
                            },
                            Ok(None) => break,
                            Err(e) => {
                                tracing::debug!(peer = %peer, error = %e, "Reply stream read failed");
                                break;
                            }
                        }
                    }
                }
            });
            Ok(rx)
        })
    }
}

/// Accept connections on `listener` and dispatch every inbound envelope to
/// `endpoint`. Runs until the listener fails.
pub async fn serve_endpoint(
    listener: TcpListener,
    endpoint: Arc<dyn Endpoint>,
    max_connections: usize,
) -> Result<(), NetworkError> {
    let local = listener.local_addr()?;
    tracing::info!(addr = %local, "Message endpoint listening");

    let semaphore = Arc::new(tokio::sync::Semaphore::new(max_connections));

    loop {
        let (stream, peer_addr) = listener.accept().await?;
        tracing::debug!(peer = %peer_addr, "Peer connected");

        let endpoint = Arc::clone(&endpoint);
        let permit = semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|e| NetworkError::Connection(e.to_string()))?;

        tokio::spawn(async move {
            if let Err(e) = handle_connection(stream, endpoint).await {
                tracing::warn!(peer = %peer_addr, error = %e, "Peer connection error");
            }
            drop(permit);
        });
    }
}

/// Read envelope lines and write every reply back on the same socket.
async fn handle_connection(
    stream: TcpStream,
    endpoint: Arc<dyn Endpoint>,
) -> Result<(), NetworkError> {
    let (reader, mut writer) = stream.into_split();
    let (tx, mut rx) = mpsc::unbounded_channel::<PlantMessage>();

    let writer_task = tokio::spawn(async move {
        while let Some(reply) = rx.recv().await {
            let mut line = match serde_json::to_string(&reply) {
                Ok(line) => line,
                Err(e) => {
                    tracing::warn!(error = %e, "Failed to encode reply");
                    continue;
                }
            };
            line.push('\n');
            if writer.write_all(line.as_bytes()).await.is_err() || writer.flush().await.is_err() {
                break;
            }
        }
    });

    let mut lines = BufReader::new(reader).lines();
    let result = loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                let message: PlantMessage = match serde_json::from_str(&line) {
                    Ok(m) => m,
                    Err(e) => {
                        tracing::warn!(error = %e, "Dropping malformed envelope");
                        continue;
                    }
                };
                let endpoint = Arc::clone(&endpoint);
                let replies = tx.clone();
                tokio::spawn(async move {
                    endpoint.handle(message, replies).await;
                });
            }
            Ok(None) => break Ok(()),
            Err(e) => break Err(NetworkError::from(e)),
        }
    };

    // Peer hung up: drop the reply side so long-lived senders see it closed.
    writer_task.abort();
    result
}
