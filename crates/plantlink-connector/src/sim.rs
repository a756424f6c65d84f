//! A stand-in plant: serves the line-framed cluster document over TCP.

use std::net::SocketAddr;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};

use crate::ConnectorError;

#[derive(Debug, Clone)]
pub struct SimulatorConfig {
    pub cluster_name: String,
    /// Variables and their starting values.
    pub variables: Vec<(String, f64)>,
    pub interval: Duration,
    /// Maximum random step applied to each value per document.
    pub jitter: f64,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            cluster_name: "Plant".to_string(),
            variables: vec![
                ("Temp".to_string(), 23.5),
                ("Pressure".to_string(), 101.3),
                ("Flow".to_string(), 12.0),
            ],
            interval: Duration::from_millis(1000),
            jitter: 0.25,
        }
    }
}

/// One cluster document, CRLF line endings, closing tag on its own line.
pub fn render_document(cluster_name: &str, values: &[(String, f64)]) -> String {
    let mut doc = String::new();
    doc.push_str("<Cluster>\r\n");
    doc.push_str(&format!("<Name>{cluster_name}</Name>\r\n"));
    doc.push_str(&format!("<NumElts>{}</NumElts>\r\n", values.len()));
    for (name, value) in values {
        doc.push_str("<DBL>\r\n");
        doc.push_str(&format!("<Name>{name}</Name>\r\n"));
        doc.push_str(&format!("<Val>{value:.5}</Val>\r\n"));
        doc.push_str("</DBL>\r\n");
    }
    doc.push_str("</Cluster>\r\n");
    doc
}

pub struct PlantSimulator {
    listener: TcpListener,
    config: SimulatorConfig,
}

impl PlantSimulator {
    pub async fn bind(addr: SocketAddr, config: SimulatorConfig) -> Result<Self, ConnectorError> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self { listener, config })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, ConnectorError> {
        Ok(self.listener.local_addr()?)
    }

    /// Serve every client its own random walk until the listener fails.
    pub async fn run(self) -> Result<(), ConnectorError> {
        tracing::info!(addr = %self.local_addr()?, "Plant simulator listening");
        loop {
            let (stream, peer) = self.listener.accept().await?;
            tracing::info!(peer = %peer, "Plant client connected");
            let config = self.config.clone();
            tokio::spawn(async move {
                if let Err(e) = feed(stream, config).await {
                    tracing::info!(peer = %peer, error = %e, "Plant client gone");
                }
            });
        }
    }
}

async fn feed(mut stream: TcpStream, config: SimulatorConfig) -> Result<(), ConnectorError> {
    let mut rng = StdRng::from_entropy();
    let mut values = config.variables.clone();
    let mut ticker = tokio::time::interval(config.interval);

    loop {
        ticker.tick().await;
        let doc = render_document(&config.cluster_name, &values);
        stream.write_all(doc.as_bytes()).await?;
        stream.flush().await?;

        if config.jitter > 0.0 {
            for (_, value) in values.iter_mut() {
                *value += rng.gen_range(-config.jitter..=config.jitter);
            }
        }
    }
}
