//! plantlink-connector - serve one plant connection to monitors
//!
//! Subcommands:
//! - `plantlink-connector serve` - host a connection agent on the TCP transport
//! - `plantlink-connector simulate` - run a stand-in plant for demos and tests

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use plantlink_connector::{ConnectionAgent, ConnectorConfig, PlantSimulator, SimulatorConfig};
use plantlink_network::{serve_endpoint, Endpoint};

#[derive(Parser)]
#[command(name = "plantlink-connector")]
#[command(about = "Connector agent holding the TCP link to one plant")]
#[command(version)]
struct Cli {
    /// Path to connector.toml
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Accept monitor connections and answer bids
    Serve {
        /// Listen address, overrides the config file
        #[arg(short, long)]
        listen: Option<String>,

        /// Agent id, overrides the config file
        #[arg(long)]
        id: Option<String>,
    },

    /// Serve simulated plant documents
    Simulate {
        #[arg(short, long, default_value = "6001")]
        port: u16,

        /// Interval between documents in milliseconds
        #[arg(short, long, default_value = "1000")]
        interval_ms: u64,

        /// Variables as NAME=VALUE, comma separated
        #[arg(long, value_delimiter = ',')]
        variables: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    match cli.command {
        Commands::Serve { listen, id } => {
            let mut config = ConnectorConfig::load(cli.config.as_deref())?;
            if let Some(listen) = listen {
                config.listen_addr = listen;
            }
            if let Some(id) = id {
                config.agent_id = id;
            }
            serve(config).await
        }
        Commands::Simulate {
            port,
            interval_ms,
            variables,
        } => simulate(port, interval_ms, &variables).await,
    }
}

async fn serve(config: ConnectorConfig) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(&config.listen_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.listen_addr))?;
    let max_connections = config.max_connections;

    let agent = ConnectionAgent::new(config);
    tracing::info!(agent = %agent.id(), "Connector ready");

    let endpoint: Arc<dyn Endpoint> = Arc::new(agent.clone());
    let server = tokio::spawn(serve_endpoint(listener, endpoint, max_connections));

    tokio::select! {
        _ = agent.terminated() => {
            tracing::info!("Agent terminated, exiting");
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Interrupted, shutting down");
            agent.shutdown().await;
        }
    }

    server.abort();
    Ok(())
}

async fn simulate(port: u16, interval_ms: u64, variables: &[String]) -> Result<()> {
    let mut config = SimulatorConfig {
        interval: Duration::from_millis(interval_ms),
        ..Default::default()
    };
    if !variables.is_empty() {
        config.variables = variables
            .iter()
            .map(|entry| parse_variable(entry))
            .collect::<Result<_>>()?;
    }

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let simulator = PlantSimulator::bind(addr, config).await?;
    simulator.run().await?;
    Ok(())
}

fn parse_variable(entry: &str) -> Result<(String, f64)> {
    let (name, value) = entry
        .split_once('=')
        .with_context(|| format!("expected NAME=VALUE, got '{entry}'"))?;
    let value: f64 = value
        .trim()
        .parse()
        .with_context(|| format!("'{value}' is not a number"))?;
    Ok((name.trim().to_string(), value))
}
