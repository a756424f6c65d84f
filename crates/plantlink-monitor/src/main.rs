//! plantlink-monitor - watch live plant variables through connector agents
//!
//! By default the monitor reaches the connectors listed in monitor.toml over
//! TCP. `--local <n>` instead hosts `n` connectors in this process.

use std::fs::OpenOptions;
use std::io;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use plantlink_connector::{spawn_local_connector, ConnectorConfig};
use plantlink_monitor::{
    run_console, ConsoleSink, DisplaySink, LogSink, MonitorConfig, MonitorSupervisor,
};
use plantlink_network::{
    Directory, LocalBus, LocalDirectory, StaticDirectory, TcpTransport, Transport,
};
use plantlink_protocol::{AgentId, PLANT_CONNECTION_CAPABILITY};

#[derive(Parser)]
#[command(name = "plantlink-monitor")]
#[command(about = "Watch live plant variables through plantlink connectors")]
#[command(version)]
struct Cli {
    /// Path to monitor.toml
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log values instead of opening the terminal console
    #[arg(long)]
    headless: bool,

    /// Host this many connectors in-process instead of the configured ones
    #[arg(long, value_name = "N")]
    local: Option<usize>,

    /// Plant to watch at startup (host:port). Repeatable.
    #[arg(short, long, value_name = "HOST:PORT")]
    watch: Vec<String>,

    /// Monitor id, overrides the config file
    #[arg(long)]
    id: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(!cli.headless);

    let mut config = MonitorConfig::load(cli.config.as_deref())?;
    if let Some(id) = cli.id {
        config.monitor_id = id;
    }

    let (transport, directory) = match cli.local {
        Some(count) => local_connectors(count)?,
        None => remote_connectors(&config)?,
    };

    let sink = ConsoleSink::new();
    let display: Arc<dyn DisplaySink> = if cli.headless {
        Arc::new(LogSink)
    } else {
        Arc::new(sink.clone())
    };

    let supervisor = MonitorSupervisor::new(
        AgentId::new(config.monitor_id.clone()),
        transport,
        directory,
        display,
        config.timing.clone(),
    );
    tracing::info!(monitor = %supervisor.monitor_id(), "Monitor ready");

    for target in &cli.watch {
        if let Err(e) = supervisor.start_monitoring_str(target) {
            tracing::warn!(target = %target, error = %e, "Cannot watch plant");
        }
    }

    if cli.headless {
        // No input surface in headless mode.
        supervisor.on_connection_surface_closed();
        tokio::select! {
            _ = supervisor.finished() => {}
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Interrupted, stopping sessions");
                supervisor.on_results_surface_closed();
            }
        }
    } else {
        run_console(supervisor.clone(), sink).await?;
    }

    tokio::select! {
        _ = supervisor.finished() => {
            tracing::info!("All sessions closed, exiting");
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::warn!(sessions = supervisor.session_count(), "Interrupted again, exiting with sessions open");
        }
    }
    Ok(())
}

/// Console mode writes logs to a file so they do not tear the TUI.
fn init_logging(console: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if !console {
        let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
        return;
    }

    let file = MonitorConfig::log_path().and_then(|path| {
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir).ok()?;
        }
        OpenOptions::new().create(true).append(true).open(path).ok()
    });
    match file {
        Some(file) => {
            let _ = tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_ansi(false)
                .with_writer(std::sync::Mutex::new(file))
                .try_init();
        }
        None => {
            let _ = tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(io::sink)
                .try_init();
        }
    }
}

fn local_connectors(count: usize) -> Result<(Arc<dyn Transport>, Arc<dyn Directory>)> {
    let bus = LocalBus::new();
    let directory: Arc<dyn Directory> = Arc::new(LocalDirectory::new());
    for index in 0..count {
        let config = ConnectorConfig {
            agent_id: format!("local-connector-{}", index + 1),
            ..Default::default()
        };
        spawn_local_connector(&bus, directory.clone(), config)
            .context("failed to start local connector")?;
    }
    tracing::info!(connectors = count, "Hosting local connectors");
    Ok((Arc::new(bus), directory))
}

fn remote_connectors(config: &MonitorConfig) -> Result<(Arc<dyn Transport>, Arc<dyn Directory>)> {
    let transport = TcpTransport::new(config.timing.connector_connect());
    let mut ids = Vec::with_capacity(config.connectors.len());
    for route in &config.connectors {
        let addr: SocketAddr = route
            .addr
            .parse()
            .with_context(|| format!("connector '{}' has invalid addr '{}'", route.id, route.addr))?;
        let id = AgentId::new(route.id.clone());
        transport.add_route(id.clone(), addr);
        ids.push(id);
    }
    if ids.is_empty() {
        tracing::warn!("No connectors configured; sessions will keep retrying discovery");
    }
    let directory = StaticDirectory::new(PLANT_CONNECTION_CAPABILITY, ids);
    Ok((Arc::new(transport), Arc::new(directory)))
}
