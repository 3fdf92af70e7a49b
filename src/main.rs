use std::net::IpAddr;
use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use perimon::{DriverRegistry, Listener, MonitorConfig};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Perimon - device-control monitor for visual-field perimeters
#[derive(Parser, Debug)]
#[command(name = "perimon")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// YAML configuration file
    #[arg(short, long, env = "PERIMON_CONFIG")]
    config: Option<PathBuf>,

    /// Address to bind the command and camera ports to
    #[arg(long)]
    bind: Option<IpAddr>,

    /// Command port
    #[arg(short, long, env = "PERIMON_PORT")]
    port: Option<u16>,

    /// Camera viewer stream port
    #[arg(long)]
    camera_port: Option<u16>,

    /// Disable pupil tracking and the camera stream
    #[arg(long)]
    no_camera: bool,

    /// Simulate an observer responding this many ms after each stimulus
    #[arg(long)]
    simulate_observer: Option<u64>,
}

impl Cli {
    fn into_config(self) -> anyhow::Result<MonitorConfig> {
        let mut config = match &self.config {
            Some(path) => MonitorConfig::load(path)?,
            None => MonitorConfig::default(),
        };
        if let Some(bind) = self.bind {
            config.bind_address = bind;
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(port) = self.camera_port {
            config.camera.stream_port = Some(port);
        }
        if self.no_camera {
            config.camera.enabled = false;
        }
        if let Some(reaction) = self.simulate_observer {
            config.display.simulated_reaction_ms = Some(reaction);
        }
        config.validate()?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "perimon=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Cli::parse().into_config().context("invalid configuration")?;
    info!("Starting perimon v{}", VERSION);

    let registry = DriverRegistry::with_builtin();
    info!("Machines: {}", registry.names().collect::<Vec<_>>().join(", "));

    let listener = Listener::bind(config, registry).await.context("cannot open the command port")?;
    let server = listener.spawn();

    tokio::signal::ctrl_c().await.context("cannot listen for ctrl-c")?;
    info!("Shutting down");
    let sessions = server.shutdown().await?;
    info!("Served {} sessions", sessions);
    Ok(())
}
