//! tcp2mqtt - Main Entry Point
//!
//! Bridges newline-delimited TCP clients onto an MQTT topic.

use clap::{ArgAction, Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;
use tcp2mqtt::config::{BridgeConfig, ConfigError, SessionMode};
use tcp2mqtt::observability::init_default_logging;
use tcp2mqtt::{serve, BridgeError, MqttPublisher};
use tokio::signal;
use tracing::{error, info};

/// Configuration file picked up from the working directory when no -c is given
const DEFAULT_CONFIG_FILE: &str = "tcp2mqtt.toml";

/// Line-oriented TCP to MQTT bridge
#[derive(Parser)]
#[command(name = "tcp2mqtt")]
#[command(about = "Republish newline-delimited TCP frames onto an MQTT topic")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE", env = "TCP2MQTT_CONFIG")]
    config: Option<PathBuf>,

    /// Interface to listen on
    #[arg(long)]
    host: Option<String>,

    /// Port to listen on
    #[arg(long)]
    port: Option<u16>,

    /// Close each connection after its first frame (`--close` alone means true)
    #[arg(
        long,
        value_name = "BOOL",
        action = ArgAction::Set,
        num_args = 0..=1,
        require_equals = true,
        default_missing_value = "true"
    )]
    close: Option<bool>,

    /// Topic to publish to
    #[arg(long)]
    topic: Option<String>,

    /// Broker URL, e.g. tcp://localhost:1883
    #[arg(long, value_name = "URL")]
    broker: Option<String>,

    /// Maximum number of concurrently served connections
    #[arg(long, value_name = "N")]
    max_connections: Option<usize>,

    /// Longest accepted frame in bytes
    #[arg(long, value_name = "BYTES")]
    max_frame_bytes: Option<usize>,

    /// Broker session mode: per-publish or shared
    #[arg(long, value_name = "MODE")]
    session: Option<SessionMode>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the bridge (default)
    Run,
    /// Validate configuration
    Config {
        /// Print the effective configuration as TOML
        #[arg(long)]
        show: bool,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    init_default_logging();

    info!("Starting tcp2mqtt v{}", env!("CARGO_PKG_VERSION"));

    let config = match load_configuration(&cli) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            process::exit(1);
        }
    };

    let result = match cli.command {
        None | Some(Commands::Run) => run_bridge(config).await,
        Some(Commands::Config { show }) => handle_config_command(&config, show),
    };

    if let Err(e) = result {
        error!("Command failed: {}", e);
        process::exit(1);
    }

    info!("Application shutdown complete");
}

/// File (explicit or default), then command-line overrides, then credentials
fn load_configuration(cli: &Cli) -> Result<BridgeConfig, ConfigError> {
    let mut config = match &cli.config {
        Some(path) => read_config_file(path)?,
        None if Path::new(DEFAULT_CONFIG_FILE).exists() => {
            read_config_file(Path::new(DEFAULT_CONFIG_FILE))?
        }
        None => BridgeConfig::default(),
    };

    apply_overrides(&mut config, cli);
    config
        .broker
        .resolve_credentials(|name| std::env::var(name).ok());
    config.validate()?;
    Ok(config)
}

fn read_config_file(path: &Path) -> Result<BridgeConfig, ConfigError> {
    info!("Loading configuration from: {}", path.display());
    BridgeConfig::load_from_file(path)
}

fn apply_overrides(config: &mut BridgeConfig, cli: &Cli) {
    if let Some(host) = &cli.host {
        config.listen.host = host.clone();
    }
    if let Some(port) = cli.port {
        config.listen.port = port;
    }
    if let Some(close) = cli.close {
        config.listen.close_connection = close;
    }
    if let Some(max_connections) = cli.max_connections {
        config.listen.max_connections = Some(max_connections);
    }
    if let Some(max_frame_bytes) = cli.max_frame_bytes {
        config.listen.max_frame_bytes = Some(max_frame_bytes);
    }
    if let Some(topic) = &cli.topic {
        config.broker.topic = topic.clone();
    }
    if let Some(broker) = &cli.broker {
        config.broker.url = broker.clone();
    }
    if let Some(session) = cli.session {
        config.broker.session = session;
    }
}

async fn run_bridge(config: BridgeConfig) -> Result<(), Box<dyn std::error::Error>> {
    info!(
        listen = %config.listen.address(),
        broker = %config.broker.url,
        topic = %config.broker.topic,
        close_connection = config.listen.close_connection,
        session = %config.broker.session,
        "Bridge configuration loaded"
    );

    let publisher = Arc::new(MqttPublisher::from_config(config.broker.clone()).await?);
    let config = Arc::new(config);

    let mut sigint = signal::unix::signal(signal::unix::SignalKind::interrupt())?;
    let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())?;

    let result: Result<(), BridgeError> = tokio::select! {
        result = serve(config, Arc::clone(&publisher)) => result,
        _ = sigint.recv() => {
            info!("Received SIGINT, shutting down");
            Ok(())
        }
        _ = sigterm.recv() => {
            info!("Received SIGTERM, shutting down");
            Ok(())
        }
    };

    publisher.shutdown().await;
    Ok(result?)
}

fn handle_config_command(
    config: &BridgeConfig,
    show: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    info!("Configuration is valid");
    if show {
        let rendered = toml::to_string_pretty(&config.redacted())?;
        println!("{rendered}");
    }
    Ok(())
}
