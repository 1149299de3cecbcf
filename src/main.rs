//! Relay Supervisor - ffmpeg stream relays with live health and resource metrics.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use relay_supervisor::config::{ConfigError, ConfigLoader, SupervisorConfig};
use relay_supervisor::dashboard::{AppState, DashboardConfig, DashboardError, DashboardServer};
use relay_supervisor::display;
use relay_supervisor::supervisor::{RegistryError, StreamRegistry, StreamRequest, StreamState};

#[derive(Parser)]
#[command(
    name = "relay-supervisor",
    about = "Supervise ffmpeg RTMP to RTSP relays",
    version
)]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short = 'v', long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Path to a config file instead of the default search locations.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Transcoder binary to launch instead of the configured one.
    #[arg(long, global = true)]
    ffmpeg: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Relay one stream in the foreground until it ends or Ctrl-C.
    Relay {
        /// Source URI, e.g. rtmp://server/app/key.
        #[arg(long)]
        source: String,
        /// Relay host (defaults to the configured destination host).
        #[arg(long)]
        host: Option<String>,
        /// Relay port (defaults to the configured destination port).
        #[arg(long)]
        port: Option<u16>,
        /// Path on the relay server.
        #[arg(long, default_value = "live")]
        path: String,
        /// Seconds between status lines.
        #[arg(long, default_value_t = 2)]
        interval: u64,
    },
    /// Serve the HTTP control API until Ctrl-C.
    Serve {
        /// Address to bind (defaults to the configured dashboard host).
        #[arg(long)]
        host: Option<String>,
        /// Port to bind (defaults to the configured dashboard port).
        #[arg(long)]
        port: Option<u16>,
    },
}

#[derive(Debug, thiserror::Error)]
enum AppError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error(transparent)]
    Dashboard(#[from] DashboardError),
}

fn init_tracing(verbosity: u8) {
    let level = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();
}

fn load_config(
    path: Option<PathBuf>,
    ffmpeg: Option<PathBuf>,
) -> Result<SupervisorConfig, AppError> {
    let loader = path.map_or_else(ConfigLoader::new, ConfigLoader::with_path);
    let mut config = loader.load()?;
    if ffmpeg.is_some() {
        config.transcoder.binary = ffmpeg;
    }
    Ok(config)
}

/// Time `shutdown` waits for streams before killing them.
fn shutdown_timeout(registry: &StreamRegistry) -> Duration {
    registry.settings().stop_grace + registry.settings().reader_drain
}

async fn relay(
    config: &SupervisorConfig,
    source: String,
    host: Option<&str>,
    port: Option<u16>,
    path: &str,
    interval: u64,
) -> Result<ExitCode, AppError> {
    let registry = StreamRegistry::new(config.stream_settings()?);
    let destination = config.destination.resolve(host, port, path);
    let stream = registry.create(StreamRequest::new(source, destination))?;

    display::print_stream_start(
        stream.id().as_str(),
        stream.source_uri(),
        &stream.destination_uri(),
    );

    let mut ticker = tokio::time::interval(Duration::from_secs(interval.max(1)));
    let mut states = stream.subscribe();
    loop {
        tokio::select! {
            _ = ticker.tick() => display::print_stream_status(&stream.snapshot()),
            _ = states.wait_for(|state| state.is_terminal()) => break,
            _ = tokio::signal::ctrl_c() => {
                tracing::info!(stream_id = %stream.id(), "Interrupted, stopping relay");
                break;
            }
        }
    }

    registry.shutdown(shutdown_timeout(&registry)).await;

    let snapshot = stream.snapshot();
    display::print_stream_end(&snapshot);
    Ok(if snapshot.state == StreamState::Stopped {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

async fn serve(
    config: &SupervisorConfig,
    host: Option<String>,
    port: Option<u16>,
) -> Result<ExitCode, AppError> {
    let registry = Arc::new(StreamRegistry::new(config.stream_settings()?));

    let mut dashboard = DashboardConfig::from(&config.dashboard);
    if let Some(host) = host {
        dashboard.host = host;
    }
    if let Some(port) = port {
        dashboard.port = port;
    }

    let state = AppState::new(Arc::clone(&registry), config.destination.clone());
    let server = DashboardServer::new(state).with_config(dashboard);
    display::print_listening(&server.address());

    let cancel = CancellationToken::new();
    let signal = cancel.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl-C");
        }
        signal.cancel();
    });

    let served = server.run(cancel).await;
    registry.shutdown(shutdown_timeout(&registry)).await;
    served?;
    Ok(ExitCode::SUCCESS)
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let config = match load_config(cli.config, cli.ffmpeg) {
        Ok(config) => config,
        Err(e) => {
            display::print_error(&e.to_string());
            return ExitCode::FAILURE;
        }
    };

    let result = match cli.command {
        Commands::Relay {
            source,
            host,
            port,
            path,
            interval,
        } => relay(&config, source, host.as_deref(), port, &path, interval).await,
        Commands::Serve { host, port } => serve(&config, host, port).await,
    };

    match result {
        Ok(code) => code,
        Err(e) => {
            tracing::error!(error = %e, "Relay supervisor failed");
            display::print_error(&e.to_string());
            ExitCode::FAILURE
        }
    }
}
