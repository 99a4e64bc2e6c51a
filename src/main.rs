use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use camrelay::api::{CameraEndpoint, CredentialSource, StaticCredentialSource};
use camrelay::config;
use camrelay::session::{SessionSupervisor, StreamSession};

/// Log level for the application
#[derive(Debug, Clone, Copy, Default, ValueEnum)]
enum LogLevel {
    Error,
    Warn,
    #[default]
    Info,
    Debug,
    Trace,
}

/// camrelay command line arguments
#[derive(Parser, Debug)]
#[command(name = "camrelay")]
#[command(version, about = "Bridge cloud WebRTC cameras to local RTSP", long_about = None)]
struct CliArgs {
    /// Path to the configuration file
    #[arg(short = 'c', long, value_name = "FILE", default_value = "/etc/camrelay/camrelay.toml")]
    config: PathBuf,

    /// Log level (error, warn, info, debug, trace)
    #[arg(short = 'l', long, value_name = "LEVEL", default_value = "info")]
    log_level: LogLevel,

    /// Increase verbosity (-v for debug, -vv for trace)
    #[arg(short = 'v', long, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = CliArgs::parse();
    init_logging(args.log_level, args.verbose);

    tracing::info!("Starting camrelay v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!("Configuration file: {}", args.config.display());

    let config = config::load(&args.config)?;
    if config.cameras.is_empty() {
        anyhow::bail!("no cameras configured in {}", args.config.display());
    }

    let credentials: Arc<dyn CredentialSource> =
        Arc::new(StaticCredentialSource::new(config.signaling.to_credentials()));

    let supervisor = SessionSupervisor::new(Duration::from_secs(config.health_interval_secs));

    for camera in &config.cameras {
        if !camera.enabled {
            tracing::info!("Camera {} disabled in configuration", camera.name_uri);
            continue;
        }
        let endpoint = CameraEndpoint {
            name_uri: camera.name_uri.clone(),
            nickname: camera
                .nickname
                .clone()
                .unwrap_or_else(|| camera.name_uri.clone()),
            supports_webrtc: camera.webrtc,
        };
        if !endpoint.supports_webrtc {
            tracing::info!("Camera {} has no WebRTC support, skipping", endpoint.name_uri);
            continue;
        }

        let session = StreamSession::new(
            endpoint,
            config.stream.clone(),
            config.remux.clone(),
            credentials.clone(),
        );
        session.init();
        if let Err(e) = session.start() {
            tracing::warn!("Failed to start stream {}: {}", session.uri(), e);
        }
        supervisor.add(session);
    }

    supervisor.start();

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutdown signal received");

    supervisor.shutdown().await;
    tracing::info!("Shutdown complete");
    Ok(())
}

/// Initialize logging with tracing
fn init_logging(level: LogLevel, verbose_count: u8) {
    let effective_level = match verbose_count {
        0 => level,
        1 => LogLevel::Debug,
        _ => LogLevel::Trace,
    };

    let filter = match effective_level {
        LogLevel::Error => "camrelay=error",
        LogLevel::Warn => "camrelay=warn",
        LogLevel::Info => "camrelay=info",
        LogLevel::Debug => "camrelay=debug",
        LogLevel::Trace => "camrelay=trace",
    };

    // Environment variable takes highest priority
    let env_filter =
        tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into());

    if let Err(err) = tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .try_init()
    {
        eprintln!("failed to initialize tracing: {}", err);
    }
}
