use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;

use clap::{Parser, ValueEnum};
use tokio::sync::broadcast;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use rtcam::config::AppConfig;
use rtcam::state::AppState;
use rtcam::transform::TransformMode;
use rtcam::web;

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

/// rtcam command line arguments
#[derive(Parser, Debug)]
#[command(name = "rtcam")]
#[command(version, about = "WebRTC camera/replay signaling server", long_about = None)]
struct CliArgs {
    /// Listen address
    #[arg(short = 'a', long, value_name = "ADDRESS", default_value = "0.0.0.0")]
    address: IpAddr,

    /// HTTP port
    #[arg(short = 'p', long, value_name = "PORT", default_value_t = 8080)]
    port: u16,

    /// Write received media next to this path (.ivf video, .ogg audio)
    #[arg(long, value_name = "FILE")]
    record_to: Option<PathBuf>,

    /// Read outbound media from a file (.y4m or .wav) instead of the
    /// capture devices
    #[arg(long, value_name = "FILE")]
    play_from: Option<PathBuf>,

    /// Force a specific audio codec (e.g. audio/opus)
    #[arg(long, value_name = "MIME")]
    audio_codec: Option<String>,

    /// Force a specific video codec (e.g. video/VP8)
    #[arg(long, value_name = "MIME")]
    video_codec: Option<String>,

    /// Video transform applied to outbound frames
    #[arg(long, value_enum, default_value_t = TransformMode::None, ignore_case = true)]
    video_transform: TransformMode,

    /// Log level (error, warn, info, debug, trace)
    #[arg(short = 'l', long, value_name = "LEVEL", default_value = "info")]
    log_level: LogLevel,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = CliArgs::parse();

    init_logging(args.log_level);

    tracing::info!("Starting rtcam v{}", env!("CARGO_PKG_VERSION"));

    let config = AppConfig {
        bind_address: args.address,
        bind_port: args.port,
        record_to: args.record_to,
        play_from: args.play_from,
        audio_codec: args.audio_codec,
        video_codec: args.video_codec,
        video_transform: args.video_transform,
    };
    if let Some(ref path) = config.play_from {
        tracing::info!("Replay mode: sending media from {}", path.display());
    }
    if let Some(ref path) = config.record_to {
        tracing::info!("Recording inbound media next to {}", path.display());
    }
    tracing::info!("Video transform: {}", config.video_transform);

    let (shutdown_tx, _) = broadcast::channel::<()>(1);
    let state = AppState::new(config, shutdown_tx.clone());

    let app = web::create_router(state.clone());
    let addr = state.config.bind_addr();
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("Starting HTTP server on {}", addr);

    // Forward CTRL+C into the shutdown channel
    {
        let shutdown_tx = shutdown_tx.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("Shutdown signal received");
                let _ = shutdown_tx.send(());
            }
        });
    }

    let mut shutdown_rx = state.shutdown_signal();
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move {
        let _ = shutdown_rx.recv().await;
    })
    .await?;

    // Close every live session and wait for all closes before exiting.
    state.manager.shutdown().await;

    tracing::info!("Server shutdown complete");
    Ok(())
}

/// Initialize logging with tracing
fn init_logging(level: LogLevel) {
    let filter = match level {
        LogLevel::Error => "rtcam=error,tower_http=error",
        LogLevel::Warn => "rtcam=warn,tower_http=warn",
        LogLevel::Info => "rtcam=info,tower_http=info",
        LogLevel::Debug => "rtcam=debug,tower_http=debug",
        LogLevel::Trace => "rtcam=trace,tower_http=debug",
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
