use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, ValueEnum};
use futures::{stream::FuturesUnordered, StreamExt};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use camrelay::config::{AppConfig, StreamConfig, VideoConfig, WebConfig};
use camrelay::lifecycle::{LifecycleController, ShutdownReason};
use camrelay::state::AppState;
use camrelay::utils::bind_all;
use camrelay::video::{
    enumerate_device_paths, DeviceLocator, FrameEncoder, JpegEncoder, V4l2Opener,
};
use camrelay::web;

/// Log level for the application
#[derive(Debug, Clone, Copy, Default, ValueEnum)]
enum LogLevel {
    Error,
    Warn,
    #[default]
    Info,
    Verbose,
    Debug,
    Trace,
}

/// Log output format
#[derive(Debug, Clone, Copy, Default, ValueEnum)]
enum LogFormat {
    #[default]
    Text,
    Json,
}

/// camrelay command line arguments
#[derive(Parser, Debug)]
#[command(name = "camrelay")]
#[command(version, about = "Relay a UVC camera as an MJPEG HTTP stream", long_about = None)]
struct CliArgs {
    /// Listen address (repeat for several)
    #[arg(long = "host", value_name = "ADDRESS", default_value = "0.0.0.0")]
    hosts: Vec<String>,

    /// HTTP port
    #[arg(short = 'p', long, value_name = "PORT", default_value_t = 8080)]
    port: u16,

    /// Frames per second sent to each client
    #[arg(long, value_name = "FPS", default_value_t = 25.0)]
    fps: f64,

    /// JPEG quality (1-100)
    #[arg(short = 'q', long, value_name = "QUALITY", default_value_t = 30)]
    quality: u8,

    /// Number of capture buffers to request from the driver
    #[arg(long, value_name = "COUNT", default_value_t = 1)]
    buffersize: u32,

    /// Use this device instead of probing /dev/video*
    #[arg(short = 'd', long, value_name = "PATH")]
    device: Option<PathBuf>,

    /// Directory scanned for video devices
    #[arg(long, value_name = "DIR", default_value = "/dev")]
    device_dir: PathBuf,

    /// Give up on a single frame read after this many milliseconds
    #[arg(long, value_name = "MS", default_value_t = 2000)]
    read_timeout_ms: u64,

    /// Seconds open streams get to finish once shutdown starts
    #[arg(long, value_name = "SECS", default_value_t = 5)]
    drain_timeout: u64,

    /// Log level (error, warn, info, verbose, debug, trace)
    #[arg(short = 'l', long, value_name = "LEVEL", default_value = "info")]
    log_level: LogLevel,

    /// Log output format
    #[arg(long, value_name = "FORMAT", default_value = "text")]
    log_format: LogFormat,

    /// Increase verbosity (-v for verbose, -vv for debug, -vvv for trace)
    #[arg(short = 'v', long, action = clap::ArgAction::Count)]
    verbose: u8,
}

impl CliArgs {
    fn to_config(&self) -> AppConfig {
        AppConfig {
            video: VideoConfig {
                device: self.device.clone(),
                device_dir: self.device_dir.clone(),
                buffer_depth: self.buffersize,
                read_timeout_ms: self.read_timeout_ms,
            },
            stream: StreamConfig {
                fps: self.fps,
                quality: self.quality,
            },
            web: WebConfig {
                http_port: self.port,
                bind_addresses: self.hosts.clone(),
                drain_timeout_secs: self.drain_timeout,
            },
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = CliArgs::parse();
    init_logging(args.log_level, args.verbose, args.log_format);

    tracing::info!("Starting camrelay v{}", env!("CARGO_PKG_VERSION"));

    let config = args.to_config();
    config.validate()?;
    let bind_ips = config.web.resolve_bind_addresses()?;

    // Discovery must succeed before any socket is bound
    let candidates = match &config.video.device {
        Some(device) => vec![device.clone()],
        None => enumerate_device_paths(&config.video.device_dir)?,
    };
    let locator = DeviceLocator::new(V4l2Opener::new(config.video.read_timeout()));
    let session = {
        let buffer_depth = config.video.buffer_depth;
        tokio::task::spawn_blocking(move || locator.find(&candidates, buffer_depth)).await??
    };
    let session = Arc::new(session);

    let lifecycle = LifecycleController::new(session.clone());
    let shutdown = lifecycle.handle();
    lifecycle.spawn_signal_listener();

    let drain_timeout = config.web.drain_timeout();
    let port = config.web.http_port;
    let encoder = Arc::new(JpegEncoder::new());
    tracing::info!("Encoding with {} at quality {}", encoder.name(), config.stream.quality);
    let state = AppState::new(config, session, encoder, shutdown.clone());
    let app = web::create_router(state);

    let listeners = bind_all(&bind_ips, port)?;
    let mut servers = FuturesUnordered::new();
    for listener in listeners {
        let local_addr = listener.local_addr()?;
        tracing::info!("Streaming on http://{}/stream", local_addr);

        let server_shutdown = shutdown.clone();
        let server = axum::serve(listener, app.clone())
            .with_graceful_shutdown(async move { server_shutdown.requested().await });
        servers.push(async move { server.await });
    }

    // Servers drain once the token is cancelled; pumps stop on the same token,
    // so open streams end on their own shortly after.
    let server_exited = tokio::select! {
        _ = shutdown.requested() => None,
        result = servers.next() => Some(result),
    };

    match server_exited {
        None => {
            let drained = tokio::time::timeout(drain_timeout, async {
                while servers.next().await.is_some() {}
            })
            .await;
            if drained.is_err() {
                tracing::warn!("Connections still open after {:?}, closing", drain_timeout);
            }
        }
        Some(Some(Err(e))) => tracing::error!("HTTP server error: {}", e),
        Some(_) => tracing::warn!("HTTP server stopped unexpectedly"),
    }

    let reason = lifecycle.shutdown().await;
    tracing::info!("Server shutdown complete ({})", reason);

    if let ShutdownReason::DeviceLost(detail) = reason {
        anyhow::bail!("capture device lost: {}", detail);
    }
    Ok(())
}

/// Initialize logging with tracing
fn init_logging(level: LogLevel, verbose_count: u8, format: LogFormat) {
    // Verbose count overrides log level
    let effective_level = match verbose_count {
        0 => level,
        1 => LogLevel::Verbose,
        2 => LogLevel::Debug,
        _ => LogLevel::Trace,
    };

    let filter = match effective_level {
        LogLevel::Error => "camrelay=error,tower_http=error",
        LogLevel::Warn => "camrelay=warn,tower_http=warn",
        LogLevel::Info => "camrelay=info,tower_http=info",
        LogLevel::Verbose => "camrelay=debug,tower_http=info",
        LogLevel::Debug => "camrelay=debug,tower_http=debug",
        LogLevel::Trace => "camrelay=trace,tower_http=debug",
    };

    // Environment variable takes highest priority
    let env_filter =
        tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into());

    let registry = tracing_subscriber::registry().with(env_filter);
    let result = match format {
        LogFormat::Text => registry.with(tracing_subscriber::fmt::layer()).try_init(),
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json())
            .try_init(),
    };
    if let Err(err) = result {
        eprintln!("failed to initialize tracing: {}", err);
    }
}
