//! Upcast Server - headless driver for the upcast control plane.
//!
//! Opens a streaming session with one receiver, optionally applies a volume,
//! holds the session until a shutdown signal arrives and then tears it down.

mod config;
mod transport;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use clap::Parser;
use parking_lot::Mutex;
use tokio::signal;
use upcast_core::{HandshakeOutcome, LoggingEventEmitter, RaopClient, VolumeValue};

use crate::config::ServerConfig;
use crate::transport::TcpRtspTransport;

type Client = Arc<Mutex<RaopClient<TcpRtspTransport>>>;

/// Upcast Server - streams to an AirTunes receiver.
#[derive(Parser, Debug)]
#[command(name = "upcast-server")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the configuration file (YAML).
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Log level (error, warn, info, debug, trace).
    #[arg(short, long, default_value = "info", env = "UPCAST_LOG_LEVEL")]
    log_level: log::LevelFilter,

    /// Receiver host (overrides config file).
    #[arg(long, env = "UPCAST_HOST")]
    host: Option<String>,

    /// Receiver RTSP port (overrides config file).
    #[arg(short = 'p', long)]
    port: Option<u16>,

    /// Volume in percent (overrides config file).
    #[arg(long)]
    volume: Option<u32>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    env_logger::Builder::new()
        .filter_level(args.log_level)
        .format_timestamp_millis()
        .init();

    log::info!("Upcast Server v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let mut config =
        ServerConfig::load(args.config.as_deref()).context("Failed to load configuration")?;

    // Apply CLI overrides
    if let Some(host) = args.host {
        config.host = Some(host);
    }
    if let Some(port) = args.port {
        config.rtsp_port = port;
    }
    if let Some(volume) = args.volume {
        config.volume = Some(volume);
    }

    let host = config.host.clone().context(
        "No receiver configured. Please specify --host or set UPCAST_HOST to the \
         address of the streaming receiver.",
    )?;
    let core_config = config.to_core_config();
    core_config
        .validate()
        .context("Invalid configuration")?;

    log::info!(
        "Configuration: host={}, rtsp_port={}, user_agent={}",
        host,
        core_config.rtsp_port,
        core_config.user_agent
    );

    let transport = TcpRtspTransport::new(Duration::from_secs(config.io_timeout_secs));
    let client: Client = Arc::new(Mutex::new(
        RaopClient::new(transport, &core_config).with_emitter(Arc::new(LoggingEventEmitter)),
    ));

    // The session client blocks on its socket; keep it off the async workers.
    let outcome = blocking(&client, move |client| {
        client
            .connect(&host)
            .with_context(|| format!("Handshake with {host} failed"))
    })
    .await?;

    match outcome {
        HandshakeOutcome::Streaming(jack) => {
            log::info!(
                "Session {} recording ({:?}, {:?})",
                client.lock().session_id(),
                jack.jack_type,
                jack.status
            );
        }
        HandshakeOutcome::NotReady => {
            bail!("Receiver acknowledged SETUP without reporting its audio jack");
        }
    }

    if let Some(percent) = config.volume {
        blocking(&client, move |client| {
            client
                .set_volume(VolumeValue::from_percent(percent))
                .context("Failed to set volume")
        })
        .await?;
        log::info!("Volume set to {}%", percent.min(100));
    }

    // Wait for shutdown signal
    shutdown_signal().await;

    log::info!("Shutdown signal received, tearing down session...");

    blocking(&client, |client| {
        client.teardown().context("Failed to tear down session")
    })
    .await?;

    log::info!("Shutdown complete");
    Ok(())
}

/// Runs `f` against the client on the blocking thread pool.
async fn blocking<T, F>(client: &Client, f: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce(&mut RaopClient<TcpRtspTransport>) -> Result<T> + Send + 'static,
{
    let client = Arc::clone(client);
    tokio::task::spawn_blocking(move || f(&mut client.lock()))
        .await
        .map_err(|e| anyhow!("Session task failed: {e}"))?
}

/// Waits for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            log::error!("Failed to install Ctrl+C handler: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                log::error!("Failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
