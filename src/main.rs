//! # Polar Monitor
//!
//! Stream ECG (and optionally accelerometer) data from a Polar sensor and log
//! a summary of each ECG window alongside heart rate readings.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use polar_pmd::config::Config;
use polar_pmd::heart::{battery_level, HeartRateListener};
use polar_pmd::monitor::{acc_callback, Monitor};
use polar_pmd::pmd::features::Support;
use polar_pmd::pmd::handler::{AccHandler, EcgHandler};
use polar_pmd::pmd::protocol::MeasureType;
use polar_pmd::session::Session;
use polar_pmd::transport::BleTransport;

#[derive(Parser, Debug)]
#[command(name = "polar-monitor", about = "Stream ECG from a Polar sensor", version)]
struct Args {
    /// TOML configuration file; defaults apply when omitted
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Bluetooth address of the sensor, overriding the configuration
    #[arg(short, long)]
    address: Option<String>,
}

/// Main entry point for Polar Monitor
///
/// # Control Flow
///
/// 1. **Initialization**
///    - Load and validate configuration, apply CLI overrides
///    - Set up logging (stdout, plus daily files when `[logging] dir` is set)
///    - Scan for the sensor and connect
///
/// 2. **Streaming**
///    - Open the PMD session and log the advertised features
///    - Query ECG settings, then start ECG (and Acc when enabled)
///    - Subscribe to heart rate for the skin contact flag
///    - Summarise ECG windows until Ctrl+C
///
/// 3. **Graceful Shutdown**
///    - Stop the streams and heart rate notifications
///    - Close the session and disconnect
///
/// # Errors
///
/// Returns error if:
/// - Configuration is invalid
/// - No sensor is found or connecting fails
/// - The sensor rejects or does not answer a control point command
#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => Config::load(path)
            .with_context(|| format!("loading configuration from {}", path.display()))?,
        None => Config::default(),
    };
    if let Some(address) = args.address {
        config.device.address = Some(address);
    }
    config.validate()?;

    let _guard = init_tracing(&config.logging.level, config.logging.dir.as_deref())?;
    info!("Polar Monitor v{} starting...", env!("CARGO_PKG_VERSION"));

    let transport = Arc::new(BleTransport::connect(&config.device).await?);
    info!("Connected to {} ({})", transport.name(), transport.address());

    match battery_level(transport.as_ref()).await {
        Ok(level) => info!("Battery level: {}%", level),
        Err(e) => warn!("Failed to read battery level: {}", e),
    }

    let session = Session::open(transport.clone()).await?;
    let result = stream(&config, transport, &session).await;
    if let Err(e) = session.close().await {
        warn!("Failed to close session: {}", e);
    }
    result
}

async fn stream(
    config: &Config,
    transport: Arc<BleTransport>,
    session: &Session<BleTransport>,
) -> Result<()> {
    let deadline = config.control.timeout();
    let features = session.features();
    info!("Supported features: {}", features);

    let (monitor, inputs) = Monitor::new(config.ecg.window_seconds);

    if config.ecg.enabled {
        if !features.supports(Support::Ecg) {
            warn!("Sensor does not advertise ECG support");
        }
        let settings = session
            .settings(MeasureType::ECG, deadline)
            .await
            .context("querying ECG settings")?;
        for setting in &settings {
            info!("ECG setting {:?}: {:?}", setting.setting_type(), setting.values_f64());
        }
        session
            .set_handler(&EcgHandler::new(inputs.ecg_callback()), deadline)
            .await
            .context("starting ECG stream")?;
    }

    if config.acc.enabled {
        session
            .set_handler(
                &AccHandler::new(config.acc.sample_rate_hz, config.acc.range_g, acc_callback()),
                deadline,
            )
            .await
            .context("starting Acc stream")?;
    }

    let heart = HeartRateListener::start(transport, inputs.heart_rate_callback()).await?;
    drop(inputs);

    let (cancel_tx, cancel_rx) = watch::channel(false);
    let consumer = tokio::spawn(monitor.run(cancel_rx));

    info!("Press Ctrl+C to exit");
    tokio::signal::ctrl_c().await?;
    info!("Received Ctrl+C, shutting down...");

    let _ = cancel_tx.send(true);
    let report = consumer.await?;
    info!("Summarised {} ECG windows", report.windows);

    if config.ecg.enabled {
        if let Err(e) = session.set_handler(&EcgHandler::stop(), deadline).await {
            warn!("Failed to stop ECG stream: {}", e);
        }
    }
    if config.acc.enabled {
        if let Err(e) = session.set_handler(&AccHandler::stop(), deadline).await {
            warn!("Failed to stop Acc stream: {}", e);
        }
    }
    if let Err(e) = heart.close().await {
        warn!("Failed to stop heart rate notifications: {}", e);
    }

    Ok(())
}

/// Initialize logging
///
/// `RUST_LOG` overrides the configured level. With a log directory, output is
/// also written to a daily rolling file; the returned guard must be held until
/// exit.
fn init_tracing(level: &str, dir: Option<&str>) -> Result<Option<WorkerGuard>> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let Some(dir) = dir else {
        tracing_subscriber::fmt().with_env_filter(env_filter).init();
        return Ok(None);
    };

    std::fs::create_dir_all(dir).with_context(|| format!("creating log directory {}", dir))?;
    let file_appender = tracing_appender::rolling::daily(dir, "polar-monitor.log");
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer())
        .with(fmt::layer().with_writer(file_writer).with_ansi(false))
        .init();

    Ok(Some(guard))
}
