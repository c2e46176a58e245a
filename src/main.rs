//! # RS485 Logger
//!
//! Poll a Modbus RTU field instrument, log its readings to day-rotated text
//! files and stream them to a live monitor.

use anyhow::{Context, Result};
use tokio::time::Duration;
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use rs485_logger::broadcast::BroadcastChannel;
use rs485_logger::config::{Config, DiagnosticsConfig};
use rs485_logger::datalog::{RotatingLogWriter, WriterSettings};
use rs485_logger::instrument::open_instrument;
use rs485_logger::pipeline::{LoopSettings, PollLoop};

/// Configuration file used when no path is given
const DEFAULT_CONFIG_PATH: &str = "config/default.toml";

/// Diagnostic log file name prefix inside `log_dir`
const DIAGNOSTIC_LOG_PREFIX: &str = "rs485-logger.log";

/// Poll timeout as a multiple of the per-transaction timeout
///
/// A Falco poll is six Modbus transactions.
const POLL_TIMEOUT_TRANSACTIONS: u32 = 10;

/// Main entry point for the logger
///
/// # Control Flow
///
/// 1. **Initialization**
///    - Load configuration (first argument, or `config/default.toml`)
///    - Set up logging, optionally with a daily diagnostic log file
///    - Select the instrument driver and bind the broadcast port
///
/// 2. **Main Loop**
///    - Poll, persist and broadcast once per poll interval
///    - Back off after instrument failures
///
/// 3. **Graceful Shutdown**
///    - Ctrl+C stops the loop between cycles
///    - Buffered rows are flushed and the data file closed
///
/// # Errors
///
/// Returns error if the configuration cannot be loaded. A broadcast port
/// that cannot be bound only disables broadcasting.
///
/// # Examples
///
/// ```bash
/// cargo run --release --bin rs485-logger -- config/default.toml
/// ```
///
/// Expected output:
/// ```text
/// INFO rs485_logger: RS485 Logger v0.1.0 starting...
/// INFO rs485_logger::broadcast: Broadcasting readings on localhost:10000
/// INFO rs485_logger::pipeline: Polling Falco@/dev/ttyUSB0 every 1s
/// ```
#[tokio::main]
async fn main() -> Result<()> {
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string());
    let config = Config::load(&config_path)
        .with_context(|| format!("Failed to load configuration from {}", config_path))?;

    let _guard = init_logging(&config.diagnostics);

    info!("RS485 Logger v{} starting...", env!("CARGO_PKG_VERSION"));
    info!("Configuration loaded from {}", config_path);

    let instrument = open_instrument(&config.instrument);

    let writer = RotatingLogWriter::new(WriterSettings {
        dir: config.logger.data_dir.clone().into(),
        base_name: config.logger.base_name.clone(),
        extension: config.logger.extension.clone(),
        buffer_size: config.logger.buffer_size,
    });

    let channel = if config.broadcast.enabled {
        let mut channel = BroadcastChannel::new(
            config.broadcast.addr(),
            Duration::from_millis(config.broadcast.accept_wait_ms),
            Duration::from_millis(config.broadcast.send_timeout_ms),
        );
        if let Err(e) = channel.bind().await {
            warn!("Broadcasting disabled: {}", e);
        }
        channel
    } else {
        info!("Broadcasting disabled in configuration");
        BroadcastChannel::disabled()
    };

    info!("Press Ctrl+C to exit");

    let stats = PollLoop::new(instrument, writer, channel, loop_settings(&config))
        .run(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!("Cannot listen for Ctrl+C: {}", e);
                std::future::pending::<()>().await;
            }
            info!("Received Ctrl+C, shutting down...");
        })
        .await;

    info!("Total readings logged: {}", stats.readings);

    Ok(())
}

/// Install the stderr subscriber and, if configured, the diagnostic file
///
/// The returned guard must live until exit so buffered lines are written.
fn init_logging(diagnostics: &DiagnosticsConfig) -> Option<WorkerGuard> {
    let (file_layer, guard) = match diagnostics.log_dir.as_deref() {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, DIAGNOSTIC_LOG_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer().with_writer(writer).with_ansi(false);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .with(fmt::layer())
        .with(file_layer)
        .init();

    guard
}

/// Loop timing from the `[logger]` and `[instrument]` sections
fn loop_settings(config: &Config) -> LoopSettings {
    LoopSettings {
        poll_interval: Duration::from_millis(config.logger.poll_interval_ms),
        poll_timeout: Duration::from_millis(config.instrument.timeout_ms)
            * POLL_TIMEOUT_TRANSACTIONS,
        backoff: Duration::from_millis(config.logger.backoff_ms),
        status_interval: config.logger.status_interval,
    }
}
