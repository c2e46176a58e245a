//! # RS485 Monitor
//!
//! Connect to a running logger's broadcast port and follow its readings.

use anyhow::{Context, Result};
use tokio::time::Duration;
use tracing::{info, warn};

use rs485_logger::config::Config;
use rs485_logger::monitor::window::RollingWindow;
use rs485_logger::monitor::{Monitor, MonitorSettings};

/// Configuration file used when no path is given
const DEFAULT_CONFIG_PATH: &str = "config/default.toml";

/// Entry point for the monitor
///
/// Reads the `[monitor]` section of the logger configuration, then connects
/// and reconnects until Ctrl+C. Every reading is logged as one
/// `name=value unit` line.
///
/// # Errors
///
/// Returns error if the configuration cannot be loaded.
#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    info!("RS485 Monitor v{} starting...", env!("CARGO_PKG_VERSION"));

    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string());
    let config = Config::load(&config_path)
        .with_context(|| format!("Failed to load configuration from {}", config_path))?;

    let settings = MonitorSettings {
        addr: config.monitor.addr(),
        tracked: config.monitor.variables.clone(),
        reconnect_interval: Duration::from_millis(config.monitor.reconnect_interval_ms),
    };

    if settings.tracked.is_empty() {
        info!("Following every variable from {}", settings.addr);
    } else {
        info!("Following {:?} from {}", settings.tracked, settings.addr);
    }

    let mut monitor = Monitor::new(settings, RollingWindow::new(config.monitor.window_size));

    monitor
        .run(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!("Cannot listen for Ctrl+C: {}", e);
                std::future::pending::<()>().await;
            }
            info!("Received Ctrl+C, shutting down...");
        })
        .await?;

    for variable in monitor.window().variables() {
        info!(
            "{}: {} samples kept ({})",
            variable,
            monitor.window().len(variable),
            monitor.window().unit(variable).unwrap_or("-")
        );
    }
    info!(
        "Decoded {} readings, {} malformed frames",
        monitor.decoder().decoded(),
        monitor.decoder().malformed()
    );

    Ok(())
}
