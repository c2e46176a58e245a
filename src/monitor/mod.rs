//! # Monitor Module
//!
//! Peer side of the broadcast link.
//!
//! This module handles:
//! - Connecting to the logger's broadcast port and reconnecting after loss
//! - Feeding received bytes through the frame decoder
//! - Keeping a rolling window of the tracked variables for display

pub mod window;

use std::future::Future;

use chrono::Local;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::net::TcpStream;
use tokio::time::{sleep, Duration};
use tracing::{debug, info, warn};

use crate::error::{LoggerError, Result};
use crate::reading::Reading;
use crate::wire::decoder::FrameDecoder;
use window::RollingWindow;

/// Bytes requested from the socket per read
pub const READ_BUFFER_SIZE: usize = 1024;

/// Connection and display settings for a monitor
#[derive(Debug, Clone)]
pub struct MonitorSettings {
    /// Logger broadcast address, `host:port`
    pub addr: String,
    /// Variables to keep; empty keeps every variable received
    pub tracked: Vec<String>,
    /// Pause between connection attempts
    pub reconnect_interval: Duration,
}

/// Headless live monitor: decoder plus rolling window
#[derive(Debug)]
pub struct Monitor {
    settings: MonitorSettings,
    decoder: FrameDecoder,
    window: RollingWindow,
}

impl Monitor {
    pub fn new(settings: MonitorSettings, window: RollingWindow) -> Self {
        Self {
            settings,
            decoder: FrameDecoder::new(),
            window,
        }
    }

    pub fn window(&self) -> &RollingWindow {
        &self.window
    }

    pub fn decoder(&self) -> &FrameDecoder {
        &self.decoder
    }

    /// Connect, pump, and reconnect until `shutdown` resolves
    pub async fn run<F>(&mut self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);

        loop {
            let connected = tokio::select! {
                biased;
                _ = &mut shutdown => return Ok(()),
                r = TcpStream::connect(&self.settings.addr) => r,
            };

            match connected {
                Ok(mut stream) => {
                    info!("Connected to logger at {}", self.settings.addr);

                    let pumped = tokio::select! {
                        biased;
                        _ = &mut shutdown => return Ok(()),
                        r = self.pump(&mut stream) => r,
                    };

                    match pumped {
                        Ok(n) => info!("Logger closed the connection after {} readings", n),
                        Err(e) => warn!("Connection lost: {}", e),
                    }
                    self.decoder.reset();
                }
                Err(e) => debug!("Cannot connect to {}: {}", self.settings.addr, e),
            }

            tokio::select! {
                biased;
                _ = &mut shutdown => return Ok(()),
                _ = sleep(self.settings.reconnect_interval) => {}
            }
        }
    }

    /// Read until end of stream, pushing every decoded reading
    ///
    /// # Arguments
    ///
    /// * `reader` - Byte stream carrying frames
    ///
    /// # Returns
    ///
    /// * `Result<u64>` - Readings decoded before the peer closed the stream
    ///
    /// # Errors
    ///
    /// Returns a network error if a read fails
    pub async fn pump<R>(&mut self, reader: &mut R) -> Result<u64>
    where
        R: AsyncRead + Unpin,
    {
        let mut buf = [0u8; READ_BUFFER_SIZE];
        let mut count = 0;

        loop {
            let n = reader
                .read(&mut buf)
                .await
                .map_err(|e| LoggerError::Network(format!("read failed: {}", e)))?;

            if n == 0 {
                return Ok(count);
            }

            for reading in self.decoder.feed(&buf[..n], Local::now()) {
                self.window.push_reading(&reading, &self.settings.tracked);
                info!("{}", self.summary(&reading));
                count += 1;
            }
        }
    }

    /// One-line `name=value unit` summary of the tracked part of a reading
    pub fn summary(&self, reading: &Reading) -> String {
        reading
            .measurements()
            .iter()
            .filter(|m| self.settings.tracked.is_empty() || self.settings.tracked.contains(&m.name))
            .map(|m| format!("{}={} {}", m.name, m.value, m.unit))
            .collect::<Vec<_>>()
            .join("  ")
    }
}
