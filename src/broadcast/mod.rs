//! # Broadcast Module
//!
//! Streams frames to at most one live monitor over TCP.
//!
//! This module handles:
//! - Listening on the configured address
//! - Accepting a pending monitor without stalling the poll loop
//! - Detecting a departed monitor and going back to listening
//!
//! ## State Machine
//!
//! ```text
//! Unbound --bind--> Listening --accept--> Connected
//!                       ^                     |
//!                       |                send failed
//!                  no pending peer            v
//!                       +------------- Disconnected
//! ```
//!
//! Frames are never queued: a monitor only receives frames sent while it is
//! connected, and a frame whose send fails is dropped.

use std::net::SocketAddr;

use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::time::{timeout, Duration};
use tracing::{debug, info, warn};

use crate::error::{LoggerError, Result};

/// Default bound on waiting for a pending monitor per cycle
pub const DEFAULT_ACCEPT_WAIT: Duration = Duration::from_millis(10);

/// Default bound on writing one frame
pub const DEFAULT_SEND_TIMEOUT: Duration = Duration::from_millis(200);

/// Connection state of the broadcast channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Not listening; either not bound yet or binding failed
    Unbound,
    /// Listening with no monitor attached
    Listening,
    /// A monitor is attached
    Connected,
    /// The last monitor went away; re-accept on next send
    Disconnected,
}

/// Result of a send that did not fail
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Frame written to the monitor
    Sent,
    /// Listening, but no monitor is attached
    NoPeer,
    /// Broadcasting is unavailable (not bound)
    Disabled,
}

/// Single-peer TCP broadcaster
pub struct BroadcastChannel {
    addr: String,
    listener: Option<TcpListener>,
    peer: Option<(TcpStream, SocketAddr)>,
    state: ConnectionState,
    accept_wait: Duration,
    send_timeout: Duration,
}

impl std::fmt::Debug for BroadcastChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BroadcastChannel")
            .field("addr", &self.addr)
            .field("state", &self.state)
            .field("peer", &self.peer.as_ref().map(|(_, a)| *a))
            .finish_non_exhaustive()
    }
}

impl BroadcastChannel {
    /// Create an unbound channel
    ///
    /// # Arguments
    ///
    /// * `addr` - Listen address, `host:port`
    /// * `accept_wait` - Longest wait for a pending monitor in one send
    /// * `send_timeout` - Longest wait for one frame write
    pub fn new(addr: impl Into<String>, accept_wait: Duration, send_timeout: Duration) -> Self {
        Self {
            addr: addr.into(),
            listener: None,
            peer: None,
            state: ConnectionState::Unbound,
            accept_wait,
            send_timeout,
        }
    }

    /// A channel that never binds; every send reports [`Delivery::Disabled`]
    pub fn disabled() -> Self {
        Self::new(String::new(), DEFAULT_ACCEPT_WAIT, DEFAULT_SEND_TIMEOUT)
    }

    /// Start listening
    ///
    /// # Errors
    ///
    /// Returns a network error if the address cannot be bound. The channel
    /// then stays [`ConnectionState::Unbound`] and broadcasting is off for
    /// the rest of the run; persistence is unaffected.
    pub async fn bind(&mut self) -> Result<()> {
        match TcpListener::bind(&self.addr).await {
            Ok(listener) => {
                info!("Broadcasting readings on {}", self.addr);
                self.listener = Some(listener);
                self.state = ConnectionState::Listening;
                Ok(())
            }
            Err(e) => {
                warn!(
                    "Cannot listen on {}: {}; no monitor can connect, logging to file only",
                    self.addr, e
                );
                self.state = ConnectionState::Unbound;
                Err(LoggerError::Network(format!("bind {} failed: {}", self.addr, e)))
            }
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Address actually bound, useful when binding port 0
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.listener.as_ref().and_then(|l| l.local_addr().ok())
    }

    /// Address of the attached monitor
    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer.as_ref().map(|(_, addr)| *addr)
    }

    /// Send one frame to the monitor, accepting one first if none is attached
    ///
    /// Never waits longer than `accept_wait + send_timeout`.
    ///
    /// # Errors
    ///
    /// Returns a network error when the attached monitor has gone away. The
    /// channel is then [`ConnectionState::Disconnected`] and the frame is
    /// dropped; the caller is expected to log and carry on.
    pub async fn send(&mut self, frame: &[u8]) -> Result<Delivery> {
        match self.state {
            ConnectionState::Unbound => return Ok(Delivery::Disabled),
            ConnectionState::Listening | ConnectionState::Disconnected => {
                if !self.try_accept().await {
                    return Ok(Delivery::NoPeer);
                }
            }
            ConnectionState::Connected => {}
        }

        let Some((stream, addr)) = self.peer.as_mut() else {
            self.state = ConnectionState::Listening;
            return Ok(Delivery::NoPeer);
        };
        let addr = *addr;

        if let Err(reason) = probe_peer(stream) {
            return Err(self.drop_peer(addr, reason));
        }

        match timeout(self.send_timeout, stream.write_all(frame)).await {
            Ok(Ok(())) => {
                debug!("Sent frame ({} bytes) to {}", frame.len(), addr);
                Ok(Delivery::Sent)
            }
            Ok(Err(e)) => Err(self.drop_peer(addr, e.to_string())),
            Err(_) => Err(self.drop_peer(
                addr,
                format!("write timed out after {:?}", self.send_timeout),
            )),
        }
    }

    /// Bounded wait for a pending connection
    async fn try_accept(&mut self) -> bool {
        let Some(listener) = self.listener.as_ref() else {
            return false;
        };

        match timeout(self.accept_wait, listener.accept()).await {
            Ok(Ok((stream, addr))) => {
                if let Err(e) = stream.set_nodelay(true) {
                    debug!("Cannot set TCP_NODELAY for {}: {}", addr, e);
                }
                info!("Monitor connected from {}", addr);
                self.peer = Some((stream, addr));
                self.state = ConnectionState::Connected;
                true
            }
            Ok(Err(e)) => {
                debug!("Accept failed: {}", e);
                self.state = ConnectionState::Listening;
                false
            }
            Err(_) => {
                self.state = ConnectionState::Listening;
                false
            }
        }
    }

    fn drop_peer(&mut self, addr: SocketAddr, reason: String) -> LoggerError {
        self.peer = None;
        self.state = ConnectionState::Disconnected;
        LoggerError::Network(format!("monitor {} gone: {}", addr, reason))
    }

    /// Disconnect the monitor and stop listening
    pub async fn close(&mut self) {
        if let Some((mut stream, addr)) = self.peer.take() {
            if let Err(e) = stream.shutdown().await {
                debug!("Shutdown of {} failed: {}", addr, e);
            }
            info!("Disconnected monitor {}", addr);
        }
        if self.listener.take().is_some() {
            info!("Stopped listening on {}", self.addr);
        }
        self.state = ConnectionState::Unbound;
    }
}

/// Non-blocking check that the monitor has not closed its end
///
/// Monitors never send anything, so readable data is discarded.
fn probe_peer(stream: &TcpStream) -> std::result::Result<(), String> {
    let mut scratch = [0u8; 64];
    loop {
        match stream.try_read(&mut scratch) {
            Ok(0) => return Err("closed by peer".to_string()),
            Ok(_) => continue,
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => return Ok(()),
            Err(e) => return Err(e.to_string()),
        }
    }
}
