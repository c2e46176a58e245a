//! # Wire Protocol Module
//!
//! Framing of readings for the TCP link between the logger and a monitor.
//!
//! This module handles:
//! - Encoding a reading as one newline-terminated JSON array
//! - Reassembling frames from an arbitrarily fragmented byte stream
//! - Skipping malformed or oversized frames without dropping the connection

pub mod protocol;
pub mod encoder;
pub mod decoder;
