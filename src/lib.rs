//! # RS485 Logger Library
//!
//! Poll a Modbus RTU field instrument, log its readings to day-rotated text
//! files and stream them to a live monitor over TCP.
//!
//! This library provides the acquisition pipeline shared by the logger and
//! monitor binaries: instrument drivers, the data file writer, the wire
//! codec and the broadcast channel.

pub mod broadcast;
pub mod config;
pub mod datalog;
pub mod error;
pub mod instrument;
pub mod monitor;
pub mod pipeline;
pub mod reading;
pub mod serial;
pub mod wire;
