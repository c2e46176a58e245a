//! # Instrument Module
//!
//! Drivers for the field instruments the logger can poll.
//!
//! This module handles:
//! - The [`Instrument`] capability: one poll yields one [`Reading`]
//! - ION Falco VOC detector over Modbus RTU
//! - SMT100 soil moisture probe over Modbus RTU
//! - Register decoding shared by the drivers

pub mod falco;
pub mod registers;
pub mod smt100;

use async_trait::async_trait;

use crate::config::{InstrumentConfig, InstrumentKind};
use crate::error::Result;
use crate::reading::Reading;
use crate::serial::ModbusSerial;
use falco::Falco;
use smt100::Smt100;

/// A device that produces one reading per poll
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Instrument: Send {
    /// Acquire one complete reading
    ///
    /// # Errors
    ///
    /// Returns a communication error if the device cannot be reached or
    /// answers incorrectly. No partial reading is ever returned.
    async fn poll(&mut self) -> Result<Reading>;

    /// Human readable identification for log messages
    fn name(&self) -> String;
}

#[async_trait]
impl<T: Instrument + ?Sized> Instrument for Box<T> {
    async fn poll(&mut self) -> Result<Reading> {
        (**self).poll().await
    }

    fn name(&self) -> String {
        (**self).name()
    }
}

/// Build the driver selected in the configuration
///
/// The serial port is not opened until the first poll.
pub fn open_instrument(config: &InstrumentConfig) -> Box<dyn Instrument> {
    let bus = ModbusSerial::new(config.serial_settings());
    match config.kind {
        InstrumentKind::Falco => Box::new(Falco::new(bus)),
        InstrumentKind::Smt100 => Box::new(Smt100::new(bus)),
    }
}
