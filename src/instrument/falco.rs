//! # ION Falco VOC Detector
//!
//! Register map (holding registers, function code 3):
//!
//! | Register | Type | Content |
//! |----------|------|---------|
//! | 102 | f32 (2 regs) | Gas concentration |
//! | 106 | f32 (2 regs) | Sensor voltage (mV) |
//! | 108 | i16 | Sensor temperature (0.1 degC) |
//! | 1005 | char | Unit: `p` = ppm, `g` = mg/m3 |
//! | 1010 | f32 (2 regs) | Response factor (0.1 - 10.0) |
//! | 1012 | u16 | Range (10, 50, 1000, 3000) |

use async_trait::async_trait;

use super::registers::{f32_from_words, first_char, round_to, signed, widen};
use super::Instrument;
use crate::error::Result;
use crate::reading::{Measurement, Reading};
use crate::serial::ModbusSerial;

const REG_VOC: u16 = 102;
const REG_VOLTAGE: u16 = 106;
const REG_TEMPERATURE: u16 = 108;
const REG_UNIT: u16 = 1005;
const REG_RESPONSE_FACTOR: u16 = 1010;
const REG_RANGE: u16 = 1012;

/// Default line settings: 9600 baud, 8N1
pub const FALCO_PARITY: tokio_serial::Parity = tokio_serial::Parity::None;

/// Raw values of one Falco poll
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FalcoRegisters {
    pub voc: f32,
    pub voltage: f32,
    pub temperature: u16,
    pub unit: u16,
    pub response_factor: f32,
    pub range: u16,
}

impl FalcoRegisters {
    /// Concentration unit encoded in the unit register
    pub fn concentration_unit(&self) -> &'static str {
        match first_char(self.unit) {
            'g' => "mg/m3",
            _ => "ppm",
        }
    }

    /// Convert to measurements in reporting order
    pub fn to_measurements(&self) -> Vec<Measurement> {
        vec![
            Measurement::new("VOC", round_to(widen(self.voc), 2), self.concentration_unit()),
            Measurement::new("Voltage", round_to(widen(self.voltage), 1), "mV"),
            Measurement::new("T", f64::from(signed(self.temperature)) / 10.0, "degC"),
            Measurement::new("RF", widen(self.response_factor), "-"),
            Measurement::new("Range", f64::from(self.range), "-"),
        ]
    }
}

/// Falco VOC detector on a Modbus RTU bus
#[derive(Debug)]
pub struct Falco {
    bus: ModbusSerial,
}

impl Falco {
    pub fn new(bus: ModbusSerial) -> Self {
        Self { bus }
    }

    async fn read_float(&mut self, address: u16) -> Result<f32> {
        let words = self.bus.read_holding_registers(address, 2).await?;
        f32_from_words(&words)
    }

    async fn read_register(&mut self, address: u16) -> Result<u16> {
        let words = self.bus.read_holding_registers(address, 1).await?;
        Ok(words[0])
    }

    /// Read every register reported in a reading
    pub async fn read_registers(&mut self) -> Result<FalcoRegisters> {
        Ok(FalcoRegisters {
            voc: self.read_float(REG_VOC).await?,
            voltage: self.read_float(REG_VOLTAGE).await?,
            temperature: self.read_register(REG_TEMPERATURE).await?,
            unit: self.read_register(REG_UNIT).await?,
            response_factor: self.read_float(REG_RESPONSE_FACTOR).await?,
            range: self.read_register(REG_RANGE).await?,
        })
    }
}

#[async_trait]
impl Instrument for Falco {
    async fn poll(&mut self) -> Result<Reading> {
        let registers = self.read_registers().await?;
        Ok(Reading::now(registers.to_measurements()))
    }

    fn name(&self) -> String {
        format!("Falco@{}", self.bus.device_path())
    }
}
