//! # SMT100 Soil Moisture Probe
//!
//! Holding registers 0..=3 are read in one transaction:
//!
//! | Register | Content | Conversion |
//! |----------|---------|------------|
//! | 0 | Soil temperature | `raw / 100 - 100` degC |
//! | 1 | Volumetric water content | `raw / 100` vol% |
//! | 2 | Permittivity | not reported |
//! | 3 | Raw counts | as is |

use async_trait::async_trait;

use super::registers::round_to;
use super::Instrument;
use crate::error::{LoggerError, Result};
use crate::reading::{Measurement, Reading};
use crate::serial::ModbusSerial;

const REG_FIRST: u16 = 0;
const REG_COUNT: u16 = 4;

/// Default line settings: 9600 baud, 8E1
pub const SMT100_PARITY: tokio_serial::Parity = tokio_serial::Parity::Even;

/// Convert registers 0..=3 into measurements
///
/// # Errors
///
/// Returns a communication error if fewer than four registers are given.
pub fn measurements_from_registers(words: &[u16]) -> Result<Vec<Measurement>> {
    let [temperature, moisture, _permittivity, counts] = words else {
        return Err(LoggerError::Comm(format!(
            "SMT100 needs {} registers, got {}",
            REG_COUNT,
            words.len()
        )));
    };

    Ok(vec![
        Measurement::new(
            "T",
            round_to(f64::from(*temperature) / 100.0 - 100.0, 1),
            "degC",
        ),
        Measurement::new("Moist", round_to(f64::from(*moisture) / 100.0, 1), "vol%"),
        Measurement::new("Count", f64::from(*counts), "#"),
    ])
}

/// SMT100 probe on a Modbus RTU bus
#[derive(Debug)]
pub struct Smt100 {
    bus: ModbusSerial,
}

impl Smt100 {
    pub fn new(bus: ModbusSerial) -> Self {
        Self { bus }
    }
}

#[async_trait]
impl Instrument for Smt100 {
    async fn poll(&mut self) -> Result<Reading> {
        let words = self.bus.read_holding_registers(REG_FIRST, REG_COUNT).await?;
        Ok(Reading::now(measurements_from_registers(&words)?))
    }

    fn name(&self) -> String {
        format!("SMT100@{}", self.bus.device_path())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conversion() {
        let m = measurements_from_registers(&[12130, 3312, 8000, 512]).unwrap();

        assert_eq!(
            m,
            vec![
                Measurement::new("T", 21.3, "degC"),
                Measurement::new("Moist", 33.1, "vol%"),
                Measurement::new("Count", 512.0, "#"),
            ]
        );
    }

    #[test]
    fn test_below_freezing() {
        let m = measurements_from_registers(&[9750, 0, 0, 0]).unwrap();
        assert_eq!(m[0].value, -2.5);
    }

    #[test]
    fn test_wrong_register_count() {
        let err = measurements_from_registers(&[1, 2, 3]).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Comm);
    }
}
