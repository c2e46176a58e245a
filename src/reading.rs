//! # Reading Types
//!
//! One [`Reading`] is the complete set of [`Measurement`]s captured by a
//! single instrument poll.

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

/// A single named value with its unit
///
/// Field names on the wire follow the `{"var", "val", "unit"}` convention
/// the monitor expects.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Measurement {
    #[serde(rename = "var")]
    pub name: String,

    #[serde(rename = "val")]
    pub value: f64,

    pub unit: String,
}

impl Measurement {
    pub fn new(name: impl Into<String>, value: f64, unit: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value,
            unit: unit.into(),
        }
    }
}

/// Complete set of measurements from one poll, plus its capture time
///
/// Immutable once built; the poll loop hands it out by reference.
#[derive(Debug, Clone, PartialEq)]
pub struct Reading {
    captured_at: DateTime<Local>,
    measurements: Vec<Measurement>,
}

impl Reading {
    pub fn new(captured_at: DateTime<Local>, measurements: Vec<Measurement>) -> Self {
        Self {
            captured_at,
            measurements,
        }
    }

    /// Build a reading stamped with the current local time
    pub fn now(measurements: Vec<Measurement>) -> Self {
        Self::new(Local::now(), measurements)
    }

    pub fn captured_at(&self) -> DateTime<Local> {
        self.captured_at
    }

    pub fn measurements(&self) -> &[Measurement] {
        &self.measurements
    }

    /// Look up a measurement by variable name
    pub fn get(&self, name: &str) -> Option<&Measurement> {
        self.measurements.iter().find(|m| m.name == name)
    }

    pub fn is_empty(&self) -> bool {
        self.measurements.is_empty()
    }
}
