//! # Data File Format
//!
//! ```text
//! 2024-06-10
//! daytime     T       Moist   Count
//! hh:mm:ss    degC    vol%    #
//! 14:02:11    21.3    33.1    512
//! ```
//!
//! Columns are tab separated. The first line is the date the file was
//! created, followed by the variable names and their units.

use chrono::{DateTime, Local};
use tracing::warn;

use crate::reading::Reading;

/// Name of the time column
pub const TIME_COLUMN: &str = "daytime";

/// Unit of the time column
pub const TIME_UNIT: &str = "hh:mm:ss";

/// Column separator
pub const SEPARATOR: char = '\t';

/// Column names and units, fixed for the lifetime of a data file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnLayout {
    columns: Vec<(String, String)>,
}

impl ColumnLayout {
    /// Derive the layout from a reading, in measurement order
    ///
    /// A repeated variable name keeps its first position only.
    pub fn from_reading(reading: &Reading) -> Self {
        let mut columns: Vec<(String, String)> = Vec::new();
        for m in reading.measurements() {
            if !columns.iter().any(|(name, _)| name == &m.name) {
                columns.push((m.name.clone(), m.unit.clone()));
            }
        }
        Self { columns }
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|(name, _)| name.as_str())
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Three header lines, each newline terminated
    pub fn header(&self, created: DateTime<Local>) -> String {
        let mut names = String::from(TIME_COLUMN);
        let mut units = String::from(TIME_UNIT);
        for (name, unit) in &self.columns {
            names.push(SEPARATOR);
            names.push_str(name);
            units.push(SEPARATOR);
            units.push_str(unit);
        }
        format!("{}\n{}\n{}\n", created.format("%Y-%m-%d"), names, units)
    }

    /// Format one data row, newline terminated
    ///
    /// Values are placed by column name. A column the reading lacks is left
    /// empty and variables outside the layout are dropped; both are logged.
    pub fn format_row(&self, reading: &Reading) -> String {
        let mut row = reading.captured_at().format("%H:%M:%S").to_string();
        let mut missing = Vec::new();

        for (name, _) in &self.columns {
            row.push(SEPARATOR);
            match reading.get(name) {
                Some(m) => row.push_str(&m.value.to_string()),
                None => missing.push(name.as_str()),
            }
        }
        row.push('\n');

        let extra: Vec<&str> = reading
            .measurements()
            .iter()
            .map(|m| m.name.as_str())
            .filter(|name| !self.columns.iter().any(|(c, _)| c == name))
            .collect();

        if !missing.is_empty() || !extra.is_empty() {
            warn!(
                "Reading does not match file columns (missing: {:?}, dropped: {:?})",
                missing, extra
            );
        }

        row
    }
}

/// File name for a data file created at `created`
///
/// `<YYYYmmdd-HHMMSS>-<base_name><extension>`, with a `-<n>` counter after
/// the timestamp when `attempt` is non-zero.
pub fn data_file_name(
    created: DateTime<Local>,
    base_name: &str,
    extension: &str,
    attempt: u32,
) -> String {
    let prefix = created.format("%Y%m%d-%H%M%S");
    if attempt == 0 {
        format!("{}-{}{}", prefix, base_name, extension)
    } else {
        format!("{}-{}-{}{}", prefix, attempt, base_name, extension)
    }
}
