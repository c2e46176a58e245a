//! # Rolling Window
//!
//! Bounded per-variable history of received values.
//!
//! Each variable keeps at most `capacity` samples; pushing into a full series
//! evicts its oldest sample first. The capacity is fixed at construction.
//!
//! ```
//! use chrono::Local;
//! use rs485_logger::monitor::window::RollingWindow;
//!
//! let mut window = RollingWindow::new(2);
//! let now = Local::now();
//! window.push("T", now, 20.0);
//! window.push("T", now, 21.0);
//! window.push("T", now, 22.0);
//!
//! let values: Vec<f64> = window.series("T").iter().map(|(_, v)| *v).collect();
//! assert_eq!(values, vec![21.0, 22.0]);
//! ```

use std::collections::{BTreeMap, VecDeque};

use chrono::{DateTime, Local};

use crate::reading::Reading;

/// Default number of samples kept per variable
pub const DEFAULT_WINDOW_SIZE: usize = 1200;

/// One series entry
pub type Sample = (DateTime<Local>, f64);

#[derive(Debug, Clone)]
struct Series {
    unit: Option<String>,
    samples: VecDeque<Sample>,
}

/// Fixed-capacity time series for every tracked variable
#[derive(Debug, Clone)]
pub struct RollingWindow {
    capacity: usize,
    series: BTreeMap<String, Series>,
}

impl Default for RollingWindow {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW_SIZE)
    }
}

impl RollingWindow {
    /// Create a window; a capacity of 0 is raised to 1
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            series: BTreeMap::new(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Append a sample, evicting the oldest one if the series is full
    pub fn push(&mut self, variable: &str, timestamp: DateTime<Local>, value: f64) {
        let capacity = self.capacity;
        let series = self
            .series
            .entry(variable.to_string())
            .or_insert_with(|| Series {
                unit: None,
                samples: VecDeque::with_capacity(capacity),
            });

        if series.samples.len() == capacity {
            series.samples.pop_front();
        }
        series.samples.push_back((timestamp, value));
    }

    /// Push the measurements of a reading
    ///
    /// Only variables listed in `tracked` are kept, unless `tracked` is empty,
    /// in which case every variable is.
    ///
    /// # Returns
    ///
    /// * `usize` - Number of samples pushed
    pub fn push_reading(&mut self, reading: &Reading, tracked: &[String]) -> usize {
        let mut pushed = 0;
        for m in reading.measurements() {
            if !tracked.is_empty() && !tracked.iter().any(|t| t == &m.name) {
                continue;
            }
            self.push(&m.name, reading.captured_at(), m.value);
            if let Some(series) = self.series.get_mut(&m.name) {
                series.unit = Some(m.unit.clone());
            }
            pushed += 1;
        }
        pushed
    }

    /// Samples of one variable, oldest first
    pub fn series(&self, variable: &str) -> Vec<Sample> {
        self.series
            .get(variable)
            .map(|s| s.samples.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Most recent sample of one variable
    pub fn latest(&self, variable: &str) -> Option<Sample> {
        self.series.get(variable)?.samples.back().copied()
    }

    /// Last unit seen for a variable pushed through [`Self::push_reading`]
    pub fn unit(&self, variable: &str) -> Option<&str> {
        self.series.get(variable)?.unit.as_deref()
    }

    pub fn len(&self, variable: &str) -> usize {
        self.series.get(variable).map_or(0, |s| s.samples.len())
    }

    /// Names of all variables with at least one sample, sorted
    pub fn variables(&self) -> impl Iterator<Item = &str> {
        self.series.keys().map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reading::Measurement;
    use chrono::{Duration, TimeZone};

    fn t0() -> DateTime<Local> {
        Local.with_ymd_and_hms(2024, 6, 10, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_capacity_plus_one_evicts_oldest() {
        let mut window = RollingWindow::new(5);
        for i in 0..6 {
            window.push("T", t0() + Duration::seconds(i), i as f64);
        }

        let series = window.series("T");
        assert_eq!(series.len(), 5);
        assert_eq!(series.first().unwrap().1, 1.0);
        assert_eq!(series.last().unwrap().1, 5.0);
        assert_eq!(series.first().unwrap().0, t0() + Duration::seconds(1));
    }

    #[test]
    fn test_series_is_oldest_first() {
        let mut window = RollingWindow::new(10);
        for i in 0..3 {
            window.push("Moist", t0() + Duration::seconds(i), 30.0 + i as f64);
        }

        let values: Vec<f64> = window.series("Moist").iter().map(|(_, v)| *v).collect();
        assert_eq!(values, vec![30.0, 31.0, 32.0]);
    }

    #[test]
    fn test_variables_are_independent() {
        let mut window = RollingWindow::new(2);
        for i in 0..5 {
            window.push("Count", t0(), i as f64);
        }
        window.push("T", t0(), 20.0);

        assert_eq!(window.len("Count"), 2);
        assert_eq!(window.len("T"), 1);
        assert_eq!(window.variables().collect::<Vec<_>>(), vec!["Count", "T"]);
    }

    #[test]
    fn test_capacity_never_changes() {
        let mut window = RollingWindow::new(DEFAULT_WINDOW_SIZE);
        for i in 0..(DEFAULT_WINDOW_SIZE * 2) {
            window.push("T", t0(), i as f64);
        }

        assert_eq!(window.capacity(), DEFAULT_WINDOW_SIZE);
        assert_eq!(window.len("T"), DEFAULT_WINDOW_SIZE);
    }

    #[test]
    fn test_zero_capacity_is_raised_to_one() {
        let mut window = RollingWindow::new(0);
        window.push("T", t0(), 1.0);
        window.push("T", t0(), 2.0);

        assert_eq!(window.capacity(), 1);
        assert_eq!(window.series("T"), vec![(t0(), 2.0)]);
    }

    #[test]
    fn test_unknown_variable_is_empty() {
        let window = RollingWindow::new(3);
        assert!(window.series("VOC").is_empty());
        assert!(window.latest("VOC").is_none());
        assert_eq!(window.len("VOC"), 0);
    }

    #[test]
    fn test_push_reading_filters_tracked_variables() {
        let mut window = RollingWindow::new(10);
        let reading = Reading::new(
            t0(),
            vec![
                Measurement::new("T", 21.3, "degC"),
                Measurement::new("Moist", 33.1, "vol%"),
                Measurement::new("Count", 512.0, "#"),
            ],
        );

        let tracked = vec!["Count".to_string(), "Moist".to_string()];
        assert_eq!(window.push_reading(&reading, &tracked), 2);
        assert_eq!(window.len("T"), 0);
        assert_eq!(window.latest("Moist"), Some((t0(), 33.1)));
        assert_eq!(window.unit("Count"), Some("#"));

        assert_eq!(window.push_reading(&reading, &[]), 3);
        assert_eq!(window.len("T"), 1);
    }
}
