//! # Data Log Module
//!
//! Persists readings to tab-delimited text files with daily rotation.
//!
//! This module handles:
//! - Fixing the column layout from the first reading of each file
//! - Buffering rows and flushing them once a sample-count threshold is reached
//! - Starting a new file when the local calendar day changes
//! - Keeping unwritten rows in memory across file system failures

pub mod format;
pub mod writer;

pub use writer::{RotatingLogWriter, RotationAction, WriterSettings};
