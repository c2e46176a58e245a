//! # Error Types
//!
//! Custom error types for the RS485 logger using `thiserror`.
//!
//! Every error belongs to an [`ErrorKind`], which is what the poll loop
//! looks at when it decides whether to back off or carry on.

use std::path::PathBuf;

use thiserror::Error;

/// Main error type for the RS485 logger
#[derive(Debug, Error)]
pub enum LoggerError {
    /// Instrument unreachable, timed out or answered with a Modbus exception
    #[error("Instrument communication error: {0}")]
    Comm(String),

    /// A reading could not be encoded or a frame could not be decoded
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Broadcast peer accept/send failure
    #[error("Network error: {0}")]
    Network(String),

    /// Data file creation or write failure
    #[error("File error on {}: {source}", .path.display())]
    File {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] toml::de::Error),

    /// Configuration parsed but failed validation
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Coarse error classification used for recovery decisions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Comm,
    Serialization,
    Network,
    File,
    Config,
    Io,
}

impl LoggerError {
    /// Classify this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            LoggerError::Comm(_) => ErrorKind::Comm,
            LoggerError::Serialization(_) => ErrorKind::Serialization,
            LoggerError::Network(_) => ErrorKind::Network,
            LoggerError::File { .. } => ErrorKind::File,
            LoggerError::Config(_) | LoggerError::InvalidConfig(_) => ErrorKind::Config,
            LoggerError::Io(_) => ErrorKind::Io,
        }
    }

    /// Wrap an I/O error with the path it happened on
    pub fn file(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        LoggerError::File {
            path: path.into(),
            source,
        }
    }
}

impl From<serde_json::Error> for LoggerError {
    fn from(e: serde_json::Error) -> Self {
        LoggerError::Serialization(e.to_string())
    }
}

/// Result type alias for the RS485 logger
pub type Result<T> = std::result::Result<T, LoggerError>;
