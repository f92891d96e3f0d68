//! Core error types for delayq operations.
//!
//! Every failure the engine can report is a variant here. Cancelling an unknown
//! timer is deliberately absent: it is a successful no-op.

use std::path::PathBuf;

use thiserror::Error;

/// Core error type for delayq operations.
#[derive(Debug, Error)]
pub enum Error {
    // Admission
    #[error("timeout of {timeout_secs}s is beyond the wheel horizon of {max_secs}s")]
    HorizonExceeded { timeout_secs: i64, max_secs: i64 },

    // Persistence
    #[error("operation cancelled: engine is shutting down")]
    Cancelled,

    #[error("persisting batch failed after {attempts} attempts: {reason}")]
    PersistFailed { attempts: u32, reason: String },

    #[error("durable log circuit is open, retry after {retry_after_ms}ms")]
    CircuitOpen { retry_after_ms: u64 },

    #[error("durable log append failed: {reason}")]
    LogAppend { reason: String },

    #[error("durable log read failed: {reason}")]
    LogRead { reason: String },

    // Encoding and configuration
    #[error("serialization error: {reason}")]
    Serialization { reason: String },

    #[error("invalid configuration: {reason}")]
    Config { reason: String },

    #[error("failed to read config file '{path}': {reason}")]
    ConfigRead { path: PathBuf, reason: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Create a horizon violation error.
    pub const fn horizon_exceeded(timeout_secs: i64, max_secs: i64) -> Self {
        Self::HorizonExceeded {
            timeout_secs,
            max_secs,
        }
    }

    /// Create a persist failure after exhausted retries.
    pub fn persist_failed(attempts: u32, reason: impl Into<String>) -> Self {
        Self::PersistFailed {
            attempts,
            reason: reason.into(),
        }
    }

    /// Create a log append error.
    pub fn log_append(reason: impl Into<String>) -> Self {
        Self::LogAppend {
            reason: reason.into(),
        }
    }

    /// Create a log read error.
    pub fn log_read(reason: impl Into<String>) -> Self {
        Self::LogRead {
            reason: reason.into(),
        }
    }

    /// Create a serialization error.
    pub fn serialization(reason: impl Into<String>) -> Self {
        Self::Serialization {
            reason: reason.into(),
        }
    }

    /// Create a configuration error.
    pub fn config(reason: impl Into<String>) -> Self {
        Self::Config {
            reason: reason.into(),
        }
    }

    /// Create a config file read error.
    pub fn config_read(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::ConfigRead {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Whether the error only reflects the engine shutting down.
    #[must_use]
    pub const fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Whether retrying the same call later could succeed.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::PersistFailed { .. } | Self::CircuitOpen { .. } | Self::LogAppend { .. }
        )
    }
}
