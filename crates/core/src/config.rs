//! Engine configuration.
//!
//! Loaded from TOML (or built in code) and validated once. Every field has a
//! default, so an empty document is a valid configuration:
//!
//! ```toml
//! tick_interval_ms = 1000
//! recover = true
//!
//! [pipeline]
//! max_batch_size = 512
//! ack_mode = "on_append"
//!
//! [pipeline.retry]
//! max_attempts = 5
//! initial_delay_ms = 50
//!
//! [pipeline.breaker]
//! failure_threshold = 3
//! cooldown_ms = 5000
//!
//! [log]
//! backend = "file"
//! path = "/var/lib/delayq/transitions.log"
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::result::Result;

const DEFAULT_TICK_INTERVAL_MS: u64 = 1000;
const DEFAULT_MAX_BATCH_SIZE: usize = 1024;

/// When a caller's completion signal is released.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AckMode {
    /// After the batch holding the event is appended (write-ahead).
    #[default]
    OnAppend,
    /// As soon as the pipeline accepts the event; the append still happens.
    OnEnqueue,
}

/// Exponential backoff for failed appends.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Retries after the first attempt (0 = a single attempt).
    pub max_attempts: u32,
    /// Delay before the first retry.
    pub initial_delay_ms: u64,
    /// Cap on the delay between retries.
    pub max_delay_ms: u64,
    /// Growth factor per retry.
    pub backoff_multiplier: f64,
    /// Add up to 25% random jitter to each delay.
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay_ms: 100,
            max_delay_ms: 30_000,
            backoff_multiplier: 2.0,
            jitter: true,
        }
    }
}

impl RetryConfig {
    /// No retries: a failed append fails the batch immediately.
    #[must_use]
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 0,
            ..Default::default()
        }
    }
}

/// Circuit breaker guarding the durable log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BreakerConfig {
    /// Consecutive failed batches that open the circuit.
    pub failure_threshold: u32,
    /// Successful probes in half-open state that close it again.
    pub success_threshold: u32,
    /// How long the circuit stays open before probing.
    pub cooldown_ms: u64,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 1,
            cooldown_ms: 10_000,
        }
    }
}

/// Persistence pipeline settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Upper bound on events per appended batch.
    pub max_batch_size: usize,
    /// When callers are released.
    pub ack_mode: AckMode,
    /// Append retry policy.
    pub retry: RetryConfig,
    /// Append circuit breaker.
    pub breaker: BreakerConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_batch_size: DEFAULT_MAX_BATCH_SIZE,
            ack_mode: AckMode::default(),
            retry: RetryConfig::default(),
            breaker: BreakerConfig::default(),
        }
    }
}

/// Durable log backend selection.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "backend", rename_all = "snake_case")]
pub enum LogConfig {
    /// Process-local log; durable only for the life of the process.
    #[default]
    Memory,
    /// Append-only JSON-lines file, fsynced per batch.
    File {
        /// Log file location; parent directories are created on open.
        path: PathBuf,
    },
}

/// Top-level engine configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// How often the tick driver wakes to catch the wheel up to the clock.
    pub tick_interval_ms: u64,
    /// Replay the durable log into the wheel on start-up.
    pub recover: bool,
    /// Persistence pipeline settings.
    pub pipeline: PipelineConfig,
    /// Durable log backend.
    pub log: LogConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: DEFAULT_TICK_INTERVAL_MS,
            recover: true,
            pipeline: PipelineConfig::default(),
            log: LogConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Parse and validate a TOML document.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` if the document does not parse or fails validation.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw).map_err(|e| Error::config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a TOML file.
    ///
    /// # Errors
    ///
    /// Returns `Error::ConfigRead` if the file cannot be read, otherwise as
    /// [`EngineConfig::from_toml_str`].
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| Error::config_read(path, e.to_string()))?;
        Self::from_toml_str(&raw)
    }

    /// Check cross-field constraints.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` naming the first invalid field.
    pub fn validate(&self) -> Result<()> {
        if self.tick_interval_ms == 0 {
            return Err(Error::config("tick_interval_ms must be greater than 0"));
        }
        if self.pipeline.max_batch_size == 0 {
            return Err(Error::config("pipeline.max_batch_size must be greater than 0"));
        }
        if !(self.pipeline.retry.backoff_multiplier >= 1.0) {
            return Err(Error::config(
                "pipeline.retry.backoff_multiplier must be at least 1.0",
            ));
        }
        if self.pipeline.breaker.failure_threshold == 0 {
            return Err(Error::config(
                "pipeline.breaker.failure_threshold must be greater than 0",
            ));
        }
        if self.pipeline.breaker.success_threshold == 0 {
            return Err(Error::config(
                "pipeline.breaker.success_threshold must be greater than 0",
            ));
        }
        if let LogConfig::File { path } = &self.log {
            if path.as_os_str().is_empty() {
                return Err(Error::config("log.path must not be empty"));
            }
        }
        Ok(())
    }
}
