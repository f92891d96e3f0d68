//! Circuit breaker guarding the durable log.
//!
//! Owned by the appender task, so state changes need no synchronisation:
//! - Closed: batches are appended normally
//! - Open: batches fail fast until the cool-down elapses
//! - Half-Open: the next batches are probes; success closes, failure reopens

use std::time::Duration;

use delayq_core::BreakerConfig;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{info, warn};

/// Circuit breaker states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Normal operation
    Closed,
    /// Rejecting batches
    Open,
    /// Probing for recovery
    HalfOpen,
}

/// Failure-counting breaker with a time-based cool-down.
#[derive(Debug)]
pub struct CircuitBreaker {
    config: BreakerConfig,
    state: CircuitState,
    consecutive_failures: u32,
    probe_successes: u32,
    opened_at: Option<Instant>,
}

impl CircuitBreaker {
    /// Create a closed breaker.
    #[must_use]
    pub const fn new(config: BreakerConfig) -> Self {
        Self {
            config,
            state: CircuitState::Closed,
            consecutive_failures: 0,
            probe_successes: 0,
            opened_at: None,
        }
    }

    /// Current state, without advancing the cool-down.
    #[must_use]
    pub const fn state(&self) -> CircuitState {
        self.state
    }

    fn cooldown(&self) -> Duration {
        Duration::from_millis(self.config.cooldown_ms)
    }

    /// Check whether a batch may be attempted now.
    ///
    /// Returns the remaining cool-down when the circuit is open. An open
    /// circuit whose cool-down has elapsed moves to half-open.
    pub fn check(&mut self) -> Result<(), Duration> {
        match (self.state, self.opened_at) {
            (CircuitState::Open, Some(opened_at)) => {
                let elapsed = opened_at.elapsed();
                let cooldown = self.cooldown();
                if elapsed >= cooldown {
                    info!("Circuit breaker half-open, probing durable log");
                    self.state = CircuitState::HalfOpen;
                    self.probe_successes = 0;
                    Ok(())
                } else {
                    Err(cooldown - elapsed)
                }
            }
            _ => Ok(()),
        }
    }

    /// Record a successful batch.
    pub fn record_success(&mut self) {
        self.consecutive_failures = 0;
        if self.state == CircuitState::HalfOpen {
            self.probe_successes = self.probe_successes.saturating_add(1);
            if self.probe_successes >= self.config.success_threshold {
                info!("Circuit breaker closed");
                self.state = CircuitState::Closed;
                self.opened_at = None;
            }
        }
    }

    /// Record a failed batch.
    pub fn record_failure(&mut self) {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        let trip = match self.state {
            CircuitState::HalfOpen => true,
            CircuitState::Closed => self.consecutive_failures >= self.config.failure_threshold,
            CircuitState::Open => false,
        };
        if trip {
            warn!(
                failures = self.consecutive_failures,
                cooldown_ms = self.config.cooldown_ms,
                "Circuit breaker opened"
            );
            self.state = CircuitState::Open;
            self.opened_at = Some(Instant::now());
        }
    }
}
