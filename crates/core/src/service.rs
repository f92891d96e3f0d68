//! The timer service contract shared by every engine variant.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::EngineConfig;
use crate::result::Result;
use crate::types::{MsgMeta, TimerId};

/// Operation set every delay-queue engine implements.
///
/// Engines are interchangeable behind this trait; which one runs is a
/// construction-time decision.
#[async_trait]
pub trait TimerService: Send + Sync {
    /// Construct a ready-to-use engine, opening any backing resources.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or a backing resource
    /// cannot be opened.
    async fn init_timer(config: EngineConfig) -> Result<Self>
    where
        Self: Sized;

    /// Schedule `id` to fire `timeout_secs` from now.
    ///
    /// # Errors
    ///
    /// Returns `Error::HorizonExceeded` for timeouts of 12 hours or more, and
    /// persistence errors if the start could not be durably recorded.
    async fn start_timer(&self, id: TimerId, timeout_secs: i64, metadata: MsgMeta) -> Result<()>;

    /// Cancel `id`. Unknown or already fired ids are a successful no-op.
    ///
    /// # Errors
    ///
    /// Returns persistence errors if the stop could not be durably recorded.
    async fn stop_timer(&self, id: &TimerId) -> Result<()>;

    /// Drive expirations until the engine shuts down.
    async fn tick_process(&self);

    /// Snapshot of pending timers and counters. Has no side effects.
    async fn print_timer(&self) -> TimerReport;

    /// Shut down and release backing resources. Safe to call more than once.
    async fn close_timer(&self);
}

/// One pending timer in a [`TimerReport`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingTimer {
    /// Timer handle.
    pub id: TimerId,
    /// Absolute deadline in epoch seconds.
    pub deadline: i64,
}

/// Time spent processing one wheel second.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TickStats {
    /// Number of seconds processed.
    pub count: u64,
    /// Total processing time.
    pub total: Duration,
    /// Fastest second.
    pub min: Duration,
    /// Slowest second.
    pub max: Duration,
}

impl TickStats {
    /// Fold one measurement in.
    pub fn record(&mut self, elapsed: Duration) {
        self.min = if self.count == 0 {
            elapsed
        } else {
            self.min.min(elapsed)
        };
        self.max = self.max.max(elapsed);
        self.total = self.total.saturating_add(elapsed);
        self.count = self.count.saturating_add(1);
    }

    /// Mean processing time, if anything was processed.
    #[must_use]
    pub fn mean(&self) -> Option<Duration> {
        let count = u32::try_from(self.count).ok()?;
        self.total.checked_div(count)
    }
}

/// Diagnostic dump of an engine.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimerReport {
    /// Clock reading when the report was taken (epoch seconds).
    pub now: i64,
    /// Last second the wheel has fully processed.
    pub cur: i64,
    /// Pending timers, ordered by deadline then id.
    pub pending: Vec<PendingTimer>,
    /// Timers started.
    pub started: u64,
    /// Timers cancelled.
    pub stopped: u64,
    /// Timers expired.
    pub expired: u64,
    /// Per-second processing statistics.
    pub ticks: TickStats,
}

impl fmt::Display for TimerReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Current time: {} (tick: {})", self.now, self.cur)?;
        for timer in &self.pending {
            writeln!(f, "timer: {}, deadline: {}", timer.id, timer.deadline)?;
        }
        writeln!(
            f,
            "Total created: {}, expired: {}, canceled: {}",
            self.started, self.expired, self.stopped
        )?;
        match self.ticks.mean() {
            Some(mean) => write!(
                f,
                "Average tick process time: {:?} (n: {}, min: {:?}, max: {:?})",
                mean, self.ticks.count, self.ticks.min, self.ticks.max
            ),
            None => write!(f, "Average tick process time: <no ticks processed>"),
        }
    }
}
