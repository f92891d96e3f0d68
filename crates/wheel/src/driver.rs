//! Tick driver: advances the wheel to the clock and fires due timers.

use std::time::{Duration, Instant};

use delayq_core::ResultExt;
use delayq_events::{PersistEvent, PipelineHandle, Shutdown};
use tokio::sync::RwLock;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info};

use crate::clock::Clock;
use crate::hook::ExpiryHook;
use crate::wheel::Wheel;

/// Summary of one catch-up pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Pass {
    /// Seconds processed.
    pub steps: u64,
    /// Timers fired.
    pub fired: usize,
    /// Expiries whose `Expire` record did not commit.
    pub uncommitted: usize,
}

/// Borrowed view of the engine parts the driver works on.
pub struct TickDriver<'a> {
    wheel: &'a RwLock<Wheel>,
    clock: &'a dyn Clock,
    hook: &'a dyn ExpiryHook,
    pipeline: &'a PipelineHandle,
}

impl<'a> TickDriver<'a> {
    /// Assemble a driver.
    #[must_use]
    pub const fn new(
        wheel: &'a RwLock<Wheel>,
        clock: &'a dyn Clock,
        hook: &'a dyn ExpiryHook,
        pipeline: &'a PipelineHandle,
    ) -> Self {
        Self {
            wheel,
            clock,
            hook,
            pipeline,
        }
    }

    /// Step the wheel one second at a time until it reaches the clock, then
    /// wait for the pass's `Expire` commits with the lock released.
    ///
    /// A clock reading behind `cur` processes nothing.
    pub async fn catch_up(&self) -> Pass {
        let now = self.clock.now();
        let mut pass = Pass::default();
        let mut commits = Vec::new();

        {
            let mut wheel = self.wheel.write().await;
            while wheel.cur() < now {
                let started = Instant::now();
                for fired in wheel.step() {
                    commits.push(self.pipeline.submit(PersistEvent::expire(fired.id.clone())));
                    self.hook.on_expire(&fired.id, &fired.metadata);
                    pass.fired += 1;
                }
                wheel.record_tick(started.elapsed());
                pass.steps += 1;
            }
        }

        for commit in commits {
            let committed = commit.wait().await.inspect_error(|e| {
                if !e.is_cancelled() {
                    error!(error = %e, "Expiry was not persisted");
                }
            });
            if committed.is_err() {
                pass.uncommitted += 1;
            }
        }

        if pass.steps > 1 || pass.fired > 0 {
            debug!(
                steps = pass.steps,
                fired = pass.fired,
                uncommitted = pass.uncommitted,
                "Catch-up pass complete"
            );
        }
        pass
    }

    /// Run catch-up passes every `interval` until shutdown.
    pub async fn run(&self, interval: Duration, shutdown: &Shutdown) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(
            interval_ms = u64::try_from(interval.as_millis()).unwrap_or(u64::MAX),
            "Tick driver started"
        );

        loop {
            tokio::select! {
                biased;
                () = shutdown.cancelled() => break,
                _ = ticker.tick() => {}
            }
            self.catch_up().await;
        }

        info!("Tick driver stopped");
    }
}
