//! Timing-wheel engine: the [`TimerService`] implementation.
//!
//! Wires the wheel, the persistence pipeline, the tick driver and the shutdown
//! signal together. Every mutation follows the same protocol: take the write
//! lock, mutate, enqueue the transition, release the lock, then wait for the
//! commit. Enqueueing under the lock keeps each id's records in mutation order.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use delayq_core::{
    EngineConfig, Error, HORIZON_SECS, MsgMeta, Result, ResultExt, TimerId, TimerReport,
    TimerService,
};
use delayq_events::{
    CircuitState, DurableLog, PersistEvent, Pipeline, PipelineHandle, Shutdown, open_log, recover,
};
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::clock::{Clock, SystemClock};
use crate::driver::{Pass, TickDriver};
use crate::hook::{ExpiryHook, LoggingExpiryHook};
use crate::wheel::{Inconsistency, Started, Tier, Wheel};

/// Hierarchical timing-wheel delay queue.
pub struct WheelEngine {
    wheel: RwLock<Wheel>,
    clock: Arc<dyn Clock>,
    hook: Arc<dyn ExpiryHook>,
    log: Arc<dyn DurableLog>,
    pipeline: PipelineHandle,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    shutdown: Shutdown,
    tick_interval: Duration,
}

/// Builder for [`WheelEngine`] with injectable collaborators.
pub struct WheelEngineBuilder {
    config: EngineConfig,
    clock: Option<Arc<dyn Clock>>,
    hook: Option<Arc<dyn ExpiryHook>>,
    log: Option<Arc<dyn DurableLog>>,
}

impl WheelEngineBuilder {
    /// Use `clock` instead of the system clock.
    #[must_use]
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Use `hook` instead of [`LoggingExpiryHook`].
    #[must_use]
    pub fn hook(mut self, hook: Arc<dyn ExpiryHook>) -> Self {
        self.hook = Some(hook);
        self
    }

    /// Use `log` instead of the backend named in the configuration.
    #[must_use]
    pub fn log(mut self, log: Arc<dyn DurableLog>) -> Self {
        self.log = Some(log);
        self
    }

    /// Validate the configuration, open the log, replay it and start the pipeline.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` for an invalid configuration, or the backend's
    /// error if the log cannot be opened or read.
    pub async fn build(self) -> Result<WheelEngine> {
        let config = self.config;
        config.validate()?;

        let log = match self.log {
            Some(log) => log,
            None => open_log(&config.log).await?,
        };
        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let hook = self.hook.unwrap_or_else(|| Arc::new(LoggingExpiryHook));

        let recovered = recover(log.as_ref()).await?;
        let next_seq = recovered.next_seq();
        let mut wheel = Wheel::new(clock.now());
        if config.recover {
            let restored = recovered.pending.len();
            for timer in recovered.pending {
                let metadata = MsgMeta {
                    deadline: timer.deadline,
                    ..timer.metadata
                };
                wheel.restore(timer.id, metadata);
            }
            info!(restored, cur = wheel.cur(), "Recovered pending timers");
        } else if !recovered.pending.is_empty() {
            warn!(
                skipped = recovered.pending.len(),
                "Recovery disabled, pending timers in the log are ignored"
            );
        }

        let shutdown = Shutdown::new();
        let (pipeline, tasks) = Pipeline::spawn(
            Arc::clone(&log),
            &config.pipeline,
            shutdown.clone(),
            next_seq,
        )
        .into_parts();

        info!(
            tick_interval_ms = config.tick_interval_ms,
            pending = wheel.len(),
            "Wheel engine initialised"
        );
        Ok(WheelEngine {
            wheel: RwLock::new(wheel),
            clock,
            hook,
            log,
            pipeline,
            tasks: Mutex::new(tasks),
            shutdown,
            tick_interval: Duration::from_millis(config.tick_interval_ms),
        })
    }
}

impl WheelEngine {
    /// Start building an engine from `config`.
    #[must_use]
    pub fn builder(config: EngineConfig) -> WheelEngineBuilder {
        WheelEngineBuilder {
            config,
            clock: None,
            hook: None,
            log: None,
        }
    }

    fn driver(&self) -> TickDriver<'_> {
        TickDriver::new(
            &self.wheel,
            self.clock.as_ref(),
            self.hook.as_ref(),
            &self.pipeline,
        )
    }

    /// Run one catch-up pass now, outside the tick interval.
    pub async fn tick_once(&self) -> Pass {
        self.driver().catch_up().await
    }

    /// Last second the wheel has fully processed.
    pub async fn cur(&self) -> i64 {
        self.wheel.read().await.cur()
    }

    /// Number of pending timers.
    pub async fn pending_len(&self) -> usize {
        self.wheel.read().await.len()
    }

    /// Check if `id` is pending.
    pub async fn contains(&self, id: &TimerId) -> bool {
        self.wheel.read().await.contains(id)
    }

    /// Tier a pending timer sits in.
    pub async fn locate(&self, id: &TimerId) -> Option<Tier> {
        self.wheel.read().await.locate(id)
    }

    /// Verify the wheel's structural invariants.
    ///
    /// # Errors
    ///
    /// Returns the first violated invariant.
    pub async fn check_invariants(&self) -> std::result::Result<(), Inconsistency> {
        self.wheel.read().await.check_invariants()
    }

    /// State of the persistence circuit breaker.
    #[must_use]
    pub fn circuit_state(&self) -> CircuitState {
        self.pipeline.circuit_state()
    }

    /// Check if the engine has been closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.shutdown.is_triggered()
    }
}

#[async_trait]
impl TimerService for WheelEngine {
    async fn init_timer(config: EngineConfig) -> Result<Self> {
        Self::builder(config).build().await
    }

    async fn start_timer(&self, id: TimerId, timeout_secs: i64, metadata: MsgMeta) -> Result<()> {
        if timeout_secs >= HORIZON_SECS {
            debug!(timer_id = %id, timeout_secs, "Timeout beyond wheel horizon");
            return Err(Error::horizon_exceeded(timeout_secs, HORIZON_SECS));
        }
        if self.shutdown.is_triggered() {
            return Err(Error::Cancelled);
        }

        let deadline = self.clock.now().saturating_add(timeout_secs);
        let metadata = MsgMeta {
            deadline,
            ..metadata
        };

        let commit = {
            let mut wheel = self.wheel.write().await;
            match wheel.start(id.clone(), metadata.clone()) {
                Started::Scheduled { replaced } => {
                    debug!(timer_id = %id, deadline, replaced, "Timer scheduled");
                    self.pipeline.submit(PersistEvent::start(id, deadline, metadata))
                }
                Started::Elapsed { replaced } => {
                    debug!(timer_id = %id, deadline, replaced, "Timer expired on start");
                    self.hook.on_expire(&id, &metadata);
                    if !replaced {
                        return Ok(());
                    }
                    self.pipeline.submit(PersistEvent::stop(id))
                }
            }
        };
        commit.wait().await
    }

    async fn stop_timer(&self, id: &TimerId) -> Result<()> {
        if self.shutdown.is_triggered() {
            return Err(Error::Cancelled);
        }

        let commit = {
            let mut wheel = self.wheel.write().await;
            if !wheel.stop(id) {
                debug!(timer_id = %id, "Stop for unknown timer ignored");
                return Ok(());
            }
            debug!(timer_id = %id, "Timer stopped");
            self.pipeline.submit(PersistEvent::stop(id.clone()))
        };
        commit.wait().await
    }

    async fn tick_process(&self) {
        self.driver().run(self.tick_interval, &self.shutdown).await;
    }

    async fn print_timer(&self) -> TimerReport {
        let report = self.wheel.read().await.report(self.clock.now());
        info!("{report}");
        report
    }

    async fn close_timer(&self) {
        if !self.shutdown.trigger() {
            return;
        }

        let tasks = std::mem::take(&mut *self.tasks.lock().await);
        for task in tasks {
            if let Err(e) = task.await {
                warn!(error = %e, "Pipeline task ended abnormally");
            }
        }
        if self.log.close().await.into_option_logged().is_none() {
            warn!("Durable log did not close cleanly");
        }

        let (started, stopped, expired) = self.wheel.read().await.counters();
        info!(started, stopped, expired, "Wheel engine closed");
    }
}
