//! Write-ahead persistence pipeline.
//!
//! Events flow through two tasks:
//!
//! ```text
//! submit() --unbounded--> batcher --capacity 1--> appender --> DurableLog
//!    |                                                |
//!    +------------------- Commit <---- ack -----------+
//! ```
//!
//! The batcher keeps accumulating while the appender is busy, so batch size
//! tracks append latency. The appender assigns sequence numbers, appends with
//! retry and backoff behind a circuit breaker, and releases acknowledgements in
//! submission order.

use std::sync::Arc;

use delayq_core::{AckMode, Error, PipelineConfig, Result};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::breaker::{CircuitBreaker, CircuitState};
use crate::event::{PersistEvent, PersistRecord};
use crate::retry::{Backoff, retry_with_backoff};
use crate::shutdown::Shutdown;
use crate::store::DurableLog;

type Ack = oneshot::Sender<Result<()>>;

/// An event waiting to be appended, with its completion signal.
#[derive(Debug)]
pub struct PersistRequest {
    /// The transition to persist.
    pub event: PersistEvent,
    ack: Option<Ack>,
}

/// Why a whole batch failed. Cloned once per waiter.
#[derive(Debug, Clone, PartialEq, Eq)]
enum BatchError {
    Exhausted { attempts: u32, reason: String },
    CircuitOpen { retry_after_ms: u64 },
}

impl BatchError {
    fn to_error(&self) -> Error {
        match self {
            Self::Exhausted { attempts, reason } => Error::persist_failed(*attempts, reason.clone()),
            Self::CircuitOpen { retry_after_ms } => Error::CircuitOpen {
                retry_after_ms: *retry_after_ms,
            },
        }
    }
}

/// Completion of one submitted event.
#[derive(Debug)]
#[must_use = "a commit does nothing unless waited on"]
pub struct Commit {
    state: CommitState,
    shutdown: Shutdown,
}

#[derive(Debug)]
enum CommitState {
    Pending(oneshot::Receiver<Result<()>>),
    Cancelled,
}

impl Commit {
    /// Wait until the event is durable (or accepted, in on-enqueue mode).
    ///
    /// # Errors
    ///
    /// Returns `Error::Cancelled` on shutdown or if the pipeline is gone, and
    /// `Error::PersistFailed` / `Error::CircuitOpen` if the append failed.
    pub async fn wait(self) -> Result<()> {
        match self.state {
            CommitState::Cancelled => Err(Error::Cancelled),
            CommitState::Pending(rx) => {
                tokio::select! {
                    biased;
                    result = rx => result.unwrap_or(Err(Error::Cancelled)),
                    () = self.shutdown.cancelled() => Err(Error::Cancelled),
                }
            }
        }
    }
}

/// Cloneable submission side of a running pipeline.
#[derive(Debug, Clone)]
pub struct PipelineHandle {
    intake: mpsc::UnboundedSender<PersistRequest>,
    circuit: watch::Receiver<CircuitState>,
    shutdown: Shutdown,
}

impl PipelineHandle {
    /// Enqueue an event without waiting. Never blocks.
    pub fn submit(&self, event: PersistEvent) -> Commit {
        let (tx, rx) = oneshot::channel();
        let request = PersistRequest {
            event,
            ack: Some(tx),
        };
        let state = match self.intake.send(request) {
            Ok(()) => CommitState::Pending(rx),
            Err(rejected) => {
                debug!(
                    timer_id = %rejected.0.event.timer_id(),
                    "Pipeline closed, event not accepted"
                );
                CommitState::Cancelled
            }
        };
        Commit {
            state,
            shutdown: self.shutdown.clone(),
        }
    }

    /// Current state of the append circuit breaker.
    #[must_use]
    pub fn circuit_state(&self) -> CircuitState {
        *self.circuit.borrow()
    }
}

/// A running pipeline: its handle plus the two task handles.
pub struct Pipeline {
    handle: PipelineHandle,
    tasks: Vec<JoinHandle<()>>,
}

impl Pipeline {
    /// Spawn the batcher and appender tasks.
    ///
    /// `next_seq` is the sequence number given to the first appended record;
    /// pass one past the last recovered record to keep the log monotonic.
    pub fn spawn(
        log: Arc<dyn DurableLog>,
        config: &PipelineConfig,
        shutdown: Shutdown,
        next_seq: u64,
    ) -> Self {
        let (intake_tx, intake_rx) = mpsc::unbounded_channel();
        let (handoff_tx, handoff_rx) = mpsc::channel(1);
        let (circuit_tx, circuit_rx) = watch::channel(CircuitState::Closed);

        let batcher = Batcher {
            intake: intake_rx,
            handoff: handoff_tx,
            max_batch_size: config.max_batch_size,
            ack_mode: config.ack_mode,
        };
        let appender = Appender {
            log,
            backoff: Backoff::new(config.retry.clone()),
            breaker: CircuitBreaker::new(config.breaker.clone()),
            circuit: circuit_tx,
            next_seq,
        };

        info!(
            max_batch_size = config.max_batch_size,
            ack_mode = ?config.ack_mode,
            next_seq,
            "Starting persistence pipeline"
        );
        let tasks = vec![
            tokio::spawn(batcher.run(shutdown.clone())),
            tokio::spawn(appender.run(handoff_rx, shutdown.clone())),
        ];

        Self {
            handle: PipelineHandle {
                intake: intake_tx,
                circuit: circuit_rx,
                shutdown,
            },
            tasks,
        }
    }

    /// Submission handle.
    #[must_use]
    pub const fn handle(&self) -> &PipelineHandle {
        &self.handle
    }

    /// Split into the handle and the task handles.
    #[must_use]
    pub fn into_parts(self) -> (PipelineHandle, Vec<JoinHandle<()>>) {
        (self.handle, self.tasks)
    }
}

struct Batcher {
    intake: mpsc::UnboundedReceiver<PersistRequest>,
    handoff: mpsc::Sender<Vec<PersistRequest>>,
    max_batch_size: usize,
    ack_mode: AckMode,
}

impl Batcher {
    async fn run(mut self, shutdown: Shutdown) {
        let mut batch: Vec<PersistRequest> = Vec::new();
        let mut intake_open = true;

        loop {
            if !intake_open && batch.is_empty() {
                debug!("Intake closed and drained");
                break;
            }

            tokio::select! {
                biased;
                () = shutdown.cancelled() => {
                    if !batch.is_empty() {
                        debug!(batch_len = batch.len(), "Dropping unflushed batch on shutdown");
                    }
                    break;
                }
                received = self.intake.recv(), if intake_open && batch.len() < self.max_batch_size => {
                    match received {
                        Some(request) => batch.push(self.accept(request)),
                        None => intake_open = false,
                    }
                }
                permit = self.handoff.reserve(), if !batch.is_empty() => {
                    match permit {
                        Ok(permit) => permit.send(std::mem::take(&mut batch)),
                        Err(_) => {
                            warn!("Appender gone, batcher exiting");
                            break;
                        }
                    }
                }
            }
        }

        info!("Batcher stopped");
    }

    fn accept(&self, mut request: PersistRequest) -> PersistRequest {
        if self.ack_mode == AckMode::OnEnqueue {
            if let Some(ack) = request.ack.take() {
                let _ = ack.send(Ok(()));
            }
        }
        request
    }
}

struct Appender {
    log: Arc<dyn DurableLog>,
    backoff: Backoff,
    breaker: CircuitBreaker,
    circuit: watch::Sender<CircuitState>,
    next_seq: u64,
}

impl Appender {
    async fn run(mut self, mut handoff: mpsc::Receiver<Vec<PersistRequest>>, shutdown: Shutdown) {
        loop {
            let batch = tokio::select! {
                biased;
                () = shutdown.cancelled() => break,
                received = handoff.recv() => match received {
                    Some(batch) => batch,
                    None => break,
                },
            };

            let outcome = tokio::select! {
                biased;
                () = shutdown.cancelled() => {
                    debug!(batch_len = batch.len(), "Append interrupted by shutdown");
                    break;
                }
                outcome = self.append_batch(&batch) => outcome,
            };
            release(batch, &outcome);
        }

        info!(next_seq = self.next_seq, "Appender stopped");
    }

    async fn append_batch(&mut self, batch: &[PersistRequest]) -> std::result::Result<(), BatchError> {
        if let Err(remaining) = self.breaker.check() {
            self.publish_state();
            let retry_after_ms = u64::try_from(remaining.as_millis()).unwrap_or(u64::MAX);
            warn!(batch_len = batch.len(), retry_after_ms, "Circuit open, failing batch");
            return Err(BatchError::CircuitOpen { retry_after_ms });
        }

        let records: Vec<PersistRecord> = batch
            .iter()
            .zip(self.next_seq..)
            .map(|(request, seq)| PersistRecord::new(seq, request.event.clone()))
            .collect();

        let log = &self.log;
        let records_ref = &records;
        let outcome = retry_with_backoff(&self.backoff, move |_| log.append(records_ref)).await;

        let attempts = outcome.attempts;
        let elapsed_ms = u64::try_from(outcome.total_duration.as_millis()).unwrap_or(u64::MAX);
        let result = match outcome.into_result() {
            Ok(()) => {
                self.next_seq += records.len() as u64;
                self.breaker.record_success();
                debug!(batch_len = records.len(), attempts, elapsed_ms, "Batch committed");
                Ok(())
            }
            Err(e) => {
                self.breaker.record_failure();
                let reason = match e {
                    Error::PersistFailed { reason, .. } => reason,
                    other => other.to_string(),
                };
                error!(
                    batch_len = records.len(),
                    attempts,
                    elapsed_ms,
                    reason = %reason,
                    "Batch append failed"
                );
                Err(BatchError::Exhausted { attempts, reason })
            }
        };
        self.publish_state();
        result
    }

    fn publish_state(&self) {
        let state = self.breaker.state();
        self.circuit.send_if_modified(|current| {
            if *current == state {
                false
            } else {
                *current = state;
                true
            }
        });
    }
}

fn release(batch: Vec<PersistRequest>, outcome: &std::result::Result<(), BatchError>) {
    for request in batch {
        let result = outcome.as_ref().map_err(BatchError::to_error).copied();
        match request.ack {
            Some(ack) => {
                let _ = ack.send(result);
            }
            None => {
                if let Err(e) = result {
                    error!(
                        timer_id = %request.event.timer_id(),
                        event_type = request.event.event_type(),
                        error = %e,
                        "Acknowledged event was not persisted"
                    );
                }
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use delayq_core::TimerId;

    #[test]
    fn test_batch_error_conversion() {
        let exhausted = BatchError::Exhausted {
            attempts: 4,
            reason: "disk full".into(),
        };
        assert!(matches!(
            exhausted.to_error(),
            Error::PersistFailed { attempts: 4, .. }
        ));

        let open = BatchError::CircuitOpen { retry_after_ms: 250 };
        assert!(matches!(
            open.to_error(),
            Error::CircuitOpen { retry_after_ms: 250 }
        ));
    }

    #[tokio::test]
    async fn test_submit_to_closed_pipeline_is_cancelled() {
        let (intake, rx) = mpsc::unbounded_channel();
        drop(rx);
        let (_circuit_tx, circuit) = watch::channel(CircuitState::Closed);
        let handle = PipelineHandle {
            intake,
            circuit,
            shutdown: Shutdown::new(),
        };

        let err = handle
            .submit(PersistEvent::stop(TimerId::from("a")))
            .wait()
            .await
            .unwrap_err();
        assert!(err.is_cancelled());
    }
}
