//! Durable transition log and write-ahead persistence pipeline for delayq.
//!
//! - **Events**: [`PersistEvent`] transitions and their [`PersistRecord`] envelope
//! - **Log backends**: the [`DurableLog`] trait with [`MemoryLog`], [`FileLog`]
//!   and the [`TracingLog`] wrapper
//! - **Pipeline**: batcher + appender tasks with retry, backoff and a circuit breaker
//! - **Replay**: folding the log back into pending timers on start-up
//!
//! # Example
//!
//! ```ignore
//! use delayq_events::{MemoryLog, Pipeline, PersistEvent, Shutdown};
//! use delayq_core::{PipelineConfig, TimerId};
//!
//! #[tokio::main]
//! async fn main() {
//!     let log = MemoryLog::new_arc();
//!     let shutdown = Shutdown::new();
//!     let pipeline = Pipeline::spawn(log.clone(), &PipelineConfig::default(), shutdown, 1);
//!
//!     pipeline
//!         .handle()
//!         .submit(PersistEvent::stop(TimerId::from("rh-1")))
//!         .wait()
//!         .await
//!         .unwrap();
//!     assert_eq!(log.records().await.len(), 1);
//! }
//! ```

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

pub mod breaker;
pub mod durable_store;
pub mod event;
pub mod pipeline;
pub mod replay;
pub mod retry;
pub mod shutdown;
pub mod store;

// Re-export main types
pub use breaker::{CircuitBreaker, CircuitState};
pub use durable_store::{FileLog, open_log};
pub use event::{PersistEvent, PersistRecord};
pub use pipeline::{Commit, PersistRequest, Pipeline, PipelineHandle};
pub use replay::{Recovered, RecoveredTimer, fold, recover};
pub use retry::{Backoff, RetryOutcome, retry_with_backoff};
pub use shutdown::Shutdown;
pub use store::{DurableLog, MemoryLog, TracingLog};
