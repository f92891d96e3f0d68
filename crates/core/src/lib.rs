//! Core types, errors, configuration and the service contract for delayq.
//!
//! Everything the engine crates agree on lives here: the [`TimerId`] and
//! [`MsgMeta`] payload, the [`Error`] taxonomy, [`EngineConfig`], and the
//! [`TimerService`] trait every engine variant implements.

#![forbid(unsafe_code)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

pub mod config;
pub mod error;
pub mod result;
pub mod service;
pub mod types;

pub use config::{AckMode, BreakerConfig, EngineConfig, LogConfig, PipelineConfig, RetryConfig};
pub use error::Error;
pub use result::{Result, ResultExt};
pub use service::{PendingTimer, TickStats, TimerReport, TimerService};
pub use types::{HORIZON_SECS, MsgMeta, TimerId};
