//! # delayq
//!
//! Durable delay queue for dead-letter-queue redelivery timers, built on a
//! hierarchical timing wheel with write-ahead persistence.
//!
//! ## Crates
//!
//! - [`delayq_core`]: ids, metadata, errors, configuration, the [`TimerService`] contract
//! - [`delayq_events`]: transition records, durable log backends, the persistence pipeline
//! - [`delayq_wheel`]: the timing wheel, tick driver and [`WheelEngine`]
//!
//! ## Start-up
//!
//! ```ignore
//! let engine = delayq::load_engine("delayq.toml").await?;
//! let driver = delayq::spawn_driver(&engine);
//! engine.start_timer(TimerId::from("rh-1"), 30, MsgMeta::new("dlq", "queue", 3)).await?;
//! // ...
//! engine.close_timer().await;
//! driver.await?;
//! ```

#![forbid(unsafe_code)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

use std::path::Path;
use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::info;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

pub use delayq_core::{
    AckMode, EngineConfig, Error, LogConfig, MsgMeta, Result, TimerId, TimerReport, TimerService,
};
pub use delayq_events::{DurableLog, FileLog, MemoryLog, PersistEvent, PersistRecord};
pub use delayq_wheel::{Clock, ExpiryHook, LoggingExpiryHook, SystemClock, WheelEngine};

/// Install the global tracing subscriber.
///
/// Filtering follows `RUST_LOG`, defaulting to `info`. Returns `false` if a
/// subscriber was already installed.
pub fn init_tracing() -> bool {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .try_init()
        .is_ok()
}

/// Build a wheel engine from `config`, recovering pending timers from its log.
///
/// # Errors
///
/// Returns `Error::Config` for an invalid configuration, or the log backend's
/// error if the log cannot be opened or replayed.
pub async fn build_engine(config: EngineConfig) -> Result<Arc<WheelEngine>> {
    let engine = WheelEngine::init_timer(config).await?;
    Ok(Arc::new(engine))
}

/// Load a TOML configuration file and build an engine from it.
///
/// # Errors
///
/// Returns `Error::ConfigRead` if the file cannot be read, otherwise as
/// [`build_engine`].
pub async fn load_engine(path: impl AsRef<Path>) -> Result<Arc<WheelEngine>> {
    let path = path.as_ref();
    let config = EngineConfig::load(path)?;
    info!(path = %path.display(), "Loaded engine configuration");
    build_engine(config).await
}

/// Run the engine's tick driver on a background task.
///
/// The task ends once [`TimerService::close_timer`] is called.
pub fn spawn_driver(engine: &Arc<WheelEngine>) -> JoinHandle<()> {
    let engine = Arc::clone(engine);
    tokio::spawn(async move { engine.tick_process().await })
}
