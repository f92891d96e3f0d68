//! Hierarchical timing-wheel delay queue for DLQ redelivery timers.
//!
//! - **Wheel**: seconds / minutes / hours tiers over a generational arena,
//!   O(1) start, stop and per-second work
//! - **Driver**: catches the wheel up to the clock one second at a time
//! - **Engine**: [`WheelEngine`], the [`delayq_core::TimerService`]
//!   implementation with write-ahead persistence and recovery
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use delayq_core::{EngineConfig, MsgMeta, TimerId, TimerService};
//! use delayq_wheel::WheelEngine;
//!
//! #[tokio::main]
//! async fn main() {
//!     let engine = Arc::new(WheelEngine::init_timer(EngineConfig::default()).await.unwrap());
//!     let driver = Arc::clone(&engine);
//!     tokio::spawn(async move { driver.tick_process().await });
//!
//!     engine
//!         .start_timer(TimerId::from("rh-1"), 30, MsgMeta::new("dlq", "queue", 3))
//!         .await
//!         .unwrap();
//!     println!("{}", engine.print_timer().await);
//!     engine.close_timer().await;
//! }
//! ```

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

pub mod arena;
pub mod clock;
pub mod driver;
pub mod engine;
pub mod hook;
pub mod wheel;

pub use arena::{Arena, EntryHandle};
pub use clock::{Clock, ManualClock, SystemClock};
pub use driver::{Pass, TickDriver};
pub use engine::{WheelEngine, WheelEngineBuilder};
pub use hook::{ExpiryHook, LoggingExpiryHook, RecordingExpiryHook};
pub use wheel::{Fired, Inconsistency, Started, Tier, Wheel, placement};
