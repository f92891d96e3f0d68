//! Domain types shared by the wheel, the persistence pipeline and callers.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Longest timeout the wheel accepts, exclusive: 12 hours.
pub const HORIZON_SECS: i64 = 12 * 60 * 60;

/// Caller-supplied handle for one pending timer (typically a message receipt handle).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TimerId(String);

impl TimerId {
    /// Create a timer ID from an existing string.
    #[must_use]
    pub fn from_string(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for TimerId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for TimerId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl fmt::Display for TimerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Message metadata carried with a timer and handed back unchanged at expiry.
///
/// Only `deadline` is owned by the engine; it is overwritten on start.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MsgMeta {
    /// Dead-letter target once redeliveries are exhausted.
    pub dlq: String,
    /// Source queue the message is redelivered to.
    pub queue_url: String,
    /// Remaining redelivery attempts.
    pub redeliveries_left: u32,
    /// Absolute deadline in epoch seconds.
    pub deadline: i64,
}

impl MsgMeta {
    /// Create metadata for a message read from `queue_url`.
    #[must_use]
    pub fn new(dlq: impl Into<String>, queue_url: impl Into<String>, redeliveries_left: u32) -> Self {
        Self {
            dlq: dlq.into(),
            queue_url: queue_url.into(),
            redeliveries_left,
            deadline: 0,
        }
    }

    /// Whether an expired message goes back to its source queue rather than the DLQ.
    #[must_use]
    pub const fn should_redeliver(&self) -> bool {
        self.redeliveries_left > 0
    }
}
