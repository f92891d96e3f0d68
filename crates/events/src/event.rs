//! Timer transition events and their persisted record form.

use chrono::{DateTime, Utc};
use delayq_core::{Error, MsgMeta, Result, TimerId};
use serde::{Deserialize, Serialize};

/// One state transition of a timer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PersistEvent {
    /// A timer was scheduled.
    Start {
        id: TimerId,
        /// Absolute deadline in epoch seconds.
        deadline: i64,
        metadata: MsgMeta,
    },
    /// A pending timer was cancelled.
    Stop { id: TimerId },
    /// A timer fired.
    Expire { id: TimerId },
}

impl PersistEvent {
    /// Create a new Start event.
    pub fn start(id: TimerId, deadline: i64, metadata: MsgMeta) -> Self {
        Self::Start {
            id,
            deadline,
            metadata,
        }
    }

    /// Create a new Stop event.
    pub const fn stop(id: TimerId) -> Self {
        Self::Stop { id }
    }

    /// Create a new Expire event.
    pub const fn expire(id: TimerId) -> Self {
        Self::Expire { id }
    }

    /// The timer this event is about.
    #[must_use]
    pub const fn timer_id(&self) -> &TimerId {
        match self {
            Self::Start { id, .. } | Self::Stop { id } | Self::Expire { id } => id,
        }
    }

    /// Event type name, as written in the record's `type` field.
    #[must_use]
    pub const fn event_type(&self) -> &'static str {
        match self {
            Self::Start { .. } => "start",
            Self::Stop { .. } => "stop",
            Self::Expire { .. } => "expire",
        }
    }
}

/// An event as written to the durable log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistRecord {
    /// Position in the log, strictly increasing.
    pub seq: u64,
    /// When the appender wrote the record.
    pub recorded_at: DateTime<Utc>,
    /// The transition.
    pub event: PersistEvent,
}

impl PersistRecord {
    /// Wrap an event for appending at `seq`.
    #[must_use]
    pub fn new(seq: u64, event: PersistEvent) -> Self {
        Self {
            seq,
            recorded_at: Utc::now(),
            event,
        }
    }

    /// Encode as a single JSON line (no trailing newline).
    ///
    /// # Errors
    ///
    /// Returns `Error::Serialization` if encoding fails.
    pub fn to_json_line(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| Error::serialization(e.to_string()))
    }

    /// Decode one JSON line.
    ///
    /// # Errors
    ///
    /// Returns `Error::Serialization` if the line is not a valid record.
    pub fn from_json_line(line: &str) -> Result<Self> {
        serde_json::from_str(line).map_err(|e| Error::serialization(e.to_string()))
    }
}
