//! Callback invoked for every expired timer.

use std::sync::Mutex;

use delayq_core::{MsgMeta, TimerId};
use tracing::info;

/// Receives each timer as it fires.
///
/// Called synchronously by the tick driver while it holds the wheel lock, so
/// implementations must not block.
pub trait ExpiryHook: Send + Sync {
    /// Handle one expired timer.
    fn on_expire(&self, id: &TimerId, metadata: &MsgMeta);
}

/// Logs where an expired message would be routed. Performs no redelivery.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingExpiryHook;

impl ExpiryHook for LoggingExpiryHook {
    fn on_expire(&self, id: &TimerId, metadata: &MsgMeta) {
        if metadata.should_redeliver() {
            info!(
                timer_id = %id,
                queue_url = %metadata.queue_url,
                redeliveries_left = metadata.redeliveries_left,
                "Timer expired, message would be redelivered"
            );
        } else {
            info!(
                timer_id = %id,
                dlq = %metadata.dlq,
                "Timer expired, redeliveries exhausted, message would go to DLQ"
            );
        }
    }
}

/// Collects expirations in firing order.
#[derive(Debug, Default)]
pub struct RecordingExpiryHook {
    fired: Mutex<Vec<(TimerId, MsgMeta)>>,
}

impl RecordingExpiryHook {
    /// Create an empty recorder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Expirations seen so far.
    #[must_use]
    pub fn fired(&self) -> Vec<(TimerId, MsgMeta)> {
        self.fired
            .lock()
            .map(|fired| fired.clone())
            .unwrap_or_default()
    }

    /// Ids seen so far.
    #[must_use]
    pub fn fired_ids(&self) -> Vec<TimerId> {
        self.fired().into_iter().map(|(id, _)| id).collect()
    }
}

impl ExpiryHook for RecordingExpiryHook {
    fn on_expire(&self, id: &TimerId, metadata: &MsgMeta) {
        if let Ok(mut fired) = self.fired.lock() {
            fired.push((id.clone(), metadata.clone()));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recording_hook() {
        let hook = RecordingExpiryHook::new();
        hook.on_expire(&TimerId::from("a"), &MsgMeta::new("dlq", "q", 0));
        hook.on_expire(&TimerId::from("b"), &MsgMeta::new("dlq", "q", 1));

        assert_eq!(hook.fired_ids(), vec![TimerId::from("a"), TimerId::from("b")]);
        assert!(!hook.fired()[0].1.should_redeliver());
    }

    #[test]
    fn test_logging_hook_handles_both_routes() {
        let hook = LoggingExpiryHook;
        hook.on_expire(&TimerId::from("a"), &MsgMeta::new("dlq", "q", 0));
        hook.on_expire(&TimerId::from("b"), &MsgMeta::new("dlq", "q", 3));
    }
}
