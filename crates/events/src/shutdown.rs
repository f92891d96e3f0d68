//! Process-wide shutdown signal.
//!
//! One [`Shutdown`] is created per engine and cloned into the tick driver,
//! both pipeline tasks and every commit wait.

use std::sync::Arc;

use tokio::sync::watch;
use tracing::{debug, info};

/// Cloneable, level-triggered shutdown signal.
#[derive(Debug, Clone)]
pub struct Shutdown {
    tx: Arc<watch::Sender<bool>>,
    rx: watch::Receiver<bool>,
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

impl Shutdown {
    /// Create an untriggered signal.
    #[must_use]
    pub fn new() -> Self {
        let (tx, rx) = watch::channel(false);
        Self {
            tx: Arc::new(tx),
            rx,
        }
    }

    /// Trigger shutdown. Returns `true` only for the call that initiated it.
    pub fn trigger(&self) -> bool {
        let initiated = self.tx.send_if_modified(|triggered| {
            if *triggered {
                false
            } else {
                *triggered = true;
                true
            }
        });
        if initiated {
            info!("Shutdown initiated");
        } else {
            debug!("Shutdown already in progress");
        }
        initiated
    }

    /// Check if shutdown has been triggered.
    #[must_use]
    pub fn is_triggered(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolve once shutdown has been triggered.
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        // The sender lives as long as any clone of self, so this cannot fail
        // while we are borrowed.
        let _ = rx.wait_for(|&triggered| triggered).await;
    }
}
