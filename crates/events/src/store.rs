//! Durable log trait and in-process implementations.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};

use async_trait::async_trait;
use delayq_core::{Error, Result};
use tokio::sync::RwLock;

use crate::event::{PersistEvent, PersistRecord};

/// Append-only event stream the engine writes its transitions to.
///
/// Provisioning (creating a topic, a file, a table) happens when the backend is
/// constructed, never on the append path.
#[async_trait]
pub trait DurableLog: Send + Sync {
    /// Append a batch. `Ok` means every record in the batch is durable.
    async fn append(&self, batch: &[PersistRecord]) -> Result<()>;

    /// Read every record in append order.
    async fn read_all(&self) -> Result<Vec<PersistRecord>>;

    /// Release backing resources.
    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

#[async_trait]
impl<L: DurableLog + ?Sized> DurableLog for Arc<L> {
    async fn append(&self, batch: &[PersistRecord]) -> Result<()> {
        (**self).append(batch).await
    }

    async fn read_all(&self) -> Result<Vec<PersistRecord>> {
        (**self).read_all().await
    }

    async fn close(&self) -> Result<()> {
        (**self).close().await
    }
}

/// In-memory log, used as the test fake and for the `memory` backend.
///
/// Failures and stalls can be injected to exercise the pipeline's error paths.
#[derive(Default)]
pub struct MemoryLog {
    records: RwLock<Vec<PersistRecord>>,
    fail_next: AtomicU32,
    stalled: AtomicBool,
    append_calls: AtomicU64,
}

impl MemoryLog {
    /// Create a new empty log.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a new empty log wrapped in an Arc.
    pub fn new_arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Create a log pre-seeded with records, as if written by an earlier process.
    pub fn with_records(records: Vec<PersistRecord>) -> Self {
        Self {
            records: RwLock::new(records),
            ..Self::default()
        }
    }

    /// Make the next `count` appends fail.
    pub fn fail_next(&self, count: u32) {
        self.fail_next.store(count, Ordering::SeqCst);
    }

    /// Make every later append hang forever.
    pub fn stall(&self) {
        self.stalled.store(true, Ordering::SeqCst);
    }

    /// Number of append calls made, failed ones included.
    pub fn append_calls(&self) -> u64 {
        self.append_calls.load(Ordering::SeqCst)
    }

    /// Snapshot of the stored records.
    pub async fn records(&self) -> Vec<PersistRecord> {
        self.records.read().await.clone()
    }

    /// Snapshot of the stored events, without record envelopes.
    pub async fn events(&self) -> Vec<PersistEvent> {
        self.records
            .read()
            .await
            .iter()
            .map(|r| r.event.clone())
            .collect()
    }

    fn take_failure(&self) -> bool {
        self.fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl DurableLog for MemoryLog {
    async fn append(&self, batch: &[PersistRecord]) -> Result<()> {
        self.append_calls.fetch_add(1, Ordering::SeqCst);
        if self.stalled.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        if self.take_failure() {
            return Err(Error::log_append("injected failure"));
        }
        self.records.write().await.extend_from_slice(batch);
        Ok(())
    }

    async fn read_all(&self) -> Result<Vec<PersistRecord>> {
        Ok(self.records.read().await.clone())
    }
}

/// A wrapper that adds tracing to a durable log.
pub struct TracingLog<L: DurableLog> {
    inner: L,
}

impl<L: DurableLog> TracingLog<L> {
    /// Create a new tracing log.
    pub const fn new(inner: L) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl<L: DurableLog> DurableLog for TracingLog<L> {
    async fn append(&self, batch: &[PersistRecord]) -> Result<()> {
        tracing::debug!(
            batch_len = batch.len(),
            first_seq = batch.first().map(|r| r.seq),
            "Appending batch"
        );
        let result = self.inner.append(batch).await;
        match &result {
            Ok(()) => tracing::trace!(last_seq = batch.last().map(|r| r.seq), "Batch appended"),
            Err(e) => tracing::debug!(error = %e, "Batch append failed"),
        }
        result
    }

    async fn read_all(&self) -> Result<Vec<PersistRecord>> {
        tracing::debug!("Reading durable log");
        self.inner.read_all().await
    }

    async fn close(&self) -> Result<()> {
        self.inner.close().await
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use delayq_core::TimerId;

    fn record(seq: u64, id: &str) -> PersistRecord {
        PersistRecord::new(seq, PersistEvent::stop(TimerId::from(id)))
    }

    #[tokio::test]
    async fn test_append_and_read() {
        let log = MemoryLog::new();
        log.append(&[record(1, "a"), record(2, "b")]).await.unwrap();
        log.append(&[record(3, "c")]).await.unwrap();

        let records = log.read_all().await.unwrap();
        let seqs: Vec<u64> = records.iter().map(|r| r.seq).collect();
        assert_eq!(seqs, vec![1, 2, 3]);
        assert_eq!(log.append_calls(), 2);
    }

    #[tokio::test]
    async fn test_injected_failures_are_consumed() {
        let log = MemoryLog::new();
        log.fail_next(2);

        assert!(log.append(&[record(1, "a")]).await.is_err());
        assert!(log.append(&[record(1, "a")]).await.is_err());
        assert!(log.append(&[record(1, "a")]).await.is_ok());

        assert_eq!(log.records().await.len(), 1);
        assert_eq!(log.append_calls(), 3);
    }

    #[tokio::test]
    async fn test_seeded_log() {
        let log = MemoryLog::with_records(vec![record(1, "a")]);
        assert_eq!(log.events().await, vec![PersistEvent::stop(TimerId::from("a"))]);
    }

    #[tokio::test]
    async fn test_tracing_log_delegates() {
        let inner = MemoryLog::new_arc();
        let log = TracingLog::new(Arc::clone(&inner));

        log.append(&[record(1, "a")]).await.unwrap();

        assert_eq!(inner.records().await.len(), 1);
        assert_eq!(log.read_all().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_tracing_log_propagates_failure() {
        let inner = MemoryLog::new_arc();
        inner.fail_next(1);
        let log = TracingLog::new(Arc::clone(&inner));

        assert!(log.append(&[record(1, "a")]).await.is_err());
        assert!(inner.records().await.is_empty());
    }
}
