//! Log replay for recovery.
//!
//! Folds the durable log into the set of timers that were still pending when
//! the previous process stopped.

use std::collections::HashMap;

use delayq_core::{MsgMeta, Result, TimerId};
use tracing::{debug, info};

use crate::event::{PersistEvent, PersistRecord};
use crate::store::DurableLog;

/// A timer reconstructed from the log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecoveredTimer {
    /// Timer handle.
    pub id: TimerId,
    /// Absolute deadline in epoch seconds.
    pub deadline: i64,
    /// Metadata from the latest `Start`.
    pub metadata: MsgMeta,
}

/// Result of folding a log.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Recovered {
    /// Still-pending timers, ordered by deadline then id.
    pub pending: Vec<RecoveredTimer>,
    /// Highest sequence number seen.
    pub last_seq: Option<u64>,
    /// Records folded.
    pub records: usize,
}

impl Recovered {
    /// Sequence number the next appended record should carry.
    #[must_use]
    pub fn next_seq(&self) -> u64 {
        self.last_seq.map_or(1, |seq| seq.saturating_add(1))
    }
}

/// Fold records in log order.
///
/// `Start` inserts or replaces, `Stop` and `Expire` remove. Stops and expiries
/// for unknown ids are ignored.
#[must_use]
pub fn fold(records: &[PersistRecord]) -> Recovered {
    let mut pending: HashMap<TimerId, RecoveredTimer> = HashMap::new();
    let mut last_seq: Option<u64> = None;

    for record in records {
        last_seq = Some(last_seq.map_or(record.seq, |seq| seq.max(record.seq)));
        match &record.event {
            PersistEvent::Start {
                id,
                deadline,
                metadata,
            } => {
                let replaced = pending.insert(
                    id.clone(),
                    RecoveredTimer {
                        id: id.clone(),
                        deadline: *deadline,
                        metadata: metadata.clone(),
                    },
                );
                if replaced.is_some() {
                    debug!(timer_id = %id, deadline, "Start replaces pending timer");
                }
            }
            PersistEvent::Stop { id } | PersistEvent::Expire { id } => {
                pending.remove(id);
            }
        }
    }

    let mut pending: Vec<RecoveredTimer> = pending.into_values().collect();
    pending.sort_by(|a, b| a.deadline.cmp(&b.deadline).then_with(|| a.id.cmp(&b.id)));

    Recovered {
        pending,
        last_seq,
        records: records.len(),
    }
}

/// Read a log and fold it.
///
/// # Errors
///
/// Returns the backend's read error.
pub async fn recover(log: &dyn DurableLog) -> Result<Recovered> {
    let records = log.read_all().await?;
    let recovered = fold(&records);
    info!(
        records = recovered.records,
        pending = recovered.pending.len(),
        last_seq = recovered.last_seq,
        "Replayed durable log"
    );
    Ok(recovered)
}
