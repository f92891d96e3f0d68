//! Hierarchical timing wheel: seconds, minutes and hours tiers.
//!
//! Entries live in an [`Arena`]; tiers hold handles. Every entry records the
//! slot and position it occupies, so cancellation is a `swap_remove`.
//!
//! An entry with deadline `d` fires in the step that moves `cur` from `d - 1`
//! to `d`. Its slot is chosen from the firing second `e = d - 1` relative to
//! `cur`:
//!
//! - same minute as `cur`: seconds slot `e mod 60`
//! - same hour as `cur`: minutes slot `(e / 60) mod 60`
//! - otherwise: hours slot `(e / 3600) mod 12`
//!
//! Crossing an hour (then a minute) boundary re-places the entries of the slot
//! for the new hour (minute) with the same rule, which moves them one tier down.
//!
//! The wheel is plain synchronous state. Locking, persistence and expiry
//! callbacks belong to the engine.

use std::collections::HashMap;
use std::time::Duration;

use delayq_core::{MsgMeta, PendingTimer, TickStats, TimerId, TimerReport};
use thiserror::Error;
use tracing::trace;

use crate::arena::{Arena, EntryHandle};

const SECS_PER_MINUTE: i64 = 60;
const SECS_PER_HOUR: i64 = 3600;

/// Slots in the seconds tier.
pub const SECOND_SLOTS: usize = 60;
/// Slots in the minutes tier.
pub const MINUTE_SLOTS: usize = 60;
/// Slots in the hours tier.
pub const HOUR_SLOTS: usize = 12;

/// Bucket tier an entry sits in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tier {
    /// Fires within the current minute
    Seconds,
    /// Fires within the current hour
    Minutes,
    /// Fires in a later hour
    Hours,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Location {
    tier: Tier,
    slot: usize,
    pos: usize,
}

#[derive(Debug)]
struct Entry {
    id: TimerId,
    metadata: MsgMeta,
    location: Location,
}

impl Entry {
    const fn deadline(&self) -> i64 {
        self.metadata.deadline
    }
}

/// An entry removed by [`Wheel::step`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fired {
    /// Timer handle.
    pub id: TimerId,
    /// Metadata as supplied on start, `deadline` included.
    pub metadata: MsgMeta,
}

/// Result of [`Wheel::start`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Started {
    /// Entry installed in a bucket.
    Scheduled {
        /// An earlier pending entry for the same id was removed.
        replaced: bool,
    },
    /// The deadline has already been reached; counted as expired, nothing installed.
    Elapsed {
        /// An earlier pending entry for the same id was removed.
        replaced: bool,
    },
}

impl Started {
    /// Whether an earlier pending entry for the same id was removed.
    #[must_use]
    pub const fn replaced(self) -> bool {
        match self {
            Self::Scheduled { replaced } | Self::Elapsed { replaced } => replaced,
        }
    }
}

/// A broken structural invariant, reported by [`Wheel::check_invariants`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Inconsistency {
    /// The index points at a handle with no live entry.
    #[error("timer {id} is indexed but has no live entry")]
    MissingEntry { id: TimerId },

    /// The indexed entry carries another id.
    #[error("timer {id} is indexed to an entry for {found}")]
    IdMismatch { id: TimerId, found: TimerId },

    /// The entry's recorded position does not hold its handle.
    #[error("timer {id} is not at its recorded position")]
    Misplaced { id: TimerId },

    /// The entry is in a different slot than the placement rule gives.
    #[error("timer {id} sits in {actual:?} slot {actual_slot}, expected {expected:?} slot {expected_slot}")]
    WrongSlot {
        id: TimerId,
        actual: Tier,
        actual_slot: usize,
        expected: Tier,
        expected_slot: usize,
    },

    /// Index, arena and buckets disagree on the number of entries.
    #[error("{indexed} indexed, {live} live, {linked} linked")]
    CountMismatch {
        indexed: usize,
        live: usize,
        linked: usize,
    },

    /// Counters do not add up.
    #[error("started {started} != stopped {stopped} + expired {expired} + pending {pending}")]
    Counters {
        started: u64,
        stopped: u64,
        expired: u64,
        pending: usize,
    },
}

fn slot_of(t: i64, unit: i64, slots: usize) -> usize {
    let slots_i64 = i64::try_from(slots).unwrap_or(i64::MAX);
    usize::try_from(t.div_euclid(unit).rem_euclid(slots_i64)).unwrap_or(0)
}

/// Tier and slot for an entry with `deadline`, given the last processed second `cur`.
///
/// Deadlines at or before `cur` are placed to fire in the next step.
#[must_use]
pub fn placement(cur: i64, deadline: i64) -> (Tier, usize) {
    let e = deadline.saturating_sub(1).max(cur);
    if e.div_euclid(SECS_PER_MINUTE) == cur.div_euclid(SECS_PER_MINUTE) {
        (Tier::Seconds, slot_of(e, 1, SECOND_SLOTS))
    } else if e.div_euclid(SECS_PER_HOUR) == cur.div_euclid(SECS_PER_HOUR) {
        (Tier::Minutes, slot_of(e, SECS_PER_MINUTE, MINUTE_SLOTS))
    } else {
        (Tier::Hours, slot_of(e, SECS_PER_HOUR, HOUR_SLOTS))
    }
}

/// Timing wheel state.
#[derive(Debug)]
pub struct Wheel {
    cur: i64,
    entries: Arena<Entry>,
    index: HashMap<TimerId, EntryHandle>,
    seconds: Vec<Vec<EntryHandle>>,
    minutes: Vec<Vec<EntryHandle>>,
    hours: Vec<Vec<EntryHandle>>,
    started: u64,
    stopped: u64,
    expired: u64,
    ticks: TickStats,
}

impl Wheel {
    /// Create an empty wheel that has processed every second up to `cur`.
    #[must_use]
    pub fn new(cur: i64) -> Self {
        Self {
            cur,
            entries: Arena::new(),
            index: HashMap::new(),
            seconds: vec![Vec::new(); SECOND_SLOTS],
            minutes: vec![Vec::new(); MINUTE_SLOTS],
            hours: vec![Vec::new(); HOUR_SLOTS],
            started: 0,
            stopped: 0,
            expired: 0,
            ticks: TickStats::default(),
        }
    }

    /// Last fully processed second.
    #[must_use]
    pub const fn cur(&self) -> i64 {
        self.cur
    }

    /// Number of pending entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.index.len()
    }

    /// Check if nothing is pending.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Check if `id` is pending.
    #[must_use]
    pub fn contains(&self, id: &TimerId) -> bool {
        self.index.contains_key(id)
    }

    /// Deadline of a pending entry.
    #[must_use]
    pub fn deadline_of(&self, id: &TimerId) -> Option<i64> {
        self.entry(id).map(Entry::deadline)
    }

    /// Tier a pending entry currently sits in.
    #[must_use]
    pub fn locate(&self, id: &TimerId) -> Option<Tier> {
        self.entry(id).map(|entry| entry.location.tier)
    }

    /// Timers started, stopped and expired since creation.
    #[must_use]
    pub const fn counters(&self) -> (u64, u64, u64) {
        (self.started, self.stopped, self.expired)
    }

    /// Per-second processing statistics.
    #[must_use]
    pub const fn ticks(&self) -> TickStats {
        self.ticks
    }

    fn entry(&self, id: &TimerId) -> Option<&Entry> {
        self.index
            .get(id)
            .and_then(|&handle| self.entries.get(handle))
    }

    /// Schedule `id` with `metadata.deadline` as its deadline.
    ///
    /// A pending entry for the same id is removed first and counted as stopped.
    /// A deadline at or before `cur` is counted as started and expired without
    /// being installed.
    pub fn start(&mut self, id: TimerId, metadata: MsgMeta) -> Started {
        let replaced = self.remove_entry(&id).is_some();
        if replaced {
            self.stopped += 1;
        }
        self.started += 1;

        if metadata.deadline <= self.cur {
            self.expired += 1;
            trace!(timer_id = %id, deadline = metadata.deadline, "Deadline already reached");
            return Started::Elapsed { replaced };
        }

        self.install(id, metadata);
        Started::Scheduled { replaced }
    }

    /// Re-install a timer read back from the durable log.
    ///
    /// Counts toward `started` only. Overdue entries fire on the next step.
    pub fn restore(&mut self, id: TimerId, metadata: MsgMeta) {
        if self.remove_entry(&id).is_some() {
            self.stopped += 1;
        }
        self.started += 1;
        self.install(id, metadata);
    }

    /// Cancel `id`. Returns `false` if it was not pending.
    pub fn stop(&mut self, id: &TimerId) -> bool {
        let removed = self.remove_entry(id).is_some();
        if removed {
            self.stopped += 1;
        }
        removed
    }

    /// Process second `cur`: fire its seconds slot, advance `cur`, then cascade
    /// the hour and minute slots that `cur` has just entered.
    pub fn step(&mut self) -> Vec<Fired> {
        let slot = slot_of(self.cur, 1, SECOND_SLOTS);
        let handles = self
            .seconds
            .get_mut(slot)
            .map(std::mem::take)
            .unwrap_or_default();

        let mut fired = Vec::with_capacity(handles.len());
        for handle in handles {
            if let Some(entry) = self.entries.remove(handle) {
                self.index.remove(&entry.id);
                self.expired += 1;
                fired.push(Fired {
                    id: entry.id,
                    metadata: entry.metadata,
                });
            }
        }

        self.cur += 1;
        if self.cur.rem_euclid(SECS_PER_HOUR) == 0 {
            self.cascade(Tier::Hours, slot_of(self.cur, SECS_PER_HOUR, HOUR_SLOTS));
        }
        if self.cur.rem_euclid(SECS_PER_MINUTE) == 0 {
            self.cascade(Tier::Minutes, slot_of(self.cur, SECS_PER_MINUTE, MINUTE_SLOTS));
        }

        fired
    }

    /// Fold one step's processing time into the statistics.
    pub fn record_tick(&mut self, elapsed: Duration) {
        self.ticks.record(elapsed);
    }

    /// Diagnostic snapshot. Pending timers are ordered by deadline then id.
    #[must_use]
    pub fn report(&self, now: i64) -> TimerReport {
        let mut pending: Vec<PendingTimer> = self
            .entries
            .iter()
            .map(|(_, entry)| PendingTimer {
                id: entry.id.clone(),
                deadline: entry.deadline(),
            })
            .collect();
        pending.sort_by(|a, b| a.deadline.cmp(&b.deadline).then_with(|| a.id.cmp(&b.id)));

        TimerReport {
            now,
            cur: self.cur,
            pending,
            started: self.started,
            stopped: self.stopped,
            expired: self.expired,
            ticks: self.ticks,
        }
    }

    /// Verify index, arena, buckets and counters agree.
    ///
    /// # Errors
    ///
    /// Returns the first violated invariant found.
    pub fn check_invariants(&self) -> Result<(), Inconsistency> {
        for (id, &handle) in &self.index {
            let entry = self
                .entries
                .get(handle)
                .ok_or_else(|| Inconsistency::MissingEntry { id: id.clone() })?;
            if &entry.id != id {
                return Err(Inconsistency::IdMismatch {
                    id: id.clone(),
                    found: entry.id.clone(),
                });
            }

            let Location { tier, slot, pos } = entry.location;
            let at_pos = self
                .bucket(tier)
                .get(slot)
                .and_then(|handles| handles.get(pos));
            if at_pos != Some(&handle) {
                return Err(Inconsistency::Misplaced { id: id.clone() });
            }

            let (expected, expected_slot) = placement(self.cur, entry.deadline());
            if (expected, expected_slot) != (tier, slot) {
                return Err(Inconsistency::WrongSlot {
                    id: id.clone(),
                    actual: tier,
                    actual_slot: slot,
                    expected,
                    expected_slot,
                });
            }
        }

        let linked: usize = [Tier::Seconds, Tier::Minutes, Tier::Hours]
            .into_iter()
            .flat_map(|tier| self.bucket(tier).iter())
            .map(Vec::len)
            .sum();
        let indexed = self.index.len();
        let live = self.entries.len();
        if indexed != live || indexed != linked {
            return Err(Inconsistency::CountMismatch {
                indexed,
                live,
                linked,
            });
        }

        let pending = u64::try_from(indexed).unwrap_or(u64::MAX);
        if self.started != self.stopped + self.expired + pending {
            return Err(Inconsistency::Counters {
                started: self.started,
                stopped: self.stopped,
                expired: self.expired,
                pending: indexed,
            });
        }

        Ok(())
    }

    fn bucket(&self, tier: Tier) -> &[Vec<EntryHandle>] {
        match tier {
            Tier::Seconds => &self.seconds,
            Tier::Minutes => &self.minutes,
            Tier::Hours => &self.hours,
        }
    }

    fn install(&mut self, id: TimerId, metadata: MsgMeta) {
        let handle = self.entries.insert(Entry {
            id: id.clone(),
            metadata,
            location: Location {
                tier: Tier::Seconds,
                slot: 0,
                pos: 0,
            },
        });
        self.index.insert(id, handle);
        self.link(handle);
    }

    /// Put a live entry into the slot the placement rule gives for the current `cur`.
    fn link(&mut self, handle: EntryHandle) {
        let Self {
            cur,
            entries,
            seconds,
            minutes,
            hours,
            ..
        } = self;
        let Some(entry) = entries.get_mut(handle) else {
            return;
        };

        let (tier, slot) = placement(*cur, entry.deadline());
        let bucket = match tier {
            Tier::Seconds => seconds,
            Tier::Minutes => minutes,
            Tier::Hours => hours,
        };
        if let Some(handles) = bucket.get_mut(slot) {
            entry.location = Location {
                tier,
                slot,
                pos: handles.len(),
            };
            handles.push(handle);
        }
    }

    /// Remove a handle from its slot, fixing up the entry swapped into its place.
    fn unlink(&mut self, location: Location) {
        let Self {
            entries,
            seconds,
            minutes,
            hours,
            ..
        } = self;
        let bucket = match location.tier {
            Tier::Seconds => seconds,
            Tier::Minutes => minutes,
            Tier::Hours => hours,
        };
        let Some(handles) = bucket.get_mut(location.slot) else {
            return;
        };
        if location.pos >= handles.len() {
            return;
        }

        handles.swap_remove(location.pos);
        if let Some(&moved) = handles.get(location.pos) {
            if let Some(entry) = entries.get_mut(moved) {
                entry.location.pos = location.pos;
            }
        }
    }

    fn remove_entry(&mut self, id: &TimerId) -> Option<Entry> {
        let handle = self.index.remove(id)?;
        let entry = self.entries.remove(handle)?;
        self.unlink(entry.location);
        Some(entry)
    }

    fn cascade(&mut self, tier: Tier, slot: usize) {
        let bucket = match tier {
            Tier::Seconds => &mut self.seconds,
            Tier::Minutes => &mut self.minutes,
            Tier::Hours => &mut self.hours,
        };
        let handles = bucket.get_mut(slot).map(std::mem::take).unwrap_or_default();
        if handles.is_empty() {
            return;
        }

        trace!(cur = self.cur, ?tier, slot, moved = handles.len(), "Cascading slot");
        for handle in handles {
            if self.entries.contains(handle) {
                self.link(handle);
            }
        }
    }
}
