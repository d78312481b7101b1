use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use tabletdb_common::metrics;
use tabletdb_common::types::TableId;

/// Tracks the last published sequence of a table and the snapshots pinned to it.
///
/// A snapshot is the sequence that was last published when it was taken.
/// Compaction uses [`watermark`](Self::watermark) to decide which versions
/// can no longer be observed by any reader.
#[derive(Debug, Default)]
pub struct SnapshotTracker {
    tid: TableId,
    last_sequence: AtomicU64,
    active: Mutex<BTreeMap<u64, usize>>,
}

impl SnapshotTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Tracker whose pinned-snapshot gauge is labelled with `tid`
    pub fn for_table(tid: TableId) -> Self {
        Self {
            tid,
            ..Self::default()
        }
    }

    /// Sequence of the last committed mutation, zero before the first one.
    pub fn last_sequence(&self) -> u64 {
        self.last_sequence.load(Ordering::Acquire)
    }

    /// Make every version up to `sequence` visible to new snapshots.
    pub(crate) fn publish(&self, sequence: u64) {
        self.last_sequence.store(sequence, Ordering::Release);
    }

    /// Pin the current sequence. Released when the guard is dropped.
    pub fn acquire(self: &Arc<Self>) -> SnapshotGuard {
        let mut active = self.active.lock();
        let sequence = self.last_sequence();
        *active.entry(sequence).or_insert(0) += 1;
        metrics::set_active_snapshots(self.tid, active.values().sum());
        SnapshotGuard {
            tracker: Arc::clone(self),
            sequence,
        }
    }

    /// Oldest pinned sequence, or the last published one when nothing is pinned.
    pub fn watermark(&self) -> u64 {
        let active = self.active.lock();
        active
            .keys()
            .next()
            .copied()
            .unwrap_or_else(|| self.last_sequence())
    }

    /// Number of snapshots currently pinned
    pub fn active_count(&self) -> usize {
        self.active.lock().values().sum()
    }

    fn release(&self, sequence: u64) {
        let mut active = self.active.lock();
        if let Some(count) = active.get_mut(&sequence) {
            *count -= 1;
            if *count == 0 {
                active.remove(&sequence);
            }
        }
        metrics::set_active_snapshots(self.tid, active.values().sum());
    }
}

/// RAII guard that releases a snapshot when dropped.
#[derive(Debug)]
pub struct SnapshotGuard {
    tracker: Arc<SnapshotTracker>,
    sequence: u64,
}

impl SnapshotGuard {
    pub fn sequence(&self) -> u64 {
        self.sequence
    }
}

impl Drop for SnapshotGuard {
    fn drop(&mut self) {
        self.tracker.release(self.sequence);
    }
}
