//! Commits and log retention.
//!
//! A [`Commit`] binds one applied operation to the log index it came from and
//! to the session that submitted it. While a commit is open, the log entry
//! behind it must be retained. Releasing the commit (closing it, or
//! compacting it with a [`CompactionMode`]) tells the [`RetentionTracker`]
//! how long the entry is still needed.
//!
//! Release is guaranteed: `close` and `compact` consume the handle, and a
//! handle dropped without either is closed by its `Drop` impl. Every exit
//! path of a handler, including `?` returns, therefore releases exactly once.

use crate::core::time::Tick;
use crate::substrate::session::Session;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Retention a released commit still requires before its entry is dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum CompactionMode {
    /// Retain until a snapshot covers the entry.
    Default,
    /// Retain until a snapshot covers the entry, compacting in log order.
    Sequential,
    /// Droppable once a quorum has applied the entry.
    Quorum,
    /// Minimal retention; marks a logical delete.
    Tombstone,
}

/// Retention state of a log entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetentionState {
    /// The commit is still held by the resource.
    Open,
    /// Released with default retention.
    Closed,
    /// Released with an explicit compaction mode.
    Compacted(CompactionMode),
}

impl RetentionState {
    /// Whether the entry may be dropped given the latest snapshot index.
    pub fn is_releasable(&self, index: u64, snapshot_index: u64) -> bool {
        match self {
            Self::Open => false,
            Self::Closed
            | Self::Compacted(CompactionMode::Default)
            | Self::Compacted(CompactionMode::Sequential) => index <= snapshot_index,
            Self::Compacted(CompactionMode::Quorum)
            | Self::Compacted(CompactionMode::Tombstone) => true,
        }
    }
}

/// Ledger of retention obligations for one resource's log.
#[derive(Debug, Default)]
pub struct RetentionTracker {
    /// Log index -> retention state, for every command applied and not yet pruned.
    entries: BTreeMap<u64, RetentionState>,
    /// Total releases recorded.
    released: u64,
    /// Releases that found the entry already released.
    duplicate_releases: u64,
}

/// Retention tracker shared between the resource lane and the log compactor.
pub type SharedRetention = Arc<Mutex<RetentionTracker>>;

impl RetentionTracker {
    /// Create a new shared tracker.
    pub fn shared() -> SharedRetention {
        Arc::new(Mutex::new(Self::default()))
    }

    /// Record a new open obligation at `index`.
    pub fn acquire(&mut self, index: u64) {
        self.entries.insert(index, RetentionState::Open);
    }

    /// Record the release of the obligation at `index`.
    ///
    /// Returns false if the entry was unknown or already released.
    pub fn release(&mut self, index: u64, state: RetentionState) -> bool {
        match self.entries.get_mut(&index) {
            Some(current) if *current == RetentionState::Open => {
                *current = state;
                self.released += 1;
                true
            }
            _ => {
                self.duplicate_releases += 1;
                tracing::warn!(index, "retention released for an entry that is not open");
                false
            }
        }
    }

    /// Retention state of the entry at `index`.
    pub fn state(&self, index: u64) -> Option<RetentionState> {
        self.entries.get(&index).copied()
    }

    /// Number of entries still held open.
    pub fn outstanding(&self) -> usize {
        self.entries
            .values()
            .filter(|s| **s == RetentionState::Open)
            .count()
    }

    /// Indexes still held open, ascending.
    pub fn outstanding_indexes(&self) -> Vec<u64> {
        self.entries
            .iter()
            .filter(|(_, s)| **s == RetentionState::Open)
            .map(|(i, _)| *i)
            .collect()
    }

    /// Highest index such that every tracked entry at or below it may be dropped.
    ///
    /// Returns `None` if not even the first tracked entry is releasable.
    pub fn compactable_through(&self, snapshot_index: u64) -> Option<u64> {
        let mut through = None;
        for (index, state) in &self.entries {
            if !state.is_releasable(*index, snapshot_index) {
                break;
            }
            through = Some(*index);
        }
        through
    }

    /// Forget released bookkeeping at or below `index` after log truncation.
    ///
    /// Open entries are kept. Returns the number of entries forgotten.
    pub fn prune_through(&mut self, index: u64) -> usize {
        let before = self.entries.len();
        self.entries
            .retain(|i, s| *i > index || *s == RetentionState::Open);
        before - self.entries.len()
    }

    /// Get statistics.
    pub fn stats(&self) -> RetentionStats {
        RetentionStats {
            tracked: self.entries.len(),
            outstanding: self.outstanding(),
            released: self.released,
            duplicate_releases: self.duplicate_releases,
        }
    }
}

/// Retention statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RetentionStats {
    /// Entries currently tracked.
    pub tracked: usize,
    /// Entries still held open.
    pub outstanding: usize,
    /// Total releases recorded.
    pub released: u64,
    /// Releases of entries that were not open.
    pub duplicate_releases: u64,
}

/// One applied operation, its origin, and its retention obligation.
#[derive(Debug)]
pub struct Commit<O> {
    index: u64,
    tick: Tick,
    session: Session,
    operation: O,
    retention: Option<SharedRetention>,
}

impl<O> Commit<O> {
    /// Create a command commit, acquiring retention at `index`.
    pub fn command(
        index: u64,
        tick: Tick,
        session: Session,
        operation: O,
        retention: &SharedRetention,
    ) -> Self {
        retention.lock().acquire(index);
        Self {
            index,
            tick,
            session,
            operation,
            retention: Some(Arc::clone(retention)),
        }
    }

    /// Create a query commit. Queries never hold the log.
    pub fn query(index: u64, tick: Tick, session: Session, operation: O) -> Self {
        Self {
            index,
            tick,
            session,
            operation,
            retention: None,
        }
    }

    /// Log index this commit was applied at.
    pub fn index(&self) -> u64 {
        self.index
    }

    /// Logical time at which this commit was applied.
    pub fn tick(&self) -> Tick {
        self.tick
    }

    /// Session that submitted the operation.
    pub fn session(&self) -> &Session {
        &self.session
    }

    /// The operation.
    pub fn operation(&self) -> &O {
        &self.operation
    }

    /// Whether this commit still holds retention.
    pub fn is_open(&self) -> bool {
        self.retention.is_some()
    }

    /// Release with default retention.
    pub fn close(mut self) {
        self.release(RetentionState::Closed);
    }

    /// Release with the given compaction mode.
    pub fn compact(mut self, mode: CompactionMode) {
        self.release(RetentionState::Compacted(mode));
    }

    fn release(&mut self, state: RetentionState) {
        if let Some(retention) = self.retention.take() {
            retention.lock().release(self.index, state);
        }
    }
}

impl<O> Drop for Commit<O> {
    fn drop(&mut self) {
        self.release(RetentionState::Closed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::substrate::session::SessionId;

    fn session() -> Session {
        Session::new(SessionId(1), Tick::zero())
    }

    #[test]
    fn drop_closes_open_commit() {
        let retention = RetentionTracker::shared();
        let commit = Commit::command(3, Tick::zero(), session(), (), &retention);
        assert_eq!(retention.lock().outstanding(), 1);
        drop(commit);
        assert_eq!(retention.lock().state(3), Some(RetentionState::Closed));
        assert_eq!(retention.lock().stats().duplicate_releases, 0);
    }

    #[test]
    fn compact_records_mode_once() {
        let retention = RetentionTracker::shared();
        Commit::command(1, Tick::zero(), session(), (), &retention)
            .compact(CompactionMode::Tombstone);
        let tracker = retention.lock();
        assert_eq!(
            tracker.state(1),
            Some(RetentionState::Compacted(CompactionMode::Tombstone))
        );
        assert_eq!(tracker.stats().released, 1);
    }

    #[test]
    fn open_entry_blocks_compaction() {
        let retention = RetentionTracker::shared();
        Commit::command(1, Tick::zero(), session(), (), &retention)
            .compact(CompactionMode::Quorum);
        let held = Commit::command(2, Tick::zero(), session(), (), &retention);
        Commit::command(3, Tick::zero(), session(), (), &retention)
            .compact(CompactionMode::Quorum);

        assert_eq!(retention.lock().compactable_through(0), Some(1));
        held.close();
        // Closed entries wait for a snapshot.
        assert_eq!(retention.lock().compactable_through(1), Some(1));
        assert_eq!(retention.lock().compactable_through(2), Some(3));
    }

    #[test]
    fn query_commit_holds_nothing() {
        let commit = Commit::query(7, Tick::zero(), session(), ());
        assert!(!commit.is_open());
    }
}
