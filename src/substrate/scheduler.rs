//! Deterministic timer queue.
//!
//! Timers are ordered by due tick, then by the order they were scheduled in,
//! so every replica fires them in the same sequence. Cancellation is lazy:
//! the timer is forgotten immediately and its heap entry is skipped when it
//! surfaces. Cancelling a timer that already fired, or cancelling twice, is
//! a no-op.

use crate::core::time::Tick;
use std::collections::{BinaryHeap, HashMap};

/// Handle to a scheduled timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TimerHandle(u64);

impl TimerHandle {
    /// Raw timer id.
    pub fn id(&self) -> u64 {
        self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct HeapEntry {
    due_ms: u64,
    id: u64,
}

impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        // Reverse ordering for min-heap (earliest due first, then oldest)
        other
            .due_ms
            .cmp(&self.due_ms)
            .then_with(|| other.id.cmp(&self.id))
    }
}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

#[derive(Debug)]
struct TimerSlot<T> {
    due: Tick,
    interval_ms: Option<u64>,
    target: T,
}

/// A timer that came due.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FiredTimer<T> {
    pub handle: TimerHandle,
    pub due: Tick,
    pub target: T,
}

/// Priority queue of one-shot and fixed-rate timers.
#[derive(Debug)]
pub struct TimerQueue<T> {
    heap: BinaryHeap<HeapEntry>,
    timers: HashMap<u64, TimerSlot<T>>,
    next_id: u64,
}

impl<T> Default for TimerQueue<T> {
    fn default() -> Self {
        Self {
            heap: BinaryHeap::new(),
            timers: HashMap::new(),
            next_id: 1,
        }
    }
}

impl<T: Clone> TimerQueue<T> {
    /// Create an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedule a one-shot timer at `due`.
    pub fn schedule_at(&mut self, due: Tick, target: T) -> TimerHandle {
        self.insert(due, None, target)
    }

    /// Schedule a fixed-rate timer first due at `due`, then every `interval_ms`.
    ///
    /// A zero interval is treated as 1ms so the timer cannot spin in place.
    pub fn schedule_repeating_at(&mut self, due: Tick, interval_ms: u64, target: T) -> TimerHandle {
        self.insert(due, Some(interval_ms.max(1)), target)
    }

    fn insert(&mut self, due: Tick, interval_ms: Option<u64>, target: T) -> TimerHandle {
        let id = self.next_id;
        self.next_id += 1;
        self.timers.insert(
            id,
            TimerSlot {
                due,
                interval_ms,
                target,
            },
        );
        self.heap.push(HeapEntry { due_ms: due.ms, id });
        TimerHandle(id)
    }

    /// Cancel a timer. Returns false if it already fired or was cancelled.
    pub fn cancel(&mut self, handle: TimerHandle) -> bool {
        self.timers.remove(&handle.0).is_some()
    }

    /// Whether the timer is still pending.
    pub fn is_scheduled(&self, handle: TimerHandle) -> bool {
        self.timers.contains_key(&handle.0)
    }

    /// Due tick of a pending timer.
    pub fn due(&self, handle: TimerHandle) -> Option<Tick> {
        self.timers.get(&handle.0).map(|slot| slot.due)
    }

    /// Pop the earliest timer due at or before `now`.
    ///
    /// Fixed-rate timers are re-armed at `due + interval` before returning.
    pub fn pop_due(&mut self, now: Tick) -> Option<FiredTimer<T>> {
        while let Some(entry) = self.heap.peek().copied() {
            let live = self
                .timers
                .get(&entry.id)
                .is_some_and(|slot| slot.due.ms == entry.due_ms);
            if !live {
                // Stale entry (cancelled or re-armed)
                self.heap.pop();
                continue;
            }
            if entry.due_ms > now.ms {
                return None;
            }
            self.heap.pop();

            let slot = self.timers.get_mut(&entry.id)?;
            let due = slot.due;
            let target = slot.target.clone();
            match slot.interval_ms {
                Some(interval) => {
                    slot.due = due.add_ms(interval);
                    self.heap.push(HeapEntry {
                        due_ms: slot.due.ms,
                        id: entry.id,
                    });
                }
                None => {
                    self.timers.remove(&entry.id);
                }
            }
            return Some(FiredTimer {
                handle: TimerHandle(entry.id),
                due,
                target,
            });
        }
        None
    }

    /// Earliest pending due tick.
    pub fn next_due(&self) -> Option<Tick> {
        self.timers.values().map(|slot| slot.due).min()
    }

    /// Number of pending timers.
    pub fn len(&self) -> usize {
        self.timers.len()
    }

    /// Whether no timers are pending.
    pub fn is_empty(&self) -> bool {
        self.timers.is_empty()
    }

    /// Drop every pending timer.
    pub fn clear(&mut self) {
        self.heap.clear();
        self.timers.clear();
    }
}
