//! Per-resource execution lane state.
//!
//! The context carries the log index of the entry being applied, the
//! logical clock, and the resource's timers. Handlers and timer callbacks
//! receive it by `&mut`, which is what makes them mutually exclusive: only
//! the host owns the lane and it runs one thing at a time.

use crate::core::time::{duration_ms, LogicalClock, Tick};
use crate::substrate::scheduler::{FiredTimer, TimerHandle, TimerQueue};
use std::time::Duration;

/// Deterministic execution context for one resource instance.
#[derive(Debug)]
pub struct ResourceContext<T> {
    resource: &'static str,
    index: u64,
    clock: LogicalClock,
    timers: TimerQueue<T>,
}

impl<T: Clone> ResourceContext<T> {
    /// Create a context for a resource type, at index 0 and tick 0.
    pub fn new(resource: &'static str) -> Self {
        Self {
            resource,
            index: 0,
            clock: LogicalClock::default(),
            timers: TimerQueue::new(),
        }
    }

    /// Resource type name.
    pub fn resource(&self) -> &'static str {
        self.resource
    }

    /// Log index of the entry currently being (or last) applied.
    pub fn index(&self) -> u64 {
        self.index
    }

    /// Current logical time.
    pub fn now(&self) -> Tick {
        self.clock.now()
    }

    /// Run `target` once after `delay`.
    pub fn schedule(&mut self, delay: Duration, target: T) -> TimerHandle {
        let due = self.now().add(delay);
        self.schedule_at(due, target)
    }

    /// Run `target` at an absolute tick. Past ticks fire on the next pass.
    pub fn schedule_at(&mut self, due: Tick, target: T) -> TimerHandle {
        let handle = self.timers.schedule_at(due, target);
        tracing::trace!(
            resource = self.resource,
            timer = handle.id(),
            due = due.ms,
            "timer scheduled"
        );
        handle
    }

    /// Run `target` after `initial_delay`, then every `interval`.
    pub fn schedule_repeating(
        &mut self,
        initial_delay: Duration,
        interval: Duration,
        target: T,
    ) -> TimerHandle {
        let due = self.now().add(initial_delay);
        self.timers
            .schedule_repeating_at(due, duration_ms(interval), target)
    }

    /// Cancel a timer. Cancelling a fired or cancelled timer is a no-op.
    pub fn cancel(&mut self, handle: TimerHandle) -> bool {
        self.timers.cancel(handle)
    }

    /// Whether the timer is still pending.
    pub fn is_scheduled(&self, handle: TimerHandle) -> bool {
        self.timers.is_scheduled(handle)
    }

    /// Number of pending timers.
    pub fn pending_timers(&self) -> usize {
        self.timers.len()
    }

    /// Earliest pending due tick.
    pub fn next_due(&self) -> Option<Tick> {
        self.timers.next_due()
    }

    pub(crate) fn set_index(&mut self, index: u64) {
        self.index = index;
    }

    pub(crate) fn advance_clock(&mut self, tick: Tick) {
        self.clock.advance_to(tick);
    }

    /// Pop the next timer due by `now`, moving the clock to its due tick.
    pub(crate) fn pop_due(&mut self, now: Tick) -> Option<FiredTimer<T>> {
        let fired = self.timers.pop_due(now)?;
        self.clock.advance_to(fired.due);
        Some(fired)
    }

    pub(crate) fn clear_timers(&mut self) {
        self.timers.clear();
    }
}
