//! Deterministic time utilities.
//!
//! Resources never sample the wall clock. Every log entry carries the tick
//! the replication layer agreed on, and the resource lane advances a
//! [`LogicalClock`] from those ticks only. Timers, TTL deadlines and session
//! keep-alives are all evaluated against that clock, so every replica that
//! applies the same log observes the same firings in the same order.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// A point on the logical clock, in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct Tick {
    /// Milliseconds since an epoch chosen by the replication layer.
    pub ms: u64,
}

impl Tick {
    /// Create a new tick with the given millisecond value.
    pub const fn new(ms: u64) -> Self {
        Self { ms }
    }

    /// Create a tick representing zero (epoch start).
    pub const fn zero() -> Self {
        Self { ms: 0 }
    }

    /// Add milliseconds to this tick, saturating at `u64::MAX`.
    pub const fn add_ms(self, ms: u64) -> Self {
        Self {
            ms: self.ms.saturating_add(ms),
        }
    }

    /// Add a duration to this tick.
    pub fn add(self, delay: Duration) -> Self {
        self.add_ms(duration_ms(delay))
    }

    /// Check if this tick is at or after the given deadline.
    pub const fn is_at_or_after(self, deadline: Tick) -> bool {
        self.ms >= deadline.ms
    }

    /// Milliseconds until a deadline.
    ///
    /// Returns 0 if the deadline has already passed.
    pub fn ms_until(self, deadline: Tick) -> u64 {
        deadline.ms.saturating_sub(self.ms)
    }
}

impl std::fmt::Display for Tick {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Tick({}ms)", self.ms)
    }
}

/// Convert a duration to whole milliseconds, saturating.
pub fn duration_ms(delay: Duration) -> u64 {
    u64::try_from(delay.as_millis()).unwrap_or(u64::MAX)
}

/// Monotonic logical clock driven by committed ticks.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogicalClock {
    now: Tick,
}

impl LogicalClock {
    /// Create a clock starting at the given tick.
    pub fn starting_at(tick: Tick) -> Self {
        Self { now: tick }
    }

    /// Current logical time.
    pub fn now(&self) -> Tick {
        self.now
    }

    /// Advance to `tick`.
    ///
    /// Ticks older than the current time are ignored so the clock never
    /// runs backwards. Returns whether the clock moved.
    pub fn advance_to(&mut self, tick: Tick) -> bool {
        if tick > self.now {
            self.now = tick;
            true
        } else {
            false
        }
    }
}
