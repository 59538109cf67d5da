//! Single-value register slot shared by Value and Counter.
//!
//! A slot holds the current value, the commit that wrote it (if the value
//! still depends on a log entry), and the TTL timer attached to it. Every
//! mutation releases the superseded commit and cancels the superseded timer
//! as part of the same call, so at most one commit retains the slot.

use crate::core::time::Tick;
use crate::substrate::commit::Commit;
use crate::substrate::context::ResourceContext;
use crate::substrate::scheduler::TimerHandle;
use bytes::Bytes;
use std::time::Duration;

/// Register contents plus the commit and timer backing them.
#[derive(Debug)]
pub struct RegisterSlot<O> {
    current: Option<Commit<O>>,
    value: Option<Bytes>,
    timer: Option<TimerHandle>,
    expires_at: Option<Tick>,
}

impl<O> Default for RegisterSlot<O> {
    fn default() -> Self {
        Self {
            current: None,
            value: None,
            timer: None,
            expires_at: None,
        }
    }
}

impl<O> RegisterSlot<O> {
    /// Current value.
    pub fn value(&self) -> Option<&Bytes> {
        self.value.as_ref()
    }

    /// Absolute expiry tick, if a TTL is armed.
    pub fn expires_at(&self) -> Option<Tick> {
        self.expires_at
    }

    /// Whether a commit currently retains the slot.
    pub fn is_retained(&self) -> bool {
        self.current.is_some()
    }

    /// Compare-and-set matching: absence matches absence, bytes match bytes.
    pub fn matches(&self, expect: Option<&[u8]>) -> bool {
        match (self.value.as_deref(), expect) {
            (None, None) => true,
            (Some(current), Some(expect)) => current == expect,
            _ => false,
        }
    }

    /// Install `value` written by `commit`.
    ///
    /// `ttl` carries the delay in ms and the timer payload; a zero delay arms
    /// nothing. Returns the previous value.
    pub fn replace<T: Clone>(
        &mut self,
        ctx: &mut ResourceContext<T>,
        commit: Commit<O>,
        value: Bytes,
        ttl: Option<(u64, T)>,
    ) -> Option<Bytes> {
        let previous = self.release(ctx);
        if let Some((ttl_ms, expiry)) = ttl.filter(|(ms, _)| *ms > 0) {
            let handle = ctx.schedule(Duration::from_millis(ttl_ms), expiry);
            self.timer = Some(handle);
            self.expires_at = Some(ctx.now().add_ms(ttl_ms));
        }
        self.current = Some(commit);
        self.value = Some(value);
        previous
    }

    /// Install a value that no longer depends on any log entry.
    pub fn replace_derived<T: Clone>(
        &mut self,
        ctx: &mut ResourceContext<T>,
        value: Bytes,
    ) -> Option<Bytes> {
        let previous = self.release(ctx);
        self.value = Some(value);
        previous
    }

    /// The TTL timer fired: drop the value and release its commit.
    pub fn expire(&mut self) -> Option<Bytes> {
        self.timer = None;
        self.expires_at = None;
        if let Some(commit) = self.current.take() {
            commit.close();
        }
        self.value.take()
    }

    /// Drop the value, cancel the timer and release the commit.
    pub fn clear<T: Clone>(&mut self, ctx: &mut ResourceContext<T>) -> Option<Bytes> {
        self.release(ctx)
    }

    /// Restore snapshot contents, re-arming the timer at its absolute tick.
    pub fn restore<T: Clone>(
        &mut self,
        ctx: &mut ResourceContext<T>,
        value: Option<Bytes>,
        expiry: Option<(Tick, T)>,
    ) {
        self.release(ctx);
        self.value = value;
        if let (Some(_), Some((due, expiry))) = (&self.value, expiry) {
            self.timer = Some(ctx.schedule_at(due, expiry));
            self.expires_at = Some(due);
        }
    }

    fn release<T: Clone>(&mut self, ctx: &mut ResourceContext<T>) -> Option<Bytes> {
        if let Some(timer) = self.timer.take() {
            ctx.cancel(timer);
        }
        self.expires_at = None;
        if let Some(commit) = self.current.take() {
            commit.close();
        }
        self.value.take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::substrate::commit::{RetentionState, RetentionTracker};
    use crate::substrate::session::{Session, SessionId};

    fn commit(index: u64, retention: &crate::substrate::commit::SharedRetention) -> Commit<()> {
        let session = Session::new(SessionId(1), Tick::zero());
        Commit::command(index, Tick::zero(), session, (), retention)
    }

    #[test]
    fn replace_releases_superseded_commit_and_timer() {
        let retention = RetentionTracker::shared();
        let mut ctx = ResourceContext::new("test");
        let mut slot = RegisterSlot::default();

        slot.replace(&mut ctx, commit(1, &retention), Bytes::from_static(b"a"), Some((100, ())));
        assert_eq!(ctx.pending_timers(), 1);

        let previous = slot.replace(
            &mut ctx,
            commit(2, &retention),
            Bytes::from_static(b"b"),
            None,
        );
        assert_eq!(previous, Some(Bytes::from_static(b"a")));
        assert_eq!(ctx.pending_timers(), 0);
        assert_eq!(retention.lock().state(1), Some(RetentionState::Closed));
        assert_eq!(retention.lock().outstanding_indexes(), vec![2]);
    }

    #[test]
    fn matching_rule() {
        let retention = RetentionTracker::shared();
        let mut ctx = ResourceContext::<()>::new("test");
        let mut slot = RegisterSlot::default();
        assert!(slot.matches(None));
        assert!(!slot.matches(Some(b"")));

        slot.replace(&mut ctx, commit(1, &retention), Bytes::new(), None);
        assert!(slot.matches(Some(b"")));
        assert!(!slot.matches(None));
    }
}
