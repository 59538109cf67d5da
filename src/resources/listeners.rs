//! Key-filtered listener registrations.
//!
//! Registrations live in one flat map keyed by (key, event type, session),
//! with a secondary index by key for fan-out. Empty index buckets are
//! removed as soon as their last registration goes away.

use crate::substrate::commit::{Commit, CompactionMode};
use crate::substrate::session::{Session, SessionId};
use bytes::Bytes;
use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct ListenerKey {
    key: Bytes,
    event: i32,
    session: SessionId,
}

/// Per-(key, event type) subscriptions.
#[derive(Debug)]
pub struct KeyListeners<O> {
    registrations: BTreeMap<ListenerKey, Commit<O>>,
    by_key: BTreeMap<Bytes, BTreeSet<(i32, SessionId)>>,
}

impl<O> Default for KeyListeners<O> {
    fn default() -> Self {
        Self {
            registrations: BTreeMap::new(),
            by_key: BTreeMap::new(),
        }
    }
}

impl<O> KeyListeners<O> {
    /// Register the commit's session for `(key, event)`.
    ///
    /// A duplicate is compacted with QUORUM and the original kept.
    /// Returns whether a new registration was recorded.
    pub fn listen(&mut self, key: Bytes, event: i32, commit: Commit<O>) -> bool {
        let session = commit.session().id();
        let id = ListenerKey {
            key: key.clone(),
            event,
            session,
        };
        if self.registrations.contains_key(&id) {
            commit.compact(CompactionMode::Quorum);
            return false;
        }
        self.registrations.insert(id, commit);
        self.by_key.entry(key).or_default().insert((event, session));
        true
    }

    /// Remove the commit's session from `(key, event)`.
    ///
    /// The unlisten commit is always compacted as a tombstone.
    pub fn unlisten(&mut self, key: &Bytes, event: i32, commit: Commit<O>) -> bool {
        let removed = self.remove(key, event, commit.session().id());
        commit.compact(CompactionMode::Tombstone);
        removed
    }

    /// Drop every registration owned by `session`. Returns how many.
    pub fn close_session(&mut self, session: SessionId) -> usize {
        let owned: Vec<_> = self
            .registrations
            .keys()
            .filter(|id| id.session == session)
            .cloned()
            .collect();
        for id in &owned {
            self.remove(&id.key, id.event, session);
        }
        owned.len()
    }

    fn remove(&mut self, key: &Bytes, event: i32, session: SessionId) -> bool {
        let id = ListenerKey {
            key: key.clone(),
            event,
            session,
        };
        let Some(registration) = self.registrations.remove(&id) else {
            return false;
        };
        registration.compact(CompactionMode::Quorum);
        if let Some(bucket) = self.by_key.get_mut(key) {
            bucket.remove(&(event, session));
            if bucket.is_empty() {
                self.by_key.remove(key);
            }
        }
        true
    }

    /// Sessions listening for `event` on `key`, in session-id order.
    pub fn subscribers(&self, key: &[u8], event: i32) -> Vec<&Session> {
        let Some(bucket) = self.by_key.get(key) else {
            return Vec::new();
        };
        bucket
            .range((event, SessionId(0))..=(event, SessionId(u64::MAX)))
            .filter_map(|(event, session)| {
                self.registrations.get(&ListenerKey {
                    key: Bytes::copy_from_slice(key),
                    event: *event,
                    session: *session,
                })
            })
            .map(|commit| commit.session())
            .collect()
    }

    /// Whether `session` listens for `event` on `key`.
    pub fn is_listening(&self, key: &[u8], event: i32, session: SessionId) -> bool {
        self.by_key
            .get(key)
            .is_some_and(|bucket| bucket.contains(&(event, session)))
    }

    /// Number of keys with at least one registration.
    pub fn key_count(&self) -> usize {
        self.by_key.len()
    }

    /// Number of registrations.
    pub fn len(&self) -> usize {
        self.registrations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.registrations.is_empty()
    }

    /// Release every registration.
    pub fn clear(&mut self) {
        for (_, registration) in std::mem::take(&mut self.registrations) {
            registration.close();
        }
        self.by_key.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::time::Tick;
    use crate::substrate::commit::{RetentionState, RetentionTracker, SharedRetention};

    fn commit(index: u64, session: &Session, retention: &SharedRetention) -> Commit<()> {
        Commit::command(index, Tick::zero(), session.clone(), (), retention)
    }

    #[test]
    fn close_session_prunes_buckets() {
        let retention = RetentionTracker::shared();
        let alice = Session::new(SessionId(1), Tick::zero());
        let bob = Session::new(SessionId(2), Tick::zero());
        let mut listeners = KeyListeners::default();
        let a = Bytes::from_static(b"a");
        let b = Bytes::from_static(b"b");

        listeners.listen(a.clone(), 1, commit(1, &alice, &retention));
        listeners.listen(b.clone(), 2, commit(2, &alice, &retention));
        listeners.listen(a.clone(), 1, commit(3, &bob, &retention));

        assert_eq!(listeners.close_session(SessionId(1)), 2);
        assert_eq!(listeners.key_count(), 1);
        assert!(listeners.is_listening(&a, 1, SessionId(2)));
        assert_eq!(
            retention.lock().state(2),
            Some(RetentionState::Compacted(CompactionMode::Quorum))
        );
    }

    #[test]
    fn subscribers_filter_by_event() {
        let retention = RetentionTracker::shared();
        let alice = Session::new(SessionId(1), Tick::zero());
        let mut listeners = KeyListeners::default();
        let key = Bytes::from_static(b"k");
        listeners.listen(key.clone(), 1, commit(1, &alice, &retention));

        assert_eq!(listeners.subscribers(&key, 1).len(), 1);
        assert!(listeners.subscribers(&key, 2).is_empty());
    }
}
