//! Resource events and the general notification channel.
//!
//! Every resource can publish to sessions that subscribed with the
//! `register` command. Registrations are commits: the first registration
//! from a session stays open as the live subscription record, a duplicate is
//! compacted with [`CompactionMode::Quorum`], and `unregister` always
//! compacts its own commit as a tombstone.

use crate::substrate::commit::{Commit, CompactionMode};
use crate::substrate::session::SessionId;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Name of events on the general, unfiltered channel.
pub const GENERAL_EVENT: &str = "event";

/// Name of key-filtered map events.
pub const KEY_EVENT: &str = "key";

/// Map entry event types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum EntryEventType {
    Add,
    Update,
    Remove,
}

impl EntryEventType {
    /// Numeric id used by `listen` / `unlisten`.
    pub fn id(self) -> i32 {
        match self {
            Self::Add => 1,
            Self::Update => 2,
            Self::Remove => 3,
        }
    }

    /// Resolve a numeric id.
    pub fn from_id(id: i32) -> Option<Self> {
        match id {
            1 => Some(Self::Add),
            2 => Some(Self::Update),
            3 => Some(Self::Remove),
            _ => None,
        }
    }
}

/// Payload of an event published by a resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResourceEvent {
    /// A register changed. A zero-length `old` marks a previously absent value.
    Change { old: Bytes, new: Bytes },
    /// A map entry was added, updated or removed.
    Entry {
        event_type: EntryEventType,
        key: Bytes,
        value: Bytes,
    },
}

/// Sessions subscribed to a resource's general channel.
#[derive(Debug)]
pub struct EventListeners<O> {
    registrations: BTreeMap<SessionId, Commit<O>>,
}

impl<O> Default for EventListeners<O> {
    fn default() -> Self {
        Self {
            registrations: BTreeMap::new(),
        }
    }
}

impl<O> EventListeners<O> {
    /// Register the commit's session.
    ///
    /// Returns false for a duplicate, whose commit is compacted immediately.
    pub fn register(&mut self, commit: Commit<O>) -> bool {
        let session = commit.session().id();
        if self.registrations.contains_key(&session) {
            commit.compact(CompactionMode::Quorum);
            false
        } else {
            self.registrations.insert(session, commit);
            true
        }
    }

    /// Remove the commit's session; the unregister commit becomes a tombstone.
    pub fn unregister(&mut self, commit: Commit<O>) -> bool {
        let removed = self.release_session(commit.session().id());
        commit.compact(CompactionMode::Tombstone);
        removed
    }

    /// Drop the registration owned by `session`, if any.
    pub fn release_session(&mut self, session: SessionId) -> bool {
        match self.registrations.remove(&session) {
            Some(registration) => {
                registration.compact(CompactionMode::Quorum);
                true
            }
            None => false,
        }
    }

    /// Publish to every registered session in session-id order.
    ///
    /// Returns the number of sessions the event was queued on.
    pub fn publish(&self, event: &ResourceEvent) -> usize {
        let mut delivered = 0;
        for registration in self.registrations.values() {
            match registration.session().publish(GENERAL_EVENT, event.clone()) {
                Ok(_) => delivered += 1,
                Err(e) => {
                    tracing::warn!(
                        session = registration.session().id().0,
                        error = %e,
                        "skipping publish"
                    )
                }
            }
        }
        delivered
    }

    /// Whether `session` is registered.
    pub fn contains(&self, session: SessionId) -> bool {
        self.registrations.contains_key(&session)
    }

    /// Number of registrations.
    pub fn len(&self) -> usize {
        self.registrations.len()
    }

    /// Whether there are no registrations.
    pub fn is_empty(&self) -> bool {
        self.registrations.is_empty()
    }

    /// Release every registration.
    pub fn clear(&mut self) {
        for (_, registration) in std::mem::take(&mut self.registrations) {
            registration.close();
        }
    }
}
