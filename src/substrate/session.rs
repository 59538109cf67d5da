//! Client sessions and ordered event delivery.
//!
//! A session is a client's logical channel. Events published to it are
//! numbered in publish order and held until the client acknowledges them.
//! While the client is disconnected events keep queuing; on reconnection the
//! whole unacknowledged backlog is handed out again in original order. Once
//! the session is closed or expires, its backlog is discarded and publishing
//! fails with [`AtollError::ClosedSession`].
//!
//! Closing a session is the only teardown signal resources receive.

use crate::core::error::{AtollError, AtollResult};
use crate::core::time::Tick;
use crate::substrate::events::ResourceEvent;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;

/// Session identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SessionId(pub u64);

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SessionStatus {
    Open,
    Closed,
    Expired,
}

/// An event queued on a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishedEvent {
    /// Per-session sequence number, starting at 1.
    pub sequence: u64,
    /// Event name (e.g. "key", "event").
    pub name: String,
    /// Event payload.
    pub payload: ResourceEvent,
}

/// Receipt for a queued event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Delivery {
    pub session: SessionId,
    pub sequence: u64,
}

#[derive(Debug)]
struct SessionState {
    status: SessionStatus,
    connected: bool,
    next_sequence: u64,
    /// Highest sequence handed to the transport on the current connection.
    sent_through: u64,
    unacked: VecDeque<PublishedEvent>,
    last_keep_alive: Tick,
}

/// Handle to a client session.
///
/// Cloning the handle shares the same underlying event queue.
#[derive(Debug, Clone)]
pub struct Session {
    id: SessionId,
    state: Arc<Mutex<SessionState>>,
}

impl Session {
    /// Create a new open, connected session.
    pub fn new(id: SessionId, now: Tick) -> Self {
        Self {
            id,
            state: Arc::new(Mutex::new(SessionState {
                status: SessionStatus::Open,
                connected: true,
                next_sequence: 1,
                sent_through: 0,
                unacked: VecDeque::new(),
                last_keep_alive: now,
            })),
        }
    }

    /// Session identifier.
    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Current status.
    pub fn status(&self) -> SessionStatus {
        self.state.lock().status
    }

    /// Whether the session accepts events.
    pub fn is_open(&self) -> bool {
        self.status() == SessionStatus::Open
    }

    /// Whether the client is currently connected.
    pub fn is_connected(&self) -> bool {
        self.state.lock().connected
    }

    /// Queue an event for delivery.
    pub fn publish(&self, name: &str, payload: ResourceEvent) -> AtollResult<Delivery> {
        let mut state = self.state.lock();
        if state.status != SessionStatus::Open {
            return Err(AtollError::closed_session(self.id.0));
        }
        let sequence = state.next_sequence;
        state.next_sequence += 1;
        state.unacked.push_back(PublishedEvent {
            sequence,
            name: name.to_string(),
            payload,
        });
        tracing::trace!(session = self.id.0, sequence, event = name, "event queued");
        Ok(Delivery {
            session: self.id,
            sequence,
        })
    }

    /// Take events not yet sent on the current connection.
    ///
    /// Returns nothing while disconnected.
    pub fn poll_events(&self) -> Vec<PublishedEvent> {
        let mut state = self.state.lock();
        if state.status != SessionStatus::Open || !state.connected {
            return Vec::new();
        }
        let sent_through = state.sent_through;
        let fresh: Vec<_> = state
            .unacked
            .iter()
            .filter(|e| e.sequence > sent_through)
            .cloned()
            .collect();
        if let Some(last) = fresh.last() {
            state.sent_through = last.sequence;
        }
        fresh
    }

    /// Drop every event up to and including `sequence`.
    ///
    /// Returns the number of events acknowledged.
    pub fn acknowledge(&self, sequence: u64) -> usize {
        let mut state = self.state.lock();
        let before = state.unacked.len();
        while state
            .unacked
            .front()
            .is_some_and(|e| e.sequence <= sequence)
        {
            state.unacked.pop_front();
        }
        before - state.unacked.len()
    }

    /// Mark the client disconnected. Unacknowledged events are kept.
    pub fn disconnect(&self) {
        self.state.lock().connected = false;
    }

    /// Mark the client reconnected and return the unacknowledged backlog.
    pub fn connect(&self) -> Vec<PublishedEvent> {
        let mut state = self.state.lock();
        if state.status != SessionStatus::Open {
            return Vec::new();
        }
        state.connected = true;
        let backlog: Vec<_> = state.unacked.iter().cloned().collect();
        state.sent_through = backlog.last().map(|e| e.sequence).unwrap_or(state.sent_through);
        backlog
    }

    /// Number of events not yet acknowledged.
    pub fn pending_events(&self) -> usize {
        self.state.lock().unacked.len()
    }

    pub(crate) fn keep_alive(&self, now: Tick) {
        let mut state = self.state.lock();
        if now > state.last_keep_alive {
            state.last_keep_alive = now;
        }
    }

    pub(crate) fn is_expired_at(&self, now: Tick, timeout_ms: u64) -> bool {
        let state = self.state.lock();
        timeout_ms > 0 && now > state.last_keep_alive.add_ms(timeout_ms)
    }

    pub(crate) fn close(&self) {
        let mut state = self.state.lock();
        if state.status == SessionStatus::Open {
            state.status = SessionStatus::Closed;
        }
        state.connected = false;
        state.unacked.clear();
    }

    pub(crate) fn expire(&self) {
        let mut state = self.state.lock();
        state.status = SessionStatus::Expired;
        state.connected = false;
        state.unacked.clear();
    }
}

/// Sessions known to one resource lane.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: BTreeMap<SessionId, Session>,
    timeout_ms: u64,
}

impl SessionRegistry {
    /// Create a registry; `timeout_ms == 0` disables keep-alive expiry.
    pub fn new(timeout_ms: u64) -> Self {
        Self {
            sessions: BTreeMap::new(),
            timeout_ms,
        }
    }

    /// Register a new session.
    pub fn register(&mut self, id: SessionId, now: Tick) -> AtollResult<Session> {
        if self.sessions.contains_key(&id) {
            return Err(AtollError::DuplicateSession { session: id.0 });
        }
        let session = Session::new(id, now);
        self.sessions.insert(id, session.clone());
        Ok(session)
    }

    /// Look up an open session.
    pub fn get(&self, id: SessionId) -> AtollResult<&Session> {
        self.sessions
            .get(&id)
            .ok_or(AtollError::UnknownSession { session: id.0 })
    }

    /// Remove a session from the registry.
    pub fn remove(&mut self, id: SessionId) -> Option<Session> {
        self.sessions.remove(&id)
    }

    /// Record a keep-alive.
    pub fn keep_alive(&self, id: SessionId, now: Tick) -> AtollResult<()> {
        self.get(id)?.keep_alive(now);
        Ok(())
    }

    /// Sessions whose keep-alive deadline has passed, in id order.
    ///
    /// A keep-alive logged exactly at `last + timeout` still arrives in time.
    pub fn collect_expired(&self, now: Tick) -> Vec<SessionId> {
        self.sessions
            .values()
            .filter(|s| s.is_expired_at(now, self.timeout_ms))
            .map(|s| s.id())
            .collect()
    }

    /// Number of registered sessions.
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Whether no sessions are registered.
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Registered session ids, ascending.
    pub fn ids(&self) -> Vec<SessionId> {
        self.sessions.keys().copied().collect()
    }
}
