//! Resource host and log entry processing.
//!
//! The host is the single execution lane of one resource instance. It
//! applies log entries in strict index order, and before each entry it
//! fires every timer due at the entry's tick and expires sessions whose
//! keep-alive lapsed. Commands, queries, timers and session teardown never
//! interleave, so state machines need no internal locking.

use crate::core::config::Config;
use crate::core::error::{AtollError, AtollResult};
use crate::core::time::Tick;
use crate::substrate::commit::{Commit, RetentionStats, RetentionTracker, SharedRetention};
use crate::substrate::context::ResourceContext;
use crate::substrate::operation::{
    DispatchTable, GatewayMethod, Operation, OperationKind, OperationSpec, Response, StateMachine,
};
use crate::substrate::session::{Session, SessionId, SessionRegistry};
use serde::{Deserialize, Serialize};

/// Entry delivered by the replication layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "entry", rename_all = "snake_case")]
pub enum LogEntry<O> {
    /// Register a client session.
    OpenSession {
        index: u64,
        tick_ms: u64,
        session: SessionId,
    },

    /// Refresh a session's keep-alive.
    KeepAlive {
        index: u64,
        tick_ms: u64,
        session: SessionId,
    },

    /// Close a session and release everything it owns.
    CloseSession {
        index: u64,
        tick_ms: u64,
        session: SessionId,
    },

    /// Apply a command.
    Command {
        index: u64,
        tick_ms: u64,
        session: SessionId,
        operation: O,
    },

    /// Serve a query at the last applied index. Not a log entry proper.
    Query { session: SessionId, operation: O },

    /// Advance the logical clock.
    Tick { index: u64, tick_ms: u64 },
}

impl<O> LogEntry<O> {
    /// Log index, if the entry occupies one.
    pub fn index(&self) -> Option<u64> {
        match self {
            Self::OpenSession { index, .. }
            | Self::KeepAlive { index, .. }
            | Self::CloseSession { index, .. }
            | Self::Command { index, .. }
            | Self::Tick { index, .. } => Some(*index),
            Self::Query { .. } => None,
        }
    }
}

/// Serialized state machine contents at a log index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    pub index: u64,
    pub tick_ms: u64,
    pub data: Vec<u8>,
}

/// Host statistics.
#[derive(Debug, Clone, Serialize)]
pub struct HostStats {
    /// Resource type.
    pub resource: &'static str,
    /// Last applied log index.
    pub last_applied: u64,
    /// Index covered by the latest snapshot.
    pub snapshot_index: u64,
    /// Open sessions.
    pub sessions: usize,
    /// Pending timers.
    pub pending_timers: usize,
    /// Commands applied successfully.
    pub commands_applied: u64,
    /// Commands whose handler failed.
    pub commands_failed: u64,
    /// Timers fired.
    pub timers_fired: u64,
    /// Log retention bookkeeping.
    pub retention: RetentionStats,
}

/// Single-lane host for one resource instance.
pub struct ResourceHost<S: StateMachine> {
    /// The resource state machine.
    state: S,

    /// Log index, clock and timers.
    context: ResourceContext<S::Timer>,

    /// Name -> handler table, built once.
    operations: DispatchTable<S>,

    /// Open sessions.
    sessions: SessionRegistry,

    /// Retention ledger shared with every command commit.
    retention: SharedRetention,

    /// Last applied log index.
    last_applied: u64,

    /// Index covered by the latest snapshot.
    snapshot_index: u64,

    destroyed: bool,
    commands_applied: u64,
    commands_failed: u64,
    timers_fired: u64,
}

impl<S: StateMachine> ResourceHost<S> {
    /// Create a host; `session_timeout_ms == 0` disables keep-alive expiry.
    pub fn new(session_timeout_ms: u64) -> Self {
        Self {
            state: S::default(),
            context: ResourceContext::new(S::RESOURCE_TYPE),
            operations: S::operations(),
            sessions: SessionRegistry::new(session_timeout_ms),
            retention: RetentionTracker::shared(),
            last_applied: 0,
            snapshot_index: 0,
            destroyed: false,
            commands_applied: 0,
            commands_failed: 0,
            timers_fired: 0,
        }
    }

    /// Create a host from configuration.
    pub fn from_config(config: &Config) -> Self {
        Self::new(config.sessions.timeout_ms)
    }

    /// The state machine.
    pub fn state(&self) -> &S {
        &self.state
    }

    /// The execution context.
    pub fn context(&self) -> &ResourceContext<S::Timer> {
        &self.context
    }

    /// The dispatch table.
    pub fn operations(&self) -> &DispatchTable<S> {
        &self.operations
    }

    /// Shared retention ledger.
    pub fn retention(&self) -> &SharedRetention {
        &self.retention
    }

    /// Last applied log index.
    pub fn last_applied(&self) -> u64 {
        self.last_applied
    }

    /// Current logical time.
    pub fn now(&self) -> Tick {
        self.context.now()
    }

    /// Look up an open session.
    pub fn session(&self, id: SessionId) -> AtollResult<&Session> {
        self.sessions.get(id)
    }

    /// Open session ids, ascending.
    pub fn session_ids(&self) -> Vec<SessionId> {
        self.sessions.ids()
    }

    /// Whether the resource was destroyed.
    pub fn is_destroyed(&self) -> bool {
        self.destroyed
    }

    /// Highest log index the substrate may discard.
    pub fn compactable_through(&self) -> Option<u64> {
        self.retention.lock().compactable_through(self.snapshot_index)
    }

    /// Forget retention bookkeeping after the log was truncated through `through`.
    ///
    /// Pruning never goes past [`Self::compactable_through`]. Returns the
    /// number of entries forgotten.
    pub fn compact_log(&mut self, through: u64) -> usize {
        let mut retention = self.retention.lock();
        let limit = match retention.compactable_through(self.snapshot_index) {
            Some(compactable) => compactable.min(through),
            None => return 0,
        };
        let pruned = retention.prune_through(limit);
        tracing::debug!(resource = S::RESOURCE_TYPE, through = limit, pruned, "log compacted");
        pruned
    }

    /// Apply a log entry.
    ///
    /// Entries with a log index MUST arrive in strictly increasing order.
    pub fn apply(&mut self, entry: LogEntry<S::Operation>) -> AtollResult<Response> {
        match entry {
            LogEntry::OpenSession {
                index,
                tick_ms,
                session,
            } => self.open_session(index, Tick::new(tick_ms), session).map(|_| Response::None),
            LogEntry::KeepAlive {
                index,
                tick_ms,
                session,
            } => self
                .keep_alive(index, Tick::new(tick_ms), session)
                .map(|_| Response::None),
            LogEntry::CloseSession {
                index,
                tick_ms,
                session,
            } => self
                .close_session(index, Tick::new(tick_ms), session)
                .map(|_| Response::None),
            LogEntry::Command {
                index,
                tick_ms,
                session,
                operation,
            } => self.command(index, Tick::new(tick_ms), session, operation),
            LogEntry::Query { session, operation } => self.query(session, operation),
            LogEntry::Tick { index, tick_ms } => {
                self.tick(index, Tick::new(tick_ms)).map(|_| Response::None)
            }
        }
    }

    /// Open a session.
    pub fn open_session(&mut self, index: u64, tick: Tick, id: SessionId) -> AtollResult<Session> {
        self.advance(index, tick)?;
        let session = self.sessions.register(id, self.context.now())?;
        tracing::debug!(resource = S::RESOURCE_TYPE, index, session = id.0, "session opened");
        Ok(session)
    }

    /// Record a keep-alive.
    pub fn keep_alive(&mut self, index: u64, tick: Tick, id: SessionId) -> AtollResult<()> {
        self.advance(index, tick)?;
        self.sessions.keep_alive(id, self.context.now())
    }

    /// Close a session; resources release everything keyed by it.
    pub fn close_session(&mut self, index: u64, tick: Tick, id: SessionId) -> AtollResult<()> {
        self.advance(index, tick)?;
        let session = self
            .sessions
            .remove(id)
            .ok_or(AtollError::UnknownSession { session: id.0 })?;
        session.close();
        self.state.on_session_close(id);
        tracing::debug!(resource = S::RESOURCE_TYPE, index, session = id.0, "session closed");
        Ok(())
    }

    /// Advance the clock, firing due timers and expiring sessions.
    pub fn tick(&mut self, index: u64, tick: Tick) -> AtollResult<()> {
        self.advance(index, tick)
    }

    /// Apply a command at `index`.
    pub fn command(
        &mut self,
        index: u64,
        tick: Tick,
        session: SessionId,
        operation: S::Operation,
    ) -> AtollResult<Response> {
        self.advance(index, tick)?;
        if self.destroyed {
            return Err(AtollError::ResourceDestroyed);
        }
        let session = self.sessions.get(session)?.clone();
        let commit = Commit::command(
            index,
            self.context.now(),
            session,
            operation,
            &self.retention,
        );
        let result = self.dispatch(OperationKind::Command, commit);
        match &result {
            Ok(_) => self.commands_applied += 1,
            Err(e) => {
                self.commands_failed += 1;
                tracing::warn!(resource = S::RESOURCE_TYPE, index, error = %e, "command failed");
            }
        }
        result
    }

    /// Serve a query at the last applied index.
    pub fn query(&mut self, session: SessionId, operation: S::Operation) -> AtollResult<Response> {
        if self.destroyed {
            return Err(AtollError::ResourceDestroyed);
        }
        let session = self.sessions.get(session)?.clone();
        let commit = Commit::query(self.last_applied, self.context.now(), session, operation);
        self.dispatch(OperationKind::Query, commit)
    }

    /// Resolve a gateway verb and path to an operation.
    pub fn route(&self, method: GatewayMethod, path: &str) -> AtollResult<&OperationSpec<S>> {
        self.operations.resolve(method, path)
    }

    fn dispatch(
        &mut self,
        kind: OperationKind,
        commit: Commit<S::Operation>,
    ) -> AtollResult<Response> {
        let name = commit.operation().name();
        let spec = self
            .operations
            .get(name)
            .ok_or_else(|| AtollError::UnknownOperation {
                name: name.to_string(),
            })?;
        if spec.kind != kind {
            return Err(AtollError::OperationKindMismatch {
                name: name.to_string(),
                expected: kind.to_string(),
                actual: spec.kind.to_string(),
            });
        }
        let handler = spec.handler;
        tracing::trace!(
            resource = S::RESOURCE_TYPE,
            index = commit.index(),
            operation = name,
            session = commit.session().id().0,
            "applying"
        );
        handler(&mut self.state, &mut self.context, commit)
    }

    /// Check ordering, then bring the lane up to `tick`.
    fn advance(&mut self, index: u64, tick: Tick) -> AtollResult<()> {
        if index <= self.last_applied {
            return Err(AtollError::OutOfOrder {
                index,
                last_applied: self.last_applied,
            });
        }
        self.last_applied = index;
        self.context.set_index(index);
        self.fire_timers(tick);
        self.expire_sessions();
        Ok(())
    }

    fn fire_timers(&mut self, tick: Tick) {
        while let Some(fired) = self.context.pop_due(tick) {
            tracing::trace!(
                resource = S::RESOURCE_TYPE,
                timer = fired.handle.id(),
                due = fired.due.ms,
                "timer fired"
            );
            self.timers_fired += 1;
            self.state.on_timer(&mut self.context, fired.target);
        }
        self.context.advance_clock(tick);
    }

    fn expire_sessions(&mut self) {
        for id in self.sessions.collect_expired(self.context.now()) {
            if let Some(session) = self.sessions.remove(id) {
                session.expire();
                self.state.on_session_close(id);
                tracing::debug!(resource = S::RESOURCE_TYPE, session = id.0, "session expired");
            }
        }
    }

    /// Serialize the state machine at the last applied index.
    pub fn take_snapshot(&mut self) -> AtollResult<Snapshot> {
        let data = self.state.snapshot()?;
        self.snapshot_index = self.last_applied;
        tracing::debug!(
            resource = S::RESOURCE_TYPE,
            index = self.last_applied,
            bytes = data.len(),
            "snapshot taken"
        );
        Ok(Snapshot {
            index: self.last_applied,
            tick_ms: self.context.now().ms,
            data,
        })
    }

    /// Replace the state machine contents with a snapshot.
    pub fn install(&mut self, snapshot: &Snapshot) -> AtollResult<()> {
        if snapshot.index < self.last_applied {
            return Err(AtollError::snapshot(format!(
                "snapshot index {} is behind last applied index {}",
                snapshot.index, self.last_applied
            )));
        }
        self.context.set_index(snapshot.index);
        self.context.advance_clock(Tick::new(snapshot.tick_ms));
        self.state.install(&mut self.context, &snapshot.data)?;
        self.last_applied = snapshot.index;
        self.snapshot_index = snapshot.index;
        tracing::debug!(resource = S::RESOURCE_TYPE, index = snapshot.index, "snapshot installed");
        Ok(())
    }

    /// Release everything and reject further operations.
    pub fn destroy(&mut self) {
        if self.destroyed {
            return;
        }
        self.state.destroy(&mut self.context);
        self.context.clear_timers();
        self.destroyed = true;
        tracing::debug!(
            resource = S::RESOURCE_TYPE,
            index = self.last_applied,
            "resource destroyed"
        );
    }

    /// Get host statistics.
    pub fn stats(&self) -> HostStats {
        HostStats {
            resource: S::RESOURCE_TYPE,
            last_applied: self.last_applied,
            snapshot_index: self.snapshot_index,
            sessions: self.sessions.len(),
            pending_timers: self.context.pending_timers(),
            commands_applied: self.commands_applied,
            commands_failed: self.commands_failed,
            timers_fired: self.timers_fired,
            retention: self.retention.lock().stats(),
        }
    }
}

impl<S: StateMachine> Default for ResourceHost<S> {
    fn default() -> Self {
        Self::new(0)
    }
}
