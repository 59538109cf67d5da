//! Value state machine.
//!
//! A single register with compare-and-set and optional TTL expiry.
//! Writes publish `Change` events on the general channel; TTL expiry clears
//! the register silently.

use crate::core::error::{AtollError, AtollResult};
use crate::core::time::Tick;
use crate::resources::register::RegisterSlot;
use crate::resources::unexpected;
use crate::substrate::commit::Commit;
use crate::substrate::context::ResourceContext;
use crate::substrate::events::{EventListeners, ResourceEvent};
use crate::substrate::operation::{DispatchTable, GatewayMethod, Operation, Response, StateMachine};
use crate::substrate::session::SessionId;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Value operations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "camelCase")]
pub enum ValueOp {
    Get,
    Set {
        value: Bytes,
        #[serde(default)]
        ttl_ms: u64,
    },
    CompareAndSet {
        expect: Option<Bytes>,
        update: Bytes,
        #[serde(default)]
        ttl_ms: u64,
    },
    GetAndSet {
        value: Bytes,
        #[serde(default)]
        ttl_ms: u64,
    },
    Register,
    Unregister,
}

impl Operation for ValueOp {
    fn name(&self) -> &'static str {
        match self {
            Self::Get => "get",
            Self::Set { .. } => "set",
            Self::CompareAndSet { .. } => "compareAndSet",
            Self::GetAndSet { .. } => "getAndSet",
            Self::Register => "register",
            Self::Unregister => "unregister",
        }
    }
}

/// Value timers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueTimer {
    /// The register's TTL elapsed.
    Expire,
}

#[derive(Debug, Serialize, Deserialize)]
struct ValueSnapshot {
    value: Option<Bytes>,
    expires_at_ms: Option<u64>,
}

/// Value resource state.
#[derive(Debug, Default)]
pub struct ValueState {
    slot: RegisterSlot<ValueOp>,
    listeners: EventListeners<ValueOp>,
}

type Ctx = ResourceContext<ValueTimer>;

impl ValueState {
    /// Current value.
    pub fn value(&self) -> Option<&Bytes> {
        self.slot.value()
    }

    /// Expiry tick of the current value, if a TTL is armed.
    pub fn expires_at(&self) -> Option<Tick> {
        self.slot.expires_at()
    }

    /// Sessions registered on the general channel.
    pub fn listeners(&self) -> &EventListeners<ValueOp> {
        &self.listeners
    }

    fn write(
        &mut self,
        ctx: &mut Ctx,
        commit: Commit<ValueOp>,
        value: Bytes,
        ttl_ms: u64,
    ) -> Option<Bytes> {
        let expiry = (ttl_ms > 0).then_some((ttl_ms, ValueTimer::Expire));
        let previous = self.slot.replace(ctx, commit, value.clone(), expiry);
        self.listeners.publish(&ResourceEvent::Change {
            old: previous.clone().unwrap_or_default(),
            new: value,
        });
        previous
    }

    fn get(&mut self, _ctx: &mut Ctx, _commit: Commit<ValueOp>) -> AtollResult<Response> {
        Ok(Response::Value(self.slot.value().cloned()))
    }

    fn set(&mut self, ctx: &mut Ctx, commit: Commit<ValueOp>) -> AtollResult<Response> {
        let (value, ttl_ms) = match commit.operation() {
            ValueOp::Set { value, ttl_ms } => (value.clone(), *ttl_ms),
            other => return Err(unexpected(other)),
        };
        self.write(ctx, commit, value, ttl_ms);
        Ok(Response::None)
    }

    fn compare_and_set(&mut self, ctx: &mut Ctx, commit: Commit<ValueOp>) -> AtollResult<Response> {
        let (matched, update, ttl_ms) = match commit.operation() {
            ValueOp::CompareAndSet {
                expect,
                update,
                ttl_ms,
            } => (self.slot.matches(expect.as_deref()), update.clone(), *ttl_ms),
            other => return Err(unexpected(other)),
        };
        if !matched {
            commit.close();
            return Ok(Response::Bool(false));
        }
        self.write(ctx, commit, update, ttl_ms);
        Ok(Response::Bool(true))
    }

    fn get_and_set(&mut self, ctx: &mut Ctx, commit: Commit<ValueOp>) -> AtollResult<Response> {
        let (value, ttl_ms) = match commit.operation() {
            ValueOp::GetAndSet { value, ttl_ms } => (value.clone(), *ttl_ms),
            other => return Err(unexpected(other)),
        };
        let previous = self.write(ctx, commit, value, ttl_ms);
        Ok(Response::Value(previous))
    }

    fn register(&mut self, _ctx: &mut Ctx, commit: Commit<ValueOp>) -> AtollResult<Response> {
        Ok(Response::Bool(self.listeners.register(commit)))
    }

    fn unregister(&mut self, _ctx: &mut Ctx, commit: Commit<ValueOp>) -> AtollResult<Response> {
        Ok(Response::Bool(self.listeners.unregister(commit)))
    }
}

impl StateMachine for ValueState {
    type Operation = ValueOp;
    type Timer = ValueTimer;

    const RESOURCE_TYPE: &'static str = "value";

    fn operations() -> DispatchTable<Self> {
        use GatewayMethod::*;
        DispatchTable::new()
            .query("get", Self::get)
            .route("/", &[Get])
            .command("set", Self::set)
            .route("/", &[Put, Post])
            .command("compareAndSet", Self::compare_and_set)
            .route("/compareAndSet", &[Put])
            .command("getAndSet", Self::get_and_set)
            .route("/getAndSet", &[Put])
            .command("register", Self::register)
            .command("unregister", Self::unregister)
    }

    fn on_timer(&mut self, _ctx: &mut Ctx, timer: ValueTimer) {
        match timer {
            ValueTimer::Expire => {
                if self.slot.expire().is_some() {
                    tracing::trace!(resource = Self::RESOURCE_TYPE, "value expired");
                }
            }
        }
    }

    fn on_session_close(&mut self, session: SessionId) {
        self.listeners.release_session(session);
    }

    fn snapshot(&self) -> AtollResult<Vec<u8>> {
        let snapshot = ValueSnapshot {
            value: self.slot.value().cloned(),
            expires_at_ms: self.slot.expires_at().map(|t| t.ms),
        };
        bincode::serialize(&snapshot).map_err(|e| AtollError::snapshot(e.to_string()))
    }

    fn install(&mut self, ctx: &mut Ctx, data: &[u8]) -> AtollResult<()> {
        let snapshot: ValueSnapshot =
            bincode::deserialize(data).map_err(|e| AtollError::snapshot(e.to_string()))?;
        let expiry = snapshot
            .expires_at_ms
            .map(|ms| (Tick::new(ms), ValueTimer::Expire));
        self.slot.restore(ctx, snapshot.value, expiry);
        Ok(())
    }

    fn destroy(&mut self, ctx: &mut Ctx) {
        self.slot.clear(ctx);
        self.listeners.clear();
    }
}
