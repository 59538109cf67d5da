//! Counter state machine.
//!
//! An atomic 64-bit signed register stored as eight big-endian bytes.
//! Absence means uninitialized. The increment and add families treat an
//! uninitialized counter as zero, except that adding to an uninitialized
//! counter stores the supplied delta bytes as they are.
//!
//! Values produced by arithmetic no longer depend on any single log entry,
//! so both the superseded commit and the incoming commit are closed and the
//! counter is carried forward by snapshots. TTLs are accepted on the shared
//! register operations and ignored.

use crate::core::error::{AtollError, AtollResult};
use crate::resources::register::RegisterSlot;
use crate::resources::unexpected;
use crate::substrate::commit::Commit;
use crate::substrate::context::ResourceContext;
use crate::substrate::events::{EventListeners, ResourceEvent};
use crate::substrate::operation::{DispatchTable, GatewayMethod, Operation, Response, StateMachine};
use crate::substrate::session::SessionId;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Width of an encoded counter value.
pub const COUNTER_WIDTH: usize = 8;

/// Encode a counter value.
pub fn encode(value: i64) -> Bytes {
    Bytes::copy_from_slice(&value.to_be_bytes())
}

/// Decode a counter value, rejecting anything but eight bytes.
pub fn decode(bytes: &[u8]) -> AtollResult<i64> {
    <[u8; COUNTER_WIDTH]>::try_from(bytes)
        .map(i64::from_be_bytes)
        .map_err(|_| AtollError::InvalidCounterValue { len: bytes.len() })
}

/// Counter operations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "camelCase")]
pub enum CounterOp {
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
    IncrementAndGet,
    DecrementAndGet,
    GetAndIncrement,
    GetAndDecrement,
    AddAndGet {
        delta: Bytes,
    },
    GetAndAdd {
        delta: Bytes,
    },
    Register,
    Unregister,
}

impl Operation for CounterOp {
    fn name(&self) -> &'static str {
        match self {
            Self::Get => "get",
            Self::Set { .. } => "set",
            Self::CompareAndSet { .. } => "compareAndSet",
            Self::GetAndSet { .. } => "getAndSet",
            Self::IncrementAndGet => "incrementAndGet",
            Self::DecrementAndGet => "decrementAndGet",
            Self::GetAndIncrement => "getAndIncrement",
            Self::GetAndDecrement => "getAndDecrement",
            Self::AddAndGet { .. } => "addAndGet",
            Self::GetAndAdd { .. } => "getAndAdd",
            Self::Register => "register",
            Self::Unregister => "unregister",
        }
    }
}

/// Counters schedule no timers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CounterTimer {}

/// Counter resource state.
#[derive(Debug, Default)]
pub struct CounterState {
    slot: RegisterSlot<CounterOp>,
    listeners: EventListeners<CounterOp>,
}

type Ctx = ResourceContext<CounterTimer>;

impl CounterState {
    /// Current encoded value.
    pub fn value(&self) -> Option<&Bytes> {
        self.slot.value()
    }

    /// Current decoded value; `None` when uninitialized.
    pub fn current(&self) -> AtollResult<Option<i64>> {
        self.slot.value().map(|b| decode(b)).transpose()
    }

    /// Sessions registered on the general channel.
    pub fn listeners(&self) -> &EventListeners<CounterOp> {
        &self.listeners
    }

    fn publish(&self, old: Option<&Bytes>, new: &Bytes) {
        self.listeners.publish(&ResourceEvent::Change {
            old: old.cloned().unwrap_or_default(),
            new: new.clone(),
        });
    }

    /// Store `value` written directly by `commit`.
    fn write(&mut self, ctx: &mut Ctx, commit: Commit<CounterOp>, value: Bytes) -> Option<Bytes> {
        let previous = self.slot.replace(ctx, commit, value.clone(), None);
        self.publish(previous.as_ref(), &value);
        previous
    }

    /// Store an arithmetic result and release `commit`.
    fn derive(&mut self, ctx: &mut Ctx, commit: Commit<CounterOp>, value: Bytes) -> Option<Bytes> {
        let previous = self.slot.replace_derived(ctx, value.clone());
        commit.close();
        self.publish(previous.as_ref(), &value);
        previous
    }

    fn apply_delta(
        &mut self,
        ctx: &mut Ctx,
        commit: Commit<CounterOp>,
        delta: i64,
    ) -> AtollResult<(Option<Bytes>, Bytes)> {
        let current = self.current()?.unwrap_or(0);
        let next = encode(current.wrapping_add(delta));
        let previous = self.derive(ctx, commit, next.clone());
        Ok((previous, next))
    }

    fn apply_add(
        &mut self,
        ctx: &mut Ctx,
        commit: Commit<CounterOp>,
    ) -> AtollResult<(Option<Bytes>, Bytes)> {
        let delta = match commit.operation() {
            CounterOp::AddAndGet { delta } | CounterOp::GetAndAdd { delta } => delta.clone(),
            other => return Err(unexpected(other)),
        };
        let amount = decode(&delta)?;
        let next = match self.current()? {
            // Uninitialized: the delta bytes become the value unchanged.
            None => delta,
            Some(current) => encode(current.wrapping_add(amount)),
        };
        let previous = self.derive(ctx, commit, next.clone());
        Ok((previous, next))
    }

    fn get(&mut self, _ctx: &mut Ctx, _commit: Commit<CounterOp>) -> AtollResult<Response> {
        Ok(Response::Value(self.slot.value().cloned()))
    }

    fn set(&mut self, ctx: &mut Ctx, commit: Commit<CounterOp>) -> AtollResult<Response> {
        let value = match commit.operation() {
            CounterOp::Set { value, .. } => value.clone(),
            other => return Err(unexpected(other)),
        };
        decode(&value)?;
        self.write(ctx, commit, value);
        Ok(Response::None)
    }

    fn compare_and_set(
        &mut self,
        ctx: &mut Ctx,
        commit: Commit<CounterOp>,
    ) -> AtollResult<Response> {
        let (matched, update) = match commit.operation() {
            CounterOp::CompareAndSet { expect, update, .. } => {
                (self.slot.matches(expect.as_deref()), update.clone())
            }
            other => return Err(unexpected(other)),
        };
        decode(&update)?;
        if !matched {
            commit.close();
            return Ok(Response::Bool(false));
        }
        self.write(ctx, commit, update);
        Ok(Response::Bool(true))
    }

    fn get_and_set(&mut self, ctx: &mut Ctx, commit: Commit<CounterOp>) -> AtollResult<Response> {
        let value = match commit.operation() {
            CounterOp::GetAndSet { value, .. } => value.clone(),
            other => return Err(unexpected(other)),
        };
        decode(&value)?;
        let previous = self.write(ctx, commit, value);
        Ok(Response::Value(previous))
    }

    fn increment_and_get(
        &mut self,
        ctx: &mut Ctx,
        commit: Commit<CounterOp>,
    ) -> AtollResult<Response> {
        let (_, next) = self.apply_delta(ctx, commit, 1)?;
        Ok(Response::Value(Some(next)))
    }

    fn decrement_and_get(
        &mut self,
        ctx: &mut Ctx,
        commit: Commit<CounterOp>,
    ) -> AtollResult<Response> {
        let (_, next) = self.apply_delta(ctx, commit, -1)?;
        Ok(Response::Value(Some(next)))
    }

    fn get_and_increment(
        &mut self,
        ctx: &mut Ctx,
        commit: Commit<CounterOp>,
    ) -> AtollResult<Response> {
        let (previous, _) = self.apply_delta(ctx, commit, 1)?;
        Ok(Response::Value(Some(previous.unwrap_or_default())))
    }

    fn get_and_decrement(
        &mut self,
        ctx: &mut Ctx,
        commit: Commit<CounterOp>,
    ) -> AtollResult<Response> {
        let (previous, _) = self.apply_delta(ctx, commit, -1)?;
        Ok(Response::Value(Some(previous.unwrap_or_default())))
    }

    fn add_and_get(&mut self, ctx: &mut Ctx, commit: Commit<CounterOp>) -> AtollResult<Response> {
        let (_, next) = self.apply_add(ctx, commit)?;
        Ok(Response::Value(Some(next)))
    }

    fn get_and_add(&mut self, ctx: &mut Ctx, commit: Commit<CounterOp>) -> AtollResult<Response> {
        let (previous, _) = self.apply_add(ctx, commit)?;
        Ok(Response::Value(Some(previous.unwrap_or_default())))
    }

    fn register(&mut self, _ctx: &mut Ctx, commit: Commit<CounterOp>) -> AtollResult<Response> {
        Ok(Response::Bool(self.listeners.register(commit)))
    }

    fn unregister(&mut self, _ctx: &mut Ctx, commit: Commit<CounterOp>) -> AtollResult<Response> {
        Ok(Response::Bool(self.listeners.unregister(commit)))
    }
}

impl StateMachine for CounterState {
    type Operation = CounterOp;
    type Timer = CounterTimer;

    const RESOURCE_TYPE: &'static str = "counter";

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
            .command("incrementAndGet", Self::increment_and_get)
            .route("/incrementAndGet", &[Put])
            .command("decrementAndGet", Self::decrement_and_get)
            .route("/decrementAndGet", &[Put])
            .command("getAndIncrement", Self::get_and_increment)
            .route("/getAndIncrement", &[Put])
            .command("getAndDecrement", Self::get_and_decrement)
            .route("/getAndDecrement", &[Put])
            .command("addAndGet", Self::add_and_get)
            .route("/addAndGet", &[Put])
            .command("getAndAdd", Self::get_and_add)
            .route("/getAndAdd", &[Put])
            .command("register", Self::register)
            .command("unregister", Self::unregister)
    }

    fn on_timer(&mut self, _ctx: &mut Ctx, timer: CounterTimer) {
        match timer {}
    }

    fn on_session_close(&mut self, session: SessionId) {
        self.listeners.release_session(session);
    }

    fn snapshot(&self) -> AtollResult<Vec<u8>> {
        Ok(self.slot.value().map(|b| b.to_vec()).unwrap_or_default())
    }

    fn install(&mut self, ctx: &mut Ctx, data: &[u8]) -> AtollResult<()> {
        if data.is_empty() {
            self.slot.clear(ctx);
            return Ok(());
        }
        decode(data).map_err(|e| AtollError::snapshot(e.to_string()))?;
        self.slot.replace_derived(ctx, Bytes::copy_from_slice(data));
        Ok(())
    }

    fn destroy(&mut self, ctx: &mut Ctx) {
        self.slot.clear(ctx);
        self.listeners.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_rejects_wrong_width() {
        assert_eq!(decode(&encode(-7)).unwrap(), -7);
        assert!(matches!(
            decode(b"12345"),
            Err(AtollError::InvalidCounterValue { len: 5 })
        ));
    }
}
