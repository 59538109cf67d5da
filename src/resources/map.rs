//! Map state machine.
//!
//! Keyed registers with per-entry TTL and per-(key, event type)
//! subscriptions. Every mutation of a key publishes an entry event to the
//! key's listeners as `"key"` and then to the general channel as `"event"`.
//! TTL expiry removes the entry without publishing anything.

use crate::core::error::{AtollError, AtollResult};
use crate::core::time::Tick;
use crate::resources::listeners::KeyListeners;
use crate::resources::unexpected;
use crate::substrate::commit::Commit;
use crate::substrate::context::ResourceContext;
use crate::substrate::events::{EntryEventType, EventListeners, ResourceEvent, KEY_EVENT};
use crate::substrate::operation::{DispatchTable, GatewayMethod, Operation, Response, StateMachine};
use crate::substrate::scheduler::TimerHandle;
use crate::substrate::session::SessionId;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

/// Map operations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "camelCase")]
pub enum MapOp {
    ContainsKey {
        key: Bytes,
    },
    ContainsValue {
        value: Bytes,
    },
    Get {
        key: Bytes,
    },
    GetOrDefault {
        key: Bytes,
        default_value: Option<Bytes>,
    },
    Size,
    IsEmpty,
    KeySet,
    Values,
    EntrySet,
    Put {
        key: Bytes,
        value: Bytes,
        #[serde(default)]
        ttl_ms: u64,
    },
    PutIfAbsent {
        key: Bytes,
        value: Bytes,
        #[serde(default)]
        ttl_ms: u64,
    },
    Remove {
        key: Bytes,
    },
    RemoveIfPresent {
        key: Bytes,
        value: Option<Bytes>,
    },
    Replace {
        key: Bytes,
        value: Bytes,
        #[serde(default)]
        ttl_ms: u64,
    },
    ReplaceIfPresent {
        key: Bytes,
        expect: Option<Bytes>,
        value: Bytes,
        #[serde(default)]
        ttl_ms: u64,
    },
    Clear,
    Listen {
        key: Bytes,
        event: i32,
    },
    Unlisten {
        key: Bytes,
        event: i32,
    },
    Register,
    Unregister,
}

impl Operation for MapOp {
    fn name(&self) -> &'static str {
        match self {
            Self::ContainsKey { .. } => "containsKey",
            Self::ContainsValue { .. } => "containsValue",
            Self::Get { .. } => "get",
            Self::GetOrDefault { .. } => "getOrDefault",
            Self::Size => "size",
            Self::IsEmpty => "isEmpty",
            Self::KeySet => "keySet",
            Self::Values => "values",
            Self::EntrySet => "entrySet",
            Self::Put { .. } => "put",
            Self::PutIfAbsent { .. } => "putIfAbsent",
            Self::Remove { .. } => "remove",
            Self::RemoveIfPresent { .. } => "removeIfPresent",
            Self::Replace { .. } => "replace",
            Self::ReplaceIfPresent { .. } => "replaceIfPresent",
            Self::Clear => "clear",
            Self::Listen { .. } => "listen",
            Self::Unlisten { .. } => "unlisten",
            Self::Register => "register",
            Self::Unregister => "unregister",
        }
    }
}

/// Map timers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MapTimer {
    /// The entry's TTL elapsed.
    Expire { key: Bytes },
}

/// One map entry.
#[derive(Debug)]
struct MapSlot {
    /// Commit that wrote the value; `None` after a snapshot install.
    commit: Option<Commit<MapOp>>,
    value: Bytes,
    timer: Option<TimerHandle>,
    expires_at: Option<Tick>,
}

impl MapSlot {
    fn release(self, ctx: &mut Ctx) -> Bytes {
        if let Some(timer) = self.timer {
            ctx.cancel(timer);
        }
        if let Some(commit) = self.commit {
            commit.close();
        }
        self.value
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct MapSnapshotEntry {
    key: Bytes,
    value: Bytes,
    expires_at_ms: Option<u64>,
}

#[derive(Debug, Serialize, Deserialize)]
struct MapSnapshot {
    entries: Vec<MapSnapshotEntry>,
}

/// Map resource state.
#[derive(Debug, Default)]
pub struct MapState {
    entries: BTreeMap<Bytes, MapSlot>,
    key_listeners: KeyListeners<MapOp>,
    listeners: EventListeners<MapOp>,
}

type Ctx = ResourceContext<MapTimer>;

impl MapState {
    /// Value stored under `key`.
    pub fn get(&self, key: &[u8]) -> Option<&Bytes> {
        self.entries.get(key).map(|slot| &slot.value)
    }

    /// Expiry tick of `key`, if a TTL is armed.
    pub fn expires_at(&self, key: &[u8]) -> Option<Tick> {
        self.entries.get(key).and_then(|slot| slot.expires_at)
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Key-filtered subscriptions.
    pub fn key_listeners(&self) -> &KeyListeners<MapOp> {
        &self.key_listeners
    }

    /// General channel registrations.
    pub fn listeners(&self) -> &EventListeners<MapOp> {
        &self.listeners
    }

    /// Store `value` under `key` on behalf of `commit`, returning the previous value.
    fn insert(
        &mut self,
        ctx: &mut Ctx,
        key: Bytes,
        value: Bytes,
        ttl_ms: u64,
        commit: Commit<MapOp>,
    ) -> Option<Bytes> {
        let previous = self
            .entries
            .remove(&key)
            .map(|slot| slot.release(ctx));
        let (timer, expires_at) = if ttl_ms > 0 {
            let handle = ctx.schedule(
                Duration::from_millis(ttl_ms),
                MapTimer::Expire { key: key.clone() },
            );
            (Some(handle), Some(ctx.now().add_ms(ttl_ms)))
        } else {
            (None, None)
        };
        self.entries.insert(
            key,
            MapSlot {
                commit: Some(commit),
                value,
                timer,
                expires_at,
            },
        );
        previous
    }

    fn release_all(&mut self, ctx: &mut Ctx) -> usize {
        let entries = std::mem::take(&mut self.entries);
        let released = entries.len();
        for slot in entries.into_values() {
            slot.release(ctx);
        }
        released
    }

    /// Publish to `(key, event_type)` listeners, then to the general channel.
    fn notify(&self, event_type: EntryEventType, key: &Bytes, value: &Bytes) {
        let event = ResourceEvent::Entry {
            event_type,
            key: key.clone(),
            value: value.clone(),
        };
        for session in self.key_listeners.subscribers(key, event_type.id()) {
            if let Err(e) = session.publish(KEY_EVENT, event.clone()) {
                tracing::warn!(session = session.id().0, error = %e, "skipping publish");
            }
        }
        self.listeners.publish(&event);
    }

    fn contains_key(&mut self, _ctx: &mut Ctx, commit: Commit<MapOp>) -> AtollResult<Response> {
        match commit.operation() {
            MapOp::ContainsKey { key } => Ok(Response::Bool(self.entries.contains_key(key))),
            other => Err(unexpected(other)),
        }
    }

    fn contains_value(&mut self, _ctx: &mut Ctx, commit: Commit<MapOp>) -> AtollResult<Response> {
        match commit.operation() {
            MapOp::ContainsValue { value } => Ok(Response::Bool(
                self.entries.values().any(|slot| slot.value == *value),
            )),
            other => Err(unexpected(other)),
        }
    }

    fn get_value(&mut self, _ctx: &mut Ctx, commit: Commit<MapOp>) -> AtollResult<Response> {
        match commit.operation() {
            MapOp::Get { key } => Ok(Response::Value(self.get(key).cloned())),
            other => Err(unexpected(other)),
        }
    }

    fn get_or_default(&mut self, _ctx: &mut Ctx, commit: Commit<MapOp>) -> AtollResult<Response> {
        match commit.operation() {
            MapOp::GetOrDefault { key, default_value } => Ok(Response::Value(
                self.get(key).cloned().or_else(|| default_value.clone()),
            )),
            other => Err(unexpected(other)),
        }
    }

    fn size(&mut self, _ctx: &mut Ctx, _commit: Commit<MapOp>) -> AtollResult<Response> {
        Ok(Response::Size(self.entries.len()))
    }

    fn is_empty_query(&mut self, _ctx: &mut Ctx, _commit: Commit<MapOp>) -> AtollResult<Response> {
        Ok(Response::Bool(self.entries.is_empty()))
    }

    fn key_set(&mut self, _ctx: &mut Ctx, _commit: Commit<MapOp>) -> AtollResult<Response> {
        Ok(Response::Keys(self.entries.keys().cloned().collect()))
    }

    fn values(&mut self, _ctx: &mut Ctx, _commit: Commit<MapOp>) -> AtollResult<Response> {
        Ok(Response::Values(
            self.entries.values().map(|slot| slot.value.clone()).collect(),
        ))
    }

    fn entry_set(&mut self, _ctx: &mut Ctx, _commit: Commit<MapOp>) -> AtollResult<Response> {
        Ok(Response::Entries(
            self.entries
                .iter()
                .map(|(key, slot)| (key.clone(), slot.value.clone()))
                .collect(),
        ))
    }

    fn put(&mut self, ctx: &mut Ctx, commit: Commit<MapOp>) -> AtollResult<Response> {
        let (key, value, ttl_ms) = match commit.operation() {
            MapOp::Put { key, value, ttl_ms } => (key.clone(), value.clone(), *ttl_ms),
            other => return Err(unexpected(other)),
        };
        let previous = self.insert(ctx, key.clone(), value.clone(), ttl_ms, commit);
        let event_type = if previous.is_some() {
            EntryEventType::Update
        } else {
            EntryEventType::Add
        };
        self.notify(event_type, &key, &value);
        Ok(Response::Value(previous))
    }

    fn put_if_absent(&mut self, ctx: &mut Ctx, commit: Commit<MapOp>) -> AtollResult<Response> {
        let (key, value, ttl_ms) = match commit.operation() {
            MapOp::PutIfAbsent { key, value, ttl_ms } => (key.clone(), value.clone(), *ttl_ms),
            other => return Err(unexpected(other)),
        };
        if let Some(existing) = self.get(&key).cloned() {
            commit.close();
            return Ok(Response::Value(Some(existing)));
        }
        self.insert(ctx, key.clone(), value.clone(), ttl_ms, commit);
        self.notify(EntryEventType::Add, &key, &value);
        Ok(Response::Value(None))
    }

    fn remove(&mut self, ctx: &mut Ctx, commit: Commit<MapOp>) -> AtollResult<Response> {
        let key = match commit.operation() {
            MapOp::Remove { key } => key.clone(),
            other => return Err(unexpected(other)),
        };
        commit.close();
        let Some(slot) = self.entries.remove(&key) else {
            return Ok(Response::Value(None));
        };
        let removed = slot.release(ctx);
        self.notify(EntryEventType::Remove, &key, &removed);
        Ok(Response::Value(Some(removed)))
    }

    fn remove_if_present(&mut self, ctx: &mut Ctx, commit: Commit<MapOp>) -> AtollResult<Response> {
        let (key, expect) = match commit.operation() {
            MapOp::RemoveIfPresent { key, value } => (key.clone(), value.clone()),
            other => return Err(unexpected(other)),
        };
        commit.close();
        let matched = match (self.get(&key), &expect) {
            (Some(current), Some(expect)) => current == expect,
            _ => false,
        };
        if !matched {
            return Ok(Response::Bool(false));
        }
        if let Some(slot) = self.entries.remove(&key) {
            let removed = slot.release(ctx);
            self.notify(EntryEventType::Remove, &key, &removed);
        }
        Ok(Response::Bool(true))
    }

    fn replace(&mut self, ctx: &mut Ctx, commit: Commit<MapOp>) -> AtollResult<Response> {
        let (key, value, ttl_ms) = match commit.operation() {
            MapOp::Replace { key, value, ttl_ms } => (key.clone(), value.clone(), *ttl_ms),
            other => return Err(unexpected(other)),
        };
        if !self.entries.contains_key(&key) {
            commit.close();
            return Ok(Response::Value(None));
        }
        let previous = self.insert(ctx, key.clone(), value.clone(), ttl_ms, commit);
        self.notify(EntryEventType::Update, &key, &value);
        Ok(Response::Value(previous))
    }

    fn replace_if_present(
        &mut self,
        ctx: &mut Ctx,
        commit: Commit<MapOp>,
    ) -> AtollResult<Response> {
        let (key, expect, value, ttl_ms) = match commit.operation() {
            MapOp::ReplaceIfPresent {
                key,
                expect,
                value,
                ttl_ms,
            } => (key.clone(), expect.clone(), value.clone(), *ttl_ms),
            other => return Err(unexpected(other)),
        };
        let event_type = match (self.get(&key), &expect) {
            (None, None) => EntryEventType::Add,
            (Some(current), Some(expect)) if current == expect => EntryEventType::Update,
            _ => {
                commit.close();
                return Ok(Response::Bool(false));
            }
        };
        self.insert(ctx, key.clone(), value.clone(), ttl_ms, commit);
        self.notify(event_type, &key, &value);
        Ok(Response::Bool(true))
    }

    fn clear(&mut self, ctx: &mut Ctx, commit: Commit<MapOp>) -> AtollResult<Response> {
        commit.close();
        let released = self.release_all(ctx);
        tracing::trace!(resource = Self::RESOURCE_TYPE, released, "map cleared");
        Ok(Response::None)
    }

    fn listen(&mut self, _ctx: &mut Ctx, commit: Commit<MapOp>) -> AtollResult<Response> {
        let (key, event) = match commit.operation() {
            MapOp::Listen { key, event } => (key.clone(), *event),
            other => return Err(unexpected(other)),
        };
        Ok(Response::Bool(self.key_listeners.listen(key, event, commit)))
    }

    fn unlisten(&mut self, _ctx: &mut Ctx, commit: Commit<MapOp>) -> AtollResult<Response> {
        let (key, event) = match commit.operation() {
            MapOp::Unlisten { key, event } => (key.clone(), *event),
            other => return Err(unexpected(other)),
        };
        Ok(Response::Bool(self.key_listeners.unlisten(&key, event, commit)))
    }

    fn register(&mut self, _ctx: &mut Ctx, commit: Commit<MapOp>) -> AtollResult<Response> {
        Ok(Response::Bool(self.listeners.register(commit)))
    }

    fn unregister(&mut self, _ctx: &mut Ctx, commit: Commit<MapOp>) -> AtollResult<Response> {
        Ok(Response::Bool(self.listeners.unregister(commit)))
    }
}

impl StateMachine for MapState {
    type Operation = MapOp;
    type Timer = MapTimer;

    const RESOURCE_TYPE: &'static str = "map";

    fn operations() -> DispatchTable<Self> {
        use GatewayMethod::{Delete, Get, Post, Put};
        DispatchTable::new()
            .query("containsKey", Self::contains_key)
            .route("/{key}/exists", &[Get])
            .query("containsValue", Self::contains_value)
            .route("/containsValue", &[Get])
            .query("get", Self::get_value)
            .route("/{key}", &[Get])
            .query("getOrDefault", Self::get_or_default)
            .query("size", Self::size)
            .query("isEmpty", Self::is_empty_query)
            .query("keySet", Self::key_set)
            .query("values", Self::values)
            .query("entrySet", Self::entry_set)
            .command("put", Self::put)
            .route("/{key}", &[Put])
            .command("putIfAbsent", Self::put_if_absent)
            .command("remove", Self::remove)
            .route("/{key}", &[Delete])
            .command("removeIfPresent", Self::remove_if_present)
            .command("replace", Self::replace)
            .command("replaceIfPresent", Self::replace_if_present)
            .command("clear", Self::clear)
            .route("/", &[Delete])
            .command("listen", Self::listen)
            .route("/events", &[Post])
            .command("unlisten", Self::unlisten)
            .route("/events", &[Delete])
            .command("register", Self::register)
            .command("unregister", Self::unregister)
    }

    fn on_timer(&mut self, _ctx: &mut Ctx, timer: MapTimer) {
        match timer {
            MapTimer::Expire { key } => {
                // The timer already fired; only the commit needs releasing.
                if let Some(mut slot) = self.entries.remove(&key) {
                    slot.timer = None;
                    if let Some(commit) = slot.commit.take() {
                        commit.close();
                    }
                    tracing::trace!(
                        resource = Self::RESOURCE_TYPE,
                        key_len = key.len(),
                        "entry expired"
                    );
                }
            }
        }
    }

    fn on_session_close(&mut self, session: SessionId) {
        let released = self.key_listeners.close_session(session);
        self.listeners.release_session(session);
        if released > 0 {
            tracing::trace!(session = session.0, released, "released key listeners");
        }
    }

    fn snapshot(&self) -> AtollResult<Vec<u8>> {
        let snapshot = MapSnapshot {
            entries: self
                .entries
                .iter()
                .map(|(key, slot)| MapSnapshotEntry {
                    key: key.clone(),
                    value: slot.value.clone(),
                    expires_at_ms: slot.expires_at.map(|t| t.ms),
                })
                .collect(),
        };
        bincode::serialize(&snapshot).map_err(|e| AtollError::snapshot(e.to_string()))
    }

    fn install(&mut self, ctx: &mut Ctx, data: &[u8]) -> AtollResult<()> {
        let snapshot: MapSnapshot =
            bincode::deserialize(data).map_err(|e| AtollError::snapshot(e.to_string()))?;
        self.release_all(ctx);
        for entry in snapshot.entries {
            let expires_at = entry.expires_at_ms.map(Tick::new);
            let timer = expires_at.map(|due| {
                ctx.schedule_at(
                    due,
                    MapTimer::Expire {
                        key: entry.key.clone(),
                    },
                )
            });
            self.entries.insert(
                entry.key,
                MapSlot {
                    commit: None,
                    value: entry.value,
                    timer,
                    expires_at,
                },
            );
        }
        Ok(())
    }

    fn destroy(&mut self, ctx: &mut Ctx) {
        self.release_all(ctx);
        self.key_listeners.clear();
        self.listeners.clear();
    }
}
