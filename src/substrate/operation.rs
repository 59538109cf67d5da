//! Operation metadata and dispatch.
//!
//! Each state machine builds a [`DispatchTable`] once, when its host is
//! created. The table maps an operation name to its kind (command or query),
//! its consistency requirement, an optional gateway route, and the handler
//! function that applies it.

use crate::core::error::{AtollError, AtollResult};
use crate::substrate::commit::Commit;
use crate::substrate::context::ResourceContext;
use crate::substrate::session::SessionId;
use bytes::Bytes;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;

/// Whether an operation mutates state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationKind {
    /// Mutates state; written to the log and holds retention.
    Command,
    /// Read-only; served at the last applied index.
    Query,
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Command => write!(f, "command"),
            Self::Query => write!(f, "query"),
        }
    }
}

/// Consistency an operation requires from the substrate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Consistency {
    /// Must be applied through the log.
    Linearizable,
    /// The substrate may pick a weaker read level.
    Tunable,
}

/// Gateway verb.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum GatewayMethod {
    Get,
    Put,
    Post,
    Delete,
}

impl GatewayMethod {
    /// Parse a verb, case-insensitively.
    pub fn parse(method: &str) -> Option<Self> {
        match method.to_ascii_uppercase().as_str() {
            "GET" => Some(Self::Get),
            "PUT" => Some(Self::Put),
            "POST" => Some(Self::Post),
            "DELETE" => Some(Self::Delete),
            _ => None,
        }
    }
}

impl fmt::Display for GatewayMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Get => "GET",
            Self::Put => "PUT",
            Self::Post => "POST",
            Self::Delete => "DELETE",
        };
        f.write_str(name)
    }
}

/// Optional gateway mapping for an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct GatewayRoute {
    /// Path template; `{param}` segments match any single segment.
    pub path: &'static str,
    pub methods: &'static [GatewayMethod],
}

impl GatewayRoute {
    /// Number of literal segments matched against `path`, or `None` on mismatch.
    fn specificity(&self, method: GatewayMethod, path: &str) -> Option<usize> {
        if !self.methods.contains(&method) {
            return None;
        }
        let template: Vec<_> = segments(self.path).collect();
        let actual: Vec<_> = segments(path).collect();
        if template.len() != actual.len() {
            return None;
        }
        let mut literals = 0;
        for (expected, got) in template.iter().zip(&actual) {
            if expected.starts_with('{') && expected.ends_with('}') {
                continue;
            }
            if expected != got {
                return None;
            }
            literals += 1;
        }
        Some(literals)
    }
}

fn segments(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|s| !s.is_empty())
}

/// An operation that can be dispatched by name.
pub trait Operation {
    /// Dispatch name, e.g. `"compareAndSet"`.
    fn name(&self) -> &'static str;
}

/// Result of applying an operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "response", content = "result", rename_all = "snake_case")]
pub enum Response {
    None,
    /// A value or its absence.
    Value(Option<Bytes>),
    Bool(bool),
    Size(usize),
    Keys(Vec<Bytes>),
    Values(Vec<Bytes>),
    Entries(Vec<(Bytes, Bytes)>),
}

impl Response {
    /// Present value bytes, if this is a `Value` response holding one.
    pub fn value(&self) -> Option<&Bytes> {
        match self {
            Self::Value(value) => value.as_ref(),
            _ => None,
        }
    }

    /// Boolean result, if this is a `Bool` response.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }
}

/// Function that applies one operation.
pub type Handler<S> = fn(
    &mut S,
    &mut ResourceContext<<S as StateMachine>::Timer>,
    Commit<<S as StateMachine>::Operation>,
) -> AtollResult<Response>;

/// Dispatch metadata for one operation name.
pub struct OperationSpec<S: StateMachine> {
    pub name: &'static str,
    pub kind: OperationKind,
    pub consistency: Consistency,
    pub route: Option<GatewayRoute>,
    pub handler: Handler<S>,
}

impl<S: StateMachine> Clone for OperationSpec<S> {
    fn clone(&self) -> Self {
        Self {
            name: self.name,
            kind: self.kind,
            consistency: self.consistency,
            route: self.route,
            handler: self.handler,
        }
    }
}

impl<S: StateMachine> fmt::Debug for OperationSpec<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OperationSpec")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("consistency", &self.consistency)
            .field("route", &self.route)
            .finish()
    }
}

/// Name -> handler table for one state machine.
pub struct DispatchTable<S: StateMachine> {
    operations: BTreeMap<&'static str, OperationSpec<S>>,
    last: Option<&'static str>,
}

impl<S: StateMachine> Default for DispatchTable<S> {
    fn default() -> Self {
        Self {
            operations: BTreeMap::new(),
            last: None,
        }
    }
}

impl<S: StateMachine> DispatchTable<S> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a linearizable command.
    pub fn command(self, name: &'static str, handler: Handler<S>) -> Self {
        self.insert(name, OperationKind::Command, Consistency::Linearizable, handler)
    }

    /// Register a query with tunable consistency.
    pub fn query(self, name: &'static str, handler: Handler<S>) -> Self {
        self.insert(name, OperationKind::Query, Consistency::Tunable, handler)
    }

    fn insert(
        mut self,
        name: &'static str,
        kind: OperationKind,
        consistency: Consistency,
        handler: Handler<S>,
    ) -> Self {
        self.operations.insert(
            name,
            OperationSpec {
                name,
                kind,
                consistency,
                route: None,
                handler,
            },
        );
        self.last = Some(name);
        self
    }

    /// Attach a gateway route to the most recently registered operation.
    pub fn route(mut self, path: &'static str, methods: &'static [GatewayMethod]) -> Self {
        if let Some(spec) = self.last.and_then(|name| self.operations.get_mut(name)) {
            spec.route = Some(GatewayRoute { path, methods });
        }
        self
    }

    /// Look up an operation by name.
    pub fn get(&self, name: &str) -> Option<&OperationSpec<S>> {
        self.operations.get(name)
    }

    /// Operation names, ascending.
    pub fn names(&self) -> Vec<&'static str> {
        self.operations.keys().copied().collect()
    }

    /// Iterate over every operation, in name order.
    pub fn iter(&self) -> impl Iterator<Item = &OperationSpec<S>> {
        self.operations.values()
    }

    /// Number of operations.
    pub fn len(&self) -> usize {
        self.operations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    /// Map a gateway verb and path to an operation.
    ///
    /// When several templates match, the one with the most literal segments wins.
    pub fn resolve(&self, method: GatewayMethod, path: &str) -> AtollResult<&OperationSpec<S>> {
        let mut best: Option<(usize, &OperationSpec<S>)> = None;
        for spec in self.operations.values() {
            let Some(score) = spec.route.and_then(|r| r.specificity(method, path)) else {
                continue;
            };
            if best.map_or(true, |(top, _)| score > top) {
                best = Some((score, spec));
            }
        }
        best.map(|(_, spec)| spec).ok_or_else(|| AtollError::NoRoute {
            method: method.to_string(),
            path: path.to_string(),
        })
    }
}

/// A deterministic resource state machine.
///
/// Implementations own all of their state; there is no global state. A host
/// constructs one with `Default`, applies operations through the dispatch
/// table, and forwards timer firings and session teardown.
pub trait StateMachine: Default + Sized + 'static {
    /// Operation enum carried by commits.
    type Operation: Operation;
    /// Timer payload delivered back to [`StateMachine::on_timer`].
    type Timer: Clone + fmt::Debug;

    /// Resource type name used in logs.
    const RESOURCE_TYPE: &'static str;

    /// Build the dispatch table.
    fn operations() -> DispatchTable<Self>;

    /// A scheduled timer fired.
    fn on_timer(&mut self, ctx: &mut ResourceContext<Self::Timer>, timer: Self::Timer);

    /// A session closed or expired. Release everything keyed by it.
    fn on_session_close(&mut self, _session: SessionId) {}

    /// Serialize the full current state.
    fn snapshot(&self) -> AtollResult<Vec<u8>>;

    /// Replace the current state with a snapshot.
    fn install(&mut self, ctx: &mut ResourceContext<Self::Timer>, data: &[u8]) -> AtollResult<()>;

    /// Release every held commit, timer and registration.
    fn destroy(&mut self, ctx: &mut ResourceContext<Self::Timer>);
}
