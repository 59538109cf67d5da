//! Replicated resource substrate.
//!
//! - [`commit`] - Commits and log retention
//! - [`session`] - Client sessions and ordered event delivery
//! - [`scheduler`] - Deterministic timer queue
//! - [`context`] - Per-resource execution lane state
//! - [`operation`] - Operation metadata, dispatch table, `StateMachine` trait
//! - [`events`] - Event payloads and the general notification channel
//! - [`host`] - Single-lane host applying log entries in order

pub mod commit;
pub mod context;
pub mod events;
pub mod host;
pub mod operation;
pub mod scheduler;
pub mod session;

pub use commit::{Commit, CompactionMode, RetentionState, RetentionTracker, SharedRetention};
pub use context::ResourceContext;
pub use events::{EntryEventType, EventListeners, ResourceEvent};
pub use host::{LogEntry, ResourceHost, Snapshot};
pub use operation::{DispatchTable, Operation, OperationKind, Response, StateMachine};
pub use scheduler::TimerHandle;
pub use session::{Session, SessionId};
