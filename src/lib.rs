//! Atoll - deterministic state machines for replicated resources.
//!
//! Atoll is the apply-and-respond layer underneath a small family of
//! replicated data resources: a single-value register, an atomic counter,
//! and a key/value map. A consensus layer delivers operations in an agreed
//! order; atoll applies them on a single lane per resource so that every
//! replica reaches the same state, fires the same timers, and publishes the
//! same events.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                Replication layer (external)                     │
//! │        ordered log entries │ log index │ agreed ticks           │
//! └─────────────────────────────────────────────────────────────────┘
//!                                  │
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                       Resource Host                             │
//! │   ordering │ timers │ session expiry │ dispatch │ snapshots     │
//! └─────────────────────────────────────────────────────────────────┘
//!                                  │
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                     Resource State Machines                     │
//! │          Value │ Counter │ Map (TTL, key listeners)             │
//! └─────────────────────────────────────────────────────────────────┘
//!                                  │
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                         Substrate                               │
//! │       Commits │ Retention │ Sessions │ Events │ Context         │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Module Organization
//!
//! ## Core
//! - [`core::config`] - Configuration parsing and validation
//! - [`core::time`] - Deterministic logical time
//! - [`core::error`] - Error types
//! - [`core::codec`] - Byte-string codec boundary
//!
//! ## Substrate
//! - [`substrate::commit`] - Commits and log retention
//! - [`substrate::session`] - Sessions and ordered event delivery
//! - [`substrate::scheduler`] - Deterministic timer queue
//! - [`substrate::context`] - Per-resource execution lane
//! - [`substrate::operation`] - Dispatch table and `StateMachine` trait
//! - [`substrate::events`] - Event payloads and the general channel
//! - [`substrate::host`] - Single-lane resource host
//!
//! ## Resources
//! - [`resources::value`] - Register with compare-and-set and TTL
//! - [`resources::counter`] - Atomic 64-bit counter
//! - [`resources::map`] - Keyed registers with per-key subscriptions
//!
//! ## CLI
//! - [`cli::commands`] - CLI command implementations
//!
//! # Key Invariants
//!
//! - Every command commit is released exactly once, on every exit path
//! - Log entries apply in strictly increasing index order
//! - Timers fire at their due tick, before any entry at or after it
//! - Event fan-out iterates sessions in ascending id order

// Core infrastructure
pub mod core;

// Commit, session and scheduling substrate
pub mod substrate;

// Resource state machines
pub mod resources;

// CLI
pub mod cli;

// Re-exports for convenience
pub use self::core::{codec, config, error, time};
pub use resources::{counter, listeners, map, register, value};
pub use substrate::{commit, context, events, host, operation, scheduler, session};
