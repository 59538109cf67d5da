//! Resource state machines.
//!
//! - [`value`] - Single register with compare-and-set and TTL
//! - [`counter`] - Atomic 64-bit counter
//! - [`map`] - Keyed registers with per-key TTL and subscriptions
//! - [`register`] - Slot shared by value and counter
//! - [`listeners`] - Key-filtered listener registrations

pub mod counter;
pub mod listeners;
pub mod map;
pub mod register;
pub mod value;

pub use counter::{CounterOp, CounterState};
pub use map::{MapOp, MapState};
pub use value::{ValueOp, ValueState};

use crate::core::error::AtollError;
use crate::substrate::operation::Operation;

/// A handler received an operation it is not registered for.
pub(crate) fn unexpected<O: Operation>(operation: &O) -> AtollError {
    AtollError::UnknownOperation {
        name: operation.name().to_string(),
    }
}
