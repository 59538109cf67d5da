//! Core infrastructure.
//!
//! - [`config`] - Configuration parsing and validation
//! - [`time`] - Deterministic logical time
//! - [`error`] - Error types
//! - [`codec`] - Byte-string codec boundary

pub mod codec;
pub mod config;
pub mod error;
pub mod time;
