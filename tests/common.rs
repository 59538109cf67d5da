//! Common test utilities.
//!
//! This module contains shared helpers for integration tests.
//! Import with `mod common;` in test files.

#![allow(dead_code)]

use atoll::core::error::AtollResult;
use atoll::core::time::Tick;
use atoll::substrate::commit::RetentionStats;
use atoll::substrate::events::ResourceEvent;
use atoll::substrate::host::ResourceHost;
use atoll::substrate::operation::{Response, StateMachine};
use atoll::substrate::session::{Session, SessionId};
use bytes::Bytes;
use std::io::Write;
use tempfile::NamedTempFile;

/// Write a configuration document to a temp file.
pub fn create_config(content: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().expect("Failed to create temp file");
    file.write_all(content.as_bytes())
        .expect("Failed to write config");
    file
}

/// Bytes from a string literal.
pub fn bytes(s: &str) -> Bytes {
    Bytes::copy_from_slice(s.as_bytes())
}

/// Take and acknowledge every pending event on a session.
pub fn drain(session: &Session) -> Vec<(String, ResourceEvent)> {
    let events = session.poll_events();
    if let Some(last) = events.last() {
        session.acknowledge(last.sequence);
    }
    events.into_iter().map(|e| (e.name, e.payload)).collect()
}

/// Drives a resource host with automatically assigned log indexes.
pub struct Harness<S: StateMachine> {
    pub host: ResourceHost<S>,
    index: u64,
    tick_ms: u64,
}

impl<S: StateMachine> Harness<S> {
    /// Host without session expiry.
    pub fn new() -> Self {
        Self::with_timeout(0)
    }

    /// Host with a session keep-alive timeout.
    pub fn with_timeout(timeout_ms: u64) -> Self {
        Self {
            host: ResourceHost::new(timeout_ms),
            index: 0,
            tick_ms: 0,
        }
    }

    fn next_index(&mut self) -> u64 {
        self.index += 1;
        self.index
    }

    /// Last index handed out.
    pub fn index(&self) -> u64 {
        self.index
    }

    /// Current tick used for new entries.
    pub fn tick_ms(&self) -> u64 {
        self.tick_ms
    }

    /// Open a session.
    pub fn open(&mut self, id: u64) -> Session {
        let index = self.next_index();
        self.host
            .open_session(index, Tick::new(self.tick_ms), SessionId(id))
            .expect("open session")
    }

    /// Close a session.
    pub fn close(&mut self, id: u64) -> AtollResult<()> {
        let index = self.next_index();
        self.host
            .close_session(index, Tick::new(self.tick_ms), SessionId(id))
    }

    /// Send a keep-alive.
    pub fn keep_alive(&mut self, id: u64) -> AtollResult<()> {
        let index = self.next_index();
        self.host
            .keep_alive(index, Tick::new(self.tick_ms), SessionId(id))
    }

    /// Apply a command at the next index.
    pub fn command(&mut self, id: u64, operation: S::Operation) -> AtollResult<Response> {
        let index = self.next_index();
        self.host
            .command(index, Tick::new(self.tick_ms), SessionId(id), operation)
    }

    /// Serve a query.
    pub fn query(&mut self, id: u64, operation: S::Operation) -> AtollResult<Response> {
        self.host.query(SessionId(id), operation)
    }

    /// Apply a tick entry at `ms`.
    pub fn advance_to(&mut self, ms: u64) {
        self.tick_ms = ms;
        let index = self.next_index();
        self.host.tick(index, Tick::new(ms)).expect("tick");
    }

    /// Apply a tick entry `delta_ms` after the current tick.
    pub fn advance(&mut self, delta_ms: u64) {
        self.advance_to(self.tick_ms + delta_ms);
    }

    /// Retention bookkeeping.
    pub fn retention(&self) -> RetentionStats {
        self.host.retention().lock().stats()
    }
}
