//! Value resource tests.

mod common;

use atoll::core::time::Tick;
use atoll::resources::{ValueOp, ValueState};
use atoll::substrate::commit::{CompactionMode, RetentionState};
use atoll::substrate::events::ResourceEvent;
use atoll::substrate::host::ResourceHost;
use atoll::substrate::operation::Response;
use common::{bytes, drain, Harness};

fn set(value: &str, ttl_ms: u64) -> ValueOp {
    ValueOp::Set {
        value: bytes(value),
        ttl_ms,
    }
}

fn cas(expect: Option<&str>, update: &str) -> ValueOp {
    ValueOp::CompareAndSet {
        expect: expect.map(bytes),
        update: bytes(update),
        ttl_ms: 0,
    }
}

fn get(harness: &mut Harness<ValueState>) -> Option<bytes::Bytes> {
    harness.query(1, ValueOp::Get).unwrap().value().cloned()
}

// ============================================================================
// Register tests
// ============================================================================

#[test]
fn set_then_get() {
    let mut harness = Harness::<ValueState>::new();
    harness.open(1);
    assert_eq!(get(&mut harness), None);

    assert_eq!(harness.command(1, set("a", 0)).unwrap(), Response::None);
    assert_eq!(get(&mut harness), Some(bytes("a")));
}

#[test]
fn get_and_set_returns_previous() {
    let mut harness = Harness::<ValueState>::new();
    harness.open(1);
    let op = |v: &str| ValueOp::GetAndSet {
        value: bytes(v),
        ttl_ms: 0,
    };
    assert_eq!(harness.command(1, op("a")).unwrap(), Response::Value(None));
    assert_eq!(
        harness.command(1, op("b")).unwrap(),
        Response::Value(Some(bytes("a")))
    );
    assert_eq!(get(&mut harness), Some(bytes("b")));
}

#[test]
fn compare_and_set_absence_matches_absence() {
    let mut harness = Harness::<ValueState>::new();
    harness.open(1);

    // Empty bytes are a value, not absence.
    assert_eq!(harness.command(1, cas(Some(""), "x")).unwrap(), Response::Bool(false));
    assert_eq!(get(&mut harness), None);

    assert_eq!(harness.command(1, cas(None, "x")).unwrap(), Response::Bool(true));
    assert_eq!(get(&mut harness), Some(bytes("x")));

    assert_eq!(harness.command(1, cas(None, "y")).unwrap(), Response::Bool(false));
    assert_eq!(harness.command(1, cas(Some("z"), "y")).unwrap(), Response::Bool(false));
    assert_eq!(get(&mut harness), Some(bytes("x")));

    assert_eq!(harness.command(1, cas(Some("x"), "y")).unwrap(), Response::Bool(true));
    assert_eq!(get(&mut harness), Some(bytes("y")));
}

#[test]
fn failed_compare_and_set_releases_its_commit() {
    let mut harness = Harness::<ValueState>::new();
    harness.open(1);
    harness.command(1, set("a", 100)).unwrap();
    let holder = harness.index();

    harness.command(1, cas(Some("b"), "c")).unwrap();
    assert_eq!(
        harness.host.retention().lock().state(harness.index()),
        Some(RetentionState::Closed)
    );
    assert_eq!(harness.host.retention().lock().outstanding_indexes(), vec![holder]);
    // The TTL of the current value is untouched.
    assert_eq!(harness.host.state().expires_at(), Some(Tick::new(100)));
}

// ============================================================================
// TTL tests
// ============================================================================

#[test]
fn ttl_boundary_is_inclusive() {
    let mut harness = Harness::<ValueState>::new();
    harness.open(1);
    harness.command(1, set("a", 100)).unwrap();

    harness.advance_to(99);
    assert_eq!(get(&mut harness), Some(bytes("a")));

    harness.advance_to(100);
    assert_eq!(get(&mut harness), None);
    assert_eq!(harness.retention().outstanding, 0);
}

#[test]
fn overwrite_cancels_previous_ttl() {
    let mut harness = Harness::<ValueState>::new();
    harness.open(1);
    harness.command(1, set("a", 50)).unwrap();
    harness.advance_to(10);
    harness.command(1, set("b", 0)).unwrap();
    assert_eq!(harness.host.context().pending_timers(), 0);

    harness.advance_to(200);
    assert_eq!(get(&mut harness), Some(bytes("b")));
    assert_eq!(harness.host.stats().timers_fired, 0);
}

#[test]
fn ttl_expiry_is_silent() {
    let mut harness = Harness::<ValueState>::new();
    let session = harness.open(1);
    harness.command(1, ValueOp::Register).unwrap();
    harness.command(1, set("a", 10)).unwrap();
    assert_eq!(drain(&session).len(), 1);

    harness.advance_to(10);
    assert_eq!(get(&mut harness), None);
    assert!(drain(&session).is_empty());
}

// ============================================================================
// Event tests
// ============================================================================

#[test]
fn writes_publish_change_events() {
    let mut harness = Harness::<ValueState>::new();
    let session = harness.open(1);
    harness.command(1, ValueOp::Register).unwrap();

    harness.command(1, set("a", 0)).unwrap();
    harness.command(1, cas(Some("a"), "b")).unwrap();
    harness.command(1, cas(Some("nope"), "c")).unwrap();

    let events = drain(&session);
    assert_eq!(
        events,
        vec![
            (
                "event".to_string(),
                ResourceEvent::Change {
                    old: bytes(""),
                    new: bytes("a"),
                }
            ),
            (
                "event".to_string(),
                ResourceEvent::Change {
                    old: bytes("a"),
                    new: bytes("b"),
                }
            ),
        ]
    );
}

#[test]
fn register_is_idempotent_and_unregister_tombstones() {
    let mut harness = Harness::<ValueState>::new();
    let session = harness.open(1);

    assert_eq!(harness.command(1, ValueOp::Register).unwrap(), Response::Bool(true));
    let original = harness.index();
    assert_eq!(harness.command(1, ValueOp::Register).unwrap(), Response::Bool(false));
    let duplicate = harness.index();
    assert_eq!(harness.host.state().listeners().len(), 1);
    {
        let tracker = harness.host.retention().lock();
        assert_eq!(tracker.state(original), Some(RetentionState::Open));
        assert_eq!(
            tracker.state(duplicate),
            Some(RetentionState::Compacted(CompactionMode::Quorum))
        );
    }

    assert_eq!(harness.command(1, ValueOp::Unregister).unwrap(), Response::Bool(true));
    let unregister = harness.index();
    {
        let tracker = harness.host.retention().lock();
        assert_eq!(
            tracker.state(original),
            Some(RetentionState::Compacted(CompactionMode::Quorum))
        );
        assert_eq!(
            tracker.state(unregister),
            Some(RetentionState::Compacted(CompactionMode::Tombstone))
        );
    }

    harness.command(1, set("a", 0)).unwrap();
    assert!(drain(&session).is_empty());
    assert_eq!(harness.command(1, ValueOp::Unregister).unwrap(), Response::Bool(false));
}

#[test]
fn closed_session_stops_receiving() {
    let mut harness = Harness::<ValueState>::new();
    let watcher = harness.open(1);
    harness.open(2);
    harness.command(1, ValueOp::Register).unwrap();
    harness.close(1).unwrap();

    harness.command(2, set("a", 0)).unwrap();
    assert!(watcher.poll_events().is_empty());
    assert!(harness.host.state().listeners().is_empty());
}

// ============================================================================
// Snapshot tests
// ============================================================================

#[test]
fn snapshot_restores_value_and_ttl() {
    let mut harness = Harness::<ValueState>::new();
    harness.open(1);
    harness.advance_to(40);
    harness.command(1, set("a", 100)).unwrap();
    let snapshot = harness.host.take_snapshot().unwrap();
    assert_eq!(harness.host.compactable_through(), None);

    let mut replica = ResourceHost::<ValueState>::new(0);
    replica.install(&snapshot).unwrap();
    assert_eq!(replica.state().value(), Some(&bytes("a")));
    assert_eq!(replica.state().expires_at(), Some(Tick::new(140)));
    assert_eq!(replica.last_applied(), snapshot.index);

    replica.tick(snapshot.index + 1, Tick::new(139)).unwrap();
    assert_eq!(replica.state().value(), Some(&bytes("a")));
    replica.tick(snapshot.index + 2, Tick::new(140)).unwrap();
    assert_eq!(replica.state().value(), None);
}

#[test]
fn snapshot_of_empty_register() {
    let mut harness = Harness::<ValueState>::new();
    harness.open(1);
    let snapshot = harness.host.take_snapshot().unwrap();

    let mut replica = ResourceHost::<ValueState>::new(0);
    replica.install(&snapshot).unwrap();
    assert_eq!(replica.state().value(), None);
    assert_eq!(replica.context().pending_timers(), 0);
}

#[test]
fn destroy_releases_value_and_listeners() {
    let mut harness = Harness::<ValueState>::new();
    harness.open(1);
    harness.command(1, ValueOp::Register).unwrap();
    harness.command(1, set("a", 100)).unwrap();
    assert_eq!(harness.retention().outstanding, 2);

    harness.host.destroy();
    assert_eq!(harness.retention().outstanding, 0);
    assert_eq!(harness.host.state().value(), None);
    assert!(harness.host.is_destroyed());
}
