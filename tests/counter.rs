//! Counter resource tests.

mod common;

use atoll::core::error::AtollError;
use atoll::resources::counter::{decode, encode};
use atoll::resources::{CounterOp, CounterState};
use atoll::substrate::events::ResourceEvent;
use atoll::substrate::host::{ResourceHost, Snapshot};
use atoll::substrate::operation::Response;
use bytes::Bytes;
use common::{bytes, drain, Harness};

fn counter() -> Harness<CounterState> {
    let mut harness = Harness::new();
    harness.open(1);
    harness
}

fn value_of(response: Response) -> Bytes {
    response.value().cloned().expect("value response")
}

fn set(harness: &mut Harness<CounterState>, value: i64) {
    harness
        .command(
            1,
            CounterOp::Set {
                value: encode(value),
                ttl_ms: 0,
            },
        )
        .unwrap();
}

// ============================================================================
// Arithmetic tests
// ============================================================================

#[test]
fn uninitialized_counter_counts_from_zero() {
    let mut harness = counter();
    let up = value_of(harness.command(1, CounterOp::IncrementAndGet).unwrap());
    assert_eq!(decode(&up).unwrap(), 1);

    let mut harness = counter();
    let down = value_of(harness.command(1, CounterOp::DecrementAndGet).unwrap());
    assert_eq!(decode(&down).unwrap(), -1);
}

#[test]
fn get_and_increment_on_uninitialized_returns_empty_marker() {
    let mut harness = counter();
    let previous = value_of(harness.command(1, CounterOp::GetAndIncrement).unwrap());
    assert!(previous.is_empty());
    assert_eq!(harness.host.state().current().unwrap(), Some(1));

    let previous = value_of(harness.command(1, CounterOp::GetAndDecrement).unwrap());
    assert_eq!(decode(&previous).unwrap(), 1);
    assert_eq!(harness.host.state().current().unwrap(), Some(0));
}

#[test]
fn add_to_uninitialized_stores_delta_bytes() {
    let mut harness = counter();
    let delta = encode(5);
    let stored = value_of(
        harness
            .command(
                1,
                CounterOp::AddAndGet {
                    delta: delta.clone(),
                },
            )
            .unwrap(),
    );
    assert_eq!(stored, delta);
    assert_eq!(harness.host.state().value(), Some(&delta));
}

#[test]
fn add_to_existing_value() {
    let mut harness = counter();
    set(&mut harness, 40);

    let next = value_of(harness.command(1, CounterOp::AddAndGet { delta: encode(2) }).unwrap());
    assert_eq!(decode(&next).unwrap(), 42);

    let previous = value_of(
        harness
            .command(1, CounterOp::GetAndAdd { delta: encode(-50) })
            .unwrap(),
    );
    assert_eq!(decode(&previous).unwrap(), 42);
    assert_eq!(harness.host.state().current().unwrap(), Some(-8));
}

#[test]
fn arithmetic_wraps() {
    let mut harness = counter();
    set(&mut harness, i64::MAX);
    let next = value_of(harness.command(1, CounterOp::IncrementAndGet).unwrap());
    assert_eq!(decode(&next).unwrap(), i64::MIN);
}

#[test]
fn arithmetic_releases_every_commit() {
    let mut harness = counter();
    set(&mut harness, 3);
    assert_eq!(harness.retention().outstanding, 1);

    harness.command(1, CounterOp::IncrementAndGet).unwrap();
    harness.command(1, CounterOp::GetAndAdd { delta: encode(3) }).unwrap();
    assert_eq!(harness.retention().outstanding, 0);
    assert_eq!(harness.host.state().current().unwrap(), Some(7));
}

// ============================================================================
// Validation tests
// ============================================================================

#[test]
fn invalid_lengths_are_rejected() {
    let mut harness = counter();

    let err = harness
        .command(1, CounterOp::AddAndGet { delta: bytes("abc") })
        .unwrap_err();
    assert!(matches!(err, AtollError::InvalidCounterValue { len: 3 }));

    let err = harness
        .command(
            1,
            CounterOp::CompareAndSet {
                expect: None,
                update: Bytes::new(),
                ttl_ms: 0,
            },
        )
        .unwrap_err();
    assert!(matches!(err, AtollError::InvalidCounterValue { len: 0 }));

    assert_eq!(harness.host.state().value(), None);
    assert_eq!(harness.retention().outstanding, 0);
}

#[test]
fn compare_and_set_on_counter() {
    let mut harness = counter();
    let swap = |expect: Option<i64>, update: i64| CounterOp::CompareAndSet {
        expect: expect.map(encode),
        update: encode(update),
        ttl_ms: 0,
    };
    assert_eq!(harness.command(1, swap(Some(0), 1)).unwrap(), Response::Bool(false));
    assert_eq!(harness.command(1, swap(None, 1)).unwrap(), Response::Bool(true));
    assert_eq!(harness.command(1, swap(Some(1), 9)).unwrap(), Response::Bool(true));
    assert_eq!(harness.host.state().current().unwrap(), Some(9));
}

#[test]
fn ttl_is_ignored() {
    let mut harness = counter();
    harness
        .command(
            1,
            CounterOp::Set {
                value: encode(4),
                ttl_ms: 10,
            },
        )
        .unwrap();
    harness.advance_to(1_000);
    assert_eq!(harness.host.state().current().unwrap(), Some(4));
    assert_eq!(harness.host.context().pending_timers(), 0);
}

// ============================================================================
// Event tests
// ============================================================================

#[test]
fn increments_publish_changes_with_empty_old_marker() {
    let mut harness = Harness::<CounterState>::new();
    let session = harness.open(1);
    harness.command(1, CounterOp::Register).unwrap();

    harness.command(1, CounterOp::IncrementAndGet).unwrap();
    harness.command(1, CounterOp::IncrementAndGet).unwrap();

    assert_eq!(
        drain(&session),
        vec![
            (
                "event".to_string(),
                ResourceEvent::Change {
                    old: Bytes::new(),
                    new: encode(1),
                }
            ),
            (
                "event".to_string(),
                ResourceEvent::Change {
                    old: encode(1),
                    new: encode(2),
                }
            ),
        ]
    );
}

// ============================================================================
// Snapshot tests
// ============================================================================

#[test]
fn snapshot_is_raw_counter_bytes() {
    let mut harness = counter();
    set(&mut harness, 12);
    let snapshot = harness.host.take_snapshot().unwrap();
    assert_eq!(snapshot.data, encode(12).to_vec());

    let mut replica = ResourceHost::<CounterState>::new(0);
    replica.install(&snapshot).unwrap();
    assert_eq!(replica.state().current().unwrap(), Some(12));
    assert_eq!(replica.retention().lock().stats().outstanding, 0);
}

#[test]
fn empty_snapshot_means_uninitialized() {
    let mut harness = counter();
    let snapshot = harness.host.take_snapshot().unwrap();
    assert!(snapshot.data.is_empty());

    let mut replica = ResourceHost::<CounterState>::new(0);
    replica.install(&snapshot).unwrap();
    assert_eq!(replica.state().value(), None);
}

#[test]
fn corrupt_snapshot_is_rejected() {
    let mut replica = ResourceHost::<CounterState>::new(0);
    let snapshot = Snapshot {
        index: 3,
        tick_ms: 0,
        data: vec![1, 2, 3],
    };
    assert!(matches!(
        replica.install(&snapshot),
        Err(AtollError::Snapshot { .. })
    ));
}
