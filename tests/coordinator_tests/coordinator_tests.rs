//! Tests for WriteCoordinator
//!
//! These tests verify:
//! - Writes on the leader commit and reach the state machine
//! - Writes on a follower fail with the leader's identity and submit nothing
//! - Commit waits honor the deadline and cancellation
//! - Collaborator failures are surfaced, not retried
//! - Batch limits

#[path = "../common/mod.rs"]
mod common;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crossbeam::channel;
use raftkv::command::{Command, Op};
use raftkv::consensus::{Consensus, ServerInfo};
use raftkv::coordinator::{WriteCoordinator, MAX_BATCH_KEYS};
use raftkv::error::StoreError;
use raftkv::router::LeaderGuard;
use raftkv::KvStateMachine;

use common::{Call, FakeConsensus};

// =============================================================================
// Helper Functions
// =============================================================================

fn coordinator(fake: &FakeConsensus, timeout: Duration) -> WriteCoordinator {
    let consensus: Arc<dyn Consensus> = Arc::new(fake.clone());
    WriteCoordinator::new(Arc::clone(&consensus), LeaderGuard::new(consensus), timeout)
}

fn leader_with_machine() -> (FakeConsensus, Arc<KvStateMachine>) {
    let machine = Arc::new(KvStateMachine::new());
    let fake = FakeConsensus::leader("A", "10.0.0.1:7000").with_machine(Arc::clone(&machine));
    (fake, machine)
}

// =============================================================================
// Leader Path Tests
// =============================================================================

#[test]
fn test_set_on_leader_is_readable() {
    let (fake, machine) = leader_with_machine();
    let writes = coordinator(&fake, Duration::from_secs(1));

    let index = writes.set("foo", "bar").unwrap();

    assert_eq!(index, 1);
    assert_eq!(machine.get("foo"), Some("bar".to_string()));
}

#[test]
fn test_set_submits_encoded_command() {
    let (fake, _machine) = leader_with_machine();
    let writes = coordinator(&fake, Duration::from_secs(1));

    writes.set("foo", "bar").unwrap();

    match &fake.calls()[..] {
        [Call::Submit(data)] => {
            let command = Command::decode(data).unwrap();
            assert_eq!(command, Command::set("foo", "bar"));
        }
        calls => panic!("unexpected calls: {:?}", calls),
    }
}

#[test]
fn test_delete_absent_key_succeeds() {
    let (fake, machine) = leader_with_machine();
    let writes = coordinator(&fake, Duration::from_secs(1));

    writes.delete("never-set").unwrap();

    assert_eq!(machine.get("never-set"), None);
    let calls = fake.calls();
    let Call::Submit(data) = &calls[0] else {
        panic!("expected a submit");
    };
    assert_eq!(Command::decode(data).unwrap().op, Op::Delete);
}

#[test]
fn test_set_then_delete() {
    let (fake, machine) = leader_with_machine();
    let writes = coordinator(&fake, Duration::from_secs(1));

    writes.set("foo", "bar").unwrap();
    writes.delete("foo").unwrap();

    assert_eq!(machine.get("foo"), None);
    assert_eq!(machine.last_applied(), 2);
}

// =============================================================================
// Not Leader Tests
// =============================================================================

#[test]
fn test_set_on_follower_names_leader_and_submits_nothing() {
    let leader = ServerInfo::new("A", "10.0.0.1:7000");
    let fake = FakeConsensus::follower(Some(leader.clone()));
    let writes = coordinator(&fake, Duration::from_secs(1));

    let result = writes.set("foo", "bar");

    match result {
        Err(StoreError::NotLeader { leader: Some(l) }) => assert_eq!(l, leader),
        other => panic!("expected NotLeader, got {:?}", other),
    }
    assert_eq!(fake.submits(), 0);
}

#[test]
fn test_delete_without_known_leader() {
    let fake = FakeConsensus::follower(None);
    let writes = coordinator(&fake, Duration::from_secs(1));

    let result = writes.delete("foo");

    assert!(matches!(result, Err(StoreError::NotLeader { leader: None })));
    assert_eq!(fake.submits(), 0);
}

// =============================================================================
// Commit Wait Tests
// =============================================================================

#[test]
fn test_stalled_commit_times_out() {
    let fake = FakeConsensus::leader("A", "10.0.0.1:7000");
    fake.stall();
    let writes = coordinator(&fake, Duration::from_millis(50));

    let start = Instant::now();
    let result = writes.set("foo", "bar");

    assert!(matches!(result, Err(StoreError::ApplyTimeout(_))));
    assert!(start.elapsed() >= Duration::from_millis(50));
    assert!(result.unwrap_err().is_retryable());
}

#[test]
fn test_cancel_abandons_wait() {
    let fake = FakeConsensus::leader("A", "10.0.0.1:7000");
    fake.stall();
    let writes = coordinator(&fake, Duration::from_secs(30));

    let (cancel_tx, cancel_rx) = channel::bounded(1);
    let canceller = thread::spawn(move || {
        thread::sleep(Duration::from_millis(20));
        cancel_tx.send(()).unwrap();
    });

    let start = Instant::now();
    let result = writes.set_cancellable("foo", "bar", &cancel_rx);
    canceller.join().unwrap();

    assert!(matches!(result, Err(StoreError::Cancelled)));
    assert!(start.elapsed() < Duration::from_secs(5));
}

#[test]
fn test_dropped_cancel_sender_cancels() {
    let fake = FakeConsensus::leader("A", "10.0.0.1:7000");
    fake.stall();
    let writes = coordinator(&fake, Duration::from_secs(30));

    let (cancel_tx, cancel_rx) = channel::bounded::<()>(1);
    drop(cancel_tx);

    let result = writes.delete_cancellable("foo", &cancel_rx);
    assert!(matches!(result, Err(StoreError::Cancelled)));
}

#[test]
fn test_consensus_rejection_is_apply_failed() {
    let fake = FakeConsensus::leader("A", "10.0.0.1:7000");
    fake.fail_submit("log full");
    let writes = coordinator(&fake, Duration::from_secs(1));

    let result = writes.set("foo", "bar");

    match result {
        Err(StoreError::ApplyFailed(reason)) => assert_eq!(reason, "log full"),
        other => panic!("expected ApplyFailed, got {:?}", other),
    }
    // Not retried internally
    assert_eq!(fake.submits(), 1);
}

#[test]
fn test_apply_timeout_accessor() {
    let fake = FakeConsensus::leader("A", "10.0.0.1:7000");
    let writes = coordinator(&fake, Duration::from_millis(1234));
    assert_eq!(writes.apply_timeout(), Duration::from_millis(1234));
}

// =============================================================================
// Batch Tests
// =============================================================================

#[test]
fn test_set_many_applies_every_pair() {
    let (fake, machine) = leader_with_machine();
    let writes = coordinator(&fake, Duration::from_secs(1));

    let pairs: BTreeMap<String, String> = (0..10)
        .map(|i| (format!("k{}", i), format!("v{}", i)))
        .collect();
    let last = writes.set_many(&pairs).unwrap();

    assert_eq!(last, 10);
    assert_eq!(machine.len(), 10);
    assert_eq!(machine.get("k7"), Some("v7".to_string()));
}

#[test]
fn test_set_many_at_limit_is_accepted() {
    let (fake, machine) = leader_with_machine();
    let writes = coordinator(&fake, Duration::from_secs(1));

    let pairs: BTreeMap<String, String> = (0..MAX_BATCH_KEYS)
        .map(|i| (format!("k{}", i), "v".to_string()))
        .collect();
    writes.set_many(&pairs).unwrap();

    assert_eq!(machine.len(), MAX_BATCH_KEYS);
}

#[test]
fn test_set_many_over_limit_submits_nothing() {
    let (fake, machine) = leader_with_machine();
    let writes = coordinator(&fake, Duration::from_secs(1));

    let pairs: BTreeMap<String, String> = (0..=MAX_BATCH_KEYS)
        .map(|i| (format!("k{}", i), "v".to_string()))
        .collect();
    let result = writes.set_many(&pairs);

    assert!(matches!(
        result,
        Err(StoreError::BatchTooLarge { count, max }) if count == MAX_BATCH_KEYS + 1 && max == MAX_BATCH_KEYS
    ));
    assert_eq!(fake.submits(), 0);
    assert!(machine.is_empty());
}
