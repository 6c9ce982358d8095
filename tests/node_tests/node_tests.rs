//! Tests for Node
//!
//! These tests verify:
//! - Request dispatch to the right component
//! - Redirects for writes and membership changes on followers
//! - Read policy handling
//! - Diagnostics (state, keys, stats, ping)
//! - Cancellation of pending writes

#[path = "../common/mod.rs"]
mod common;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use bytes::Bytes;
use crossbeam::channel;
use raftkv::consensus::{Consensus, LogEntry, LoopbackCluster, ServerInfo};
use raftkv::error::StoreError;
use raftkv::fsm::StateMachine;
use raftkv::protocol::Request;
use raftkv::{Config, KvStateMachine, Node, ReadPolicy, Reply};

use common::{eventually, FakeConsensus};

const WAIT: Duration = Duration::from_secs(2);

// =============================================================================
// Helper Functions
// =============================================================================

fn config(id: &str, policy: ReadPolicy) -> Config {
    Config::builder()
        .node_id(id)
        .apply_timeout(Duration::from_secs(1))
        .read_policy(policy)
        .build()
}

fn leader_node() -> (FakeConsensus, Node) {
    let machine = Arc::new(KvStateMachine::new());
    let fake = FakeConsensus::leader("A", "a:1").with_machine(Arc::clone(&machine));
    let node = Node::new(config("A", ReadPolicy::Stale), Arc::new(fake.clone()), machine);
    (fake, node)
}

fn follower_node(policy: ReadPolicy) -> (FakeConsensus, Node) {
    let machine = Arc::new(KvStateMachine::new());
    let fake = FakeConsensus::follower(Some(ServerInfo::new("A", "a:1")));
    let node = Node::new(config("B", policy), Arc::new(fake.clone()), machine);
    (fake, node)
}

fn set(key: &str, value: &str) -> Request {
    Request::Set {
        key: key.into(),
        value: value.into(),
    }
}

fn get(key: &str) -> Request {
    Request::Get { key: key.into() }
}

// =============================================================================
// Leader Dispatch Tests
// =============================================================================

#[test]
fn test_leader_set_get_delete() {
    let (_fake, node) = leader_node();

    assert_eq!(node.execute(get("foo")).unwrap(), Reply::Value(None));
    assert_eq!(node.execute(set("foo", "bar")).unwrap(), Reply::Done);
    assert_eq!(
        node.execute(get("foo")).unwrap(),
        Reply::Value(Some("bar".to_string()))
    );
    assert_eq!(
        node.execute(Request::Delete { key: "foo".into() }).unwrap(),
        Reply::Done
    );
    assert_eq!(node.execute(get("foo")).unwrap(), Reply::Value(None));
}

#[test]
fn test_leader_set_many_and_keys() {
    let (_fake, node) = leader_node();

    let pairs: BTreeMap<String, String> = [("b", "2"), ("a", "1"), ("c", "3")]
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    assert_eq!(node.execute(Request::SetMany { pairs }).unwrap(), Reply::Done);

    assert_eq!(
        node.execute(Request::Keys).unwrap(),
        Reply::Keys(vec!["a".into(), "b".into(), "c".into()])
    );
}

#[test]
fn test_leader_join_and_servers() {
    let (_fake, node) = leader_node();

    node.execute(Request::Join {
        node_id: "B".into(),
        address: "b:1".into(),
    })
    .unwrap();

    assert_eq!(
        node.execute(Request::Servers).unwrap(),
        Reply::Servers(vec![ServerInfo::new("A", "a:1"), ServerInfo::new("B", "b:1")])
    );

    node.execute(Request::Detach {
        node_id: "B".into(),
        address: "b:1".into(),
    })
    .unwrap();
    assert_eq!(node.servers().unwrap().len(), 1);
}

#[test]
fn test_state_and_ping() {
    let (_fake, node) = leader_node();

    assert_eq!(node.execute(Request::State).unwrap(), Reply::State("Leader".into()));
    assert_eq!(node.execute(Request::Ping).unwrap(), Reply::Pong);
    assert!(node.is_leader());
}

#[test]
fn test_stats_include_local_figures() {
    let (_fake, node) = leader_node();
    node.set("x", "1").unwrap();

    let stats = node.stats();
    assert_eq!(stats["node_id"], "A");
    assert_eq!(stats["keys"], "1");
    assert_eq!(stats["last_applied"], "1");
    assert_eq!(stats["poisoned"], "false");
}

#[test]
fn test_ping_fails_when_poisoned() {
    let (_fake, node) = leader_node();
    let _ = <KvStateMachine as StateMachine>::apply(
        node.machine(),
        &LogEntry::new(1, Bytes::from_static(b"junk")),
    );

    let result = node.execute(Request::Ping);
    assert!(matches!(result, Err(StoreError::Poisoned(_))));
    assert_eq!(node.stats()["poisoned"], "true");
}

// =============================================================================
// Cancellation Tests
// =============================================================================

#[test]
fn test_execute_cancellable_abandons_stalled_write() {
    let (fake, node) = leader_node();
    fake.stall();
    let (cancel_tx, cancel_rx) = channel::bounded(1);

    let canceller = thread::spawn(move || {
        thread::sleep(Duration::from_millis(50));
        cancel_tx.send(()).unwrap();
    });
    let started = Instant::now();
    let result = node.execute_cancellable(set("foo", "bar"), &cancel_rx);
    canceller.join().unwrap();

    assert!(matches!(result, Err(StoreError::Cancelled)));
    assert!(started.elapsed() < Duration::from_secs(1));
    assert_eq!(fake.submits(), 1);
}

#[test]
fn test_execute_cancellable_dropped_sender_cancels_set_many() {
    let (fake, node) = leader_node();
    fake.stall();
    let (cancel_tx, cancel_rx) = channel::bounded::<()>(1);
    drop(cancel_tx);

    let pairs: BTreeMap<String, String> = [("a", "1"), ("b", "2")]
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    let result = node.execute_cancellable(Request::SetMany { pairs }, &cancel_rx);

    assert!(matches!(result, Err(StoreError::Cancelled)));
    // Stops at the first pair
    assert_eq!(fake.submits(), 1);
}

#[test]
fn test_execute_cancellable_ignores_cancel_for_reads() {
    let (_fake, node) = leader_node();
    node.set("foo", "bar").unwrap();
    let (cancel_tx, cancel_rx) = channel::bounded::<()>(1);
    drop(cancel_tx);

    assert_eq!(
        node.execute_cancellable(get("foo"), &cancel_rx).unwrap(),
        Reply::Value(Some("bar".to_string()))
    );
}

// =============================================================================
// Follower Tests
// =============================================================================

#[test]
fn test_follower_redirects_writes_without_submitting() {
    let (fake, node) = follower_node(ReadPolicy::Stale);

    for request in [
        set("foo", "bar"),
        Request::Delete { key: "foo".into() },
        Request::Join {
            node_id: "C".into(),
            address: "c:1".into(),
        },
    ] {
        match node.execute(request) {
            Err(StoreError::NotLeader { leader }) => {
                assert_eq!(leader, Some(ServerInfo::new("A", "a:1")))
            }
            other => panic!("expected NotLeader, got {:?}", other),
        }
    }
    assert!(fake.calls().is_empty());
    assert!(node.machine().is_empty());
}

#[test]
fn test_follower_serves_stale_reads() {
    let (_fake, node) = follower_node(ReadPolicy::Stale);

    assert_eq!(node.execute(get("foo")).unwrap(), Reply::Value(None));
    assert_eq!(node.get("foo").unwrap(), None);
    assert_eq!(node.execute(Request::State).unwrap(), Reply::State("Follower".into()));
}

#[test]
fn test_follower_redirects_reads_under_leader_policy() {
    let (_fake, node) = follower_node(ReadPolicy::Leader);

    assert!(matches!(
        node.execute(get("foo")),
        Err(StoreError::NotLeader { .. })
    ));
    assert!(matches!(node.get("foo"), Err(StoreError::NotLeader { .. })));
    // Diagnostics still served
    assert_eq!(node.execute(Request::Ping).unwrap(), Reply::Pong);
}

// =============================================================================
// Loopback Cluster Tests
// =============================================================================

#[test]
fn test_nodes_over_loopback_cluster() {
    let cluster = LoopbackCluster::new();
    let mut nodes = Vec::new();
    for id in ["A", "B", "C"] {
        let machine = Arc::new(KvStateMachine::new());
        let consensus = cluster
            .register(id, format!("{}:7000", id), machine.clone())
            .unwrap();
        let consensus: Arc<dyn Consensus> = Arc::new(consensus);
        nodes.push(Node::new(config(id, ReadPolicy::Stale), consensus, machine));
    }
    cluster.bootstrap(&["A", "B", "C"]).unwrap();
    let (a, b, c) = (&nodes[0], &nodes[1], &nodes[2]);

    a.set("x", "1").unwrap();
    assert_eq!(a.get("x").unwrap(), Some("1".to_string()));
    assert!(eventually(WAIT, || b.get("x").unwrap().as_deref() == Some("1")));
    assert!(eventually(WAIT, || c.get("x").unwrap().as_deref() == Some("1")));

    match b.set("y", "2") {
        Err(StoreError::NotLeader { leader: Some(leader) }) => assert_eq!(leader.id, "A"),
        other => panic!("expected NotLeader, got {:?}", other),
    }

    a.delete("x").unwrap();
    for node in &nodes {
        assert!(eventually(WAIT, || node.get("x").unwrap().is_none()));
    }

    // Leadership moves; the old leader now redirects
    cluster.transfer_leadership("B").unwrap();
    assert!(b.is_leader());
    b.set("y", "2").unwrap();
    assert!(matches!(a.set("z", "3"), Err(StoreError::NotLeader { .. })));
    assert!(eventually(WAIT, || a.get("y").unwrap().as_deref() == Some("2")));
}
