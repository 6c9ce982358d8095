//! Loopback consensus
//!
//! An in-process stand-in for the consensus module, used by tests, benchmarks
//! and the single-node server. It does not elect leaders or talk to peers:
//! leadership is assigned explicitly and "replication" means pushing each
//! committed entry onto every voter's committer channel.
//!
//! ## Threading
//! - Every registered node owns one committer thread that applies entries to
//!   its state machine strictly in the order they were queued
//! - All queueing happens under the cluster lock, so every node sees the
//!   same order
//! - A submitter's [`CommitHandle`] resolves once the leader has applied the
//!   entry; followers catch up asynchronously
//!
//! ## Catch-up
//! A node that becomes a voter is first restored from the compacted base
//! snapshot (if any), then replayed every retained entry after it.

use std::collections::{BTreeMap, HashMap};
use std::io::Cursor;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use bytes::Bytes;
use crossbeam::channel::{self, Receiver, Sender};
use parking_lot::Mutex;
use crate::error::{Result, StoreError};
use crate::fsm::{MemorySink, SnapshotMeta, StateMachine};

use super::{CommitHandle, CommitNotifier, Consensus, LogEntry, Role, ServerInfo};

/// Work queued for a node's committer thread
enum Delivery {
    Apply {
        entry: LogEntry,
        notifier: Option<CommitNotifier>,
    },
    Restore {
        meta: SnapshotMeta,
        bytes: Bytes,
    },
}

/// A node known to the cluster, voter or not
struct Replica {
    address: String,
    machine: Arc<dyn StateMachine>,
    tx: Sender<Delivery>,
    halted: Arc<AtomicBool>,
}

#[derive(Default)]
struct ClusterState {
    /// Retained committed entries, oldest first, all after `base`
    log: Vec<LogEntry>,

    /// Index of the newest committed entry
    last_index: u64,

    /// Compacted prefix of the log
    base: Option<(SnapshotMeta, Bytes)>,

    /// Current leader id
    leader: Option<String>,

    /// Voter configuration
    voters: Vec<ServerInfo>,

    /// Registered nodes by id
    replicas: HashMap<String, Replica>,
}

impl ClusterState {
    fn leader_info(&self) -> Option<ServerInfo> {
        let leader = self.leader.as_ref()?;
        self.voters.iter().find(|s| &s.id == leader).cloned()
    }

    fn is_voter(&self, id: &str) -> bool {
        self.voters.iter().any(|s| s.id == id)
    }

    fn not_leader(&self) -> StoreError {
        StoreError::NotLeader {
            leader: self.leader_info(),
        }
    }

    fn is_halted(&self, id: &str) -> bool {
        self.replicas
            .get(id)
            .map(|r| r.halted.load(Ordering::Acquire))
            .unwrap_or(false)
    }

    /// Queue the base snapshot and the retained log for one node
    fn catch_up(&self, id: &str) {
        let Some(replica) = self.replicas.get(id) else {
            return;
        };
        if replica.halted.load(Ordering::Acquire) {
            tracing::warn!("Skipping catch-up for halted node {}", id);
            return;
        }

        if let Some((meta, bytes)) = &self.base {
            let _ = replica.tx.send(Delivery::Restore {
                meta: *meta,
                bytes: bytes.clone(),
            });
        }
        for entry in &self.log {
            let _ = replica.tx.send(Delivery::Apply {
                entry: entry.clone(),
                notifier: None,
            });
        }
        tracing::debug!("Queued catch-up of {} entries for {}", self.log.len(), id);
    }
}

/// Handle to an in-process cluster
#[derive(Clone, Default)]
pub struct LoopbackCluster {
    state: Arc<Mutex<ClusterState>>,
}

impl LoopbackCluster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a node and start its committer thread.
    ///
    /// The node receives entries only while it is a voter.
    pub fn register(
        &self,
        id: impl Into<String>,
        address: impl Into<String>,
        machine: Arc<dyn StateMachine>,
    ) -> Result<LoopbackNode> {
        let id = id.into();
        let address = address.into();
        let (tx, rx) = channel::unbounded();
        let halted = Arc::new(AtomicBool::new(false));

        let thread_machine = Arc::clone(&machine);
        let thread_halted = Arc::clone(&halted);
        let thread_id = id.clone();
        thread::Builder::new()
            .name(format!("committer-{}", id))
            .spawn(move || committer_loop(thread_id, thread_machine, rx, thread_halted))?;

        let mut state = self.state.lock();
        state.replicas.insert(
            id.clone(),
            Replica {
                address,
                machine,
                tx,
                halted,
            },
        );
        if state.is_voter(&id) {
            state.catch_up(&id);
        }

        Ok(LoopbackNode {
            id,
            state: Arc::clone(&self.state),
        })
    }

    /// Form the initial configuration from registered nodes.
    /// The first id becomes leader.
    pub fn bootstrap(&self, ids: &[&str]) -> Result<()> {
        let mut state = self.state.lock();
        if !state.voters.is_empty() {
            return Err(StoreError::Consensus("cluster already bootstrapped".to_string()));
        }

        let mut voters = Vec::with_capacity(ids.len());
        for id in ids {
            let replica = state.replicas.get(*id).ok_or_else(|| {
                StoreError::Consensus(format!("cannot bootstrap unknown node {}", id))
            })?;
            voters.push(ServerInfo::new(*id, replica.address.clone()));
        }

        state.voters = voters;
        state.leader = ids.first().map(|id| id.to_string());
        if state.base.is_some() {
            for id in ids {
                state.catch_up(id);
            }
        }
        tracing::info!(
            "Bootstrapped loopback cluster with {} voters, leader {:?}",
            ids.len(),
            state.leader
        );
        Ok(())
    }

    /// Seed the cluster with a previously persisted snapshot.
    ///
    /// Only allowed before anything is committed; voters are restored from
    /// it when the cluster is bootstrapped or when they join.
    pub fn install_base(&self, meta: SnapshotMeta, bytes: impl Into<Bytes>) -> Result<()> {
        let mut state = self.state.lock();
        if state.last_index > 0 || !state.voters.is_empty() {
            return Err(StoreError::Consensus(
                "cannot install a base snapshot into a running cluster".to_string(),
            ));
        }
        state.last_index = meta.index;
        state.base = Some((meta, bytes.into()));
        tracing::info!("Installed base snapshot at index {}", meta.index);
        Ok(())
    }

    /// Hand leadership to a voter
    pub fn transfer_leadership(&self, id: &str) -> Result<()> {
        let mut state = self.state.lock();
        if !state.is_voter(id) {
            return Err(StoreError::Consensus(format!("{} is not a voter", id)));
        }
        state.leader = Some(id.to_string());
        tracing::info!("Leadership transferred to {}", id);
        Ok(())
    }

    /// Drop the current leader, as if an election were in progress
    pub fn clear_leader(&self) {
        self.state.lock().leader = None;
    }

    /// Replace the retained log with a snapshot of the leader's state.
    ///
    /// The snapshot's index is always at or behind the leader's committed
    /// index; entries after it are kept.
    pub fn compact(&self) -> Result<SnapshotMeta> {
        let mut state = self.state.lock();
        let leader = state.leader.clone().ok_or_else(|| state.not_leader())?;
        let replica = state
            .replicas
            .get(&leader)
            .ok_or_else(|| StoreError::Consensus(format!("leader {} is not registered", leader)))?;

        let snapshot = replica.machine.snapshot()?;
        let meta = snapshot.meta();
        let mut sink = MemorySink::new();
        snapshot.persist(&mut sink)?;

        state.log.retain(|entry| entry.index > meta.index);
        state.base = Some((meta, Bytes::from(sink.into_bytes())));
        tracing::info!(
            "Compacted log at index {} ({} entries retained)",
            meta.index,
            state.log.len()
        );
        Ok(meta)
    }

    /// Index of the newest committed entry
    pub fn last_index(&self) -> u64 {
        self.state.lock().last_index
    }

    /// Whether a node's committer stopped making progress
    pub fn is_halted(&self, id: &str) -> bool {
        self.state.lock().is_halted(id)
    }
}

/// One node's view of the loopback cluster
#[derive(Clone)]
pub struct LoopbackNode {
    id: String,
    state: Arc<Mutex<ClusterState>>,
}

impl LoopbackNode {
    /// Id this handle speaks for
    pub fn id(&self) -> &str {
        &self.id
    }
}

impl Consensus for LoopbackNode {
    fn role(&self) -> Role {
        let state = self.state.lock();
        match &state.leader {
            Some(leader) if leader == &self.id => Role::Leader,
            Some(_) => Role::Follower,
            None if state.is_voter(&self.id) => Role::Candidate,
            None => Role::Follower,
        }
    }

    fn leader(&self) -> Option<ServerInfo> {
        self.state.lock().leader_info()
    }

    fn submit(&self, data: Bytes) -> CommitHandle {
        let mut state = self.state.lock();
        if state.leader.as_deref() != Some(self.id.as_str()) {
            return CommitHandle::resolved(Err(state.not_leader()));
        }
        if state.is_halted(&self.id) {
            return CommitHandle::resolved(Err(StoreError::ApplyFailed(format!(
                "node {} is halted",
                self.id
            ))));
        }

        state.last_index += 1;
        let entry = LogEntry::new(state.last_index, data);
        state.log.push(entry.clone());

        let (notifier, handle) = CommitHandle::pending();
        let mut notifier = Some(notifier);
        for voter in &state.voters {
            let Some(replica) = state.replicas.get(&voter.id) else {
                continue;
            };
            if replica.halted.load(Ordering::Acquire) {
                continue;
            }
            let notifier = if voter.id == self.id { notifier.take() } else { None };
            let _ = replica.tx.send(Delivery::Apply {
                entry: entry.clone(),
                notifier,
            });
        }

        // Leader not registered locally: nothing will apply it here
        if let Some(notifier) = notifier {
            notifier.notify(Ok(entry.index));
        }
        handle
    }

    fn configuration(&self) -> Result<Vec<ServerInfo>> {
        Ok(self.state.lock().voters.clone())
    }

    fn add_voter(&self, id: &str, address: &str) -> CommitHandle {
        let mut state = self.state.lock();
        if state.leader.as_deref() != Some(self.id.as_str()) {
            return CommitHandle::resolved(Err(state.not_leader()));
        }

        if let Some(existing) = state
            .voters
            .iter()
            .find(|s| s.id == id || s.address == address)
        {
            return CommitHandle::resolved(Err(StoreError::Consensus(format!(
                "server {} at {} already in configuration",
                existing.id, existing.address
            ))));
        }

        state.voters.push(ServerInfo::new(id, address));
        state.catch_up(id);
        tracing::info!("Added voter {} at {}", id, address);
        CommitHandle::resolved(Ok(state.last_index))
    }

    fn remove_server(&self, id: &str) -> CommitHandle {
        let mut state = self.state.lock();
        if state.leader.as_deref() != Some(self.id.as_str()) {
            return CommitHandle::resolved(Err(state.not_leader()));
        }

        let before = state.voters.len();
        state.voters.retain(|s| s.id != id);
        if state.voters.len() != before {
            tracing::info!("Removed server {}", id);
        }
        if state.leader.as_deref() == Some(id) {
            tracing::warn!("Leader {} removed itself, stepping down", id);
            state.leader = None;
        }
        CommitHandle::resolved(Ok(state.last_index))
    }

    fn stats(&self) -> BTreeMap<String, String> {
        let role = self.role();
        let state = self.state.lock();
        let leader = state.leader_info();

        let mut stats = BTreeMap::new();
        stats.insert("state".to_string(), role.to_string());
        stats.insert("last_log_index".to_string(), state.last_index.to_string());
        stats.insert("retained_entries".to_string(), state.log.len().to_string());
        stats.insert(
            "snapshot_index".to_string(),
            state.base.as_ref().map(|(meta, _)| meta.index).unwrap_or(0).to_string(),
        );
        stats.insert("num_peers".to_string(), state.voters.len().saturating_sub(1).to_string());
        stats.insert(
            "leader_id".to_string(),
            leader.as_ref().map(|l| l.id.clone()).unwrap_or_default(),
        );
        stats.insert(
            "leader_addr".to_string(),
            leader.map(|l| l.address).unwrap_or_default(),
        );
        stats.insert("halted".to_string(), state.is_halted(&self.id).to_string());
        stats
    }
}

/// Apply queued deliveries in order until every sender is gone.
///
/// Once halted, nothing more is applied: later entries fail their notifier
/// and restores are dropped.
fn committer_loop(
    id: String,
    machine: Arc<dyn StateMachine>,
    rx: Receiver<Delivery>,
    halted: Arc<AtomicBool>,
) {
    for delivery in rx {
        match delivery {
            Delivery::Apply { entry, notifier } => {
                if halted.load(Ordering::Acquire) {
                    if let Some(notifier) = notifier {
                        notifier.notify(Err(StoreError::ApplyFailed(format!(
                            "node {} is halted",
                            id
                        ))));
                    }
                    continue;
                }
                let result = machine.apply(&entry).map(|_| entry.index);
                if let Err(e) = &result {
                    halted.store(true, Ordering::Release);
                    tracing::error!("Node {} halted at index {}: {}", id, entry.index, e);
                }
                if let Some(notifier) = notifier {
                    notifier.notify(result.map_err(|e| StoreError::ApplyFailed(e.to_string())));
                }
            }
            Delivery::Restore { meta, bytes } => {
                if halted.load(Ordering::Acquire) {
                    continue;
                }
                let mut reader = Cursor::new(bytes);
                if let Err(e) = machine.restore(meta, &mut reader) {
                    halted.store(true, Ordering::Release);
                    tracing::error!(
                        "Node {} halted: snapshot restore at index {} failed: {}",
                        id,
                        meta.index,
                        e
                    );
                }
            }
        }
    }
    tracing::debug!("Committer for {} stopped", id);
}
