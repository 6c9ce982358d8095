//! Consensus Module Contract
//!
//! The consensus module (leader election, log replication, durability) is an
//! external collaborator. This module defines what RaftKV needs from it and
//! the types exchanged across that boundary.
//!
//! ## Responsibilities of the collaborator
//! - Report this node's role and the best-known leader
//! - Replicate and commit submitted entries, then deliver them to the
//!   state machine in commit order
//! - Own the voter configuration and apply membership changes
//!
//! Anything that completes asynchronously returns a [`CommitHandle`], which
//! the caller waits on with a deadline.

mod loopback;

pub use loopback::{LoopbackCluster, LoopbackNode};

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use bytes::Bytes;
use crossbeam::channel::{self, Receiver, Sender};
use serde::{Deserialize, Serialize};

use crate::error::{Result, StoreError};

/// Role of the local node as reported by the consensus module
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Leader,
    Follower,
    Candidate,
    Shutdown,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Role::Leader => "Leader",
            Role::Follower => "Follower",
            Role::Candidate => "Candidate",
            Role::Shutdown => "Shutdown",
        };
        f.write_str(name)
    }
}

/// A member of the voter configuration
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ServerInfo {
    pub id: String,
    #[serde(rename = "addr")]
    pub address: String,
}

impl ServerInfo {
    pub fn new(id: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            address: address.into(),
        }
    }
}

/// A committed log entry as delivered to the state machine
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    /// Position in the replicated log (1-based, strictly increasing)
    pub index: u64,

    /// Encoded command payload
    pub data: Bytes,
}

impl LogEntry {
    pub fn new(index: u64, data: impl Into<Bytes>) -> Self {
        Self {
            index,
            data: data.into(),
        }
    }
}

/// The operations RaftKV consumes from the consensus module
pub trait Consensus: Send + Sync {
    /// Current role of the local node. Must be read fresh on every call.
    fn role(&self) -> Role;

    /// Best-known leader, possibly stale, `None` when no leader is known
    fn leader(&self) -> Option<ServerInfo>;

    /// Replicate and commit a log entry
    fn submit(&self, data: Bytes) -> CommitHandle;

    /// Current voter configuration, in configuration order
    fn configuration(&self) -> Result<Vec<ServerInfo>>;

    /// Add a voting member
    fn add_voter(&self, id: &str, address: &str) -> CommitHandle;

    /// Remove a member by id
    fn remove_server(&self, id: &str) -> CommitHandle;

    /// Diagnostic counters, for debugging only
    fn stats(&self) -> BTreeMap<String, String> {
        BTreeMap::new()
    }
}

/// Receiving half of an asynchronous consensus operation
///
/// Resolves to the log index the operation committed at, or to the error the
/// consensus module reported.
pub struct CommitHandle {
    rx: Receiver<Result<u64>>,
}

/// Sending half of a [`CommitHandle`], held by the consensus module
pub struct CommitNotifier {
    tx: Sender<Result<u64>>,
}

impl CommitHandle {
    /// Create a handle that resolves when the returned notifier fires
    pub fn pending() -> (CommitNotifier, CommitHandle) {
        let (tx, rx) = channel::bounded(1);
        (CommitNotifier { tx }, CommitHandle { rx })
    }

    /// Create a handle that is already resolved
    pub fn resolved(result: Result<u64>) -> Self {
        let (notifier, handle) = Self::pending();
        notifier.notify(result);
        handle
    }

    /// Wait for the outcome, giving up after `timeout`
    pub fn wait(self, timeout: Duration) -> Result<u64> {
        self.wait_or_cancel(timeout, &channel::never())
    }

    /// Wait for the outcome, giving up after `timeout` or when `cancel`
    /// receives a message or is disconnected.
    ///
    /// A timeout or cancellation says nothing about whether the operation
    /// eventually commits.
    pub fn wait_or_cancel(self, timeout: Duration, cancel: &Receiver<()>) -> Result<u64> {
        channel::select! {
            recv(self.rx) -> outcome => match outcome {
                Ok(result) => result,
                Err(_) => Err(StoreError::ApplyFailed(
                    "consensus module dropped the operation".to_string(),
                )),
            },
            recv(cancel) -> _ => Err(StoreError::Cancelled),
            recv(channel::after(timeout)) -> _ => Err(StoreError::ApplyTimeout(timeout)),
        }
    }
}

impl CommitNotifier {
    /// Resolve the paired handle. A handle that was dropped is ignored.
    pub fn notify(self, result: Result<u64>) {
        let _ = self.tx.send(result);
    }
}
