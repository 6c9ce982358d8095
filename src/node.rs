//! Node Module
//!
//! The per-node facade that wires the state machine to the consensus module
//! and serves client requests.
//!
//! ## Responsibilities
//! - Route every request through the [`Router`] before serving it
//! - Send writes through the [`WriteCoordinator`]
//! - Send join/detach through the [`MembershipManager`]
//! - Serve reads from the local [`KvStateMachine`]
//!
//! ```text
//!            Request
//!               │
//!        ┌──────▼──────┐   Redirect
//!        │   Router    │──────────────► NotLeader { leader }
//!        └──────┬──────┘
//!               │ Local
//!    ┌──────────┼───────────────┬─────────────┐
//!    ▼          ▼               ▼             ▼
//! reads    WriteCoordinator  Membership   diagnostics
//!    │          │               │
//!    │          └──────┬────────┘
//!    │                 ▼
//!    │            Consensus ──► committer ──► KvStateMachine
//!    └─────────────────────────────────────────────┘
//! ```

use std::collections::BTreeMap;
use std::sync::Arc;

use crossbeam::channel::{self, Receiver};

use crate::config::Config;
use crate::consensus::{Consensus, Role, ServerInfo};
use crate::coordinator::WriteCoordinator;
use crate::error::{Result, StoreError};
use crate::fsm::KvStateMachine;
use crate::membership::MembershipManager;
use crate::protocol::Request;
use crate::router::{LeaderGuard, Route, Router};

/// Outcome of a successfully served request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// GET result, `None` when the key is absent
    Value(Option<String>),

    /// A write or membership change committed
    Done,

    /// Voter configuration
    Servers(Vec<ServerInfo>),

    /// Present keys, sorted
    Keys(Vec<String>),

    /// Role name of the serving node
    State(String),

    /// Diagnostic counters
    Stats(BTreeMap<String, String>),

    /// Health check answer
    Pong,
}

/// A RaftKV node
pub struct Node {
    config: Config,
    machine: Arc<KvStateMachine>,
    consensus: Arc<dyn Consensus>,
    coordinator: WriteCoordinator,
    membership: MembershipManager,
    router: Router,
}

impl Node {
    /// Build a node around a consensus handle and the state machine that
    /// handle delivers committed entries to
    pub fn new(config: Config, consensus: Arc<dyn Consensus>, machine: Arc<KvStateMachine>) -> Self {
        let guard = LeaderGuard::new(Arc::clone(&consensus));
        let coordinator =
            WriteCoordinator::new(Arc::clone(&consensus), guard.clone(), config.apply_timeout);
        let membership =
            MembershipManager::new(Arc::clone(&consensus), guard.clone(), config.apply_timeout);
        let router = Router::new(guard, config.read_policy);

        Self {
            config,
            machine,
            consensus,
            coordinator,
            membership,
            router,
        }
    }

    // =========================================================================
    // Request dispatch
    // =========================================================================

    /// Serve one client request
    pub fn execute(&self, request: Request) -> Result<Reply> {
        self.execute_cancellable(request, &channel::never())
    }

    /// Serve one client request, abandoning any commit wait once `cancel`
    /// fires or its sender is dropped (the caller went away).
    ///
    /// A cancelled write returns [`StoreError::Cancelled`]; its fate in the
    /// log is unknown.
    pub fn execute_cancellable(&self, request: Request, cancel: &Receiver<()>) -> Result<Reply> {
        self.router.admit(&request)?;

        match request {
            Request::Get { key } => Ok(Reply::Value(self.machine.get(&key))),
            Request::Set { key, value } => self
                .coordinator
                .set_cancellable(&key, &value, cancel)
                .map(|_| Reply::Done),
            Request::Delete { key } => self
                .coordinator
                .delete_cancellable(&key, cancel)
                .map(|_| Reply::Done),
            Request::SetMany { pairs } => self
                .coordinator
                .set_many_cancellable(&pairs, cancel)
                .map(|_| Reply::Done),
            Request::Join { node_id, address } => {
                self.membership.join(&node_id, &address).map(|_| Reply::Done)
            }
            Request::Detach { node_id, address } => {
                self.membership.detach(&node_id, &address).map(|_| Reply::Done)
            }
            Request::Servers => self.membership.servers().map(Reply::Servers),
            Request::State => Ok(Reply::State(self.role().to_string())),
            Request::Keys => Ok(Reply::Keys(self.keys())),
            Request::Stats => Ok(Reply::Stats(self.stats())),
            Request::Ping => self.ping().map(|_| Reply::Pong),
        }
    }

    // =========================================================================
    // Typed operations
    // =========================================================================

    /// Read a key from the local state machine, subject to the read policy
    pub fn get(&self, key: &str) -> Result<Option<String>> {
        self.admit(&Request::Get {
            key: key.to_string(),
        })?;
        Ok(self.machine.get(key))
    }

    pub fn set(&self, key: &str, value: &str) -> Result<u64> {
        self.coordinator.set(key, value)
    }

    pub fn delete(&self, key: &str) -> Result<u64> {
        self.coordinator.delete(key)
    }

    pub fn set_many(&self, pairs: &BTreeMap<String, String>) -> Result<u64> {
        self.coordinator.set_many(pairs)
    }

    pub fn join(&self, node_id: &str, address: &str) -> Result<()> {
        self.membership.join(node_id, address)
    }

    pub fn detach(&self, node_id: &str, address: &str) -> Result<()> {
        self.membership.detach(node_id, address)
    }

    pub fn servers(&self) -> Result<Vec<ServerInfo>> {
        self.membership.servers()
    }

    /// Present keys, sorted for stable output
    pub fn keys(&self) -> Vec<String> {
        let mut keys = self.machine.keys();
        keys.sort();
        keys
    }

    /// Consensus counters plus local state machine figures
    pub fn stats(&self) -> BTreeMap<String, String> {
        let mut stats = self.consensus.stats();
        stats.insert("node_id".to_string(), self.config.node_id.clone());
        stats.insert("keys".to_string(), self.machine.len().to_string());
        stats.insert("last_applied".to_string(), self.machine.last_applied().to_string());
        stats.insert("poisoned".to_string(), self.machine.is_poisoned().to_string());
        stats
    }

    /// Healthy unless the state machine halted
    pub fn ping(&self) -> Result<()> {
        match self.machine.poison_reason() {
            Some(reason) => Err(StoreError::Poisoned(reason)),
            None => Ok(()),
        }
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    pub fn role(&self) -> Role {
        self.consensus.role()
    }

    pub fn is_leader(&self) -> bool {
        self.router.guard().is_leader()
    }

    /// Best-known leader
    pub fn leader(&self) -> Option<ServerInfo> {
        self.consensus.leader()
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn machine(&self) -> &Arc<KvStateMachine> {
        &self.machine
    }

    pub fn router(&self) -> &Router {
        &self.router
    }

    pub fn coordinator(&self) -> &WriteCoordinator {
        &self.coordinator
    }

    fn admit(&self, request: &Request) -> Result<()> {
        if let Route::Redirect(leader) = self.router.route(request) {
            tracing::debug!("Node {} redirecting read to leader", self.config.node_id);
            return Err(StoreError::NotLeader { leader });
        }
        Ok(())
    }
}
