//! Leader-Redirect Router
//!
//! Decides, per client request, whether this node serves it or points the
//! client at the leader.
//!
//! ```text
//! request ──► mutating? ──no──► read? ──no──────────────────────► Local
//!                │                 │
//!                │                 └─yes─► ReadPolicy::Stale ───► Local
//!                │                         ReadPolicy::Leader ──┐
//!                └─yes───────────────────────────────────────────┤
//!                                                                ▼
//!                                        role == Leader ? Local : Redirect(leader)
//! ```
//!
//! The role is read from the consensus module on every request and never
//! cached; leadership can move between two requests.

use std::sync::Arc;

use crate::config::ReadPolicy;
use crate::consensus::{Consensus, Role, ServerInfo};
use crate::error::{Result, StoreError};
use crate::protocol::Request;

/// The one require-leader check shared by every mutating path
#[derive(Clone)]
pub struct LeaderGuard {
    consensus: Arc<dyn Consensus>,
}

impl LeaderGuard {
    pub fn new(consensus: Arc<dyn Consensus>) -> Self {
        Self { consensus }
    }

    /// Succeed on the leader, otherwise fail with the best-known leader
    pub fn check(&self) -> Result<()> {
        match self.consensus.role() {
            Role::Leader => Ok(()),
            role => {
                let leader = self.consensus.leader();
                tracing::debug!(
                    "Rejecting request as {}, leader is {:?}",
                    role,
                    leader.as_ref().map(|l| &l.id)
                );
                Err(StoreError::NotLeader { leader })
            }
        }
    }

    pub fn is_leader(&self) -> bool {
        self.consensus.role() == Role::Leader
    }
}

/// Where a request should be served
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    /// Serve on this node
    Local,

    /// Reject and report the best-known leader
    Redirect(Option<ServerInfo>),
}

/// Routes client requests according to role and read policy
#[derive(Clone)]
pub struct Router {
    guard: LeaderGuard,
    read_policy: ReadPolicy,
}

impl Router {
    pub fn new(guard: LeaderGuard, read_policy: ReadPolicy) -> Self {
        Self { guard, read_policy }
    }

    /// Decide where `request` is served
    pub fn route(&self, request: &Request) -> Route {
        let needs_leader = request.is_mutating()
            || (request.is_read() && self.read_policy == ReadPolicy::Leader);

        if !needs_leader {
            return Route::Local;
        }

        match self.guard.check() {
            Ok(()) => Route::Local,
            Err(StoreError::NotLeader { leader }) => Route::Redirect(leader),
            Err(_) => Route::Redirect(None),
        }
    }

    /// Like [`route`](Self::route), but as a `Result` for `?` at entry points
    pub fn admit(&self, request: &Request) -> Result<()> {
        match self.route(request) {
            Route::Local => Ok(()),
            Route::Redirect(leader) => Err(StoreError::NotLeader { leader }),
        }
    }

    pub fn read_policy(&self) -> ReadPolicy {
        self.read_policy
    }

    pub fn guard(&self) -> &LeaderGuard {
        &self.guard
    }
}
