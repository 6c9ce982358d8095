//! Membership Manager
//!
//! Reconciles join and detach requests against the voter configuration owned
//! by the consensus module. No copy of the configuration is kept here.
//!
//! ## Join
//! ```text
//! for server in configuration:
//!     if server.id == id || server.address == address:
//!         if server.id == id && server.address == address:
//!             return Ok            // already a member
//!         remove(server.id)        // stale id or reused address
//! add_voter(id, address)
//! ```
//! Removing first keeps the configuration free of duplicate ids and
//! duplicate addresses.

use std::sync::Arc;
use std::time::Duration;

use crate::consensus::{Consensus, ServerInfo};
use crate::error::{Result, StoreError};
use crate::router::LeaderGuard;

/// Adds and removes voting members
pub struct MembershipManager {
    consensus: Arc<dyn Consensus>,
    guard: LeaderGuard,
    timeout: Duration,
}

impl MembershipManager {
    pub fn new(consensus: Arc<dyn Consensus>, guard: LeaderGuard, timeout: Duration) -> Self {
        Self {
            consensus,
            guard,
            timeout,
        }
    }

    /// Make `node_id` at `address` a voter
    pub fn join(&self, node_id: &str, address: &str) -> Result<()> {
        self.guard.check()?;
        tracing::info!("Received join request for {} at {}", node_id, address);

        let servers = self.consensus.configuration()?;
        let mut removed = 0;

        for server in servers.iter().filter(|s| s.id == node_id || s.address == address) {
            if server.id == node_id && server.address == address {
                tracing::info!("{} at {} already a member, ignoring join", node_id, address);
                return Ok(());
            }

            tracing::info!("Removing stale server {} at {}", server.id, server.address);
            if let Err(e) = self.consensus.remove_server(&server.id).wait(self.timeout) {
                tracing::warn!("Failed to remove {}: {}", server.id, e);
                let step = format!("removing {} at {}", server.id, server.address);
                return Err(half_done(e, removed, node_id, address, step));
            }
            removed += 1;
        }

        if let Err(e) = self.consensus.add_voter(node_id, address).wait(self.timeout) {
            tracing::warn!("Failed to add voter {} at {}: {}", node_id, address, e);
            let step = format!("adding {} after {} removal(s)", node_id, removed);
            return Err(half_done(e, removed, node_id, address, step));
        }

        tracing::info!("{} at {} joined", node_id, address);
        Ok(())
    }

    /// Remove every voter matching `node_id` or `address`.
    /// Nothing matching is not an error.
    pub fn detach(&self, node_id: &str, address: &str) -> Result<()> {
        self.guard.check()?;
        tracing::info!("Received detach request for {} at {}", node_id, address);

        let servers = self.consensus.configuration()?;
        let mut removed = 0;
        for server in servers.iter().filter(|s| s.id == node_id || s.address == address) {
            if let Err(e) = self.consensus.remove_server(&server.id).wait(self.timeout) {
                tracing::warn!("Failed to remove {}: {}", server.id, e);
                let step = format!("removing {} at {}", server.id, server.address);
                return Err(half_done(e, removed, node_id, address, step));
            }
            removed += 1;
        }
        Ok(())
    }

    /// Current voter configuration; may lag the true commit on followers
    pub fn servers(&self) -> Result<Vec<ServerInfo>> {
        self.consensus.configuration()
    }
}

/// Map a failed configuration step to the caller's error.
///
/// Redirects pass through untouched. Before any change was applied the
/// collaborator's error is returned as is; after one, the configuration is
/// in an intermediate state and the failure becomes a conflict.
fn half_done(e: StoreError, applied: usize, node_id: &str, address: &str, step: String) -> StoreError {
    match e {
        StoreError::NotLeader { .. } => e,
        e if applied == 0 => e,
        e => StoreError::MembershipConflict {
            node_id: node_id.to_string(),
            address: address.to_string(),
            reason: format!("{}: {}", step, e),
        },
    }
}
