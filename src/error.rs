//! Error types for RaftKV
//!
//! Provides a unified error type for all operations.

use std::time::Duration;

use thiserror::Error;

use crate::consensus::ServerInfo;

/// Result type alias using StoreError
pub type Result<T> = std::result::Result<T, StoreError>;

/// Unified error type for RaftKV operations
#[derive(Debug, Error)]
pub enum StoreError {
    // -------------------------------------------------------------------------
    // I/O Errors
    // -------------------------------------------------------------------------
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // -------------------------------------------------------------------------
    // Leadership Errors
    // -------------------------------------------------------------------------
    /// A write or membership change reached a node that is not the leader.
    /// Carries the best-known leader, which may be stale or unknown.
    #[error("not leader (leader: {})", describe_leader(.leader))]
    NotLeader { leader: Option<ServerInfo> },

    // -------------------------------------------------------------------------
    // Commit Errors
    // -------------------------------------------------------------------------
    #[error("commit not confirmed within {0:?}")]
    ApplyTimeout(Duration),

    #[error("commit failed: {0}")]
    ApplyFailed(String),

    #[error("wait for commit cancelled by caller")]
    Cancelled,

    #[error("batch of {count} keys exceeds limit of {max}")]
    BatchTooLarge { count: usize, max: usize },

    // -------------------------------------------------------------------------
    // State Machine Errors
    // -------------------------------------------------------------------------
    #[error("failed to decode log entry: {0}")]
    Decode(String),

    #[error("state machine poisoned: {0}")]
    Poisoned(String),

    #[error("snapshot error: {0}")]
    Snapshot(String),

    // -------------------------------------------------------------------------
    // Membership Errors
    // -------------------------------------------------------------------------
    #[error("membership change for {node_id} at {address} left cluster in unknown state: {reason}")]
    MembershipConflict {
        node_id: String,
        address: String,
        reason: String,
    },

    // -------------------------------------------------------------------------
    // Consensus Errors
    // -------------------------------------------------------------------------
    #[error("consensus error: {0}")]
    Consensus(String),

    // -------------------------------------------------------------------------
    // Serialization Errors
    // -------------------------------------------------------------------------
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // -------------------------------------------------------------------------
    // Network Errors
    // -------------------------------------------------------------------------
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// An ERROR response carried back to a client
    #[error("server error: {0}")]
    Remote(String),

    // -------------------------------------------------------------------------
    // Configuration Errors
    // -------------------------------------------------------------------------
    #[error("Configuration error: {0}")]
    Config(String),
}

impl StoreError {
    /// True for errors a client resolves by retrying elsewhere or later,
    /// as opposed to faults of this node.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            StoreError::NotLeader { .. }
                | StoreError::ApplyTimeout(_)
                | StoreError::ApplyFailed(_)
                | StoreError::Cancelled
        )
    }
}

fn describe_leader(leader: &Option<ServerInfo>) -> String {
    match leader {
        Some(server) => format!("{} at {}", server.id, server.address),
        None => "unknown".to_string(),
    }
}
