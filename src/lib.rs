//! # RaftKV
//!
//! A replicated key-value store built on an external consensus module:
//! - Deterministic state machine driven by committed log entries
//! - Leader-only writes with bounded, cancellable commit waits
//! - Join/detach reconciliation against the voter configuration
//! - Leader redirects for requests that reach a follower
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      TCP Server                              │
//! │                  (Multiple Clients)                          │
//! └─────────────────────┬───────────────────────────────────────┘
//!                       │
//! ┌─────────────────────▼───────────────────────────────────────┐
//! │                Node (Leader-Redirect Router)                 │
//! └──────┬──────────────────────┬───────────────────────┬───────┘
//!        │ reads                │ writes                │ join/detach
//!        │              ┌───────▼───────┐       ┌───────▼───────┐
//!        │              │     Write     │       │  Membership   │
//!        │              │  Coordinator  │       │    Manager    │
//!        │              └───────┬───────┘       └───────┬───────┘
//!        │                      └───────────┬───────────┘
//!        │                          ┌───────▼───────┐
//!        │                          │   Consensus   │
//!        │                          │ (collaborator)│
//!        │                          └───────┬───────┘
//!        │                                  │ committed entries
//!        │                          ┌───────▼───────┐
//!        └─────────────────────────►│ State Machine │
//!                                   │   (RwLock)    │
//!                                   └───────────────┘
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod config;

pub mod command;
pub mod consensus;
pub mod fsm;
pub mod coordinator;
pub mod membership;
pub mod router;
pub mod node;
pub mod network;
pub mod protocol;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use error::{Result, StoreError};
pub use config::{Config, ReadPolicy};
pub use command::{Command, Op};
pub use consensus::{Consensus, LoopbackCluster, Role, ServerInfo};
pub use fsm::KvStateMachine;
pub use node::{Node, Reply};

// =============================================================================
// Version Info
// =============================================================================

/// Current version of RaftKV
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
