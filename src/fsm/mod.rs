//! Replicated State Machine Module
//!
//! The deterministic key-value map driven by committed log entries.
//!
//! ## Responsibilities
//! - Apply committed commands in log order, exactly once each
//! - Serve concurrent reads while a single committer mutates
//! - Produce point-in-time snapshots and restore from them atomically
//! - Halt (poison) instead of skipping an entry it cannot decode
//!
//! ## Upcalls
//! The consensus module drives the state machine through [`StateMachine`].
//! Snapshots are returned as [`FsmSnapshot`] handles that serialize into a
//! [`SnapshotSink`] supplied by the collaborator.

mod machine;
mod snapshot;

pub use machine::KvStateMachine;
pub use snapshot::{
    load_snapshot_file, read_snapshot_file, FileSnapshotSink, KvSnapshot, MemorySink,
};

use std::io::{Read, Write};

use crate::consensus::LogEntry;
use crate::error::Result;

/// Position of a snapshot in the replicated log
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SnapshotMeta {
    /// Index of the last entry reflected in the snapshot (0 = none)
    pub index: u64,
}

/// Upcalls the consensus module makes into the state machine
pub trait StateMachine: Send + Sync {
    /// Apply one committed entry. Called sequentially, in log order.
    fn apply(&self, entry: &LogEntry) -> Result<()>;

    /// Capture the current state
    fn snapshot(&self) -> Result<Box<dyn FsmSnapshot>>;

    /// Replace the whole state with the contents of `reader`
    fn restore(&self, meta: SnapshotMeta, reader: &mut dyn Read) -> Result<()>;
}

/// A captured, immutable state that can be serialized on demand
pub trait FsmSnapshot: Send {
    /// Log position the snapshot reflects
    fn meta(&self) -> SnapshotMeta;

    /// Write the encoded snapshot to `sink` and close it.
    /// On any failure the sink is cancelled.
    fn persist(&self, sink: &mut dyn SnapshotSink) -> Result<()>;

    /// Called when the collaborator is done with the snapshot
    fn release(&mut self) {}
}

/// Destination for a snapshot being persisted
pub trait SnapshotSink: Write {
    /// Finish the snapshot; it becomes visible only after a successful close
    fn close(&mut self) -> Result<()>;

    /// Abandon the snapshot and discard anything written
    fn cancel(&mut self) -> Result<()>;
}
