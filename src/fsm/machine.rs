//! Key-value state machine
//!
//! HashMap behind a RwLock, mutated only by `apply` and `restore`.

use std::collections::HashMap;
use std::io::Read;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::{Mutex, RwLock};

use crate::command::{Command, Op};
use crate::consensus::LogEntry;
use crate::error::{Result, StoreError};

use super::{FsmSnapshot, KvSnapshot, SnapshotMeta, StateMachine};

/// The replicated key-value map
///
/// ## Concurrency Model: Single-Writer / Multiple-Reader (SWMR)
///
/// - **Writes** (apply/restore): one at a time, driven by the committer
///   - `data` write lock held only for the single insert/remove/swap
///   - `last_applied` updated under the same write lock, so a reader holding
///     the read lock sees an index that matches the map exactly
///
/// - **Reads** (get/keys/snapshot copy): concurrent through the read lock
///
/// - **Snapshot vs restore**: serialized by `snapshot_gate`; neither blocks
///   `get` for longer than one map clone or swap
#[derive(Default)]
pub struct KvStateMachine {
    /// The live map
    data: RwLock<HashMap<String, String>>,

    /// Index of the last applied (or restored) log entry
    last_applied: AtomicU64,

    /// Set once an undecodable entry is seen; never cleared
    poison: Mutex<Option<String>>,

    /// Keeps snapshot capture and restore from interleaving
    snapshot_gate: Mutex<()>,
}

impl KvStateMachine {
    /// Create an empty state machine
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply a committed entry
    ///
    /// SET inserts or overwrites, DELETE removes if present. An entry that
    /// does not decode poisons the state machine: the map is left as is and
    /// every later call fails with [`StoreError::Poisoned`].
    pub fn apply(&self, entry: &LogEntry) -> Result<()> {
        if let Some(reason) = self.poison.lock().as_ref() {
            return Err(StoreError::Poisoned(reason.clone()));
        }

        let command = match Command::decode(&entry.data) {
            Ok(command) => command,
            Err(e) => {
                let reason = format!("log entry {}: {}", entry.index, e);
                tracing::error!("Undecodable log entry {}, halting state machine: {}", entry.index, e);
                *self.poison.lock() = Some(reason.clone());
                return Err(StoreError::Decode(reason));
            }
        };

        {
            let mut data = self.data.write();
            match command.op {
                Op::Set => {
                    if let Some(value) = command.value {
                        data.insert(command.key.clone(), value);
                    }
                }
                Op::Delete => {
                    data.remove(&command.key);
                }
            }
            self.last_applied.fetch_max(entry.index, Ordering::AcqRel);
        }

        tracing::trace!("Applied entry {}: {:?} {}", entry.index, command.op, command.key);
        Ok(())
    }

    /// Copy the current map into an immutable snapshot
    pub fn snapshot(&self) -> KvSnapshot {
        let _gate = self.snapshot_gate.lock();

        let data = self.data.read();
        let meta = SnapshotMeta {
            index: self.last_applied.load(Ordering::Acquire),
        };
        KvSnapshot::new(meta, data.clone())
    }

    /// Replace the map with the snapshot read from `reader`
    ///
    /// The whole stream is decoded before anything is touched; on failure
    /// the previous contents stay in place.
    pub fn restore<R: Read>(&self, meta: SnapshotMeta, mut reader: R) -> Result<()> {
        let _gate = self.snapshot_gate.lock();

        let mut bytes = Vec::new();
        reader
            .read_to_end(&mut bytes)
            .map_err(|e| StoreError::Snapshot(format!("failed to read snapshot: {}", e)))?;

        let restored: HashMap<String, String> = serde_json::from_slice(&bytes)
            .map_err(|e| StoreError::Snapshot(format!("failed to decode snapshot: {}", e)))?;
        let key_count = restored.len();

        {
            let mut data = self.data.write();
            *data = restored;
            self.last_applied.store(meta.index, Ordering::Release);
        }

        tracing::info!("Restored {} keys from snapshot at index {}", key_count, meta.index);
        Ok(())
    }

    /// Get a value by key
    pub fn get(&self, key: &str) -> Option<String> {
        self.data.read().get(key).cloned()
    }

    /// All present keys, in no particular order
    pub fn keys(&self) -> Vec<String> {
        self.data.read().keys().cloned().collect()
    }

    /// Number of keys
    pub fn len(&self) -> usize {
        self.data.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.read().is_empty()
    }

    /// Index of the last applied or restored entry
    pub fn last_applied(&self) -> u64 {
        self.last_applied.load(Ordering::Acquire)
    }

    pub fn is_poisoned(&self) -> bool {
        self.poison.lock().is_some()
    }

    /// Why the state machine halted, if it did
    pub fn poison_reason(&self) -> Option<String> {
        self.poison.lock().clone()
    }
}

impl StateMachine for KvStateMachine {
    fn apply(&self, entry: &LogEntry) -> Result<()> {
        KvStateMachine::apply(self, entry)
    }

    fn snapshot(&self) -> Result<Box<dyn FsmSnapshot>> {
        Ok(Box::new(KvStateMachine::snapshot(self)))
    }

    fn restore(&self, meta: SnapshotMeta, reader: &mut dyn Read) -> Result<()> {
        KvStateMachine::restore(self, meta, reader)
    }
}
