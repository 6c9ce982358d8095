//! Write Coordinator
//!
//! Turns client writes into log entries on the leader and waits for the
//! consensus module to report the outcome.
//!
//! ## Write path
//! 1. Require leadership (no forwarding; redirecting is the router's job)
//! 2. Encode the command
//! 3. Submit to consensus
//! 4. Wait for commit, bounded by `apply_timeout` and optionally cancellable
//!
//! Failures are returned as-is and never retried here. SET and DELETE are
//! idempotent, so a caller may safely retry after a timeout.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use crossbeam::channel::{self, Receiver};

use crate::command::Command;
use crate::consensus::Consensus;
use crate::error::{Result, StoreError};
use crate::router::LeaderGuard;

/// Largest number of pairs accepted by one `set_many`
pub const MAX_BATCH_KEYS: usize = 100;

/// Leader-only write path
pub struct WriteCoordinator {
    consensus: Arc<dyn Consensus>,
    guard: LeaderGuard,
    apply_timeout: Duration,
}

impl WriteCoordinator {
    pub fn new(consensus: Arc<dyn Consensus>, guard: LeaderGuard, apply_timeout: Duration) -> Self {
        Self {
            consensus,
            guard,
            apply_timeout,
        }
    }

    /// Set a key; returns the log index it committed at
    pub fn set(&self, key: &str, value: &str) -> Result<u64> {
        self.submit(Command::set(key, value), &channel::never())
    }

    /// Delete a key; deleting an absent key succeeds
    pub fn delete(&self, key: &str) -> Result<u64> {
        self.submit(Command::delete(key), &channel::never())
    }

    /// Set a key, abandoning the wait when `cancel` fires or disconnects
    pub fn set_cancellable(&self, key: &str, value: &str, cancel: &Receiver<()>) -> Result<u64> {
        self.submit(Command::set(key, value), cancel)
    }

    /// Delete a key, abandoning the wait when `cancel` fires or disconnects
    pub fn delete_cancellable(&self, key: &str, cancel: &Receiver<()>) -> Result<u64> {
        self.submit(Command::delete(key), cancel)
    }

    /// Set up to [`MAX_BATCH_KEYS`] pairs, one entry each, in key order.
    ///
    /// Stops at the first failure; pairs before it stay committed.
    pub fn set_many(&self, pairs: &BTreeMap<String, String>) -> Result<u64> {
        self.set_many_cancellable(pairs, &channel::never())
    }

    /// [`set_many`](Self::set_many), stopping before the next pair once
    /// `cancel` fires or disconnects
    pub fn set_many_cancellable(
        &self,
        pairs: &BTreeMap<String, String>,
        cancel: &Receiver<()>,
    ) -> Result<u64> {
        if pairs.len() > MAX_BATCH_KEYS {
            return Err(StoreError::BatchTooLarge {
                count: pairs.len(),
                max: MAX_BATCH_KEYS,
            });
        }

        let mut last_index = 0;
        for (key, value) in pairs {
            last_index = self.submit(Command::set(key.as_str(), value.as_str()), cancel)?;
        }
        Ok(last_index)
    }

    /// Deadline applied to every commit wait
    pub fn apply_timeout(&self) -> Duration {
        self.apply_timeout
    }

    fn submit(&self, command: Command, cancel: &Receiver<()>) -> Result<u64> {
        self.guard.check()?;

        let data = command.encode()?;
        let outcome = self
            .consensus
            .submit(Bytes::from(data))
            .wait_or_cancel(self.apply_timeout, cancel);

        match outcome {
            Ok(index) => {
                tracing::debug!("Committed {:?} {} at index {}", command.op, command.key, index);
                Ok(index)
            }
            Err(StoreError::Consensus(reason)) => {
                tracing::warn!("Consensus rejected command for {}: {}", command.key, reason);
                Err(StoreError::ApplyFailed(reason))
            }
            Err(e) => {
                tracing::warn!("Command for {} not confirmed: {}", command.key, e);
                Err(e)
            }
        }
    }
}
