//! Command Codec
//!
//! Log entries handed to the consensus module carry one JSON-encoded command:
//!
//! ```text
//! {"op":"set","key":"<key>","value":"<value>"}
//! {"op":"delete","key":"<key>"}
//! ```
//!
//! Decoding is strict: an unknown op, a missing key, or a `set` without a
//! value is a decode error. The state machine treats such an entry as fatal.

use serde::{Deserialize, Serialize};

use crate::error::{Result, StoreError};

/// Operation carried by a log entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Op {
    Set,
    Delete,
}

/// A replicated command
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Command {
    pub op: Op,
    pub key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
}

impl Command {
    /// Build a SET command
    pub fn set(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            op: Op::Set,
            key: key.into(),
            value: Some(value.into()),
        }
    }

    /// Build a DELETE command
    pub fn delete(key: impl Into<String>) -> Self {
        Self {
            op: Op::Delete,
            key: key.into(),
            value: None,
        }
    }

    /// Encode to the log entry payload
    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Decode a log entry payload
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let command: Command =
            serde_json::from_slice(bytes).map_err(|e| StoreError::Decode(e.to_string()))?;

        match (command.op, &command.value) {
            (Op::Set, None) => Err(StoreError::Decode(format!(
                "set command for key {:?} has no value",
                command.key
            ))),
            _ => Ok(command),
        }
    }
}
