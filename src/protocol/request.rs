//! Request definitions
//!
//! Represents requests from clients.

use std::collections::BTreeMap;

/// Request types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RequestType {
    Get = 0x01,
    Set = 0x02,
    Delete = 0x03,
    Ping = 0x04,
    Join = 0x05,
    Detach = 0x06,
    Servers = 0x07,
    State = 0x08,
    Keys = 0x09,
    Stats = 0x0A,
    SetMany = 0x0B,
}

/// A parsed request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    /// Get a value by key
    Get { key: String },

    /// Set a key-value pair
    Set { key: String, value: String },

    /// Delete a key
    Delete { key: String },

    /// Ping (health check)
    Ping,

    /// Add a voter to the cluster
    Join { node_id: String, address: String },

    /// Remove a voter from the cluster
    Detach { node_id: String, address: String },

    /// List the voter configuration
    Servers,

    /// Current role of the serving node
    State,

    /// List all keys (diagnostics)
    Keys,

    /// Consensus statistics (diagnostics)
    Stats,

    /// Set several pairs at once
    SetMany { pairs: BTreeMap<String, String> },
}

impl Request {
    /// Get the request type
    pub fn request_type(&self) -> RequestType {
        match self {
            Request::Get { .. } => RequestType::Get,
            Request::Set { .. } => RequestType::Set,
            Request::Delete { .. } => RequestType::Delete,
            Request::Ping => RequestType::Ping,
            Request::Join { .. } => RequestType::Join,
            Request::Detach { .. } => RequestType::Detach,
            Request::Servers => RequestType::Servers,
            Request::State => RequestType::State,
            Request::Keys => RequestType::Keys,
            Request::Stats => RequestType::Stats,
            Request::SetMany { .. } => RequestType::SetMany,
        }
    }

    /// Whether serving this request changes replicated state
    pub fn is_mutating(&self) -> bool {
        matches!(
            self,
            Request::Set { .. }
                | Request::Delete { .. }
                | Request::SetMany { .. }
                | Request::Join { .. }
                | Request::Detach { .. }
        )
    }

    /// Whether this request reads the key-value data
    pub fn is_read(&self) -> bool {
        matches!(self, Request::Get { .. } | Request::Keys)
    }
}
