//! Response definitions
//!
//! Represents responses to clients.

use serde::{Deserialize, Serialize};

use crate::consensus::ServerInfo;

/// Response status codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Status {
    Ok = 0x00,
    NotFound = 0x01,
    Error = 0x02,
    Redirect = 0x03,
}

/// A response to send to client
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    /// Status code
    pub status: Status,

    /// Optional payload (value for GET, error message for ERROR, leader for REDIRECT)
    pub payload: Option<Vec<u8>>,
}

/// Redirect payload: where writes must go. Empty strings when unknown.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaderInfo {
    pub leader_id: String,
    pub leader_addr: String,
}

impl LeaderInfo {
    /// Back to a server, `None` if the leader was unknown
    pub fn into_server(self) -> Option<ServerInfo> {
        if self.leader_id.is_empty() && self.leader_addr.is_empty() {
            None
        } else {
            Some(ServerInfo::new(self.leader_id, self.leader_addr))
        }
    }
}

impl From<Option<ServerInfo>> for LeaderInfo {
    fn from(leader: Option<ServerInfo>) -> Self {
        match leader {
            Some(server) => Self {
                leader_id: server.id,
                leader_addr: server.address,
            },
            None => Self::default(),
        }
    }
}

impl Response {
    /// Create an OK response with optional payload
    pub fn ok(payload: Option<Vec<u8>>) -> Self {
        Self {
            status: Status::Ok,
            payload,
        }
    }

    /// Create a NOT_FOUND response
    pub fn not_found() -> Self {
        Self {
            status: Status::NotFound,
            payload: None,
        }
    }

    /// Create an ERROR response
    pub fn error(message: &str) -> Self {
        Self {
            status: Status::Error,
            payload: Some(message.as_bytes().to_vec()),
        }
    }

    /// Create a REDIRECT response naming the best-known leader
    pub fn redirect(leader: Option<ServerInfo>) -> Self {
        let info = LeaderInfo::from(leader);
        // Two plain strings always serialize
        let payload = serde_json::to_vec(&info).unwrap_or_default();
        Self {
            status: Status::Redirect,
            payload: Some(payload),
        }
    }
}
