//! Protocol Module
//!
//! Defines the wire protocol for client-server communication.
//!
//! ## Protocol Format (V1 - Simple Binary)
//!
//! ### Request Format
//! ```text
//! ┌──────────┬──────────┬─────────────────────────────┐
//! │ Cmd (1)  │ Len (4)  │         Payload             │
//! └──────────┴──────────┴─────────────────────────────┘
//! ```
//!
//! ### Requests
//! - 0x01: GET      - Payload: key_len (4) + key
//! - 0x02: SET      - Payload: key_len (4) + key + value
//! - 0x03: DELETE   - Payload: key_len (4) + key
//! - 0x04: PING     - Payload: empty
//! - 0x05: JOIN     - Payload: id_len (4) + id + address
//! - 0x06: DETACH   - Payload: id_len (4) + id + address
//! - 0x07: SERVERS  - Payload: empty
//! - 0x08: STATE    - Payload: empty
//! - 0x09: KEYS     - Payload: empty
//! - 0x0A: STATS    - Payload: empty
//! - 0x0B: SET_MANY - Payload: JSON object of key → value
//!
//! ### Response Format
//! ```text
//! ┌──────────┬──────────┬─────────────────────────────┐
//! │Status(1) │ Len (4)  │         Payload             │
//! └──────────┴──────────┴─────────────────────────────┘
//! ```
//!
//! ### Status Codes
//! - 0x00: OK
//! - 0x01: NOT_FOUND
//! - 0x02: ERROR
//! - 0x03: REDIRECT - Payload: {"leaderId": .., "leaderAddr": ..}

mod request;
mod response;
mod codec;

pub use request::{Request, RequestType};
pub use response::{LeaderInfo, Response, Status};
pub use codec::{
    decode_request, decode_response, encode_request, encode_response, read_request,
    read_response, write_request, write_response, HEADER_SIZE, MAX_PAYLOAD_SIZE,
};
