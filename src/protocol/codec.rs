//! Protocol codec
//!
//! Encoding and decoding functions for the wire protocol.
//!
//! ## Wire Format
//!
//! ### Request Format
//! ```text
//! ┌──────────┬──────────┬─────────────────────────────┐
//! │ Cmd (1)  │ Len (4)  │         Payload             │
//! └──────────┴──────────┴─────────────────────────────┘
//! ```
//!
//! ### Payload Fields
//! Strings are UTF-8. A leading field is `len (4 bytes) + bytes`; the last
//! field of a payload takes whatever remains:
//! - GET/DELETE:  key_len + key
//! - SET:         key_len + key + value
//! - JOIN/DETACH: id_len + id + address
//! - SET_MANY:    JSON object
//! - others:      empty
//!
//! ### Response Format
//! ```text
//! ┌──────────┬──────────┬─────────────────────────────┐
//! │Status(1) │ Len (4)  │         Payload             │
//! └──────────┴──────────┴─────────────────────────────┘
//! ```

use std::collections::BTreeMap;
use std::io::{Read, Write};

use super::{Request, RequestType, Response, Status};
use crate::error::{Result, StoreError};

/// Header size: 1 byte command/status + 4 bytes length
pub const HEADER_SIZE: usize = 5;

/// Maximum payload size (16 MB)
pub const MAX_PAYLOAD_SIZE: u32 = 16 * 1024 * 1024;

// =============================================================================
// Request Encoding/Decoding
// =============================================================================

/// Encode a request to bytes
///
/// Format: cmd_type (1) + payload_len (4) + payload
pub fn encode_request(request: &Request) -> Result<Vec<u8>> {
    let cmd_type = request.request_type() as u8;

    // Build payload based on request type
    let payload = match request {
        Request::Get { key } | Request::Delete { key } => prefixed(key, ""),
        Request::Set { key, value } => prefixed(key, value),
        Request::Join { node_id, address } | Request::Detach { node_id, address } => {
            prefixed(node_id, address)
        }
        Request::SetMany { pairs } => serde_json::to_vec(pairs)?,
        Request::Ping | Request::Servers | Request::State | Request::Keys | Request::Stats => {
            Vec::new()
        }
    };

    Ok(frame(cmd_type, &payload))
}

/// Decode a request from bytes
pub fn decode_request(bytes: &[u8]) -> Result<Request> {
    let (cmd_type, payload) = split_frame(bytes, "request")?;

    // Parse request based on type
    match cmd_type {
        t if t == RequestType::Get as u8 => {
            let (key, rest) = read_field(payload, "GET key")?;
            expect_empty(rest, "GET")?;
            Ok(Request::Get { key })
        }
        t if t == RequestType::Set as u8 => {
            let (key, rest) = read_field(payload, "SET key")?;
            let value = utf8(rest, "SET value")?;
            Ok(Request::Set { key, value })
        }
        t if t == RequestType::Delete as u8 => {
            let (key, rest) = read_field(payload, "DELETE key")?;
            expect_empty(rest, "DELETE")?;
            Ok(Request::Delete { key })
        }
        t if t == RequestType::Join as u8 => {
            let (node_id, rest) = read_field(payload, "JOIN id")?;
            let address = utf8(rest, "JOIN address")?;
            Ok(Request::Join { node_id, address })
        }
        t if t == RequestType::Detach as u8 => {
            let (node_id, rest) = read_field(payload, "DETACH id")?;
            let address = utf8(rest, "DETACH address")?;
            Ok(Request::Detach { node_id, address })
        }
        t if t == RequestType::SetMany as u8 => {
            let pairs: BTreeMap<String, String> = serde_json::from_slice(payload)
                .map_err(|e| StoreError::Protocol(format!("SET_MANY: invalid JSON: {}", e)))?;
            Ok(Request::SetMany { pairs })
        }
        t if t == RequestType::Ping as u8 => empty_request(payload, "PING", Request::Ping),
        t if t == RequestType::Servers as u8 => empty_request(payload, "SERVERS", Request::Servers),
        t if t == RequestType::State as u8 => empty_request(payload, "STATE", Request::State),
        t if t == RequestType::Keys as u8 => empty_request(payload, "KEYS", Request::Keys),
        t if t == RequestType::Stats as u8 => empty_request(payload, "STATS", Request::Stats),
        _ => Err(StoreError::Protocol(format!(
            "Unknown request type: 0x{:02x}",
            cmd_type
        ))),
    }
}

/// Length-prefixed first field followed by the raw last field
fn prefixed(first: &str, last: &str) -> Vec<u8> {
    let mut payload = Vec::with_capacity(4 + first.len() + last.len());
    payload.extend_from_slice(&(first.len() as u32).to_be_bytes());
    payload.extend_from_slice(first.as_bytes());
    payload.extend_from_slice(last.as_bytes());
    payload
}

/// Read a length-prefixed string, returning it and the remaining bytes
fn read_field<'a>(payload: &'a [u8], what: &str) -> Result<(String, &'a [u8])> {
    if payload.len() < 4 {
        return Err(StoreError::Protocol(format!("{}: missing length", what)));
    }

    let len = u32::from_be_bytes([payload[0], payload[1], payload[2], payload[3]]) as usize;

    if payload.len() < 4 + len {
        return Err(StoreError::Protocol(format!(
            "{}: incomplete (expected {}, got {})",
            what,
            len,
            payload.len() - 4
        )));
    }

    let field = utf8(&payload[4..4 + len], what)?;
    Ok((field, &payload[4 + len..]))
}

fn utf8(bytes: &[u8], what: &str) -> Result<String> {
    String::from_utf8(bytes.to_vec())
        .map_err(|_| StoreError::Protocol(format!("{}: not valid UTF-8", what)))
}

fn expect_empty(rest: &[u8], what: &str) -> Result<()> {
    if !rest.is_empty() {
        return Err(StoreError::Protocol(format!(
            "{} request: unexpected {} trailing bytes",
            what,
            rest.len()
        )));
    }
    Ok(())
}

fn empty_request(payload: &[u8], what: &str, request: Request) -> Result<Request> {
    if !payload.is_empty() {
        return Err(StoreError::Protocol(format!(
            "{} request: unexpected payload of {} bytes",
            what,
            payload.len()
        )));
    }
    Ok(request)
}

// =============================================================================
// Response Encoding/Decoding
// =============================================================================

/// Encode a response to bytes
///
/// Format: status (1) + payload_len (4) + payload
pub fn encode_response(response: &Response) -> Vec<u8> {
    let payload = response.payload.as_deref().unwrap_or(&[]);
    frame(response.status as u8, payload)
}

/// Decode a response from bytes
pub fn decode_response(bytes: &[u8]) -> Result<Response> {
    let (status_byte, payload) = split_frame(bytes, "response")?;

    // Parse status
    let status = match status_byte {
        0x00 => Status::Ok,
        0x01 => Status::NotFound,
        0x02 => Status::Error,
        0x03 => Status::Redirect,
        _ => {
            return Err(StoreError::Protocol(format!(
                "Unknown response status: 0x{:02x}",
                status_byte
            )))
        }
    };

    // Extract payload
    let payload = if payload.is_empty() {
        None
    } else {
        Some(payload.to_vec())
    };

    Ok(Response { status, payload })
}

// =============================================================================
// Framing
// =============================================================================

fn frame(tag: u8, payload: &[u8]) -> Vec<u8> {
    let mut message = Vec::with_capacity(HEADER_SIZE + payload.len());
    message.push(tag);
    message.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    message.extend_from_slice(payload);
    message
}

/// Validate a frame, returning its tag byte and payload
fn split_frame<'a>(bytes: &'a [u8], what: &str) -> Result<(u8, &'a [u8])> {
    if bytes.len() < HEADER_SIZE {
        return Err(StoreError::Protocol(format!(
            "Incomplete {} header: expected {} bytes, got {}",
            what,
            HEADER_SIZE,
            bytes.len()
        )));
    }

    let payload_len = payload_len(&bytes[..HEADER_SIZE], what)?;

    let total_len = HEADER_SIZE + payload_len;
    if bytes.len() < total_len {
        return Err(StoreError::Protocol(format!(
            "Incomplete {} payload: expected {} bytes, got {}",
            what,
            total_len,
            bytes.len()
        )));
    }

    Ok((bytes[0], &bytes[HEADER_SIZE..total_len]))
}

fn payload_len(header: &[u8], what: &str) -> Result<usize> {
    let len = u32::from_be_bytes([header[1], header[2], header[3], header[4]]);

    if len > MAX_PAYLOAD_SIZE {
        return Err(StoreError::Protocol(format!(
            "{} payload too large: {} bytes (max {})",
            what, len, MAX_PAYLOAD_SIZE
        )));
    }
    Ok(len as usize)
}

// =============================================================================
// Stream-based I/O helpers
// =============================================================================

/// Read one complete frame (header + payload) from a stream
fn read_frame<R: Read>(reader: &mut R, what: &str) -> Result<Vec<u8>> {
    // Read header first
    let mut header = [0u8; HEADER_SIZE];
    reader.read_exact(&mut header)?;

    let len = payload_len(&header, what)?;

    let mut message = Vec::with_capacity(HEADER_SIZE + len);
    message.extend_from_slice(&header);
    message.resize(HEADER_SIZE + len, 0);
    if len > 0 {
        reader.read_exact(&mut message[HEADER_SIZE..])?;
    }
    Ok(message)
}

/// Read a complete request from a stream
///
/// Blocks until a complete request is received or an error occurs
pub fn read_request<R: Read>(reader: &mut R) -> Result<Request> {
    let message = read_frame(reader, "request")?;
    decode_request(&message)
}

/// Write a request to a stream
pub fn write_request<W: Write>(writer: &mut W, request: &Request) -> Result<()> {
    let bytes = encode_request(request)?;
    writer.write_all(&bytes)?;
    writer.flush()?;
    Ok(())
}

/// Read a complete response from a stream
pub fn read_response<R: Read>(reader: &mut R) -> Result<Response> {
    let message = read_frame(reader, "response")?;
    decode_response(&message)
}

/// Write a response to a stream
pub fn write_response<W: Write>(writer: &mut W, response: &Response) -> Result<()> {
    let bytes = encode_response(response);
    writer.write_all(&bytes)?;
    writer.flush()?;
    Ok(())
}
