//! Codec Tests
//!
//! Tests for request and response encoding/decoding.

use std::collections::BTreeMap;
use std::io::Cursor;

use raftkv::consensus::ServerInfo;
use raftkv::error::StoreError;
use raftkv::protocol::{
    decode_request, decode_response, encode_request, encode_response, read_request,
    read_response, write_request, write_response, LeaderInfo, Request, Response, Status,
    HEADER_SIZE, MAX_PAYLOAD_SIZE,
};

// =============================================================================
// Request Encoding/Decoding Tests
// =============================================================================

#[test]
fn test_encode_get_layout() {
    let encoded = encode_request(&Request::Get { key: "hello".into() }).unwrap();

    assert_eq!(encoded[0], 0x01);
    assert_eq!(&encoded[1..5], &9u32.to_be_bytes());
    assert_eq!(&encoded[5..9], &5u32.to_be_bytes());
    assert_eq!(&encoded[9..], b"hello");
}

#[test]
fn test_encode_decode_set() {
    let request = Request::Set {
        key: "mykey".into(),
        value: "my value with spaces".into(),
    };
    let decoded = decode_request(&encode_request(&request).unwrap()).unwrap();

    assert_eq!(decoded, request);
}

#[test]
fn test_set_with_empty_value() {
    let request = Request::Set {
        key: "k".into(),
        value: String::new(),
    };
    let decoded = decode_request(&encode_request(&request).unwrap()).unwrap();

    assert_eq!(decoded, request);
}

#[test]
fn test_encode_decode_join_detach() {
    for request in [
        Request::Join {
            node_id: "node-2".into(),
            address: "10.0.0.2:7000".into(),
        },
        Request::Detach {
            node_id: "node-3".into(),
            address: "10.0.0.3:7000".into(),
        },
    ] {
        let decoded = decode_request(&encode_request(&request).unwrap()).unwrap();
        assert_eq!(decoded, request);
    }
}

#[test]
fn test_set_many_payload_is_json() {
    let mut pairs = BTreeMap::new();
    pairs.insert("a".to_string(), "1".to_string());
    pairs.insert("b".to_string(), "2".to_string());
    let request = Request::SetMany { pairs };

    let encoded = encode_request(&request).unwrap();
    assert_eq!(encoded[0], 0x0B);
    assert_eq!(&encoded[HEADER_SIZE..], br#"{"a":"1","b":"2"}"#);
    assert_eq!(decode_request(&encoded).unwrap(), request);
}

#[test]
fn test_empty_requests_have_empty_payload() {
    for (request, code) in [
        (Request::Ping, 0x04),
        (Request::Servers, 0x07),
        (Request::State, 0x08),
        (Request::Keys, 0x09),
        (Request::Stats, 0x0A),
    ] {
        let encoded = encode_request(&request).unwrap();
        assert_eq!(encoded, vec![code, 0, 0, 0, 0]);
        assert_eq!(decode_request(&encoded).unwrap(), request);
    }
}

// =============================================================================
// Malformed Request Tests
// =============================================================================

#[test]
fn test_decode_unknown_request_type() {
    let result = decode_request(&[0xFF, 0, 0, 0, 0]);
    assert!(matches!(result, Err(StoreError::Protocol(_))));
}

#[test]
fn test_decode_incomplete_header() {
    let result = decode_request(&[0x01, 0, 0]);
    assert!(matches!(result, Err(StoreError::Protocol(_))));
}

#[test]
fn test_decode_incomplete_payload() {
    let result = decode_request(&[0x01, 0, 0, 0, 10, 0, 0]);
    assert!(matches!(result, Err(StoreError::Protocol(_))));
}

#[test]
fn test_decode_key_length_beyond_payload() {
    // Payload of 6 bytes claims a 100-byte key
    let result = decode_request(&[0x01, 0, 0, 0, 6, 0, 0, 0, 100, b'a', b'b']);
    assert!(matches!(result, Err(StoreError::Protocol(_))));
}

#[test]
fn test_decode_get_with_trailing_bytes() {
    let result = decode_request(&[0x01, 0, 0, 0, 6, 0, 0, 0, 1, b'k', b'x']);
    assert!(matches!(result, Err(StoreError::Protocol(_))));
}

#[test]
fn test_decode_ping_with_payload() {
    let result = decode_request(&[0x04, 0, 0, 0, 1, 0]);
    assert!(matches!(result, Err(StoreError::Protocol(_))));
}

#[test]
fn test_decode_invalid_utf8_key() {
    let result = decode_request(&[0x01, 0, 0, 0, 6, 0, 0, 0, 2, 0xC3, 0x28]);
    assert!(matches!(result, Err(StoreError::Protocol(_))));
}

#[test]
fn test_decode_payload_too_large() {
    let len = (MAX_PAYLOAD_SIZE + 1).to_be_bytes();
    let result = decode_request(&[0x02, len[0], len[1], len[2], len[3]]);
    assert!(matches!(result, Err(StoreError::Protocol(_))));
}

#[test]
fn test_decode_set_many_bad_json() {
    let result = decode_request(&[0x0B, 0, 0, 0, 2, b'[', b'1']);
    assert!(matches!(result, Err(StoreError::Protocol(_))));
}

// =============================================================================
// Response Encoding/Decoding Tests
// =============================================================================

#[test]
fn test_encode_decode_ok_with_value() {
    let response = Response::ok(Some(b"value".to_vec()));
    let decoded = decode_response(&encode_response(&response)).unwrap();

    assert_eq!(decoded, response);
}

#[test]
fn test_encode_decode_not_found() {
    let encoded = encode_response(&Response::not_found());
    assert_eq!(encoded, vec![0x01, 0, 0, 0, 0]);
    assert_eq!(decode_response(&encoded).unwrap().status, Status::NotFound);
}

#[test]
fn test_encode_decode_error() {
    let decoded = decode_response(&encode_response(&Response::error("boom"))).unwrap();

    assert_eq!(decoded.status, Status::Error);
    assert_eq!(decoded.payload, Some(b"boom".to_vec()));
}

#[test]
fn test_redirect_payload_names_leader() {
    let response = Response::redirect(Some(ServerInfo::new("A", "10.0.0.1:7000")));
    let decoded = decode_response(&encode_response(&response)).unwrap();

    assert_eq!(decoded.status, Status::Redirect);
    let json: serde_json::Value = serde_json::from_slice(&decoded.payload.unwrap()).unwrap();
    assert_eq!(json["leaderId"], "A");
    assert_eq!(json["leaderAddr"], "10.0.0.1:7000");
}

#[test]
fn test_redirect_without_leader() {
    let response = Response::redirect(None);
    let info: LeaderInfo = serde_json::from_slice(response.payload.as_ref().unwrap()).unwrap();

    assert_eq!(info, LeaderInfo::default());
    assert_eq!(info.into_server(), None);
}

#[test]
fn test_decode_unknown_status() {
    let result = decode_response(&[0x7F, 0, 0, 0, 0]);
    assert!(matches!(result, Err(StoreError::Protocol(_))));
}

// =============================================================================
// Stream I/O Tests
// =============================================================================

#[test]
fn test_stream_requests_back_to_back() {
    let mut buffer = Vec::new();
    write_request(&mut buffer, &Request::Set { key: "a".into(), value: "1".into() }).unwrap();
    write_request(&mut buffer, &Request::Get { key: "a".into() }).unwrap();
    write_request(&mut buffer, &Request::Ping).unwrap();

    let mut cursor = Cursor::new(buffer);
    assert!(matches!(read_request(&mut cursor).unwrap(), Request::Set { .. }));
    assert_eq!(read_request(&mut cursor).unwrap(), Request::Get { key: "a".into() });
    assert_eq!(read_request(&mut cursor).unwrap(), Request::Ping);

    // Clean EOF surfaces as an I/O error
    assert!(matches!(read_request(&mut cursor), Err(StoreError::Io(_))));
}

#[test]
fn test_stream_response() {
    let mut buffer = Vec::new();
    write_response(&mut buffer, &Response::ok(Some(b"v".to_vec()))).unwrap();
    write_response(&mut buffer, &Response::not_found()).unwrap();

    let mut cursor = Cursor::new(buffer);
    assert_eq!(read_response(&mut cursor).unwrap().payload, Some(b"v".to_vec()));
    assert_eq!(read_response(&mut cursor).unwrap().status, Status::NotFound);
}

#[test]
fn test_stream_rejects_oversized_header_without_reading_payload() {
    let len = (MAX_PAYLOAD_SIZE + 1).to_be_bytes();
    let mut cursor = Cursor::new(vec![0x01, len[0], len[1], len[2], len[3]]);

    assert!(matches!(read_request(&mut cursor), Err(StoreError::Protocol(_))));
}
