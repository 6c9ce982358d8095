//! Blocking client
//!
//! One TCP connection, one request in flight at a time. Used by the CLI and
//! by the integration tests.

use std::collections::BTreeMap;
use std::io::{BufReader, BufWriter};
use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;

use serde::de::DeserializeOwned;

use crate::consensus::ServerInfo;
use crate::error::{Result, StoreError};
use crate::protocol::{read_response, write_request, LeaderInfo, Request, Response, Status};

/// Client connection to a RaftKV node
pub struct Client {
    reader: BufReader<TcpStream>,
    writer: BufWriter<TcpStream>,
}

impl Client {
    /// Connect to a node
    pub fn connect<A: ToSocketAddrs>(addr: A) -> Result<Self> {
        let stream = TcpStream::connect(addr)?;
        stream.set_nodelay(true)?;
        let read_stream = stream.try_clone()?;

        Ok(Self {
            reader: BufReader::new(read_stream),
            writer: BufWriter::new(stream),
        })
    }

    /// Bound how long a single reply may take
    pub fn set_timeout(&self, timeout: Option<Duration>) -> Result<()> {
        self.reader.get_ref().set_read_timeout(timeout)?;
        self.writer.get_ref().set_write_timeout(timeout)?;
        Ok(())
    }

    /// Send a request and return the raw response
    pub fn call(&mut self, request: &Request) -> Result<Response> {
        write_request(&mut self.writer, request)?;
        read_response(&mut self.reader)
    }

    // =========================================================================
    // Typed requests
    // =========================================================================

    /// `None` when the key is absent
    pub fn get(&mut self, key: &str) -> Result<Option<String>> {
        let response = self.call(&Request::Get {
            key: key.to_string(),
        })?;
        match response.status {
            Status::NotFound => Ok(None),
            _ => check(response).and_then(|payload| utf8(payload).map(Some)),
        }
    }

    pub fn set(&mut self, key: &str, value: &str) -> Result<()> {
        self.unit(Request::Set {
            key: key.to_string(),
            value: value.to_string(),
        })
    }

    pub fn delete(&mut self, key: &str) -> Result<()> {
        self.unit(Request::Delete {
            key: key.to_string(),
        })
    }

    pub fn set_many(&mut self, pairs: BTreeMap<String, String>) -> Result<()> {
        self.unit(Request::SetMany { pairs })
    }

    pub fn join(&mut self, node_id: &str, address: &str) -> Result<()> {
        self.unit(Request::Join {
            node_id: node_id.to_string(),
            address: address.to_string(),
        })
    }

    pub fn detach(&mut self, node_id: &str, address: &str) -> Result<()> {
        self.unit(Request::Detach {
            node_id: node_id.to_string(),
            address: address.to_string(),
        })
    }

    pub fn servers(&mut self) -> Result<Vec<ServerInfo>> {
        self.json(Request::Servers)
    }

    pub fn keys(&mut self) -> Result<Vec<String>> {
        self.json(Request::Keys)
    }

    pub fn stats(&mut self) -> Result<BTreeMap<String, String>> {
        self.json(Request::Stats)
    }

    /// Role name of the node
    pub fn state(&mut self) -> Result<String> {
        let response = self.call(&Request::State)?;
        check(response).and_then(utf8)
    }

    pub fn ping(&mut self) -> Result<()> {
        self.unit(Request::Ping)
    }

    fn unit(&mut self, request: Request) -> Result<()> {
        let response = self.call(&request)?;
        check(response).map(|_| ())
    }

    fn json<T: DeserializeOwned>(&mut self, request: Request) -> Result<T> {
        let response = self.call(&request)?;
        let payload = check(response)?;
        Ok(serde_json::from_slice(&payload)?)
    }
}

/// Payload of an OK response; everything else becomes an error
fn check(response: Response) -> Result<Vec<u8>> {
    let payload = response.payload.unwrap_or_default();
    match response.status {
        Status::Ok => Ok(payload),
        Status::NotFound => Err(StoreError::Remote("not found".to_string())),
        Status::Error => Err(StoreError::Remote(String::from_utf8_lossy(&payload).into_owned())),
        Status::Redirect => {
            let info: LeaderInfo = serde_json::from_slice(&payload)
                .map_err(|e| StoreError::Protocol(format!("bad redirect payload: {}", e)))?;
            Err(StoreError::NotLeader {
                leader: info.into_server(),
            })
        }
    }
}

fn utf8(payload: Vec<u8>) -> Result<String> {
    String::from_utf8(payload).map_err(|_| StoreError::Protocol("reply is not valid UTF-8".to_string()))
}
