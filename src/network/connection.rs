//! Connection Handler
//!
//! Handles individual client connections.
//!
//! While a write waits for commit the socket is watched from a second
//! thread; a client that hangs up cancels the wait.

use std::io::{BufReader, BufWriter, ErrorKind};
use std::net::TcpStream;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossbeam::channel::{self, Sender};
use serde::Serialize;

use crate::error::{Result, StoreError};
use crate::node::{Node, Reply};
use crate::protocol::{read_request, write_response, Request, Response};

/// How often a pending write checks that its client is still connected
const PEER_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Handles a single client connection
pub struct Connection {
    /// TCP stream reader (buffered for efficiency)
    reader: BufReader<TcpStream>,

    /// TCP stream writer (buffered for efficiency)
    writer: BufWriter<TcpStream>,

    /// The node serving requests
    node: Arc<Node>,

    /// Peer address for logging
    peer_addr: String,

    /// Configured read timeout, restored after watching a write
    read_timeout: Option<Duration>,
}

impl Connection {
    /// Create a new connection handler
    ///
    /// Sets up buffered I/O and disables Nagle's algorithm
    pub fn new(stream: TcpStream, node: Arc<Node>) -> Result<Self> {
        let peer_addr = stream
            .peer_addr()
            .map(|a| a.to_string())
            .unwrap_or_else(|_| "unknown".to_string());

        stream.set_nodelay(true)?;

        // Clone stream for separate read/write handles
        let read_stream = stream.try_clone()?;

        Ok(Self {
            reader: BufReader::new(read_stream),
            writer: BufWriter::new(stream),
            node,
            peer_addr,
            read_timeout: None,
        })
    }

    /// Configure connection timeouts (zero leaves a direction unbounded)
    pub fn set_timeouts(&mut self, read_ms: u64, write_ms: u64) -> Result<()> {
        if read_ms > 0 {
            self.read_timeout = Some(Duration::from_millis(read_ms));
            self.reader.get_ref().set_read_timeout(self.read_timeout)?;
        }
        if write_ms > 0 {
            self.writer
                .get_ref()
                .set_write_timeout(Some(Duration::from_millis(write_ms)))?;
        }
        Ok(())
    }

    /// Handle the connection (blocking until closed)
    ///
    /// Reads requests in a loop and sends responses.
    /// Returns when the client disconnects or an error occurs.
    pub fn handle(&mut self) -> Result<()> {
        tracing::debug!("Connection established from {}", self.peer_addr);

        loop {
            let request = match read_request(&mut self.reader) {
                Ok(request) => request,
                Err(StoreError::Io(ref e)) if is_disconnect(e.kind()) => {
                    tracing::debug!("Client {} disconnected ({:?})", self.peer_addr, e.kind());
                    return Ok(());
                }
                Err(StoreError::Io(ref e))
                    if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) =>
                {
                    tracing::debug!("Read timeout for client {}", self.peer_addr);
                    return Ok(());
                }
                Err(e) => {
                    tracing::warn!("Error reading from {}: {}", self.peer_addr, e);
                    let _ = write_response(&mut self.writer, &Response::error(&e.to_string()));
                    return Err(e);
                }
            };

            tracing::trace!("Received request from {}: {:?}", self.peer_addr, request);

            let response = self.execute(request);

            if let Err(e) = write_response(&mut self.writer, &response) {
                if let StoreError::Io(ref io_err) = e {
                    if is_disconnect(io_err.kind()) || io_err.kind() == ErrorKind::BrokenPipe {
                        tracing::debug!(
                            "Client {} disconnected before response could be sent: {}",
                            self.peer_addr,
                            e
                        );
                        return Ok(());
                    }
                }
                tracing::warn!("Error writing to {}: {}", self.peer_addr, e);
                return Err(e);
            }
        }
    }

    /// Execute a request and turn the outcome into a response
    fn execute(&self, request: Request) -> Response {
        let writes_keys = matches!(
            request,
            Request::Set { .. } | Request::Delete { .. } | Request::SetMany { .. }
        );
        let outcome = if writes_keys {
            self.execute_watched(request)
        } else {
            self.node.execute(request)
        };

        match outcome {
            Ok(reply) => reply_to_response(reply),
            Err(StoreError::NotLeader { leader }) => {
                tracing::warn!(
                    "Redirecting {} to leader {:?}",
                    self.peer_addr,
                    leader.as_ref().map(|l| &l.address)
                );
                Response::redirect(leader)
            }
            Err(e) => Response::error(&e.to_string()),
        }
    }

    /// Run a write, cancelling its commit wait if the peer
    /// hangs up before it resolves
    fn execute_watched(&self, request: Request) -> Result<Reply> {
        let watch_stream = self.reader.get_ref().try_clone()?;
        watch_stream.set_read_timeout(Some(PEER_POLL_INTERVAL))?;

        let (cancel_tx, cancel_rx) = channel::bounded(1);
        let done = AtomicBool::new(false);

        let outcome = thread::scope(|scope| {
            scope.spawn(|| watch_peer(&watch_stream, &done, &cancel_tx, &self.peer_addr));
            let outcome = self.node.execute_cancellable(request, &cancel_rx);
            done.store(true, Ordering::Release);
            outcome
        });

        if let Err(e) = self.reader.get_ref().set_read_timeout(self.read_timeout) {
            tracing::warn!("Failed to restore read timeout for {}: {}", self.peer_addr, e);
        }
        outcome
    }

    /// Get the peer address string
    pub fn peer_addr(&self) -> &str {
        &self.peer_addr
    }
}

/// Poll the socket without consuming input until `done` is set.
/// EOF or a reset sends on `cancel`.
fn watch_peer(stream: &TcpStream, done: &AtomicBool, cancel: &Sender<()>, peer: &str) {
    let mut byte = [0u8; 1];
    while !done.load(Ordering::Acquire) {
        match stream.peek(&mut byte) {
            Ok(0) => {
                tracing::debug!("Client {} hung up during a pending write", peer);
                let _ = cancel.try_send(());
                return;
            }
            // Next request already queued; the client is still there
            Ok(_) => thread::sleep(PEER_POLL_INTERVAL),
            Err(e) if is_disconnect(e.kind()) => {
                tracing::debug!("Client {} dropped during a pending write: {}", peer, e);
                let _ = cancel.try_send(());
                return;
            }
            Err(e)
                if matches!(
                    e.kind(),
                    ErrorKind::WouldBlock | ErrorKind::TimedOut | ErrorKind::Interrupted
                ) => {}
            Err(e) => {
                tracing::debug!("Stopped watching {}: {}", peer, e);
                return;
            }
        }
    }
}

fn is_disconnect(kind: ErrorKind) -> bool {
    matches!(
        kind,
        ErrorKind::UnexpectedEof | ErrorKind::ConnectionReset | ErrorKind::ConnectionAborted
    )
}

fn reply_to_response(reply: Reply) -> Response {
    match reply {
        Reply::Value(Some(value)) => Response::ok(Some(value.into_bytes())),
        Reply::Value(None) => Response::not_found(),
        Reply::Done => Response::ok(None),
        Reply::Pong => Response::ok(Some(b"PONG".to_vec())),
        Reply::State(state) => Response::ok(Some(state.into_bytes())),
        Reply::Servers(servers) => json_response(&servers),
        Reply::Keys(keys) => json_response(&keys),
        Reply::Stats(stats) => json_response(&stats),
    }
}

fn json_response<T: Serialize>(value: &T) -> Response {
    match serde_json::to_vec(value) {
        Ok(payload) => Response::ok(Some(payload)),
        Err(e) => Response::error(&format!("failed to encode reply: {}", e)),
    }
}
