//! TCP Server
//!
//! Accepts connections and hands each one to its own handler thread.
//!
//! The accept loop runs on a non-blocking listener and polls a shutdown flag
//! between accepts. Connections beyond `max_connections` are answered with
//! an ERROR response and closed.

use std::io::{BufWriter, ErrorKind};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crate::config::Config;
use crate::error::Result;
use crate::node::Node;
use crate::protocol::{write_response, Response};

use super::Connection;

/// Pause between accept attempts while no client is waiting
const ACCEPT_POLL_INTERVAL: Duration = Duration::from_millis(20);

/// TCP server for RaftKV
pub struct Server {
    config: Config,
    node: Arc<Node>,
    listener: TcpListener,
    shutdown: Arc<AtomicBool>,
    active: Arc<AtomicUsize>,
}

impl Server {
    /// Bind the listen address from `config`
    pub fn bind(config: Config, node: Arc<Node>) -> Result<Self> {
        let listener = TcpListener::bind(&config.listen_addr)?;
        listener.set_nonblocking(true)?;

        Ok(Self {
            config,
            node,
            listener,
            shutdown: Arc::new(AtomicBool::new(false)),
            active: Arc::new(AtomicUsize::new(0)),
        })
    }

    /// Address actually bound (useful with port 0)
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Flag that stops [`run`](Self::run) when set
    pub fn shutdown_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.shutdown)
    }

    /// Number of connections currently being served
    pub fn active_connections(&self) -> usize {
        self.active.load(Ordering::Acquire)
    }

    /// Start the server (blocking until shutdown)
    pub fn run(&self) -> Result<()> {
        tracing::info!(
            "Node {} listening on {}",
            self.node.config().node_id,
            self.local_addr()?
        );

        while !self.shutdown.load(Ordering::Acquire) {
            match self.listener.accept() {
                Ok((stream, peer)) => self.dispatch(stream, peer),
                Err(e) if e.kind() == ErrorKind::WouldBlock => thread::sleep(ACCEPT_POLL_INTERVAL),
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => {
                    tracing::warn!("Accept failed: {}", e);
                    thread::sleep(ACCEPT_POLL_INTERVAL);
                }
            }
        }

        tracing::info!("Server stopped accepting connections");
        Ok(())
    }

    /// Signal the server to shutdown gracefully
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::Release);
    }

    fn dispatch(&self, stream: TcpStream, peer: SocketAddr) {
        // Accepted sockets may inherit non-blocking mode
        if let Err(e) = stream.set_nonblocking(false) {
            tracing::warn!("Failed to configure connection from {}: {}", peer, e);
            return;
        }

        if self.active.fetch_add(1, Ordering::AcqRel) >= self.config.max_connections {
            self.active.fetch_sub(1, Ordering::AcqRel);
            tracing::warn!(
                "Connection limit {} reached, rejecting {}",
                self.config.max_connections,
                peer
            );
            let mut writer = BufWriter::new(stream);
            let _ = write_response(&mut writer, &Response::error("too many connections"));
            return;
        }

        let node = Arc::clone(&self.node);
        let active = Arc::clone(&self.active);
        let read_ms = self.config.read_timeout_ms;
        let write_ms = self.config.write_timeout_ms;

        let spawned = thread::Builder::new()
            .name(format!("conn-{}", peer))
            .spawn(move || {
                let result = Connection::new(stream, node).and_then(|mut conn| {
                    conn.set_timeouts(read_ms, write_ms)?;
                    conn.handle()
                });
                if let Err(e) = result {
                    tracing::debug!("Connection from {} closed with error: {}", peer, e);
                }
                active.fetch_sub(1, Ordering::AcqRel);
            });

        if let Err(e) = spawned {
            self.active.fetch_sub(1, Ordering::AcqRel);
            tracing::warn!("Failed to spawn connection thread for {}: {}", peer, e);
        }
    }
}
