//! Network Module
//!
//! TCP server and client handling.
//!
//! ## Architecture
//! - Single acceptor thread polling a shutdown flag
//! - One handler thread per connection, capped by `max_connections`
//! - Requests routed through [`Node`](crate::node::Node)

mod server;
mod connection;
mod client;

pub use server::Server;
pub use connection::Connection;
pub use client::Client;
