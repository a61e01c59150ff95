//! TCP sessions, handshake, send/recv loops, and reconnection for weft.
//!
//! This crate turns a TCP stream into a registered [`weft_registry::Link`]:
//! a symmetric handshake negotiates protocol version and link naming, then
//! a sender task drains a FIFO frame queue (emitting keepalives when idle)
//! while a receiver task decodes inbound frames and hands them to the
//! node's routing core with the link name prepended to each source path.
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use weft_registry::Node;
//! use weft_session::{Client, Server};
//!
//! # async fn example() {
//! let node = Arc::new(Node::new());
//!
//! // Accept peers on one task, dial out on another; both re-register
//! // links into the same node so routing recovers across reconnects.
//! tokio::spawn(Server::new(node.clone(), "0.0.0.0:1540").run());
//! tokio::spawn(Client::new(node, "10.0.0.2:1540", "hub").run());
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod handshake;
pub mod manager;
pub mod session;
pub mod transport;

pub use error::SessionError;
pub use handshake::{exchange_header, HandshakeError, HandshakeOutcome};
pub use manager::{Client, Server};
pub use session::{ReadOutcome, Session, SessionConfig};
pub use transport::{connect_tcp, listen_tcp};
