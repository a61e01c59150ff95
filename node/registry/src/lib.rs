//! Routing registry mapping paths to handlers and links for weft.
//!
//! A [`Node`] is the routing core of one process: it owns a map of named
//! local handlers and a map of named links, and dispatches each message by
//! destination path. Broadcasts (no destination) reach every handler and
//! every link except the one a message arrived from, which prevents echo
//! loops across the network.
//!
//! The registry is safe for concurrent use from arbitrary tasks. Dispatch
//! takes a snapshot of the relevant map and releases all locks before
//! invoking a handler, so a slow or re-entrant handler can never block
//! registration or deadlock iteration.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod link;
pub mod node;
pub mod path;

pub use error::RegistryError;
pub use link::{FilteredLink, InProcessLink, Link, LinkRef};
pub use node::{FnHandler, Handler, Node};
pub use path::{prepend_link, split_first};
