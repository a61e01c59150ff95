//! Typed endpoints over the routing registry.
//!
//! The registry moves opaque payloads between named paths; this crate
//! gives those payloads shape. A boolean or float [`cell`] published on
//! one node can be mirrored on any peer, event channels fire across the
//! network, log entries ship to remote targets, and raw byte streams
//! flow chunk by chunk. The [`relay`] module adds automatic log fan-out
//! across every reachable peer.
//!
//! ```no_run
//! use std::sync::Arc;
//! use weft_channel::{publish_bool, subscribe_bool, BooleanCell};
//! use weft_registry::Node;
//!
//! # fn main() -> Result<(), weft_channel::ChannelError> {
//! let hub = Arc::new(Node::new());
//! let armed = BooleanCell::new(false);
//! publish_bool(&hub, "armed", armed.clone())?;
//!
//! // Elsewhere, reachable over a link named "hub":
//! let client = Arc::new(Node::new());
//! let mirror = subscribe_bool(&client, "hub/armed", false)?;
//! mirror.on_change(|value| println!("armed: {value}"));
//! # Ok(())
//! # }
//! ```

pub mod cell;
pub mod error;
pub mod log;
pub mod publisher;
pub mod relay;

pub use cell::{BooleanCell, EventChannel, FloatCell};
pub use error::ChannelError;
pub use log::{LogLevel, LogTarget, TracingLogTarget};
pub use publisher::{
    publish_bool, publish_event, publish_float, publish_log, publish_stream, subscribe_bool,
    subscribe_event, subscribe_float, subscribe_log, subscribe_stream, RemoteLogTarget,
    StreamSender,
};
pub use relay::NetworkLogRelay;
