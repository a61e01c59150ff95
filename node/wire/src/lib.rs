//! Wire protocol framing, checksums, and message type tags for weft.
//!
//! This crate provides the low-level wire protocol for the node network:
//! frame encoding/decoding, the rolling checksum that guards every frame,
//! and the one-byte remote message type (RMT) tags that discriminate the
//! typed channels layered on top of the raw bus.
//!
//! ## Wire Format
//!
//! Each frame on an established connection is laid out as:
//!
//! ```text
//! +---------------------+--------------------------------------+
//! | u16 dest_len + utf8 | destination path, empty = broadcast  |
//! +---------------------+--------------------------------------+
//! | u16 src_len + utf8  | source path, empty = anonymous       |
//! +---------------------+--------------------------------------+
//! | i32 payload_len     | bounded by the configured maximum    |
//! +---------------------+--------------------------------------+
//! | i64 checksum_basis  | mixes length and path hashes         |
//! +---------------------+--------------------------------------+
//! | payload bytes       |                                      |
//! +---------------------+--------------------------------------+
//! | i64 checksum        | rolling hash seeded from the basis   |
//! +---------------------+--------------------------------------+
//! ```
//!
//! The receiver recomputes both the basis and the checksum from the fields
//! it read; any mismatch means the stream is corrupt or misaligned and the
//! connection must be torn down.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod checksum;
pub mod error;
pub mod frame;
pub mod rmt;

pub use checksum::{checksum, checksum_basis, string_hash};
pub use error::WireError;
pub use frame::{Frame, FrameDecoder, DEFAULT_MAX_PAYLOAD};
pub use rmt::Rmt;

use std::time::Duration;

/// Protocol magic word. The version byte lives in bits 8-15, so the magic
/// is compared under the `0xFFFF00FF` mask.
pub const PROTOCOL_MAGIC: u32 = 0x154000CA;

/// Mask selecting the magic bits of the handshake word.
pub const PROTOCOL_MAGIC_MASK: u32 = 0xFFFF00FF;

/// Current protocol version. The side with the higher version (if they
/// differ) is responsible for providing a transformer to be compatible
/// with the older version.
pub const PROTOCOL_VERSION: u8 = 0;

/// Silence threshold after which a connection with confirmed keepalives
/// is considered disconnected.
pub const DISCONNECT_TIMEOUT: Duration = Duration::from_millis(600);

/// Interval at which an idle sender emits keepalive frames. Kept well
/// below [`DISCONNECT_TIMEOUT`] to avoid false disconnects.
pub const KEEPALIVE_INTERVAL: Duration = Duration::from_millis(200);

/// Reserved destination name that marks a frame as a no-op heartbeat.
pub const KEEPALIVE_DEST: &str = "KEEPALIVE";

/// Second payload byte of a keepalive frame, after the negative-ack tag.
pub const KEEPALIVE_TAG: u8 = 0x6D;
