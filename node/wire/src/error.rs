//! Wire protocol error types.

use thiserror::Error;

/// Wire protocol errors
#[derive(Error, Debug)]
pub enum WireError {
    /// Payload length exceeds the configured maximum
    #[error("payload too large: {0} bytes")]
    PayloadTooLarge(usize),

    /// A path string is too long to length-prefix
    #[error("path too long: {0} bytes")]
    PathTooLong(usize),

    /// A path field is not valid UTF-8
    #[error("path is not valid utf-8")]
    Utf8,

    /// Negative payload length on the wire
    #[error("malformed frame")]
    Malformed,

    /// Checksum or checksum basis did not match the received fields
    #[error("checksum mismatch")]
    ChecksumMismatch,

    /// Unknown remote message type tag
    #[error("unknown message type tag {0}")]
    Tag(u8),
}
