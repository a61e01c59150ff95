//! Session error types.

use thiserror::Error;

/// Fatal connection errors. Timeouts and clean resets are not errors;
/// they end the receive loop quietly and are reported through logging.
#[derive(Error, Debug)]
pub enum SessionError {
    /// The connection handshake failed
    #[error("handshake failed: {0}")]
    Handshake(#[from] crate::handshake::HandshakeError),

    /// The inbound byte stream is corrupt
    #[error(transparent)]
    Wire(#[from] weft_wire::WireError),

    /// The link could not be registered
    #[error(transparent)]
    Registry(#[from] weft_registry::RegistryError),

    /// Unclassified I/O failure
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}
