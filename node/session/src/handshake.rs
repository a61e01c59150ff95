//! Connection handshake, run once per connection from both ends.
//!
//! Both peers execute identical logic: write the magic/version word and
//! two random nonces, verify the peer's magic and version, echo the XOR
//! of the peer's nonces and verify the peer echoed ours. The nonce bounce
//! detects a rewritten or corrupted transport before any frame flows.
//! Finally each side sends a hint for what the peer should register this
//! link as; an empty string encodes no hint.

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::trace;
use weft_wire::{PROTOCOL_MAGIC, PROTOCOL_MAGIC_MASK, PROTOCOL_VERSION};

/// Upper bound on the peer's link name hint.
const MAX_HINT_LEN: usize = 1024;

/// Handshake failures. Fatal to this connection attempt only; the owning
/// connection manager retries on its own schedule.
#[derive(Error, Debug)]
pub enum HandshakeError {
    /// The peer's magic word did not match
    #[error("magic number did not match: {0:#010x}")]
    Magic(u32),

    /// The peer speaks a strictly older protocol version. The side with
    /// the higher version is responsible for a compatibility shim, and
    /// none exists yet.
    #[error("peer is on older protocol version {remote} (local {local})")]
    OlderVersion {
        /// Our protocol version
        local: u8,
        /// The peer's protocol version
        remote: u8,
    },

    /// The peer failed to echo our nonces correctly
    #[error("nonce bounce did not verify")]
    NonceMismatch,

    /// The peer's link name hint is oversized
    #[error("link name hint too long: {0} bytes")]
    HintTooLong(usize),

    /// The peer's link name hint is not valid UTF-8
    #[error("link name hint is not valid utf-8")]
    HintUtf8,

    /// I/O failure mid-handshake
    #[error("i/o error during handshake: {0}")]
    Io(#[from] std::io::Error),
}

/// Result of a completed handshake.
#[derive(Debug, Clone)]
pub struct HandshakeOutcome {
    /// Protocol version both sides will speak: the minimum of the two.
    pub version: u8,
    /// The peer's suggestion for what to register this link as.
    pub peer_hint: Option<String>,
}

/// Run the handshake. Must be executed from both ends of the connection.
///
/// `remote_hint` is the name the peer should register this link under,
/// or `None` for no recommendation.
pub async fn exchange_header<S>(
    stream: &mut S,
    remote_hint: Option<&str>,
) -> Result<HandshakeOutcome, HandshakeError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    stream
        .write_u32(PROTOCOL_MAGIC | ((PROTOCOL_VERSION as u32) << 8))
        .await?;
    let local_a: u32 = rand::random();
    let local_b: u32 = rand::random();
    stream.write_u32(local_a).await?;
    stream.write_u32(local_b).await?;
    stream.flush().await?;

    let peer_word = stream.read_u32().await?;
    if peer_word & PROTOCOL_MAGIC_MASK != PROTOCOL_MAGIC {
        return Err(HandshakeError::Magic(peer_word));
    }
    let peer_version = ((peer_word >> 8) & 0xFF) as u8;
    if peer_version < PROTOCOL_VERSION {
        return Err(HandshakeError::OlderVersion {
            local: PROTOCOL_VERSION,
            remote: peer_version,
        });
    }

    let peer_a = stream.read_u32().await?;
    let peer_b = stream.read_u32().await?;
    stream.write_u32(peer_a ^ peer_b).await?;
    stream.flush().await?;
    if stream.read_u32().await? != local_a ^ local_b {
        return Err(HandshakeError::NonceMismatch);
    }

    let hint = remote_hint.unwrap_or("");
    if hint.len() > MAX_HINT_LEN {
        return Err(HandshakeError::HintTooLong(hint.len()));
    }
    stream.write_u16(hint.len() as u16).await?;
    stream.write_all(hint.as_bytes()).await?;
    stream.flush().await?;

    let peer_hint_len = stream.read_u16().await? as usize;
    if peer_hint_len > MAX_HINT_LEN {
        return Err(HandshakeError::HintTooLong(peer_hint_len));
    }
    let mut raw = vec![0u8; peer_hint_len];
    stream.read_exact(&mut raw).await?;
    let peer_hint = String::from_utf8(raw).map_err(|_| HandshakeError::HintUtf8)?;

    trace!(peer_version, peer_hint = %peer_hint, "handshake complete");
    Ok(HandshakeOutcome {
        version: PROTOCOL_VERSION.min(peer_version),
        peer_hint: (!peer_hint.is_empty()).then_some(peer_hint),
    })
}
