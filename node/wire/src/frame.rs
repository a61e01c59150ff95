//! Message framing for the wire protocol.
//!
//! A frame is an immutable (destination, source, payload) triple. The
//! destination and source are optional slash-separated paths; an absent
//! destination is the broadcast sentinel and an absent source means the
//! message is anonymous. Encoding appends the checksum basis and rolling
//! checksum described in [`crate::checksum`].

use crate::checksum::{checksum, checksum_basis};
use crate::error::WireError;
use crate::rmt::Rmt;
use crate::{KEEPALIVE_DEST, KEEPALIVE_TAG};
use bytes::{Buf, BufMut, Bytes, BytesMut};

/// Default maximum payload size (1 MiB). Control-system traffic is small;
/// anything larger is almost certainly a corrupt length field.
pub const DEFAULT_MAX_PAYLOAD: usize = 1024 * 1024;

/// One message frame on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Destination path; `None` broadcasts to every handler and link.
    pub dest: Option<String>,
    /// Source path, accumulating link names as the message crosses hops.
    pub source: Option<String>,
    /// Raw message payload.
    pub payload: Bytes,
}

impl Frame {
    /// Create a new frame.
    pub fn new(
        dest: Option<String>,
        source: Option<String>,
        payload: impl Into<Bytes>,
    ) -> Self {
        Self {
            dest,
            source,
            payload: payload.into(),
        }
    }

    /// Build the no-op heartbeat frame an idle sender emits.
    ///
    /// The negative-ack tag is used because no receiver will ever complain
    /// about it; the second byte disambiguates from a real negative ack.
    pub fn keepalive() -> Self {
        Self {
            dest: Some(KEEPALIVE_DEST.to_string()),
            source: None,
            payload: Bytes::from_static(&[Rmt::NegativeAck as u8, KEEPALIVE_TAG]),
        }
    }

    /// Whether this frame has the keepalive shape.
    pub fn is_keepalive(&self) -> bool {
        self.dest.as_deref() == Some(KEEPALIVE_DEST)
            && self.source.is_none()
            && self.payload.len() >= 2
            && self.payload[0] == Rmt::NegativeAck as u8
            && self.payload[1] == KEEPALIVE_TAG
    }

    /// Total size of this frame when encoded.
    pub fn encoded_len(&self) -> usize {
        let dest_len = self.dest.as_deref().map_or(0, str::len);
        let source_len = self.source.as_deref().map_or(0, str::len);
        2 + dest_len + 2 + source_len + 4 + 8 + self.payload.len() + 8
    }

    /// Encode this frame onto `buf`.
    pub fn encode(&self, buf: &mut BytesMut) -> Result<(), WireError> {
        if self.payload.len() > i32::MAX as usize {
            return Err(WireError::PayloadTooLarge(self.payload.len()));
        }
        buf.reserve(self.encoded_len());
        put_path(buf, self.dest.as_deref())?;
        put_path(buf, self.source.as_deref())?;
        buf.put_i32(self.payload.len() as i32);
        let basis = checksum_basis(
            self.payload.len(),
            self.dest.as_deref(),
            self.source.as_deref(),
        );
        buf.put_i64(basis);
        buf.put_slice(&self.payload);
        buf.put_i64(checksum(&self.payload, basis));
        Ok(())
    }
}

/// Write a length-prefixed path; an absent path encodes as length zero.
fn put_path(buf: &mut BytesMut, path: Option<&str>) -> Result<(), WireError> {
    let bytes = path.map_or(&b""[..], str::as_bytes);
    if bytes.len() > u16::MAX as usize {
        return Err(WireError::PathTooLong(bytes.len()));
    }
    buf.put_u16(bytes.len() as u16);
    buf.put_slice(bytes);
    Ok(())
}

/// Incremental frame decoder for a byte stream.
///
/// `decode` returns `Ok(None)` until a complete frame is buffered; any
/// `Err` means the stream is corrupt and the connection must be torn down.
#[derive(Debug)]
pub struct FrameDecoder {
    max_payload: usize,
}

impl FrameDecoder {
    /// Create a decoder with the default payload limit.
    pub fn new() -> Self {
        Self {
            max_payload: DEFAULT_MAX_PAYLOAD,
        }
    }

    /// Create a decoder with a custom payload limit.
    pub fn with_max_payload(max_payload: usize) -> Self {
        Self { max_payload }
    }

    /// Decode one frame from `buf`, consuming its bytes on success.
    pub fn decode(&self, buf: &mut BytesMut) -> Result<Option<Frame>, WireError> {
        if buf.len() < 2 {
            return Ok(None);
        }
        let dest_len = u16::from_be_bytes([buf[0], buf[1]]) as usize;
        let source_at = 2 + dest_len;
        if buf.len() < source_at + 2 {
            return Ok(None);
        }
        let source_len = u16::from_be_bytes([buf[source_at], buf[source_at + 1]]) as usize;
        let len_at = source_at + 2 + source_len;
        if buf.len() < len_at + 4 {
            return Ok(None);
        }
        let payload_len = i32::from_be_bytes([
            buf[len_at],
            buf[len_at + 1],
            buf[len_at + 2],
            buf[len_at + 3],
        ]);
        if payload_len < 0 {
            return Err(WireError::Malformed);
        }
        let payload_len = payload_len as usize;
        if payload_len > self.max_payload {
            return Err(WireError::PayloadTooLarge(payload_len));
        }
        let total = len_at + 4 + 8 + payload_len + 8;
        if buf.len() < total {
            return Ok(None);
        }

        buf.advance(2);
        let dest = take_path(buf, dest_len)?;
        buf.advance(2);
        let source = take_path(buf, source_len)?;
        buf.advance(4);
        let wire_basis = buf.get_i64();
        let payload = buf.split_to(payload_len).freeze();
        let wire_sum = buf.get_i64();

        let basis = checksum_basis(payload_len, dest.as_deref(), source.as_deref());
        if wire_basis != basis || wire_sum != checksum(&payload, basis) {
            return Err(WireError::ChecksumMismatch);
        }

        Ok(Some(Frame {
            dest,
            source,
            payload,
        }))
    }
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}

/// Consume a path of `len` bytes; zero length decodes as absent.
fn take_path(buf: &mut BytesMut, len: usize) -> Result<Option<String>, WireError> {
    if len == 0 {
        return Ok(None);
    }
    let raw = buf.split_to(len);
    let s = std::str::from_utf8(&raw).map_err(|_| WireError::Utf8)?;
    Ok(Some(s.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(frame: &Frame) -> Frame {
        let mut buf = BytesMut::new();
        frame.encode(&mut buf).unwrap();
        assert_eq!(buf.len(), frame.encoded_len());
        FrameDecoder::new().decode(&mut buf).unwrap().unwrap()
    }

    #[test]
    fn test_frame_roundtrip() {
        let frame = Frame::new(
            Some("robot/drive/left".to_string()),
            Some("tcp_1/tuner".to_string()),
            vec![4u8, 0, 1],
        );
        assert_eq!(roundtrip(&frame), frame);
    }

    #[test]
    fn test_roundtrip_empty_fields() {
        let broadcast = Frame::new(None, None, Vec::new());
        assert_eq!(roundtrip(&broadcast), broadcast);

        let anon = Frame::new(Some("x".to_string()), None, vec![1]);
        assert_eq!(roundtrip(&anon), anon);

        let unaddressed = Frame::new(None, Some("hub/a".to_string()), vec![2, 3]);
        assert_eq!(roundtrip(&unaddressed), unaddressed);
    }

    #[test]
    fn test_every_payload_bit_flip_rejected() {
        let frame = Frame::new(
            Some("status".to_string()),
            Some("emulator".to_string()),
            b"sample payload".to_vec(),
        );
        let mut encoded = BytesMut::new();
        frame.encode(&mut encoded).unwrap();
        let payload_at = encoded.len() - 8 - frame.payload.len();

        for byte in 0..frame.payload.len() {
            for bit in 0..8 {
                let mut corrupted = encoded.clone();
                corrupted[payload_at + byte] ^= 1 << bit;
                let result = FrameDecoder::new().decode(&mut corrupted);
                assert!(
                    matches!(result, Err(WireError::ChecksumMismatch)),
                    "flip of payload byte {} bit {} not rejected",
                    byte,
                    bit
                );
            }
        }
    }

    #[test]
    fn test_corrupted_dest_rejected() {
        let frame = Frame::new(Some("abc".to_string()), None, vec![7]);
        let mut encoded = BytesMut::new();
        frame.encode(&mut encoded).unwrap();
        // First destination byte sits right after the u16 length prefix.
        encoded[2] ^= 0x02;
        assert!(FrameDecoder::new().decode(&mut encoded).is_err());
    }

    #[test]
    fn test_incremental_decode() {
        let frame = Frame::new(Some("a/b".to_string()), Some("c".to_string()), vec![9; 16]);
        let mut encoded = BytesMut::new();
        frame.encode(&mut encoded).unwrap();

        let decoder = FrameDecoder::new();
        let mut buf = BytesMut::new();
        for (i, &b) in encoded.iter().enumerate() {
            buf.put_u8(b);
            let decoded = decoder.decode(&mut buf).unwrap();
            if i + 1 < encoded.len() {
                assert!(decoded.is_none(), "decoded early at byte {}", i);
            } else {
                assert_eq!(decoded.unwrap(), frame);
            }
        }
    }

    #[test]
    fn test_back_to_back_frames() {
        let first = Frame::new(Some("one".to_string()), None, vec![1]);
        let second = Frame::new(Some("two".to_string()), None, vec![2]);
        let mut buf = BytesMut::new();
        first.encode(&mut buf).unwrap();
        second.encode(&mut buf).unwrap();

        let decoder = FrameDecoder::new();
        assert_eq!(decoder.decode(&mut buf).unwrap().unwrap(), first);
        assert_eq!(decoder.decode(&mut buf).unwrap().unwrap(), second);
        assert!(decoder.decode(&mut buf).unwrap().is_none());
    }

    #[test]
    fn test_payload_limit_enforced() {
        let frame = Frame::new(None, None, vec![0u8; 64]);
        let mut buf = BytesMut::new();
        frame.encode(&mut buf).unwrap();
        let decoder = FrameDecoder::with_max_payload(16);
        assert!(matches!(
            decoder.decode(&mut buf),
            Err(WireError::PayloadTooLarge(64))
        ));
    }

    #[test]
    fn test_keepalive_shape() {
        let ka = Frame::keepalive();
        assert!(ka.is_keepalive());
        assert_eq!(roundtrip(&ka), ka);

        let not_ka = Frame::new(
            Some(crate::KEEPALIVE_DEST.to_string()),
            Some("spoof".to_string()),
            vec![Rmt::NegativeAck as u8, KEEPALIVE_TAG],
        );
        assert!(!not_ka.is_keepalive());
    }
}
