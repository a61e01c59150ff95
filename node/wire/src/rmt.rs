//! Remote message type (RMT) tags.
//!
//! Each typed channel kind layered on the raw bus is identified by a
//! one-byte discriminator so peers can validate they are decoding what
//! they expect. The numeric values are stable within a running deployment;
//! cross-version compatibility below the negotiated protocol version is
//! not guaranteed.

/// One-byte remote message type discriminator.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rmt {
    /// Discovery probe; publishers answer with `[Ping, own tag]`
    Ping = 0,
    /// Negative acknowledgement; also the first byte of keepalive payloads
    NegativeAck = 1,
    /// Network-modified notification broadcast
    Notify = 2,
    /// Event channel fire
    EventFire = 3,
    /// Boolean channel value
    BooleanValue = 4,
    /// Float channel value
    FloatValue = 5,
    /// Logging target entry
    LogEntry = 6,
    /// Raw byte-stream chunk
    StreamChunk = 7,
}

impl Rmt {
    /// Human-readable name of the channel kind, for diagnostics.
    pub fn describe(self) -> &'static str {
        match self {
            Rmt::Ping => "discovery probe",
            Rmt::NegativeAck => "negative ack",
            Rmt::Notify => "network modified",
            Rmt::EventFire => "event channel",
            Rmt::BooleanValue => "boolean channel",
            Rmt::FloatValue => "float channel",
            Rmt::LogEntry => "logging target",
            Rmt::StreamChunk => "byte stream",
        }
    }
}

impl TryFrom<u8> for Rmt {
    type Error = crate::WireError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Rmt::Ping),
            1 => Ok(Rmt::NegativeAck),
            2 => Ok(Rmt::Notify),
            3 => Ok(Rmt::EventFire),
            4 => Ok(Rmt::BooleanValue),
            5 => Ok(Rmt::FloatValue),
            6 => Ok(Rmt::LogEntry),
            7 => Ok(Rmt::StreamChunk),
            _ => Err(crate::WireError::Tag(value)),
        }
    }
}
