//! Log severity levels, the [`LogTarget`] trait, and the wire encoding
//! of log entries.

use tracing::{debug, error, info, trace, warn};
use weft_wire::Rmt;

use crate::error::ChannelError;

/// Log severity. The byte values are spaced out so intermediate levels
/// can be added without renumbering, and they are what travels on the
/// wire, so they must stay stable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(i8)]
pub enum LogLevel {
    Finest = -9,
    Finer = -6,
    Fine = -3,
    Config = 0,
    Info = 3,
    Warning = 6,
    Severe = 9,
}

impl LogLevel {
    pub fn from_byte(byte: i8) -> Option<LogLevel> {
        match byte {
            -9 => Some(LogLevel::Finest),
            -6 => Some(LogLevel::Finer),
            -3 => Some(LogLevel::Fine),
            0 => Some(LogLevel::Config),
            3 => Some(LogLevel::Info),
            6 => Some(LogLevel::Warning),
            9 => Some(LogLevel::Severe),
            _ => None,
        }
    }

    pub fn as_byte(self) -> i8 {
        self as i8
    }
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            LogLevel::Finest => "FINEST",
            LogLevel::Finer => "FINER",
            LogLevel::Fine => "FINE",
            LogLevel::Config => "CONFIG",
            LogLevel::Info => "INFO",
            LogLevel::Warning => "WARNING",
            LogLevel::Severe => "SEVERE",
        };
        f.write_str(name)
    }
}

/// A destination for log entries, local or remote.
pub trait LogTarget: Send + Sync {
    fn log(&self, level: LogLevel, message: &str, extra: Option<&str>);
}

/// Forwards log entries into the `tracing` stack.
pub struct TracingLogTarget;

impl LogTarget for TracingLogTarget {
    fn log(&self, level: LogLevel, message: &str, extra: Option<&str>) {
        match level {
            LogLevel::Severe => error!(?extra, "{message}"),
            LogLevel::Warning => warn!(?extra, "{message}"),
            LogLevel::Info | LogLevel::Config => info!(?extra, "{message}"),
            LogLevel::Fine => debug!(?extra, "{message}"),
            LogLevel::Finer | LogLevel::Finest => trace!(?extra, "{message}"),
        }
    }
}

/// Longest message or extended text a log entry can carry, set by the
/// u16 length prefix.
const MAX_ENTRY_TEXT: usize = u16::MAX as usize;

/// Cut `text` down to the encodable limit, backing off to the nearest
/// char boundary.
fn clamp_entry_text<'a>(text: &'a str, what: &str) -> &'a str {
    if text.len() <= MAX_ENTRY_TEXT {
        return text;
    }
    warn!(len = text.len(), "log entry {what} too long, truncating");
    let mut end = MAX_ENTRY_TEXT;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}

/// Encode a log entry as a channel value payload:
/// tag, level byte, then length-prefixed message and extended text,
/// with a zero length standing for no extended text. Text longer than
/// a length prefix can express is truncated.
pub fn encode_log_entry(level: LogLevel, message: &str, extra: Option<&str>) -> Vec<u8> {
    let message = clamp_entry_text(message, "message");
    let extra = clamp_entry_text(extra.unwrap_or(""), "extended text");
    let mut out = Vec::with_capacity(2 + 2 + message.len() + 2 + extra.len());
    out.push(Rmt::LogEntry as u8);
    out.push(level.as_byte() as u8);
    out.extend_from_slice(&(message.len() as u16).to_be_bytes());
    out.extend_from_slice(message.as_bytes());
    out.extend_from_slice(&(extra.len() as u16).to_be_bytes());
    out.extend_from_slice(extra.as_bytes());
    out
}

/// Decode a log entry value payload, without its leading tag byte.
pub fn decode_log_entry(body: &[u8]) -> Result<(LogLevel, String, Option<String>), ChannelError> {
    let (&level_byte, rest) = body.split_first().ok_or(ChannelError::ShortEntry)?;
    let level = LogLevel::from_byte(level_byte as i8)
        .ok_or(ChannelError::UnknownLevel(level_byte as i8))?;

    let (message, rest) = take_string(rest)?;
    let (extra, _rest) = take_string(rest)?;
    Ok((level, message, (!extra.is_empty()).then_some(extra)))
}

fn take_string(body: &[u8]) -> Result<(String, &[u8]), ChannelError> {
    if body.len() < 2 {
        return Err(ChannelError::ShortEntry);
    }
    let len = u16::from_be_bytes([body[0], body[1]]) as usize;
    let body = &body[2..];
    if body.len() < len {
        return Err(ChannelError::ShortEntry);
    }
    let text = std::str::from_utf8(&body[..len])
        .map_err(|_| ChannelError::EntryUtf8)?
        .to_owned();
    Ok((text, &body[len..]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_levels_order_by_severity() {
        assert!(LogLevel::Severe > LogLevel::Warning);
        assert!(LogLevel::Info > LogLevel::Fine);
        assert!(LogLevel::Finest < LogLevel::Config);
    }

    #[test]
    fn test_level_bytes_are_stable() {
        for level in [
            LogLevel::Finest,
            LogLevel::Finer,
            LogLevel::Fine,
            LogLevel::Config,
            LogLevel::Info,
            LogLevel::Warning,
            LogLevel::Severe,
        ] {
            assert_eq!(LogLevel::from_byte(level.as_byte()), Some(level));
        }
        assert_eq!(LogLevel::Severe.as_byte(), 9);
        assert_eq!(LogLevel::Finest.as_byte(), -9);
        assert_eq!(LogLevel::from_byte(5), None);
    }

    #[test]
    fn test_entry_roundtrip() {
        let encoded = encode_log_entry(LogLevel::Warning, "motor stalled", Some("left drive"));
        assert_eq!(encoded[0], Rmt::LogEntry as u8);
        let (level, message, extra) = decode_log_entry(&encoded[1..]).unwrap();
        assert_eq!(level, LogLevel::Warning);
        assert_eq!(message, "motor stalled");
        assert_eq!(extra.as_deref(), Some("left drive"));
    }

    #[test]
    fn test_entry_without_extra() {
        let encoded = encode_log_entry(LogLevel::Info, "started", None);
        let (_, message, extra) = decode_log_entry(&encoded[1..]).unwrap();
        assert_eq!(message, "started");
        assert_eq!(extra, None);
    }

    #[test]
    fn test_oversized_text_truncates_at_char_boundary() {
        let message = "x".repeat(70_000);
        let encoded = encode_log_entry(LogLevel::Info, &message, None);
        let (_, decoded, extra) = decode_log_entry(&encoded[1..]).unwrap();
        assert_eq!(decoded.len(), u16::MAX as usize);
        assert!(message.starts_with(&decoded));
        assert_eq!(extra, None);

        // An odd byte limit lands mid-char for two-byte chars; the cut
        // backs off instead of splitting one.
        let message = "é".repeat(40_000);
        let encoded = encode_log_entry(LogLevel::Info, &message, None);
        let (_, decoded, _) = decode_log_entry(&encoded[1..]).unwrap();
        assert_eq!(decoded.len(), u16::MAX as usize - 1);
        assert!(message.starts_with(&decoded));
    }

    #[test]
    fn test_truncated_entry_rejected() {
        let encoded = encode_log_entry(LogLevel::Info, "started", None);
        assert!(decode_log_entry(&encoded[1..encoded.len() - 1]).is_err());
        assert!(decode_log_entry(&[]).is_err());
        assert!(matches!(
            decode_log_entry(&[5, 0, 0, 0, 0]),
            Err(ChannelError::UnknownLevel(5))
        ));
    }
}
