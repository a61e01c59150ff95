use thiserror::Error;

/// Failures while decoding channel payloads or wiring up endpoints.
#[derive(Error, Debug)]
pub enum ChannelError {
    /// A payload ended before its declared contents
    #[error("log entry payload is truncated")]
    ShortEntry,

    /// A log entry carried a level byte outside the known set
    #[error("unknown log level byte: {0}")]
    UnknownLevel(i8),

    /// A log entry's text is not valid UTF-8
    #[error("log entry text is not valid utf-8")]
    EntryUtf8,

    /// Registration with the routing registry failed
    #[error(transparent)]
    Registry(#[from] weft_registry::RegistryError),
}
