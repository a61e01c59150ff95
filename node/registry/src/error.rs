//! Registry error types.

use thiserror::Error;

/// Errors from registry mutation. These are contract violations by the
/// caller; runtime network failures never surface here.
#[derive(Error, Debug)]
pub enum RegistryError {
    /// The name is already registered as a handler or link
    #[error("name already registered: {0}")]
    NameTaken(String),

    /// Registration names must be non-empty and must not contain '/'
    #[error("invalid registration name: {0:?}")]
    InvalidName(String),
}
