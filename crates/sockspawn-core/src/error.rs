//! Error types for `sockspawn` core library.

use thiserror::Error;

/// Result type alias using `sockspawn` Error.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error types for `sockspawn` startup.
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Socket owner could not be resolved
    #[error("user \"{0}\" not found")]
    UnknownUser(String),

    /// Socket group could not be resolved
    #[error("group \"{0}\" not found")]
    UnknownGroup(String),

    /// User/group database lookup failed
    #[error("Account lookup failed: {0}")]
    Lookup(#[from] nix::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
