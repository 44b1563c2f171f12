//! Common error types for webwatch components.

use std::fmt;

/// A specialized Result type for webwatch operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Common error type for webwatch operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Store error: {0}")]
    Store(String),

    #[error("Check error: {0}")]
    Check(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Notification error: {0}")]
    Notify(String),
}

impl Error {
    /// Create a new store error.
    pub fn store(msg: impl fmt::Display) -> Self {
        Error::Store(msg.to_string())
    }

    /// Create a new check error.
    pub fn check(msg: impl fmt::Display) -> Self {
        Error::Check(msg.to_string())
    }

    /// Create a new configuration error.
    pub fn config(msg: impl fmt::Display) -> Self {
        Error::Config(msg.to_string())
    }

    /// Create a new notification error.
    pub fn notify(msg: impl fmt::Display) -> Self {
        Error::Notify(msg.to_string())
    }
}
