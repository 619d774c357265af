use std::io;
use thiserror::Error;

/// Custom error types for QUIP
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Payload too large: {len} bytes (limit {max})")]
    PayloadTooLarge { len: usize, max: usize },

    #[error("Packet pid out of order: expected {expected}, got {got}")]
    PidOutOfOrder { expected: u64, got: u64 },

    #[error("Format error: {0}")]
    Format(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Could not finalize: {0}")]
    Finalize(String),

    #[error("Stream error: {0}")]
    Stream(String),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Creates a new format error
    pub fn format(msg: impl Into<String>) -> Self {
        Error::Format(msg.into())
    }

    /// Creates a new storage error
    pub fn storage(msg: impl Into<String>) -> Self {
        Error::Storage(msg.into())
    }

    /// Creates a new finalize error
    pub fn finalize(msg: impl Into<String>) -> Self {
        Error::Finalize(msg.into())
    }

    /// Creates a new stream error
    pub fn stream(msg: impl Into<String>) -> Self {
        Error::Stream(msg.into())
    }

    /// Creates a new connection error
    pub fn connection(msg: impl Into<String>) -> Self {
        Error::Connection(msg.into())
    }

    /// Creates a new configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Error::Config(msg.into())
    }

    /// Creates a new invalid state error
    pub fn invalid_state(msg: impl Into<String>) -> Self {
        Error::InvalidState(msg.into())
    }

    /// Creates a new serialization error
    pub fn serialization(msg: impl Into<String>) -> Self {
        Error::Serialization(msg.into())
    }

    /// Whether this error rejects a packet construction or a malformed frame
    pub fn is_format(&self) -> bool {
        matches!(
            self,
            Error::PayloadTooLarge { .. } | Error::PidOutOfOrder { .. } | Error::Format(_)
        )
    }
}
