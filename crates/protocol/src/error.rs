//! Error types for the protocol crate.

use thiserror::Error;

/// Protocol error type covering malformed inbound frames.
///
/// None of these are fatal to a session: the caller logs the error and
/// drops the offending frame.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProtocolError {
    /// A tagged frame had no discriminator byte.
    #[error("empty frame: missing frame kind byte")]
    EmptyFrame,

    /// A tagged frame started with a discriminator we do not know.
    #[error("unknown frame kind: {0:#04x}")]
    UnknownFrameKind(u8),

    /// A control frame did not carry a valid control message.
    #[error("invalid control message: {0}")]
    InvalidControl(String),
}

/// Result type alias for protocol operations.
pub type Result<T> = std::result::Result<T, ProtocolError>;

impl From<serde_json::Error> for ProtocolError {
    fn from(err: serde_json::Error) -> Self {
        ProtocolError::InvalidControl(err.to_string())
    }
}
