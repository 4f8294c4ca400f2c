//! Error types for control operations.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ControlError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("protocol error: {0}")]
    Decode(#[from] bincode::error::DecodeError),

    #[error("protocol error: {0}")]
    Encode(#[from] bincode::error::EncodeError),

    #[error("server error: {0}")]
    Server(String),

    #[error("connection closed")]
    ConnectionClosed,

    #[error("request timed out")]
    Timeout,

    #[error("frame too large: {0} bytes")]
    FrameTooLarge(u32),

    #[error("incompatible protocol version {0}")]
    Version(u32),
}

pub type Result<T> = std::result::Result<T, ControlError>;
