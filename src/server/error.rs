//! Connection error types

use uuid::Uuid;

/// Terminal causes for a connection
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("invalid player id: {0}")]
    InvalidId(#[from] uuid::Error),

    #[error("invalid name provided")]
    InvalidName,

    #[error("player {0} is already connected")]
    DuplicateId(Uuid),

    #[error("client disconnected")]
    Disconnected,

    #[error("transport error: {0}")]
    Transport(String),

    #[error("failed to deliver message to client")]
    SendFailed,

    #[error("connection cancelled")]
    Cancelled,

    #[error("world intent queue closed")]
    WorldClosed,
}
