//! Error types for the push layer.

use thiserror::Error;

/// Result type for push channel operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur on the push channel.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Network error.
    #[error("network error: {0}")]
    Network(String),

    /// Protocol error (malformed frame or fragment).
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Connection refused.
    #[error("connection refused: {0}")]
    ConnectionRefused(String),

    /// Channel closed.
    #[error("channel closed")]
    ChannelClosed,

    /// WebSocket error.
    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
}
