//! Error types for the delivery relay.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum PanelError {
    #[error("Invalid channel: {0}")]
    InvalidChannel(String),

    #[error("Delivery queue is closed")]
    QueueClosed,

    #[error("Send to connection {connection} failed: {reason}")]
    SendFailure { connection: String, reason: String },

    #[error("Dispatch error: {0}")]
    Dispatch(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Script error: {0}")]
    Script(String),

    #[error("A conversation is already running")]
    ConversationRunning,

    #[error("Audience source error: {0}")]
    Audience(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
