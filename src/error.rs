//! Error types shared by the chat library.
//!
//! The dissemination core itself never surfaces errors; these are returned by
//! the collaborators around it (codec, persistence, transports, config).

use thiserror::Error;

/// Errors produced outside the dissemination core.
#[derive(Debug, Error)]
pub enum ChatError {
    /// An inbound frame or stored payload was not a valid envelope/message
    #[error("Decode error: {0}")]
    Decode(#[from] serde_json::Error),

    /// File system or socket I/O
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// SQLite history/identity storage
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Setting up the libp2p link transport failed
    #[error("Link transport error: {0}")]
    Link(String),

    /// Talking to the simulation server failed
    #[error("Simulation socket error: {0}")]
    Simulation(#[from] tokio_tungstenite::tungstenite::Error),

    /// Attachment could not be built or decoded
    #[error("Invalid attachment: {0}")]
    Attachment(String),

    /// Invalid configuration value
    #[error("Configuration error: {0}")]
    Config(String),
}

/// Result type for fallible collaborator operations.
pub type ChatResult<T> = Result<T, ChatError>;
