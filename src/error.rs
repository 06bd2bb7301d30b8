//! Error types for the chat server
//!
//! Defines application-level errors and message send errors.
//! Uses thiserror for ergonomic error definitions.

use thiserror::Error;

use crate::types::UserId;

/// Application-level errors
///
/// Covers both fatal errors (connection termination, broken channels)
/// and business errors (returned as typed results, rendered for clients).
#[derive(Debug, Error)]
pub enum ChatError {
    /// WebSocket protocol error (fatal)
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// JSON serialization/deserialization error
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    /// IO error from the history store (propagated, not retried)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Channel send error (fatal - an actor mailbox is gone)
    #[error("Channel closed")]
    ChannelClosed,

    /// Another live user already holds this username
    #[error("Username '{0}' is already taken")]
    UsernameTaken(String),

    /// No live user with the given id
    #[error("User {0} not found")]
    UserNotFound(UserId),

    /// No room registered under the given name
    #[error("Room '{0}' not found")]
    RoomNotFound(String),

    /// A room with this name is already live
    #[error("Room '{0}' already exists")]
    RoomAlreadyExists(String),

    /// Session issued a command before registering
    #[error("Not connected - register a username first")]
    NotConnected,

    /// Session issued a room command without having joined that room
    #[error("You have not joined room '{0}'")]
    NotInRoom(String),
}

/// Message send errors
///
/// Occurs when pushing an event to a connection handle fails.
/// Delivery is best-effort; callers typically log and move on.
#[derive(Debug, Error)]
pub enum SendError {
    /// The receiving end of the channel has been closed
    #[error("Channel closed")]
    ChannelClosed,

    /// The receiver's buffer is full (slow consumer)
    #[error("Channel full")]
    ChannelFull,
}
