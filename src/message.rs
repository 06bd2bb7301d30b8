//! Message types and protocol definitions
//!
//! `ChatMessage` is the immutable chat event owned by rooms and persisted
//! by the history store. The `ClientMessage`/`ServerMessage` enums form the
//! JSON-based bidirectional wire protocol, using Serde's tagged enum for
//! type-safe serialization/deserialization.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ChatError;
use crate::types::{MessageId, UserId};
use crate::user::UserInfo;

/// Display name attached to room-generated membership notices.
pub const SYSTEM_USERNAME: &str = "System";

/// A single chat event inside a room
///
/// Immutable once constructed. Two classes exist: user messages carry the
/// originating `user_id`; system messages (join/leave notices) carry none
/// and use the [`SYSTEM_USERNAME`] sentinel. The class is fixed at
/// construction time, never inspected ad hoc later.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Unique message identifier
    pub id: MessageId,
    /// Originating user; `None` for system-generated messages
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<UserId>,
    /// Display name, denormalized at creation time
    pub username: String,
    /// Message body
    pub content: String,
    /// Wall-clock creation instant
    pub timestamp: DateTime<Utc>,
}

impl ChatMessage {
    /// Build a user message with a fresh id and the current timestamp
    pub fn user(user_id: UserId, username: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            id: MessageId::new(),
            user_id: Some(user_id),
            username: username.into(),
            content: content.into(),
            timestamp: Utc::now(),
        }
    }

    /// Build a system message (membership notice) with a fresh id
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            id: MessageId::new(),
            user_id: None,
            username: SYSTEM_USERNAME.to_string(),
            content: content.into(),
            timestamp: Utc::now(),
        }
    }

    /// Check whether this is a room-generated system message
    pub fn is_system(&self) -> bool {
        self.user_id.is_none()
    }
}

/// Client → Server message
///
/// All messages from client to server. Uses tagged enum with snake_case naming.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Register a username (required before room operations)
    Register { username: String },
    /// Explicitly log out (disconnect also triggers cleanup)
    Logout,
    /// Create a new room by name
    CreateRoom { room: String },
    /// List all live room names
    ListRooms,
    /// List all connected users
    ListUsers,
    /// Join a room (created on demand if absent)
    Join { room: String },
    /// Leave a room
    Leave { room: String },
    /// Send a chat message to a room
    Send { room: String, content: String },
    /// Fetch a room's message history, oldest first
    History { room: String },
    /// Fetch a room's current participants
    Participants { room: String },
}

/// Server → Client message
///
/// All messages from server to client, including the asynchronous
/// `ChatMessage` push a room fans out to every participant's connection
/// handle. Uses tagged enum with snake_case naming.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Registration succeeded, user id issued
    Registered { user_id: UserId, username: String },
    /// Logout acknowledged
    LoggedOut,
    /// Room created successfully
    RoomCreated { room: String },
    /// All live room names
    Rooms { rooms: Vec<String> },
    /// All connected users (projection, no connection internals)
    Users { users: Vec<UserInfo> },
    /// Room joined successfully
    Joined { room: String },
    /// Room left successfully
    Left { room: String },
    /// Pushed room event: a new message in a room this user participates in
    ChatMessage { room: String, message: ChatMessage },
    /// A room's accumulated history, oldest first
    History {
        room: String,
        messages: Vec<ChatMessage>,
    },
    /// A room's current participants
    Participants { room: String, users: Vec<UserInfo> },
    /// Error occurred
    Error { code: ErrorCode, message: String },
}

/// Error codes for ServerMessage::Error
///
/// Represents different error scenarios that can be communicated to clients.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// Username already held by a live user
    UsernameTaken,
    /// Unknown user id
    UserNotFound,
    /// Non-existent room name
    RoomNotFound,
    /// Duplicate room name on create
    RoomAlreadyExists,
    /// Attempted action before registering
    NotConnected,
    /// Attempted action in a room this session never joined
    NotInRoom,
    /// Invalid message format
    InvalidMessage,
    /// Internal failure (persistence, broken channels)
    Internal,
}

/// Convert ChatError to ServerMessage for client notification
///
/// Every typed failure maps to a human-readable error frame; nothing
/// propagates to the interactive surface as an unhandled fault.
impl From<ChatError> for ServerMessage {
    fn from(err: ChatError) -> Self {
        let code = match &err {
            ChatError::UsernameTaken(_) => ErrorCode::UsernameTaken,
            ChatError::UserNotFound(_) => ErrorCode::UserNotFound,
            ChatError::RoomNotFound(_) => ErrorCode::RoomNotFound,
            ChatError::RoomAlreadyExists(_) => ErrorCode::RoomAlreadyExists,
            ChatError::NotConnected => ErrorCode::NotConnected,
            ChatError::NotInRoom(_) => ErrorCode::NotInRoom,
            ChatError::Json(_) => ErrorCode::InvalidMessage,
            ChatError::WebSocket(_) | ChatError::Io(_) | ChatError::ChannelClosed => {
                ErrorCode::Internal
            }
        };
        let message = err.to_string();
        ServerMessage::Error { code, message }
    }
}
