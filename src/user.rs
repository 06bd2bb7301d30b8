//! User record definitions
//!
//! Represents a connected user: identity plus the connection handle used
//! to push room events back to the owning session.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::mpsc;

use crate::error::SendError;
use crate::message::ServerMessage;
use crate::types::UserId;

/// Connected user record
///
/// Owned by the user registry; rooms receive clones when resolving
/// participants. The sender is the opaque connection handle - its closure
/// is what the registry's liveness watch observes.
#[derive(Debug, Clone)]
pub struct User {
    /// Unique identifier for this user
    pub id: UserId,
    /// Globally unique username (among currently connected users)
    pub username: String,
    /// Server → session event channel (the connection handle)
    pub sender: mpsc::Sender<ServerMessage>,
    /// Registration time
    pub connected_at: DateTime<Utc>,
}

impl User {
    /// Create a new user record with the current timestamp
    pub fn new(id: UserId, username: String, sender: mpsc::Sender<ServerMessage>) -> Self {
        Self {
            id,
            username,
            sender,
            connected_at: Utc::now(),
        }
    }

    /// Push an event to this user's session without blocking
    ///
    /// Best-effort fire-and-forget: a closed or full channel is reported
    /// but never retried.
    pub fn push(&self, msg: ServerMessage) -> Result<(), SendError> {
        self.sender.try_send(msg).map_err(|e| match e {
            mpsc::error::TrySendError::Closed(_) => SendError::ChannelClosed,
            mpsc::error::TrySendError::Full(_) => SendError::ChannelFull,
        })
    }

    /// Handle-free projection of this record
    pub fn info(&self) -> UserInfo {
        UserInfo {
            id: self.id,
            username: self.username.clone(),
            connected_at: self.connected_at,
        }
    }
}

/// Public projection of a user record
///
/// Excludes the connection handle; safe to list and serialize.
#[derive(Debug, Clone, Serialize)]
pub struct UserInfo {
    pub id: UserId,
    pub username: String,
    pub connected_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_user_push_delivers() {
        let (tx, mut rx) = mpsc::channel(32);
        let user = User::new(UserId::new(), "alice".to_string(), tx);

        user.push(ServerMessage::LoggedOut).unwrap();

        match rx.recv().await {
            Some(ServerMessage::LoggedOut) => {}
            other => panic!("Unexpected message: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_user_push_closed_channel() {
        let (tx, rx) = mpsc::channel(32);
        drop(rx);
        let user = User::new(UserId::new(), "bob".to_string(), tx);

        assert!(matches!(
            user.push(ServerMessage::LoggedOut),
            Err(SendError::ChannelClosed)
        ));
    }

    #[tokio::test]
    async fn test_user_info_projection() {
        let (tx, _rx) = mpsc::channel(32);
        let user = User::new(UserId::new(), "carol".to_string(), tx);
        let info = user.info();

        assert_eq!(info.id, user.id);
        assert_eq!(info.username, "carol");
        assert_eq!(info.connected_at, user.connected_at);
    }
}
