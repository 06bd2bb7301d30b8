//! Session façade
//!
//! The boundary entry point the client layer talks to: one struct bundling
//! the registry and room-manager handles, exposing every core operation
//! and nothing else. All failures come back as typed [`ChatError`] values
//! whose Display text is the human-readable form shown to users.

use tokio::sync::mpsc;

use crate::error::ChatError;
use crate::history::HistoryStore;
use crate::manager::{RoomManager, RoomManagerHandle};
use crate::message::{ChatMessage, ServerMessage};
use crate::registry::{RegistryHandle, UserRegistry};
use crate::room::RoomHandle;
use crate::types::UserId;
use crate::user::UserInfo;

/// Façade over the registry and room actors
#[derive(Debug, Clone)]
pub struct ChatService {
    registry: RegistryHandle,
    rooms: RoomManagerHandle,
}

impl ChatService {
    /// Boot the whole coordination layer on top of a history store
    ///
    /// Spawns the registry and room-manager actors and the forwarder that
    /// feeds registry disconnects into the manager's room-cleanup fan-out.
    pub fn start(history: HistoryStore) -> Self {
        let (disconnect_tx, mut disconnect_rx) = mpsc::unbounded_channel();
        let registry = UserRegistry::spawn(disconnect_tx);
        let rooms = RoomManager::spawn(registry.clone(), history);

        let manager = rooms.clone();
        tokio::spawn(async move {
            while let Some(event) = disconnect_rx.recv().await {
                let _ = manager
                    .notify_user_disconnected(event.user_id, event.username)
                    .await;
            }
        });

        Self { registry, rooms }
    }

    /// Register a username with its connection handle
    pub async fn register(
        &self,
        username: impl Into<String>,
        sender: mpsc::Sender<ServerMessage>,
    ) -> Result<UserId, ChatError> {
        self.registry.register(username, sender).await
    }

    /// Remove a user; idempotent
    pub async fn unregister(&self, user_id: UserId) -> Result<(), ChatError> {
        self.registry.unregister(user_id).await
    }

    /// Look up a connected user (handle-free projection)
    pub async fn get(&self, user_id: UserId) -> Result<UserInfo, ChatError> {
        Ok(self.registry.get(user_id).await?.info())
    }

    /// List all connected users
    pub async fn list(&self) -> Result<Vec<UserInfo>, ChatError> {
        self.registry.list().await
    }

    /// Create a room; fails on duplicate names
    pub async fn create_room(&self, name: impl Into<String>) -> Result<String, ChatError> {
        self.rooms.create_room(name).await
    }

    /// List all live room names
    pub async fn list_rooms(&self) -> Result<Vec<String>, ChatError> {
        self.rooms.list_rooms().await
    }

    /// Check whether a room name is live
    pub async fn room_exists(&self, name: impl Into<String>) -> Result<bool, ChatError> {
        self.rooms.room_exists(name).await
    }

    /// Join a room, creating it on demand
    pub async fn join(&self, room: impl Into<String>, user_id: UserId) -> Result<(), ChatError> {
        let handle = self.rooms.ensure_room(room).await?;
        handle.join(user_id).await
    }

    /// Leave a room; the room must already exist
    pub async fn leave(&self, room: impl Into<String>, user_id: UserId) -> Result<(), ChatError> {
        self.room(room).await?.leave(user_id).await
    }

    /// Send a message to a room; the room must already exist
    pub async fn send_message(
        &self,
        room: impl Into<String>,
        user_id: UserId,
        content: impl Into<String>,
    ) -> Result<(), ChatError> {
        self.room(room).await?.send_message(user_id, content).await
    }

    /// Fetch a room's history, oldest first
    pub async fn get_history(
        &self,
        room: impl Into<String>,
    ) -> Result<Vec<ChatMessage>, ChatError> {
        self.room(room).await?.history().await
    }

    /// Fetch a room's current participants
    pub async fn get_participants(
        &self,
        room: impl Into<String>,
    ) -> Result<Vec<UserInfo>, ChatError> {
        self.room(room).await?.participants().await
    }

    /// Resolve a room name to its live handle
    async fn room(&self, name: impl Into<String>) -> Result<RoomHandle, ChatError> {
        let name = name.into();
        self.rooms
            .get_room(&name)
            .await?
            .ok_or(ChatError::RoomNotFound(name))
    }
}
