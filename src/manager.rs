//! RoomManager actor implementation
//!
//! Owns the name → room-handle table: creates rooms, looks them up, fans
//! disconnect cleanup out to every room, and supervises each room actor.
//! A watcher task per room awaits the actor's task handle and reports back
//! to the manager mailbox; a panicked room is restarted immediately with
//! empty membership (its persisted history reloads on start).

use std::collections::HashMap;

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::error::ChatError;
use crate::history::HistoryStore;
use crate::registry::RegistryHandle;
use crate::room::{RoomActor, RoomHandle};
use crate::types::UserId;

/// Manager mailbox capacity
const MAILBOX_SIZE: usize = 64;

/// Commands sent to the RoomManager actor
#[derive(Debug)]
pub enum ManagerCommand {
    /// Create a new room; fails if the name is already live
    CreateRoom {
        name: String,
        reply: oneshot::Sender<Result<String, ChatError>>,
    },
    /// Locate a room, creating it on demand
    EnsureRoom {
        name: String,
        reply: oneshot::Sender<RoomHandle>,
    },
    /// Locate a room without creating it
    GetRoom {
        name: String,
        reply: oneshot::Sender<Option<RoomHandle>>,
    },
    /// List all live room names
    ListRooms { reply: oneshot::Sender<Vec<String>> },
    /// Check whether a room name is live
    RoomExists {
        name: String,
        reply: oneshot::Sender<bool>,
    },
    /// A user disconnected: run leave cleanup in every room
    UserDisconnected { user_id: UserId, username: String },
    /// Supervision report: a room actor panicked
    RoomCrashed { name: String },
}

/// The RoomManager actor
///
/// One live actor per room name; rooms are never destroyed while the
/// process runs.
pub struct RoomManager {
    /// All live rooms: name -> handle
    rooms: HashMap<String, RoomHandle>,
    /// Command receiver channel
    receiver: mpsc::Receiver<ManagerCommand>,
    /// Sender into our own mailbox, cloned into room watchers
    self_tx: mpsc::Sender<ManagerCommand>,
    /// Registry handle passed to every spawned room
    registry: RegistryHandle,
    /// History store passed to every spawned room
    history: HistoryStore,
}

impl RoomManager {
    /// Spawn the manager actor and return a handle to it
    pub fn spawn(registry: RegistryHandle, history: HistoryStore) -> RoomManagerHandle {
        let (tx, rx) = mpsc::channel(MAILBOX_SIZE);
        let manager = RoomManager {
            rooms: HashMap::new(),
            receiver: rx,
            self_tx: tx.clone(),
            registry,
            history,
        };
        tokio::spawn(manager.run());
        RoomManagerHandle { tx }
    }

    /// Run the manager event loop
    async fn run(mut self) {
        info!("RoomManager started");

        while let Some(cmd) = self.receiver.recv().await {
            self.handle_command(cmd);
        }

        info!("RoomManager shutting down");
    }

    /// Process a single command
    fn handle_command(&mut self, cmd: ManagerCommand) {
        match cmd {
            ManagerCommand::CreateRoom { name, reply } => {
                let result = if self.rooms.contains_key(&name) {
                    Err(ChatError::RoomAlreadyExists(name))
                } else {
                    let _ = self.start_room(&name);
                    Ok(name)
                };
                let _ = reply.send(result);
            }
            ManagerCommand::EnsureRoom { name, reply } => {
                let handle = match self.rooms.get(&name) {
                    Some(handle) => handle.clone(),
                    None => self.start_room(&name),
                };
                let _ = reply.send(handle);
            }
            ManagerCommand::GetRoom { name, reply } => {
                let _ = reply.send(self.rooms.get(&name).cloned());
            }
            ManagerCommand::ListRooms { reply } => {
                let _ = reply.send(self.rooms.keys().cloned().collect());
            }
            ManagerCommand::RoomExists { name, reply } => {
                let _ = reply.send(self.rooms.contains_key(&name));
            }
            ManagerCommand::UserDisconnected { user_id, username } => {
                self.handle_user_disconnected(user_id, username);
            }
            ManagerCommand::RoomCrashed { name } => {
                self.handle_room_crashed(name);
            }
        }
    }

    /// Spawn a room actor under supervision and register it by name
    fn start_room(&mut self, name: &str) -> RoomHandle {
        let (handle, task) =
            RoomActor::spawn(name, self.registry.clone(), self.history.clone());

        // Watcher: report a panic back to the manager mailbox. The table
        // keeps every room's sender alive, so panic is the only exit path.
        let self_tx = self.self_tx.clone();
        let watched = name.to_string();
        tokio::spawn(async move {
            if task.await.is_err() {
                let _ = self_tx
                    .send(ManagerCommand::RoomCrashed { name: watched })
                    .await;
            }
        });

        self.rooms.insert(name.to_string(), handle.clone());
        info!("Room '{}' registered", name);
        handle
    }

    /// Fan disconnect cleanup out to every room
    ///
    /// O(rooms) per disconnect. Each cleanup runs in its own task so one
    /// slow room cannot stall the manager.
    fn handle_user_disconnected(&self, user_id: UserId, username: String) {
        debug!(
            "Fanning out disconnect of '{}' to {} rooms",
            username,
            self.rooms.len()
        );
        for handle in self.rooms.values() {
            let handle = handle.clone();
            let username = username.clone();
            tokio::spawn(async move {
                let _ = handle.cleanup_user(user_id, username).await;
            });
        }
    }

    /// Supervision: restart a crashed room
    ///
    /// Restarts get empty membership; message history reloads from the
    /// durable store when the new actor starts. The table entry is
    /// replaced in place; handles cloned before the crash go stale, and
    /// callers re-resolve rooms by name on every operation.
    fn handle_room_crashed(&mut self, name: String) {
        warn!("Room '{}' crashed, restarting with empty membership", name);
        let _ = self.start_room(&name);
    }
}

/// Cloneable handle for talking to the RoomManager actor
#[derive(Debug, Clone)]
pub struct RoomManagerHandle {
    tx: mpsc::Sender<ManagerCommand>,
}

impl RoomManagerHandle {
    /// Create a room; fails if the name is already live
    pub async fn create_room(&self, name: impl Into<String>) -> Result<String, ChatError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(ManagerCommand::CreateRoom {
                name: name.into(),
                reply,
            })
            .await
            .map_err(|_| ChatError::ChannelClosed)?;
        rx.await.map_err(|_| ChatError::ChannelClosed)?
    }

    /// Locate a room, creating it on demand
    pub async fn ensure_room(&self, name: impl Into<String>) -> Result<RoomHandle, ChatError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(ManagerCommand::EnsureRoom {
                name: name.into(),
                reply,
            })
            .await
            .map_err(|_| ChatError::ChannelClosed)?;
        rx.await.map_err(|_| ChatError::ChannelClosed)
    }

    /// Locate a room without creating it
    pub async fn get_room(&self, name: impl Into<String>) -> Result<Option<RoomHandle>, ChatError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(ManagerCommand::GetRoom {
                name: name.into(),
                reply,
            })
            .await
            .map_err(|_| ChatError::ChannelClosed)?;
        rx.await.map_err(|_| ChatError::ChannelClosed)
    }

    /// List all live room names
    pub async fn list_rooms(&self) -> Result<Vec<String>, ChatError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(ManagerCommand::ListRooms { reply })
            .await
            .map_err(|_| ChatError::ChannelClosed)?;
        rx.await.map_err(|_| ChatError::ChannelClosed)
    }

    /// Check whether a room name is live
    pub async fn room_exists(&self, name: impl Into<String>) -> Result<bool, ChatError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(ManagerCommand::RoomExists {
                name: name.into(),
                reply,
            })
            .await
            .map_err(|_| ChatError::ChannelClosed)?;
        rx.await.map_err(|_| ChatError::ChannelClosed)
    }

    /// Inform every room that a user disconnected (fire-and-forget)
    ///
    /// The username travels along because the registry record is already
    /// deleted by the time rooms emit their "left" notices.
    pub async fn notify_user_disconnected(
        &self,
        user_id: UserId,
        username: impl Into<String>,
    ) -> Result<(), ChatError> {
        self.tx
            .send(ManagerCommand::UserDisconnected {
                user_id,
                username: username.into(),
            })
            .await
            .map_err(|_| ChatError::ChannelClosed)
    }
}
