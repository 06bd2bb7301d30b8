//! UserRegistry actor implementation
//!
//! Single source of truth for "who is currently connected". All state lives
//! inside one sequential actor task driven by an mpsc command channel; other
//! components talk to it through a cloneable [`RegistryHandle`].
//!
//! Disconnect detection: every registration spawns a liveness watch that
//! waits for the session's event channel to close and then feeds an
//! `Unregister` command back into the registry's own mailbox, so explicit
//! logout and dropped connections share one cleanup path.

use std::collections::HashMap;

use tokio::sync::{mpsc, oneshot};
use tokio::task::AbortHandle;
use tracing::{debug, info};

use crate::error::ChatError;
use crate::message::ServerMessage;
use crate::types::UserId;
use crate::user::{User, UserInfo};

/// Registry mailbox capacity
const MAILBOX_SIZE: usize = 256;

/// A user removed from the registry, published for room cleanup
///
/// Carries the username because the record is already gone by the time
/// rooms process the event; they could not resolve it themselves.
#[derive(Debug, Clone)]
pub struct Disconnect {
    pub user_id: UserId,
    pub username: String,
}

/// Commands sent to the UserRegistry actor
#[derive(Debug)]
pub enum RegistryCommand {
    /// Register a new user under a unique username
    Register {
        username: String,
        sender: mpsc::Sender<ServerMessage>,
        reply: oneshot::Sender<Result<UserId, ChatError>>,
    },
    /// Remove a user (explicit logout or liveness-watch trigger)
    Unregister {
        user_id: UserId,
        reply: Option<oneshot::Sender<()>>,
    },
    /// Resolve a user id to its full record
    Get {
        user_id: UserId,
        reply: oneshot::Sender<Result<User, ChatError>>,
    },
    /// List all connected users (handle-free projection)
    List {
        reply: oneshot::Sender<Vec<UserInfo>>,
    },
}

/// Registered user plus its liveness-watch task
struct UserEntry {
    user: User,
    watch: AbortHandle,
}

/// The UserRegistry actor
///
/// Owns every live user record. Usernames are unique only among currently
/// registered users; ids are never reused.
pub struct UserRegistry {
    /// All connected users: UserId -> entry
    users: HashMap<UserId, UserEntry>,
    /// Username -> UserId for O(1) uniqueness checks
    usernames: HashMap<String, UserId>,
    /// Command receiver channel
    receiver: mpsc::Receiver<RegistryCommand>,
    /// Sender into our own mailbox, cloned into liveness watches
    self_tx: mpsc::Sender<RegistryCommand>,
    /// Disconnect fan-out: consumed at bootstrap to inform every room
    disconnects: mpsc::UnboundedSender<Disconnect>,
}

impl UserRegistry {
    /// Spawn the registry actor and return a handle to it
    ///
    /// Every unregistered user id (explicit or detected) is published on
    /// `disconnects` so the room layer can reconcile membership.
    pub fn spawn(disconnects: mpsc::UnboundedSender<Disconnect>) -> RegistryHandle {
        let (tx, rx) = mpsc::channel(MAILBOX_SIZE);
        let registry = UserRegistry {
            users: HashMap::new(),
            usernames: HashMap::new(),
            receiver: rx,
            self_tx: tx.clone(),
            disconnects,
        };
        tokio::spawn(registry.run());
        RegistryHandle { tx }
    }

    /// Run the registry event loop
    async fn run(mut self) {
        info!("UserRegistry started");

        while let Some(cmd) = self.receiver.recv().await {
            self.handle_command(cmd);
        }

        info!("UserRegistry shutting down");
    }

    /// Process a single command
    fn handle_command(&mut self, cmd: RegistryCommand) {
        match cmd {
            RegistryCommand::Register {
                username,
                sender,
                reply,
            } => {
                let _ = reply.send(self.handle_register(username, sender));
            }
            RegistryCommand::Unregister { user_id, reply } => {
                self.handle_unregister(user_id);
                if let Some(reply) = reply {
                    let _ = reply.send(());
                }
            }
            RegistryCommand::Get { user_id, reply } => {
                let result = self
                    .users
                    .get(&user_id)
                    .map(|entry| entry.user.clone())
                    .ok_or(ChatError::UserNotFound(user_id));
                let _ = reply.send(result);
            }
            RegistryCommand::List { reply } => {
                let users = self.users.values().map(|e| e.user.info()).collect();
                let _ = reply.send(users);
            }
        }
    }

    /// Handle a registration attempt
    fn handle_register(
        &mut self,
        username: String,
        sender: mpsc::Sender<ServerMessage>,
    ) -> Result<UserId, ChatError> {
        if self.usernames.contains_key(&username) {
            debug!("Registration rejected, username '{}' taken", username);
            return Err(ChatError::UsernameTaken(username));
        }

        let user_id = UserId::new();
        let user = User::new(user_id, username.clone(), sender.clone());

        // Liveness watch: fires when the session's receiver is dropped
        let self_tx = self.self_tx.clone();
        let watch = tokio::spawn(async move {
            sender.closed().await;
            debug!("Connection closed for user {}, triggering cleanup", user_id);
            let _ = self_tx
                .send(RegistryCommand::Unregister {
                    user_id,
                    reply: None,
                })
                .await;
        })
        .abort_handle();

        self.usernames.insert(username.clone(), user_id);
        self.users.insert(user_id, UserEntry { user, watch });

        info!("User '{}' registered as {}", username, user_id);
        Ok(user_id)
    }

    /// Handle unregistration; idempotent for unknown ids
    fn handle_unregister(&mut self, user_id: UserId) {
        let Some(entry) = self.users.remove(&user_id) else {
            return;
        };

        entry.watch.abort();
        self.usernames.remove(&entry.user.username);

        info!("User '{}' ({}) unregistered", entry.user.username, user_id);

        // Fan-out so every room can reconcile its membership
        let _ = self.disconnects.send(Disconnect {
            user_id,
            username: entry.user.username,
        });
    }
}

/// Cloneable handle for talking to the UserRegistry actor
#[derive(Debug, Clone)]
pub struct RegistryHandle {
    tx: mpsc::Sender<RegistryCommand>,
}

impl RegistryHandle {
    /// Register a username; fails if a live user already holds it
    pub async fn register(
        &self,
        username: impl Into<String>,
        sender: mpsc::Sender<ServerMessage>,
    ) -> Result<UserId, ChatError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(RegistryCommand::Register {
                username: username.into(),
                sender,
                reply,
            })
            .await
            .map_err(|_| ChatError::ChannelClosed)?;
        rx.await.map_err(|_| ChatError::ChannelClosed)?
    }

    /// Remove a user; no-op if the id is unknown
    pub async fn unregister(&self, user_id: UserId) -> Result<(), ChatError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(RegistryCommand::Unregister {
                user_id,
                reply: Some(reply),
            })
            .await
            .map_err(|_| ChatError::ChannelClosed)?;
        rx.await.map_err(|_| ChatError::ChannelClosed)
    }

    /// Resolve a user id to its full record (including connection handle)
    pub async fn get(&self, user_id: UserId) -> Result<User, ChatError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(RegistryCommand::Get { user_id, reply })
            .await
            .map_err(|_| ChatError::ChannelClosed)?;
        rx.await.map_err(|_| ChatError::ChannelClosed)?
    }

    /// List all connected users
    pub async fn list(&self) -> Result<Vec<UserInfo>, ChatError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(RegistryCommand::List { reply })
            .await
            .map_err(|_| ChatError::ChannelClosed)?;
        rx.await.map_err(|_| ChatError::ChannelClosed)
    }
}
