//! Room actor implementation
//!
//! One actor per chat room, the exclusive owner of that room's membership
//! and message order. All mutation happens inside the actor's receive loop,
//! one command at a time, giving single-writer ordering per room without
//! locks. Participant validation goes through the user registry; every
//! recorded message is persisted to the history store before broadcast.

use std::collections::HashSet;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::error::ChatError;
use crate::history::HistoryStore;
use crate::message::{ChatMessage, ServerMessage};
use crate::registry::RegistryHandle;
use crate::types::UserId;
use crate::user::UserInfo;

/// Room mailbox capacity
const MAILBOX_SIZE: usize = 256;

/// Commands sent to a RoomActor
#[derive(Debug)]
pub enum RoomCommand {
    /// Add a user to the room and announce it
    Join {
        user_id: UserId,
        reply: oneshot::Sender<Result<(), ChatError>>,
    },
    /// Remove a user from the room and announce it if they still resolve
    Leave {
        user_id: UserId,
        reply: oneshot::Sender<()>,
    },
    /// Disconnect cleanup: like Leave, but the username arrives
    /// pre-resolved because the registry record is already gone
    Cleanup { user_id: UserId, username: String },
    /// Record and fan out a user message
    SendMessage {
        user_id: UserId,
        content: String,
        reply: oneshot::Sender<Result<(), ChatError>>,
    },
    /// Read the accumulated history, oldest first
    GetHistory {
        reply: oneshot::Sender<Vec<ChatMessage>>,
    },
    /// Read the current participants, registry-resolved
    GetParticipants {
        reply: oneshot::Sender<Vec<UserInfo>>,
    },
    /// Panic the actor, exercising the supervisor's restart path
    #[cfg(test)]
    Crash,
}

/// A single chat room actor
///
/// Messages are kept newest-first in memory; reads reverse into
/// chronological order. On start the actor reloads the room's persisted
/// snapshot so history survives restarts; membership always starts empty.
pub struct RoomActor {
    /// Room name (unique, acts as the room's address)
    name: String,
    /// Current membership
    participants: HashSet<UserId>,
    /// Message history, newest first
    messages: Vec<ChatMessage>,
    /// Command receiver channel
    receiver: mpsc::Receiver<RoomCommand>,
    /// Registry used to validate and resolve participants
    registry: RegistryHandle,
    /// Durable per-room history
    history: HistoryStore,
}

impl RoomActor {
    /// Spawn a room actor; returns its handle and the underlying task
    ///
    /// The task handle is what the room manager supervises.
    pub fn spawn(
        name: impl Into<String>,
        registry: RegistryHandle,
        history: HistoryStore,
    ) -> (RoomHandle, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(MAILBOX_SIZE);
        let actor = RoomActor {
            name: name.into(),
            participants: HashSet::new(),
            messages: Vec::new(),
            receiver: rx,
            registry,
            history,
        };
        let task = tokio::spawn(actor.run());
        (RoomHandle { tx }, task)
    }

    /// Run the room event loop
    async fn run(mut self) {
        // Reload persisted history so the room picks up where it left off
        match self.history.load_history(&self.name).await {
            Ok(mut messages) => {
                if !messages.is_empty() {
                    info!(
                        "Room '{}' reloaded {} persisted messages",
                        self.name,
                        messages.len()
                    );
                }
                messages.reverse();
                self.messages = messages;
            }
            Err(e) => {
                warn!("Room '{}' could not reload history: {}", self.name, e);
            }
        }

        info!("Room '{}' started", self.name);

        while let Some(cmd) = self.receiver.recv().await {
            self.handle_command(cmd).await;
        }

        info!("Room '{}' shutting down", self.name);
    }

    /// Process a single command
    async fn handle_command(&mut self, cmd: RoomCommand) {
        match cmd {
            RoomCommand::Join { user_id, reply } => {
                let _ = reply.send(self.handle_join(user_id).await);
            }
            RoomCommand::Leave { user_id, reply } => {
                self.handle_leave(user_id).await;
                let _ = reply.send(());
            }
            RoomCommand::Cleanup { user_id, username } => {
                self.handle_cleanup(user_id, username).await;
            }
            RoomCommand::SendMessage {
                user_id,
                content,
                reply,
            } => {
                let _ = reply.send(self.handle_send(user_id, content).await);
            }
            RoomCommand::GetHistory { reply } => {
                let history = self.messages.iter().rev().cloned().collect();
                let _ = reply.send(history);
            }
            RoomCommand::GetParticipants { reply } => {
                let _ = reply.send(self.resolve_participants().await);
            }
            #[cfg(test)]
            RoomCommand::Crash => panic!("room '{}' crashed on request", self.name),
        }
    }

    /// Handle a join: validate, add, announce
    ///
    /// Idempotent for existing participants; a rejoin still announces
    /// presence.
    async fn handle_join(&mut self, user_id: UserId) -> Result<(), ChatError> {
        let user = self.registry.get(user_id).await?;

        self.participants.insert(user_id);
        info!("User '{}' joined room '{}'", user.username, self.name);

        let notice = ChatMessage::system(format!("{} joined", user.username));
        self.record_and_broadcast(notice).await
    }

    /// Handle a leave; no-op if the user is not a participant
    ///
    /// Membership is removed even when the user no longer resolves in the
    /// registry; the "left" notice is only emitted when it does.
    async fn handle_leave(&mut self, user_id: UserId) {
        if !self.participants.remove(&user_id) {
            return;
        }

        match self.registry.get(user_id).await {
            Ok(user) => self.announce_left(&user.username).await,
            Err(_) => {
                // Already gone from the registry; nothing to announce
                debug!(
                    "Removed vanished user {} from room '{}'",
                    user_id, self.name
                );
            }
        }
    }

    /// Disconnect cleanup; idempotent against rooms the user was never in
    ///
    /// The username is supplied by the registry's fan-out, so the notice
    /// goes out even though the user record no longer resolves.
    async fn handle_cleanup(&mut self, user_id: UserId, username: String) {
        if !self.participants.remove(&user_id) {
            return;
        }
        self.announce_left(&username).await;
    }

    /// Record and broadcast a "left" notice to the remaining participants
    async fn announce_left(&mut self, username: &str) {
        info!("User '{}' left room '{}'", username, self.name);
        let notice = ChatMessage::system(format!("{} left", username));
        if let Err(e) = self.record_and_broadcast(notice).await {
            error!("Room '{}' failed to record leave notice: {}", self.name, e);
        }
    }

    /// Handle a user message
    ///
    /// Sends race with disconnects, so an unknown or non-participant
    /// sender is dropped silently rather than surfaced as an error.
    /// Persistence failures do surface in the reply.
    async fn handle_send(&mut self, user_id: UserId, content: String) -> Result<(), ChatError> {
        let Ok(user) = self.registry.get(user_id).await else {
            debug!(
                "Dropping message from unknown user {} in room '{}'",
                user_id, self.name
            );
            return Ok(());
        };

        if !self.participants.contains(&user_id) {
            debug!(
                "Dropping message from non-participant '{}' in room '{}'",
                user.username, self.name
            );
            return Ok(());
        }

        let message = ChatMessage::user(user_id, user.username, content);
        self.record_and_broadcast(message).await
    }

    /// Prepend to in-memory history, persist, then broadcast
    async fn record_and_broadcast(&mut self, message: ChatMessage) -> Result<(), ChatError> {
        self.messages.insert(0, message.clone());
        self.history.append(&self.name, &message).await?;
        self.broadcast(message).await;
        Ok(())
    }

    /// Fan a message out to every current participant's connection handle
    ///
    /// Best-effort fire-and-forget: stale ids and closed or full channels
    /// are skipped without affecting the others.
    async fn broadcast(&self, message: ChatMessage) {
        for user_id in &self.participants {
            let Ok(user) = self.registry.get(*user_id).await else {
                continue;
            };
            let event = ServerMessage::ChatMessage {
                room: self.name.clone(),
                message: message.clone(),
            };
            if let Err(e) = user.push(event) {
                debug!(
                    "Dropped broadcast to '{}' in room '{}': {}",
                    user.username, self.name, e
                );
            }
        }
    }

    /// Resolve participants through the registry
    ///
    /// Ids that no longer resolve are dropped from the result but kept in
    /// the membership set; only leave and disconnect cleanup mutate it.
    async fn resolve_participants(&self) -> Vec<UserInfo> {
        let mut users = Vec::with_capacity(self.participants.len());
        for user_id in &self.participants {
            if let Ok(user) = self.registry.get(*user_id).await {
                users.push(user.info());
            }
        }
        users
    }
}

/// Cloneable handle for talking to a RoomActor
#[derive(Debug, Clone)]
pub struct RoomHandle {
    tx: mpsc::Sender<RoomCommand>,
}

impl RoomHandle {
    /// Join the room; fails if the user is unknown to the registry
    pub async fn join(&self, user_id: UserId) -> Result<(), ChatError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(RoomCommand::Join { user_id, reply })
            .await
            .map_err(|_| ChatError::ChannelClosed)?;
        rx.await.map_err(|_| ChatError::ChannelClosed)?
    }

    /// Leave the room; no-op for non-participants
    pub async fn leave(&self, user_id: UserId) -> Result<(), ChatError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(RoomCommand::Leave { user_id, reply })
            .await
            .map_err(|_| ChatError::ChannelClosed)?;
        rx.await.map_err(|_| ChatError::ChannelClosed)
    }

    /// Disconnect-cleanup path: remove a departed user without waiting
    pub async fn cleanup_user(
        &self,
        user_id: UserId,
        username: impl Into<String>,
    ) -> Result<(), ChatError> {
        self.tx
            .send(RoomCommand::Cleanup {
                user_id,
                username: username.into(),
            })
            .await
            .map_err(|_| ChatError::ChannelClosed)
    }

    /// Send a chat message; silently dropped for non-participants
    pub async fn send_message(
        &self,
        user_id: UserId,
        content: impl Into<String>,
    ) -> Result<(), ChatError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(RoomCommand::SendMessage {
                user_id,
                content: content.into(),
                reply,
            })
            .await
            .map_err(|_| ChatError::ChannelClosed)?;
        rx.await.map_err(|_| ChatError::ChannelClosed)?
    }

    /// Fetch the room's history, oldest first
    pub async fn history(&self) -> Result<Vec<ChatMessage>, ChatError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(RoomCommand::GetHistory { reply })
            .await
            .map_err(|_| ChatError::ChannelClosed)?;
        rx.await.map_err(|_| ChatError::ChannelClosed)
    }

    /// Panic the room actor to drive supervisor tests
    #[cfg(test)]
    pub async fn crash(&self) {
        let _ = self.tx.send(RoomCommand::Crash).await;
    }

    /// Fetch the room's current participants
    pub async fn participants(&self) -> Result<Vec<UserInfo>, ChatError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(RoomCommand::GetParticipants { reply })
            .await
            .map_err(|_| ChatError::ChannelClosed)?;
        rx.await.map_err(|_| ChatError::ChannelClosed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::UserRegistry;

    struct Fixture {
        registry: RegistryHandle,
        history: HistoryStore,
        _dir: tempfile::TempDir,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let (disc_tx, _disc_rx) = mpsc::unbounded_channel();
        Fixture {
            registry: UserRegistry::spawn(disc_tx),
            history: HistoryStore::new(dir.path()),
            _dir: dir,
        }
    }

    async fn connect(
        fx: &Fixture,
        username: &str,
    ) -> (UserId, mpsc::Receiver<ServerMessage>) {
        let (tx, rx) = mpsc::channel(32);
        let id = fx.registry.register(username, tx).await.unwrap();
        (id, rx)
    }

    #[tokio::test]
    async fn test_join_announces_and_adds_participant() {
        let fx = fixture();
        let (room, _task) = RoomActor::spawn("general", fx.registry.clone(), fx.history.clone());
        let (alice, mut alice_rx) = connect(&fx, "alice").await;

        room.join(alice).await.unwrap();

        let history = room.history().await.unwrap();
        assert_eq!(history.len(), 1);
        assert!(history[0].is_system());
        assert_eq!(history[0].content, "alice joined");

        let participants = room.participants().await.unwrap();
        assert_eq!(participants.len(), 1);
        assert_eq!(participants[0].id, alice);

        // The joiner receives the announcement too
        match alice_rx.try_recv().unwrap() {
            ServerMessage::ChatMessage { room, message } => {
                assert_eq!(room, "general");
                assert_eq!(message.content, "alice joined");
            }
            other => panic!("Unexpected event: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_join_unknown_user_fails_without_mutation() {
        let fx = fixture();
        let (room, _task) = RoomActor::spawn("general", fx.registry.clone(), fx.history.clone());

        let err = room.join(UserId::new()).await.unwrap_err();
        assert!(matches!(err, ChatError::UserNotFound(_)));
        assert!(room.history().await.unwrap().is_empty());
        assert!(room.participants().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_persistence_failure_surfaces_in_reply() {
        let fx = fixture();

        // Root the store at a plain file so every append fails on
        // directory creation
        let blocked = fx._dir.path().join("blocked");
        std::fs::write(&blocked, b"").unwrap();
        let (room, _task) =
            RoomActor::spawn("general", fx.registry.clone(), HistoryStore::new(&blocked));
        let (alice, _rx) = connect(&fx, "alice").await;

        let err = room.join(alice).await.unwrap_err();
        assert!(matches!(err, ChatError::Io(_)));

        // Membership was added before the failed persist, so the send
        // path hits the same error
        let err = room.send_message(alice, "hello").await.unwrap_err();
        assert!(matches!(err, ChatError::Io(_)));
    }

    #[tokio::test]
    async fn test_rejoin_announces_again() {
        let fx = fixture();
        let (room, _task) = RoomActor::spawn("general", fx.registry.clone(), fx.history.clone());
        let (alice, _rx) = connect(&fx, "alice").await;

        room.join(alice).await.unwrap();
        room.join(alice).await.unwrap();

        assert_eq!(room.participants().await.unwrap().len(), 1);
        assert_eq!(room.history().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_send_message_reaches_all_participants() {
        let fx = fixture();
        let (room, _task) = RoomActor::spawn("general", fx.registry.clone(), fx.history.clone());
        let (alice, mut alice_rx) = connect(&fx, "alice").await;
        let (bob, mut bob_rx) = connect(&fx, "bob").await;

        room.join(alice).await.unwrap();
        room.join(bob).await.unwrap();
        room.send_message(alice, "hello bob").await.unwrap();

        let history = room.history().await.unwrap();
        let last = history.last().unwrap();
        assert_eq!(last.content, "hello bob");
        assert_eq!(last.user_id, Some(alice));
        assert_eq!(last.username, "alice");

        // Both sessions observe the message as the most recent event
        let mut saw = 0;
        while let Ok(ServerMessage::ChatMessage { message, .. }) = bob_rx.try_recv() {
            if message.content == "hello bob" {
                saw += 1;
            }
        }
        while let Ok(ServerMessage::ChatMessage { message, .. }) = alice_rx.try_recv() {
            if message.content == "hello bob" {
                saw += 1;
            }
        }
        assert_eq!(saw, 2);
    }

    #[tokio::test]
    async fn test_send_from_non_participant_drops_silently() {
        let fx = fixture();
        let (room, _task) = RoomActor::spawn("general", fx.registry.clone(), fx.history.clone());
        let (alice, _alice_rx) = connect(&fx, "alice").await;
        let (bob, mut bob_rx) = connect(&fx, "bob").await;

        room.join(bob).await.unwrap();
        let before = room.history().await.unwrap().len();

        // Alice is registered but never joined
        room.send_message(alice, "sneaky").await.unwrap();

        assert_eq!(room.history().await.unwrap().len(), before);
        while let Ok(event) = bob_rx.try_recv() {
            if let ServerMessage::ChatMessage { message, .. } = event {
                assert_ne!(message.content, "sneaky");
            }
        }
    }

    #[tokio::test]
    async fn test_send_from_unknown_user_drops_silently() {
        let fx = fixture();
        let (room, _task) = RoomActor::spawn("general", fx.registry.clone(), fx.history.clone());

        room.send_message(UserId::new(), "ghost").await.unwrap();
        assert!(room.history().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_leave_announces_to_remaining() {
        let fx = fixture();
        let (room, _task) = RoomActor::spawn("general", fx.registry.clone(), fx.history.clone());
        let (alice, mut alice_rx) = connect(&fx, "alice").await;
        let (bob, mut bob_rx) = connect(&fx, "bob").await;

        room.join(alice).await.unwrap();
        room.join(bob).await.unwrap();
        room.leave(alice).await.unwrap();

        let participants = room.participants().await.unwrap();
        assert_eq!(participants.len(), 1);
        assert_eq!(participants[0].id, bob);

        let history = room.history().await.unwrap();
        assert_eq!(history.last().unwrap().content, "alice left");

        // Bob sees the notice; alice (already removed) does not
        let mut bob_saw_leave = false;
        while let Ok(ServerMessage::ChatMessage { message, .. }) = bob_rx.try_recv() {
            if message.content == "alice left" {
                bob_saw_leave = true;
            }
        }
        assert!(bob_saw_leave);
        while let Ok(ServerMessage::ChatMessage { message, .. }) = alice_rx.try_recv() {
            assert_ne!(message.content, "alice left");
        }
    }

    #[tokio::test]
    async fn test_leave_non_participant_is_noop() {
        let fx = fixture();
        let (room, _task) = RoomActor::spawn("general", fx.registry.clone(), fx.history.clone());
        let (alice, _rx) = connect(&fx, "alice").await;

        room.leave(alice).await.unwrap();
        assert!(room.history().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_leave_after_unregister_removes_without_notice() {
        let fx = fixture();
        let (room, _task) = RoomActor::spawn("general", fx.registry.clone(), fx.history.clone());
        let (alice, _rx) = connect(&fx, "alice").await;

        room.join(alice).await.unwrap();
        fx.registry.unregister(alice).await.unwrap();
        room.leave(alice).await.unwrap();

        // Membership gone, but no "left" notice could be resolved
        assert!(room.participants().await.unwrap().is_empty());
        let history = room.history().await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].content, "alice joined");
    }

    #[tokio::test]
    async fn test_cleanup_announces_with_supplied_name() {
        let fx = fixture();
        let (room, _task) = RoomActor::spawn("general", fx.registry.clone(), fx.history.clone());
        let (alice, _a_rx) = connect(&fx, "alice").await;
        let (bob, _b_rx) = connect(&fx, "bob").await;

        room.join(alice).await.unwrap();
        room.join(bob).await.unwrap();

        // Disconnect: the registry record is gone before rooms hear of it
        fx.registry.unregister(alice).await.unwrap();
        room.cleanup_user(alice, "alice").await.unwrap();

        let history = wait_for_history_len(&room, 3).await;
        assert_eq!(history.last().unwrap().content, "alice left");
        let participants = room.participants().await.unwrap();
        assert_eq!(participants.len(), 1);
        assert_eq!(participants[0].id, bob);
    }

    #[tokio::test]
    async fn test_cleanup_is_noop_for_non_member() {
        let fx = fixture();
        let (room, _task) = RoomActor::spawn("general", fx.registry.clone(), fx.history.clone());
        let (alice, _rx) = connect(&fx, "alice").await;

        room.cleanup_user(alice, "alice").await.unwrap();
        assert!(room.history().await.unwrap().is_empty());
    }

    /// Cleanup is fire-and-forget; poll until the room has caught up
    async fn wait_for_history_len(room: &RoomHandle, len: usize) -> Vec<ChatMessage> {
        for _ in 0..100 {
            let history = room.history().await.unwrap();
            if history.len() >= len {
                return history;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        panic!("Room never reached {} history entries", len);
    }

    #[tokio::test]
    async fn test_participants_read_drops_stale_without_mutating() {
        let fx = fixture();
        let (room, _task) = RoomActor::spawn("general", fx.registry.clone(), fx.history.clone());
        let (alice, _a_rx) = connect(&fx, "alice").await;
        let (bob, _b_rx) = connect(&fx, "bob").await;

        room.join(alice).await.unwrap();
        room.join(bob).await.unwrap();
        fx.registry.unregister(bob).await.unwrap();

        let participants = room.participants().await.unwrap();
        assert_eq!(participants.len(), 1);
        assert_eq!(participants[0].id, alice);

        // The read did not emit any membership notice
        let history = room.history().await.unwrap();
        assert_eq!(history.len(), 2);
    }

    #[tokio::test]
    async fn test_history_survives_room_restart() {
        let fx = fixture();
        let (alice, _rx) = connect(&fx, "alice").await;

        let (room, task) = RoomActor::spawn("general", fx.registry.clone(), fx.history.clone());
        room.join(alice).await.unwrap();
        room.send_message(alice, "before restart").await.unwrap();
        drop(room);
        task.await.unwrap();

        // Fresh actor for the same room: history reloaded, membership empty
        let (room, _task) = RoomActor::spawn("general", fx.registry.clone(), fx.history.clone());
        let history = room.history().await.unwrap();
        let contents: Vec<_> = history.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["alice joined", "before restart"]);
        assert!(room.participants().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_joins_produce_one_notice_each() {
        let fx = fixture();
        let (room, _task) = RoomActor::spawn("general", fx.registry.clone(), fx.history.clone());

        let mut ids = Vec::new();
        let mut rxs = Vec::new();
        for name in ["u1", "u2", "u3", "u4", "u5"] {
            let (id, rx) = connect(&fx, name).await;
            ids.push(id);
            rxs.push(rx);
        }

        let mut joins = Vec::new();
        for id in &ids {
            let room = room.clone();
            let id = *id;
            joins.push(tokio::spawn(async move { room.join(id).await }));
        }
        for join in joins {
            join.await.unwrap().unwrap();
        }

        let participants = room.participants().await.unwrap();
        assert_eq!(participants.len(), ids.len());

        let history = room.history().await.unwrap();
        assert_eq!(history.len(), ids.len());
        for name in ["u1", "u2", "u3", "u4", "u5"] {
            let notice = format!("{} joined", name);
            assert_eq!(
                history.iter().filter(|m| m.content == notice).count(),
                1,
                "expected exactly one notice for {}",
                name
            );
        }
    }
}
