//! WebSocket connection handler
//!
//! Handles individual client connections: WebSocket handshake, message
//! parsing, and translation of client commands into session-façade calls.
//! Per-connection preconditions (registered? joined this room?) live here,
//! not in the core actors.

use std::collections::HashSet;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, warn};

use crate::error::ChatError;
use crate::message::{ClientMessage, ServerMessage};
use crate::session::ChatService;
use crate::types::UserId;

/// Per-connection outbound buffer (room pushes and replies share it)
const SESSION_BUFFER_SIZE: usize = 32;

/// Handle a new TCP connection
///
/// Performs the WebSocket handshake, then runs a read loop that feeds the
/// session façade while a write task drains the outbound channel. The
/// outbound sender doubles as the user's connection handle: its closure is
/// what the registry's liveness watch observes.
pub async fn handle_connection(stream: TcpStream, service: ChatService) -> Result<(), ChatError> {
    let peer_addr = stream
        .peer_addr()
        .map(|a| a.to_string())
        .unwrap_or_else(|_| "unknown".to_string());

    debug!("New TCP connection from {}", peer_addr);

    let ws_stream = tokio_tungstenite::accept_async(stream).await?;
    let (mut ws_sender, mut ws_receiver) = ws_stream.split();

    // Server -> client channel; also handed to the registry on register
    let (msg_tx, mut msg_rx) = mpsc::channel::<ServerMessage>(SESSION_BUFFER_SIZE);

    // Write task (ServerMessage -> WebSocket)
    let write_task = tokio::spawn(async move {
        while let Some(msg) = msg_rx.recv().await {
            match serde_json::to_string(&msg) {
                Ok(json) => {
                    if ws_sender.send(Message::Text(json.into())).await.is_err() {
                        debug!("WebSocket send failed, ending write task");
                        break;
                    }
                }
                Err(e) => {
                    error!("Failed to serialize message: {}", e);
                    // Continue - don't break on serialization errors
                }
            }
        }
        debug!("Write task ended for client");

        let _ = ws_sender.close().await;
    });

    let mut session = Session::new(service.clone(), msg_tx);

    // Read loop (WebSocket -> façade calls)
    while let Some(msg_result) = ws_receiver.next().await {
        match msg_result {
            Ok(Message::Text(text)) => match serde_json::from_str::<ClientMessage>(&text) {
                Ok(client_msg) => {
                    if session.handle(client_msg).await.is_err() {
                        debug!("Outbound channel closed, ending read loop");
                        break;
                    }
                }
                Err(e) => {
                    warn!("Invalid JSON from {}: {}", peer_addr, e);
                    if session.reply(ChatError::Json(e).into()).await.is_err() {
                        break;
                    }
                }
            },
            Ok(Message::Close(_)) => {
                debug!("Client at {} sent close frame", peer_addr);
                break;
            }
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => {}
            Ok(_) => {
                // Binary or other message types - ignore
            }
            Err(e) => {
                error!("WebSocket error for {}: {}", peer_addr, e);
                break;
            }
        }
    }

    // Cleanup: unregister drops the registry's sender clone, which lets
    // the write task drain out and close the socket
    if let Some(user_id) = session.user_id {
        let _ = service.unregister(user_id).await;
    }
    drop(session);
    let _ = write_task.await;

    info!("Session from {} closed", peer_addr);
    Ok(())
}

/// Per-connection session state and command dispatch
struct Session {
    service: ChatService,
    sender: mpsc::Sender<ServerMessage>,
    /// Set once this session has registered a username
    user_id: Option<UserId>,
    /// Rooms this session has joined (and not left)
    joined: HashSet<String>,
}

impl Session {
    fn new(service: ChatService, sender: mpsc::Sender<ServerMessage>) -> Self {
        Self {
            service,
            sender,
            user_id: None,
            joined: HashSet::new(),
        }
    }

    /// Push a frame to this session's write task
    async fn reply(&self, msg: ServerMessage) -> Result<(), ChatError> {
        self.sender
            .send(msg)
            .await
            .map_err(|_| ChatError::ChannelClosed)
    }

    /// Process one client message; typed failures become error frames
    ///
    /// Only a broken outbound channel propagates as Err and ends the
    /// session - the interactive surface never sees an unhandled fault.
    async fn handle(&mut self, msg: ClientMessage) -> Result<(), ChatError> {
        match self.dispatch(msg).await {
            Ok(Some(reply)) => self.reply(reply).await,
            Ok(None) => Ok(()),
            Err(ChatError::ChannelClosed) => Err(ChatError::ChannelClosed),
            Err(e) => self.reply(e.into()).await,
        }
    }

    /// Route a client message to the façade
    async fn dispatch(&mut self, msg: ClientMessage) -> Result<Option<ServerMessage>, ChatError> {
        match msg {
            ClientMessage::Register { username } => {
                if self.user_id.is_some() {
                    return Ok(Some(ServerMessage::Error {
                        code: crate::message::ErrorCode::InvalidMessage,
                        message: "Already registered".to_string(),
                    }));
                }
                let user_id = self
                    .service
                    .register(username.clone(), self.sender.clone())
                    .await?;
                self.user_id = Some(user_id);
                Ok(Some(ServerMessage::Registered { user_id, username }))
            }
            ClientMessage::Logout => {
                let user_id = self.require_user()?;
                self.service.unregister(user_id).await?;
                self.user_id = None;
                self.joined.clear();
                Ok(Some(ServerMessage::LoggedOut))
            }
            ClientMessage::CreateRoom { room } => {
                self.require_user()?;
                let room = self.service.create_room(room).await?;
                Ok(Some(ServerMessage::RoomCreated { room }))
            }
            ClientMessage::ListRooms => {
                self.require_user()?;
                let rooms = self.service.list_rooms().await?;
                Ok(Some(ServerMessage::Rooms { rooms }))
            }
            ClientMessage::ListUsers => {
                self.require_user()?;
                let users = self.service.list().await?;
                Ok(Some(ServerMessage::Users { users }))
            }
            ClientMessage::Join { room } => {
                let user_id = self.require_user()?;
                self.service.join(&room, user_id).await?;
                self.joined.insert(room.clone());
                Ok(Some(ServerMessage::Joined { room }))
            }
            ClientMessage::Leave { room } => {
                let user_id = self.require_user()?;
                if !self.joined.remove(&room) {
                    return Err(ChatError::NotInRoom(room));
                }
                self.service.leave(&room, user_id).await?;
                Ok(Some(ServerMessage::Left { room }))
            }
            ClientMessage::Send { room, content } => {
                let user_id = self.require_user()?;
                if !self.joined.contains(&room) {
                    return Err(ChatError::NotInRoom(room));
                }
                self.service.send_message(&room, user_id, content).await?;
                // No ack frame; the broadcast push is the feedback
                Ok(None)
            }
            ClientMessage::History { room } => {
                self.require_user()?;
                let messages = self.service.get_history(&room).await?;
                Ok(Some(ServerMessage::History { room, messages }))
            }
            ClientMessage::Participants { room } => {
                self.require_user()?;
                let users = self.service.get_participants(&room).await?;
                Ok(Some(ServerMessage::Participants { room, users }))
            }
        }
    }

    /// Registration precondition shared by every post-register command
    fn require_user(&self) -> Result<UserId, ChatError> {
        self.user_id.ok_or(ChatError::NotConnected)
    }
}
