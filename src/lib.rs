//! Multi-room WebSocket Chat Server Library
//!
//! A presence-and-messaging coordinator built on the Actor pattern:
//! per-room actors serialize membership and message order, a registry
//! actor owns "who is connected", and a supervising manager restarts
//! crashed rooms. Room history is persisted per room and survives
//! restarts.
//!
//! # Features
//! - Unique-username registration with disconnect detection
//! - Named rooms, created on demand, one actor per room
//! - Join/leave announcements as system messages
//! - Durable per-room history (append log + JSON snapshot)
//! - Best-effort fan-out of room events to participant sessions
//!
//! # Architecture
//! Every actor owns its state and is driven by an `mpsc` command channel;
//! request/response goes through `oneshot` replies carried in the command.
//! No locks - all cross-actor coordination is message passing:
//! - `UserRegistry` is the single source of truth for live users
//! - Each `RoomActor` is the exclusive owner of one room
//! - `RoomManager` creates, finds, and supervises room actors
//! - `ChatService` is the façade the connection handlers call into
//!
//! # Example
//! ```ignore
//! use tokio::net::TcpListener;
//! use chathub::{ChatService, HistoryStore, handle_connection};
//!
//! #[tokio::main]
//! async fn main() {
//!     let listener = TcpListener::bind("127.0.0.1:8080").await.unwrap();
//!     let service = ChatService::start(HistoryStore::new("history"));
//!
//!     while let Ok((stream, _)) = listener.accept().await {
//!         tokio::spawn(handle_connection(stream, service.clone()));
//!     }
//! }
//! ```

pub mod error;
pub mod handler;
pub mod history;
pub mod manager;
pub mod message;
pub mod registry;
pub mod room;
pub mod session;
pub mod types;
pub mod user;

// Re-export main types for convenience
pub use error::{ChatError, SendError};
pub use handler::handle_connection;
pub use history::HistoryStore;
pub use manager::{RoomManager, RoomManagerHandle};
pub use message::{ChatMessage, ClientMessage, ErrorCode, ServerMessage};
pub use registry::{RegistryHandle, UserRegistry};
pub use room::{RoomActor, RoomHandle};
pub use session::ChatService;
pub use types::{MessageId, UserId};
pub use user::{User, UserInfo};
