//! Durable per-room message history
//!
//! Each room gets its own directory under a fixed history root, holding two
//! independent files: an append-only pipe-delimited log (audit trail, one
//! line per message) and a JSON-array snapshot rewritten wholesale on every
//! append. The snapshot is the canonical read path; the log is never parsed
//! back in this design.

use std::io::ErrorKind;
use std::path::PathBuf;

use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use crate::error::ChatError;
use crate::message::ChatMessage;

/// Append-only log file name inside a room's history directory
const LOG_FILE: &str = "messages.log";

/// JSON snapshot file name inside a room's history directory
const SNAPSHOT_FILE: &str = "messages.json";

/// Sentinel written to the log's user-id field for system messages
const SYSTEM_SENTINEL: &str = "system";

/// Per-room durable history store
///
/// Cheap to clone; every room actor holds one. All I/O is async and
/// best-effort: a failed append surfaces to the operation that triggered
/// it, with no rollback of whichever file was already written.
#[derive(Debug, Clone)]
pub struct HistoryStore {
    root: PathBuf,
}

impl HistoryStore {
    /// Create a store rooted at the given directory
    ///
    /// The root itself is created lazily on first append.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Directory holding one room's log and snapshot
    fn room_dir(&self, room: &str) -> PathBuf {
        self.root.join(room)
    }

    /// Persist one message for a room
    ///
    /// Appends a log line, then rewrites the snapshot with the message
    /// inserted at the head (snapshots are newest-first on disk).
    pub async fn append(&self, room: &str, message: &ChatMessage) -> Result<(), ChatError> {
        let dir = self.room_dir(room);
        fs::create_dir_all(&dir).await?;

        // Append-only log line
        let line = format_log_line(message);
        let mut log = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(dir.join(LOG_FILE))
            .await?;
        log.write_all(line.as_bytes()).await?;
        log.flush().await?;

        // Full snapshot rewrite, new message at the head
        let mut messages = self.load_snapshot(room).await?;
        messages.insert(0, message.clone());
        let json = serde_json::to_vec(&messages)?;
        fs::write(dir.join(SNAPSHOT_FILE), json).await?;

        debug!("Persisted message {} for room '{}'", message.id, room);
        Ok(())
    }

    /// Load a room's history in chronological (oldest-first) order
    ///
    /// A missing or corrupt snapshot reads as "no history", not an error.
    pub async fn load_history(&self, room: &str) -> Result<Vec<ChatMessage>, ChatError> {
        let mut messages = self.load_snapshot(room).await?;
        messages.reverse();
        Ok(messages)
    }

    /// Read the raw snapshot (newest-first, as stored)
    async fn load_snapshot(&self, room: &str) -> Result<Vec<ChatMessage>, ChatError> {
        let path = self.room_dir(room).join(SNAPSHOT_FILE);
        let bytes = match fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        match serde_json::from_slice(&bytes) {
            Ok(messages) => Ok(messages),
            Err(e) => {
                warn!("Corrupt snapshot for room '{}': {} - treating as empty", room, e);
                Ok(Vec::new())
            }
        }
    }
}

/// Render one pipe-delimited log line: timestamp|user id|username|content
fn format_log_line(message: &ChatMessage) -> String {
    let user_id = message
        .user_id
        .map(|id| id.to_string())
        .unwrap_or_else(|| SYSTEM_SENTINEL.to_string());
    format!(
        "{}|{}|{}|{}\n",
        message.timestamp.to_rfc3339(),
        user_id,
        message.username,
        escape_content(&message.content),
    )
}

/// Escape embedded newlines (and the escape character itself) so every
/// message occupies exactly one log line
fn escape_content(content: &str) -> String {
    content
        .replace('\\', "\\\\")
        .replace('\n', "\\n")
        .replace('\r', "\\r")
}
