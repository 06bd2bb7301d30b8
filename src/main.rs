//! Multi-room WebSocket Chat Server - Entry Point
//!
//! Boots the coordination layer (registry, room manager, history store)
//! and accepts WebSocket connections.

use std::env;

use tokio::net::TcpListener;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use chathub::{handle_connection, ChatService, HistoryStore};

/// Default server address
const DEFAULT_ADDR: &str = "127.0.0.1:8080";

/// Default root directory for per-room history
const DEFAULT_HISTORY_ROOT: &str = "history";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging with environment filter
    // Use RUST_LOG env var to control log level
    // e.g., RUST_LOG=debug or RUST_LOG=chathub=trace
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("chathub=info")),
        )
        .init();

    // Bind address and history root from command line, with defaults
    let addr = env::args().nth(1).unwrap_or_else(|| DEFAULT_ADDR.to_string());
    let history_root = env::args()
        .nth(2)
        .unwrap_or_else(|| DEFAULT_HISTORY_ROOT.to_string());

    // Start TCP listener
    let listener = TcpListener::bind(&addr).await?;
    info!("WebSocket Chat Server listening on {}", addr);

    // Boot the registry, room manager, and disconnect fan-out
    let service = ChatService::start(HistoryStore::new(&history_root));
    info!("Chat service started, history under '{}'", history_root);

    // Connection accept loop
    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                info!("New connection from {}", addr);
                let service = service.clone();

                // Spawn handler task for each connection
                tokio::spawn(async move {
                    if let Err(e) = handle_connection(stream, service).await {
                        error!("Connection handler error: {}", e);
                    }
                });
            }
            Err(e) => {
                error!("Failed to accept connection: {}", e);
            }
        }
    }
}
