//! # bazaar-server
//!
//! Buyer/seller chat server for the Bazaar marketplace.
//!
//! This binary provides:
//! - **REST API** (axum) to open conversations, read their logs and send
//!   messages
//! - **Live channel** over WebSocket that pushes committed messages to every
//!   session joined to a conversation
//! - **SQLite storage** for users, conversations and message logs

mod api;
mod auth;
mod chat;
mod config;
mod delivery;
mod error;
mod ws;

use std::sync::Arc;
use std::time::Instant;

use bazaar_store::Database;
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::api::AppState;
use crate::chat::ChatService;
use crate::config::ServerConfig;
use crate::delivery::DeliveryRouter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // -----------------------------------------------------------------------
    // 1. Initialize tracing (respects RUST_LOG env var)
    // -----------------------------------------------------------------------
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,bazaar_server=debug")),
        )
        .init();

    info!("Starting Bazaar chat server v{}", env!("CARGO_PKG_VERSION"));

    // -----------------------------------------------------------------------
    // 2. Load configuration
    // -----------------------------------------------------------------------
    let config = ServerConfig::from_env();
    info!(?config, "Loaded configuration");

    // -----------------------------------------------------------------------
    // 3. Open storage and build the chat core
    // -----------------------------------------------------------------------
    let db = match &config.database_path {
        Some(path) => Database::open_at(path)?,
        None => Database::open_default()?,
    };
    info!(path = ?db.path(), "Database ready");

    // One router per process; every transport shares it.
    let router = DeliveryRouter::new(config.session_queue_capacity);
    let chat = ChatService::new(db, router, config.max_message_chars);

    let http_addr = config.http_addr;
    let app_state = AppState {
        chat,
        config: Arc::new(config),
        started_at: Instant::now(),
    };

    // -----------------------------------------------------------------------
    // 4. Run the HTTP API server (blocks until shutdown)
    // -----------------------------------------------------------------------
    tokio::select! {
        result = api::serve(app_state, http_addr) => {
            if let Err(e) = result {
                tracing::error!(error = %e, "HTTP server failed");
                return Err(e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
        }
    }

    Ok(())
}
