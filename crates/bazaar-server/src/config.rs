//! Server configuration loaded from environment variables.
//!
//! All settings have sensible defaults so the server can start with zero
//! configuration for local development.

use std::net::SocketAddr;
use std::path::PathBuf;

use bazaar_shared::constants::{
    APP_NAME, DEFAULT_HTTP_PORT, DEFAULT_MAX_MESSAGE_CHARS, DEFAULT_SESSION_QUEUE_CAPACITY,
};

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Socket address for the HTTP (axum) API server.
    /// Env: `HTTP_ADDR`
    /// Default: `0.0.0.0:8080`
    pub http_addr: SocketAddr,

    /// SQLite database file.
    /// Env: `DATABASE_PATH`
    /// Default: `None` (platform data directory).
    pub database_path: Option<PathBuf>,

    /// Human-readable name for this server instance.
    /// Env: `INSTANCE_NAME`
    /// Default: `"Bazaar Chat"`
    pub instance_name: String,

    /// Outbound event queue per live session. Events for a full queue are
    /// dropped; the client recovers by re-fetching the log.
    /// Env: `SESSION_QUEUE_CAPACITY`
    /// Default: `256`
    pub session_queue_capacity: usize,

    /// Maximum message length in characters.
    /// Env: `MAX_MESSAGE_CHARS`
    /// Default: `4000`
    pub max_message_chars: usize,

    /// Whether to answer CORS preflights for any origin.
    /// Env: `CORS_ALLOW_ANY` (true/false)
    /// Default: `true`
    pub cors_allow_any: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: ([0, 0, 0, 0], DEFAULT_HTTP_PORT).into(),
            database_path: None,
            instance_name: APP_NAME.to_string(),
            session_queue_capacity: DEFAULT_SESSION_QUEUE_CAPACITY,
            max_message_chars: DEFAULT_MAX_MESSAGE_CHARS,
            cors_allow_any: true,
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(var: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(addr) = var("HTTP_ADDR") {
            if let Ok(parsed) = addr.parse::<SocketAddr>() {
                config.http_addr = parsed;
            } else {
                tracing::warn!(
                    value = %addr,
                    "Invalid HTTP_ADDR, using default"
                );
            }
        }

        if let Some(path) = var("DATABASE_PATH").filter(|p| !p.is_empty()) {
            config.database_path = Some(PathBuf::from(path));
        }

        if let Some(name) = var("INSTANCE_NAME") {
            config.instance_name = name;
        }

        if let Some(n) = parse_positive(&var, "SESSION_QUEUE_CAPACITY") {
            config.session_queue_capacity = n;
        }

        if let Some(n) = parse_positive(&var, "MAX_MESSAGE_CHARS") {
            config.max_message_chars = n;
        }

        if let Some(val) = var("CORS_ALLOW_ANY") {
            config.cors_allow_any = val != "false" && val != "0";
        }

        // RUST_LOG is handled directly by tracing-subscriber's EnvFilter,
        // so we do not store it here.

        config
    }
}

fn parse_positive(var: &impl Fn(&str) -> Option<String>, key: &str) -> Option<usize> {
    let raw = var(key)?;
    match raw.parse::<usize>() {
        Ok(n) if n > 0 => Some(n),
        _ => {
            tracing::warn!(key, value = %raw, "Expected a positive integer, using default");
            None
        }
    }
}
