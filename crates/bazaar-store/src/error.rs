use bazaar_shared::{ConversationId, IdError, UserId};
use thiserror::Error;

/// Errors produced by the store layer.
#[derive(Error, Debug)]
pub enum StoreError {
    /// SQLite error.
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Failed to determine a platform data directory.
    #[error("Could not determine application data directory")]
    NoDataDir,

    /// Generic I/O error (e.g. creating the database directory).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A query expected exactly one row but found none.
    #[error("Record not found")]
    NotFound,

    /// A conversation needs two distinct participants.
    #[error("A conversation needs two distinct participants")]
    InvalidParticipants,

    #[error("Conversation not found: {0}")]
    ConversationNotFound(ConversationId),

    /// The user is not one of the conversation's two participants.
    #[error("User {user} is not a participant of conversation {conversation}")]
    NotParticipant {
        user: UserId,
        conversation: ConversationId,
    },

    /// Message text is empty after trimming.
    #[error("Message text must not be empty")]
    EmptyMessage,

    /// Migration failure.
    #[error("Migration error: {0}")]
    Migration(String),

    /// A stored identifier failed validation.
    #[error("Invalid stored identifier: {0}")]
    Id(#[from] IdError),
}

impl StoreError {
    /// Whether the failure is likely transient (lock contention, busy file).
    pub fn is_transient(&self) -> bool {
        match self {
            StoreError::Sqlite(rusqlite::Error::SqliteFailure(e, _)) => matches!(
                e.code,
                rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked
            ),
            StoreError::Io(_) => true,
            _ => false,
        }
    }
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, StoreError>;
