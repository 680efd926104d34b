use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use bazaar_shared::protocol::ServerEvent;
use bazaar_shared::{ConversationId, IdError};
use bazaar_store::StoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("A conversation needs two distinct participants")]
    InvalidParticipants,

    #[error("Conversation not found: {0}")]
    ConversationNotFound(ConversationId),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Message text must not be empty")]
    EmptyMessage,

    #[error("Message too long: {len} chars (max {max})")]
    MessageTooLong { len: usize, max: usize },

    #[error("Storage unavailable: {0}")]
    StorageUnavailable(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Missing or invalid user identity")]
    Unauthenticated,

    #[error("Invalid request: {0}")]
    BadRequest(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ServerError {
    /// Stable machine-readable code shared by HTTP bodies and live-channel
    /// error frames.
    pub fn code(&self) -> &'static str {
        match self {
            ServerError::InvalidParticipants => "INVALID_PARTICIPANTS",
            ServerError::ConversationNotFound(_) => "CONVERSATION_NOT_FOUND",
            ServerError::Unauthorized(_) => "UNAUTHORIZED",
            ServerError::EmptyMessage => "EMPTY_MESSAGE",
            ServerError::MessageTooLong { .. } => "MESSAGE_TOO_LONG",
            ServerError::StorageUnavailable(_) => "STORAGE_UNAVAILABLE",
            ServerError::NotFound(_) => "NOT_FOUND",
            ServerError::Unauthenticated => "UNAUTHENTICATED",
            ServerError::BadRequest(_) => "BAD_REQUEST",
            ServerError::Internal(_) => "INTERNAL",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ServerError::InvalidParticipants
            | ServerError::EmptyMessage
            | ServerError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ServerError::ConversationNotFound(_) | ServerError::NotFound(_) => {
                StatusCode::NOT_FOUND
            }
            ServerError::Unauthorized(_) => StatusCode::FORBIDDEN,
            ServerError::MessageTooLong { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            ServerError::StorageUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ServerError::Unauthenticated => StatusCode::UNAUTHORIZED,
            ServerError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Text safe to show a client. Storage and internal details stay in
    /// the logs.
    fn public_message(&self) -> String {
        match self {
            ServerError::StorageUnavailable(_) => {
                "Storage temporarily unavailable, retry later".to_string()
            }
            ServerError::Internal(_) => "Internal server error".to_string(),
            _ => self.to_string(),
        }
    }

    /// Live-channel rendering of this error.
    pub fn to_event(&self) -> ServerEvent {
        ServerEvent::Error {
            code: self.code().to_string(),
            message: self.public_message(),
        }
    }
}

impl From<StoreError> for ServerError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::InvalidParticipants => ServerError::InvalidParticipants,
            StoreError::ConversationNotFound(id) => ServerError::ConversationNotFound(id),
            StoreError::NotParticipant { user, conversation } => ServerError::Unauthorized(
                format!("{user} is not a participant of conversation {conversation}"),
            ),
            StoreError::EmptyMessage => ServerError::EmptyMessage,
            StoreError::NotFound => ServerError::NotFound("Record not found".to_string()),
            other if other.is_transient() => {
                tracing::warn!(error = %other, "Storage busy");
                ServerError::StorageUnavailable(other.to_string())
            }
            other => ServerError::Internal(format!("store: {other}")),
        }
    }
}

impl From<IdError> for ServerError {
    fn from(e: IdError) -> Self {
        ServerError::BadRequest(e.to_string())
    }
}

impl From<JsonRejection> for ServerError {
    fn from(e: JsonRejection) -> Self {
        ServerError::BadRequest(e.body_text())
    }
}

impl From<QueryRejection> for ServerError {
    fn from(e: QueryRejection) -> Self {
        ServerError::BadRequest(e.body_text())
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        if let ServerError::Internal(detail) = &self {
            tracing::error!(error = %detail, "Internal error");
        }

        let body = serde_json::json!({
            "error": self.public_message(),
            "code": self.code(),
        });

        (self.status(), axum::Json(body)).into_response()
    }
}
