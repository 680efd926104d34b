//! Client-facing views and the live-channel event protocol.
//!
//! The same [`MessageView`] value is returned to the REST caller that
//! committed a message and carried in the [`ServerEvent::MessageCommitted`]
//! broadcast, so both write paths render identically.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::{ConversationId, ProductRef, UserId};

/// Display metadata resolved through the identity directory.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct UserSummary {
    pub id: UserId,
    pub display_name: Option<String>,
    pub avatar_ref: Option<String>,
}

impl UserSummary {
    /// Summary for a user the directory knows nothing about.
    pub fn unknown(id: UserId) -> Self {
        Self {
            id,
            display_name: None,
            avatar_ref: None,
        }
    }
}

/// A committed message with its sender enriched.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct MessageView {
    pub id: Uuid,
    pub conversation_id: ConversationId,
    /// 1-based position in the conversation log.
    pub seq: i64,
    pub sender: UserSummary,
    pub text: String,
    pub timestamp: DateTime<Utc>,
}

/// A conversation as handed to clients.
///
/// `messages` is populated when a single conversation is resolved or
/// fetched; `last_message` when conversations are listed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ConversationView {
    pub id: ConversationId,
    pub participants: Vec<UserSummary>,
    pub product_ref: Option<ProductRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub messages: Option<Vec<MessageView>>,
    pub last_message: Option<MessageView>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Frames sent by a client over the live channel.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum ClientEvent {
    /// Start receiving commits for a conversation.
    Join { conversation_id: ConversationId },
    /// Stop receiving commits for a conversation.
    Leave { conversation_id: ConversationId },
}

/// Frames sent by the server over the live channel.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum ServerEvent {
    Joined {
        conversation_id: ConversationId,
    },
    Left {
        conversation_id: ConversationId,
    },
    /// A message was durably appended to the conversation.
    MessageCommitted {
        conversation_id: ConversationId,
        message: MessageView,
    },
    Error {
        code: String,
        message: String,
    },
}
