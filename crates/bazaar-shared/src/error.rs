use thiserror::Error;

/// Rejection reasons for malformed identifiers.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IdError {
    #[error("User id must not be empty")]
    EmptyUserId,

    #[error("User id too long: {len} chars (max {max})")]
    UserIdTooLong { len: usize, max: usize },

    #[error("User id contains invalid character {0:?}")]
    InvalidUserIdChar(char),

    #[error("Product reference must not be blank")]
    EmptyProductRef,

    #[error("Product reference too long: {len} chars (max {max})")]
    ProductRefTooLong { len: usize, max: usize },

    #[error("Invalid conversation id: {0}")]
    InvalidConversationId(#[from] uuid::Error),
}
