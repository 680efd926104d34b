use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::constants::{MAX_PRODUCT_REF_LEN, MAX_USER_ID_LEN};
use crate::error::IdError;

/// Opaque user identifier issued by the external auth service.
///
/// Accepts 1–64 characters of `[A-Za-z0-9_-]`, which covers UUIDs and
/// 24-hex document ids.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(try_from = "String", into = "String")]
pub struct UserId(String);

impl UserId {
    pub fn parse(s: &str) -> Result<Self, IdError> {
        if s.is_empty() {
            return Err(IdError::EmptyUserId);
        }
        if s.len() > MAX_USER_ID_LEN {
            return Err(IdError::UserIdTooLong {
                len: s.len(),
                max: MAX_USER_ID_LEN,
            });
        }
        if let Some(c) = s
            .chars()
            .find(|c| !(c.is_ascii_alphanumeric() || *c == '-' || *c == '_'))
        {
            return Err(IdError::InvalidUserIdChar(c));
        }
        Ok(Self(s.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for UserId {
    type Err = IdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for UserId {
    type Error = IdError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::parse(&s)
    }
}

impl From<UserId> for String {
    fn from(id: UserId) -> Self {
        id.0
    }
}

/// Identifier of a conversation, and of its delivery room.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct ConversationId(pub Uuid);

impl ConversationId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConversationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConversationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for ConversationId {
    type Err = IdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s.trim())?))
    }
}

/// Opaque reference to a catalog product. Stored and echoed, never resolved.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(try_from = "String", into = "String")]
pub struct ProductRef(String);

impl ProductRef {
    /// Parse a present reference: trimmed, non-blank, bounded length.
    pub fn parse(raw: &str) -> Result<Self, IdError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(IdError::EmptyProductRef);
        }
        let len = trimmed.chars().count();
        if len > MAX_PRODUCT_REF_LEN {
            return Err(IdError::ProductRefTooLong {
                len,
                max: MAX_PRODUCT_REF_LEN,
            });
        }
        Ok(Self(trimmed.to_string()))
    }

    /// Normalise an optional raw reference. Missing, empty and blank values
    /// all mean "general conversation".
    pub fn from_optional(raw: Option<&str>) -> Result<Option<Self>, IdError> {
        match raw.filter(|s| !s.trim().is_empty()) {
            Some(s) => Self::parse(s).map(Some),
            None => Ok(None),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for ProductRef {
    type Error = IdError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::parse(&s)
    }
}

impl From<ProductRef> for String {
    fn from(p: ProductRef) -> Self {
        p.0
    }
}

impl fmt::Display for ProductRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
