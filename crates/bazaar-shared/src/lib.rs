//! # bazaar-shared
//!
//! Types shared by the Bazaar chat store and server: identifiers, the
//! JSON views handed to clients, and the live-channel event protocol.

pub mod constants;
pub mod error;
pub mod protocol;
pub mod types;

pub use error::IdError;
pub use types::{ConversationId, ProductRef, UserId};
