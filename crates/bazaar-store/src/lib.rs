//! # bazaar-store
//!
//! Durable storage for Bazaar chat, backed by SQLite.
//!
//! The crate exposes a synchronous [`Database`] handle that wraps a
//! `rusqlite::Connection` and provides typed helpers for the identity
//! directory (`users`), the conversation store (`conversations`) and the
//! append-only message log (`messages`).

pub mod conversations;
pub mod database;
pub mod messages;
pub mod migrations;
pub mod models;
pub mod users;

mod error;

pub use database::Database;
pub use error::{Result, StoreError};
pub use models::*;
