//! v001 -- Initial schema creation.
//!
//! Creates the three chat tables: `users`, `conversations` and `messages`.

use rusqlite::Connection;

/// SQL executed when upgrading from version 0 to version 1.
const UP_SQL: &str = r#"
-- ----------------------------------------------------------------
-- Users (identity directory)
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS users (
    id           TEXT PRIMARY KEY NOT NULL,   -- opaque id from the auth service
    display_name TEXT,
    avatar_ref   TEXT,
    created_at   TEXT NOT NULL,               -- RFC-3339, microsecond precision
    updated_at   TEXT NOT NULL
);

-- ----------------------------------------------------------------
-- Conversations
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS conversations (
    id            TEXT PRIMARY KEY NOT NULL,  -- UUID v4
    participant_a TEXT NOT NULL,              -- requester at creation
    participant_b TEXT NOT NULL,
    pair_low      TEXT NOT NULL,              -- min(participant_a, participant_b)
    pair_high     TEXT NOT NULL,              -- max(participant_a, participant_b)
    product_ref   TEXT,                       -- NULL = general conversation
    created_at    TEXT NOT NULL,
    updated_at    TEXT NOT NULL,

    CHECK (pair_low < pair_high)
);

-- One conversation per unordered pair and product (NULL folded to '').
CREATE UNIQUE INDEX IF NOT EXISTS idx_conversations_pair_product
    ON conversations(pair_low, pair_high, IFNULL(product_ref, ''));

CREATE INDEX IF NOT EXISTS idx_conversations_a ON conversations(participant_a, updated_at DESC);
CREATE INDEX IF NOT EXISTS idx_conversations_b ON conversations(participant_b, updated_at DESC);

-- ----------------------------------------------------------------
-- Messages (append-only log)
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS messages (
    id              TEXT PRIMARY KEY NOT NULL, -- UUID v4
    conversation_id TEXT NOT NULL,             -- FK -> conversations(id)
    seq             INTEGER NOT NULL,          -- 1-based append position
    sender_id       TEXT NOT NULL,
    text            TEXT NOT NULL,
    timestamp       TEXT NOT NULL,

    UNIQUE (conversation_id, seq),
    FOREIGN KEY (conversation_id) REFERENCES conversations(id)
);
"#;

/// Apply the initial migration.
pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
