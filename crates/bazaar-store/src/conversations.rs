//! Conversation store: resolution and lookup of two-party conversations.
//!
//! A conversation is keyed by its unordered participant pair plus an
//! optional product reference. The unique index
//! `idx_conversations_pair_product` guarantees at most one row per key even
//! when both participants resolve at the same moment.

use bazaar_shared::{ConversationId, ProductRef, UserId};
use rusqlite::{params, ErrorCode, OptionalExtension};
use uuid::Uuid;

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::{decode_ts, decode_user_id, encode_ts, now, Conversation};

const SELECT_COLUMNS: &str =
    "SELECT id, participant_a, participant_b, product_ref, created_at, updated_at FROM conversations";

/// Order-independent key for a participant pair.
fn sorted_pair<'a>(a: &'a UserId, b: &'a UserId) -> (&'a UserId, &'a UserId) {
    if a <= b {
        (a, b)
    } else {
        (b, a)
    }
}

impl Database {
    // ------------------------------------------------------------------
    // Resolve
    // ------------------------------------------------------------------

    /// Return the conversation between `requester` and `other` for
    /// `product`, creating it if none exists.
    ///
    /// A lost creation race surfaces as a uniqueness violation and is
    /// answered by re-fetching the winner's row.
    pub fn resolve_or_create_conversation(
        &self,
        requester: &UserId,
        other: &UserId,
        product: Option<&ProductRef>,
    ) -> Result<Conversation> {
        if requester == other {
            return Err(StoreError::InvalidParticipants);
        }

        if let Some(existing) = self.find_conversation(requester, other, product)? {
            return Ok(existing);
        }

        let ts = now();
        let candidate = Conversation {
            id: ConversationId::new(),
            participants: [requester.clone(), other.clone()],
            product_ref: product.cloned(),
            created_at: ts,
            updated_at: ts,
        };
        self.create_or_fetch(candidate)
    }

    /// Insert `candidate`, or return the row that already holds its key.
    pub(crate) fn create_or_fetch(&self, candidate: Conversation) -> Result<Conversation> {
        match self.insert_conversation(&candidate) {
            Ok(()) => {
                tracing::info!(
                    conversation = %candidate.id,
                    product = ?candidate.product_ref.as_ref().map(ProductRef::as_str),
                    "created conversation"
                );
                Ok(candidate)
            }
            Err(StoreError::Sqlite(rusqlite::Error::SqliteFailure(e, _)))
                if e.code == ErrorCode::ConstraintViolation =>
            {
                let [a, b] = &candidate.participants;
                tracing::debug!(
                    a = %a,
                    b = %b,
                    "conversation already exists, re-fetching"
                );
                self.find_conversation(a, b, candidate.product_ref.as_ref())?
                    .ok_or(StoreError::NotFound)
            }
            Err(e) => Err(e),
        }
    }

    fn insert_conversation(&self, conv: &Conversation) -> Result<()> {
        let [a, b] = &conv.participants;
        let (low, high) = sorted_pair(a, b);
        self.conn().execute(
            "INSERT INTO conversations
                (id, participant_a, participant_b, pair_low, pair_high, product_ref, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                conv.id.to_string(),
                a.as_str(),
                b.as_str(),
                low.as_str(),
                high.as_str(),
                conv.product_ref.as_ref().map(ProductRef::as_str),
                encode_ts(&conv.created_at),
                encode_ts(&conv.updated_at),
            ],
        )?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Read
    // ------------------------------------------------------------------

    /// Look up the conversation for an unordered pair and product.
    pub fn find_conversation(
        &self,
        a: &UserId,
        b: &UserId,
        product: Option<&ProductRef>,
    ) -> Result<Option<Conversation>> {
        let (low, high) = sorted_pair(a, b);
        let conv = self
            .conn()
            .query_row(
                &format!(
                    "{SELECT_COLUMNS}
                     WHERE pair_low = ?1 AND pair_high = ?2
                       AND IFNULL(product_ref, '') = IFNULL(?3, '')"
                ),
                params![
                    low.as_str(),
                    high.as_str(),
                    product.map(ProductRef::as_str)
                ],
                row_to_conversation,
            )
            .optional()?;
        Ok(conv)
    }

    /// Fetch a conversation by id.
    pub fn get_conversation(&self, id: ConversationId) -> Result<Conversation> {
        self.conn()
            .query_row(
                &format!("{SELECT_COLUMNS} WHERE id = ?1"),
                params![id.to_string()],
                row_to_conversation,
            )
            .optional()?
            .ok_or(StoreError::ConversationNotFound(id))
    }

    /// All conversations `user` takes part in, most recently updated first.
    pub fn list_conversations_for_user(&self, user: &UserId) -> Result<Vec<Conversation>> {
        let mut stmt = self.conn().prepare(&format!(
            "{SELECT_COLUMNS}
             WHERE participant_a = ?1 OR participant_b = ?1
             ORDER BY updated_at DESC, created_at DESC, id ASC"
        ))?;

        let rows = stmt.query_map(params![user.as_str()], row_to_conversation)?;

        let mut conversations = Vec::new();
        for row in rows {
            conversations.push(row?);
        }
        Ok(conversations)
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn row_to_conversation(row: &rusqlite::Row<'_>) -> rusqlite::Result<Conversation> {
    let id_str: String = row.get(0)?;
    let a: String = row.get(1)?;
    let b: String = row.get(2)?;
    let product: Option<String> = row.get(3)?;
    let created: String = row.get(4)?;
    let updated: String = row.get(5)?;

    let id = Uuid::parse_str(&id_str).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
    })?;

    let product_ref = ProductRef::from_optional(product.as_deref()).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(3, rusqlite::types::Type::Text, Box::new(e))
    })?;

    Ok(Conversation {
        id: ConversationId(id),
        participants: [decode_user_id(1, &a)?, decode_user_id(2, &b)?],
        product_ref,
        created_at: decode_ts(4, &created)?,
        updated_at: decode_ts(5, &updated)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn uid(s: &str) -> UserId {
        UserId::parse(s).unwrap()
    }

    fn product(s: &str) -> ProductRef {
        ProductRef::from_optional(Some(s)).unwrap().unwrap()
    }

    fn count(db: &Database) -> i64 {
        db.conn()
            .query_row("SELECT COUNT(*) FROM conversations", [], |r| r.get(0))
            .unwrap()
    }

    #[test]
    fn resolution_ignores_participant_order() {
        let db = Database::open_in_memory().unwrap();
        let (buyer, seller) = (uid("buyer"), uid("seller"));

        let first = db
            .resolve_or_create_conversation(&buyer, &seller, None)
            .unwrap();
        let again = db
            .resolve_or_create_conversation(&buyer, &seller, None)
            .unwrap();
        let reversed = db
            .resolve_or_create_conversation(&seller, &buyer, None)
            .unwrap();

        assert_eq!(first.id, again.id);
        assert_eq!(first.id, reversed.id);
        // Display order stays the creator's.
        assert_eq!(reversed.participants, [buyer, seller]);
        assert_eq!(count(&db), 1);
    }

    #[test]
    fn product_scopes_are_distinct() {
        let db = Database::open_in_memory().unwrap();
        let (buyer, seller) = (uid("buyer"), uid("seller"));
        let (p1, p2) = (product("p1"), product("p2"));

        let general = db
            .resolve_or_create_conversation(&buyer, &seller, None)
            .unwrap();
        let on_p1 = db
            .resolve_or_create_conversation(&buyer, &seller, Some(&p1))
            .unwrap();
        let on_p2 = db
            .resolve_or_create_conversation(&seller, &buyer, Some(&p2))
            .unwrap();

        assert_ne!(general.id, on_p1.id);
        assert_ne!(general.id, on_p2.id);
        assert_ne!(on_p1.id, on_p2.id);
        assert_eq!(on_p1.product_ref, Some(p1.clone()));
        assert_eq!(general.product_ref, None);

        let on_p1_again = db
            .resolve_or_create_conversation(&seller, &buyer, Some(&p1))
            .unwrap();
        assert_eq!(on_p1.id, on_p1_again.id);
        assert_eq!(count(&db), 3);
    }

    #[test]
    fn self_conversation_rejected() {
        let db = Database::open_in_memory().unwrap();
        let me = uid("me");
        assert!(matches!(
            db.resolve_or_create_conversation(&me, &me, None),
            Err(StoreError::InvalidParticipants)
        ));
        assert_eq!(count(&db), 0);
    }

    #[test]
    fn lost_race_returns_existing_row() {
        let db = Database::open_in_memory().unwrap();
        let (buyer, seller) = (uid("buyer"), uid("seller"));
        let winner = db
            .resolve_or_create_conversation(&buyer, &seller, None)
            .unwrap();

        // A second request that passed the lookup before the winner committed.
        let ts = now();
        let loser = Conversation {
            id: ConversationId::new(),
            participants: [seller.clone(), buyer.clone()],
            product_ref: None,
            created_at: ts,
            updated_at: ts,
        };
        let resolved = db.create_or_fetch(loser).unwrap();

        assert_eq!(resolved.id, winner.id);
        assert_eq!(count(&db), 1);
    }

    #[test]
    fn get_unknown_conversation() {
        let db = Database::open_in_memory().unwrap();
        let id = ConversationId::new();
        assert!(matches!(
            db.get_conversation(id),
            Err(StoreError::ConversationNotFound(missing)) if missing == id
        ));
    }

    #[test]
    fn list_only_includes_own_conversations() {
        let db = Database::open_in_memory().unwrap();
        let (a, b, c) = (uid("a"), uid("b"), uid("c"));
        db.resolve_or_create_conversation(&a, &b, None).unwrap();
        db.resolve_or_create_conversation(&c, &a, None).unwrap();
        db.resolve_or_create_conversation(&b, &c, None).unwrap();

        assert_eq!(db.list_conversations_for_user(&a).unwrap().len(), 2);
        assert!(db
            .list_conversations_for_user(&uid("nobody"))
            .unwrap()
            .is_empty());
    }
}
