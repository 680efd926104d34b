//! Append-only message log, one ordered sequence per conversation.

use bazaar_shared::{ConversationId, UserId};
use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};
use uuid::Uuid;

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::{decode_ts, decode_user_id, decode_uuid, encode_ts, now, Message};

const SELECT_COLUMNS: &str =
    "SELECT id, conversation_id, seq, sender_id, text, timestamp FROM messages";

impl Database {
    /// Append a message to a conversation's log.
    ///
    /// The insert and the parent's `updated_at` bump commit in one
    /// transaction. The timestamp never goes backwards within a
    /// conversation, even if the wall clock does.
    pub fn append_message(
        &self,
        conversation_id: ConversationId,
        sender: &UserId,
        text: &str,
    ) -> Result<Message> {
        let tx = self.conn().unchecked_transaction()?;

        let conversation = self.get_conversation(conversation_id)?;
        if !conversation.has_participant(sender) {
            return Err(StoreError::NotParticipant {
                user: sender.clone(),
                conversation: conversation_id,
            });
        }
        if text.trim().is_empty() {
            return Err(StoreError::EmptyMessage);
        }

        let cid = conversation_id.to_string();
        let (last_seq, last_ts): (i64, Option<String>) = tx.query_row(
            "SELECT COALESCE(MAX(seq), 0), MAX(timestamp) FROM messages WHERE conversation_id = ?1",
            params![cid],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;

        let mut timestamp = now();
        if let Some(raw) = last_ts {
            let previous: DateTime<Utc> = decode_ts(1, &raw)?;
            timestamp = timestamp.max(previous);
        }

        let message = Message {
            id: Uuid::new_v4(),
            conversation_id,
            seq: last_seq + 1,
            sender: sender.clone(),
            text: text.to_string(),
            timestamp,
        };

        tx.execute(
            "INSERT INTO messages (id, conversation_id, seq, sender_id, text, timestamp)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                message.id.to_string(),
                cid,
                message.seq,
                message.sender.as_str(),
                message.text,
                encode_ts(&message.timestamp),
            ],
        )?;
        tx.execute(
            "UPDATE conversations SET updated_at = ?2 WHERE id = ?1",
            params![cid, encode_ts(&message.timestamp)],
        )?;
        tx.commit()?;

        Ok(message)
    }

    /// The whole log, oldest first.
    pub fn list_messages(&self, conversation_id: ConversationId) -> Result<Vec<Message>> {
        self.list_messages_after(conversation_id, 0)
    }

    /// Messages with `seq > after`, oldest first. Lets a reconnecting client
    /// fetch only what it missed.
    pub fn list_messages_after(
        &self,
        conversation_id: ConversationId,
        after: i64,
    ) -> Result<Vec<Message>> {
        let mut stmt = self.conn().prepare(&format!(
            "{SELECT_COLUMNS}
             WHERE conversation_id = ?1 AND seq > ?2
             ORDER BY seq ASC"
        ))?;

        let rows = stmt.query_map(
            params![conversation_id.to_string(), after],
            row_to_message,
        )?;

        let mut messages = Vec::new();
        for row in rows {
            messages.push(row?);
        }
        Ok(messages)
    }

    /// Final element of the log, if any.
    pub fn last_message(&self, conversation_id: ConversationId) -> Result<Option<Message>> {
        let message = self
            .conn()
            .query_row(
                &format!(
                    "{SELECT_COLUMNS}
                     WHERE conversation_id = ?1
                     ORDER BY seq DESC LIMIT 1"
                ),
                params![conversation_id.to_string()],
                row_to_message,
            )
            .optional()?;
        Ok(message)
    }
}

fn row_to_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<Message> {
    let id: String = row.get(0)?;
    let conversation_id: String = row.get(1)?;
    let sender: String = row.get(3)?;
    let ts: String = row.get(5)?;

    Ok(Message {
        id: decode_uuid(0, &id)?,
        conversation_id: ConversationId(decode_uuid(1, &conversation_id)?),
        seq: row.get(2)?,
        sender: decode_user_id(3, &sender)?,
        text: row.get(4)?,
        timestamp: decode_ts(5, &ts)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Conversation;

    fn uid(s: &str) -> UserId {
        UserId::parse(s).unwrap()
    }

    fn setup() -> (Database, Conversation, UserId, UserId) {
        let db = Database::open_in_memory().unwrap();
        let (buyer, seller) = (uid("buyer"), uid("seller"));
        let conv = db
            .resolve_or_create_conversation(&buyer, &seller, None)
            .unwrap();
        (db, conv, buyer, seller)
    }

    fn stored(db: &Database) -> i64 {
        db.conn()
            .query_row("SELECT COUNT(*) FROM messages", [], |r| r.get(0))
            .unwrap()
    }

    #[test]
    fn appended_messages_list_in_order() {
        let (db, conv, buyer, seller) = setup();

        let texts: Vec<String> = (0..20).map(|i| format!("message {i}")).collect();
        for (i, text) in texts.iter().enumerate() {
            let sender = if i % 2 == 0 { &buyer } else { &seller };
            let m = db.append_message(conv.id, sender, text).unwrap();
            assert_eq!(m.seq, i as i64 + 1);
        }

        let listed = db.list_messages(conv.id).unwrap();
        let listed_texts: Vec<&str> = listed.iter().map(|m| m.text.as_str()).collect();
        assert_eq!(listed_texts, texts.iter().map(String::as_str).collect::<Vec<_>>());
        assert!(listed.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));
    }

    #[test]
    fn append_bumps_updated_at() {
        let (db, conv, buyer, _) = setup();
        let m = db.append_message(conv.id, &buyer, "hello").unwrap();

        let reloaded = db.get_conversation(conv.id).unwrap();
        assert_eq!(reloaded.updated_at, m.timestamp);
        assert!(reloaded.updated_at >= conv.updated_at);
        assert_eq!(db.last_message(conv.id).unwrap(), Some(m));
    }

    #[test]
    fn blank_text_rejected() {
        let (db, conv, buyer, _) = setup();
        for text in ["", "   ", "\n\t "] {
            assert!(matches!(
                db.append_message(conv.id, &buyer, text),
                Err(StoreError::EmptyMessage)
            ));
        }
        assert_eq!(stored(&db), 0);
    }

    #[test]
    fn outsider_rejected() {
        let (db, conv, _, _) = setup();
        let err = db
            .append_message(conv.id, &uid("lurker"), "let me in")
            .unwrap_err();
        assert!(matches!(err, StoreError::NotParticipant { .. }));
        assert_eq!(stored(&db), 0);
    }

    #[test]
    fn unknown_conversation_rejected() {
        let (db, _, buyer, _) = setup();
        assert!(matches!(
            db.append_message(ConversationId::new(), &buyer, "hi"),
            Err(StoreError::ConversationNotFound(_))
        ));
    }

    #[test]
    fn list_after_cursor() {
        let (db, conv, buyer, _) = setup();
        for text in ["one", "two", "three"] {
            db.append_message(conv.id, &buyer, text).unwrap();
        }

        let tail = db.list_messages_after(conv.id, 1).unwrap();
        assert_eq!(
            tail.iter().map(|m| m.text.as_str()).collect::<Vec<_>>(),
            ["two", "three"]
        );
        assert!(db.list_messages_after(conv.id, 3).unwrap().is_empty());
    }

    #[test]
    fn logs_are_per_conversation() {
        let (db, conv, buyer, seller) = setup();
        let other = db
            .resolve_or_create_conversation(&buyer, &uid("someone-else"), None)
            .unwrap();

        db.append_message(conv.id, &seller, "for conv").unwrap();
        let m = db.append_message(other.id, &buyer, "for other").unwrap();

        assert_eq!(m.seq, 1);
        assert_eq!(db.list_messages(conv.id).unwrap().len(), 1);
        assert_eq!(db.list_messages(other.id).unwrap().len(), 1);
    }

    #[test]
    fn timestamp_never_goes_backwards() {
        let (db, conv, buyer, _) = setup();
        // Simulate a previous message stamped in the future (clock skew).
        let future = now() + chrono::Duration::seconds(60);
        db.conn()
            .execute(
                "INSERT INTO messages (id, conversation_id, seq, sender_id, text, timestamp)
                 VALUES (?1, ?2, 1, ?3, 'early', ?4)",
                params![
                    Uuid::new_v4().to_string(),
                    conv.id.to_string(),
                    buyer.as_str(),
                    encode_ts(&future)
                ],
            )
            .unwrap();

        let m = db.append_message(conv.id, &buyer, "later").unwrap();
        assert_eq!(m.seq, 2);
        assert_eq!(m.timestamp, future);
    }
}
