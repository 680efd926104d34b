//! Chat service: the single orchestration point over the store and the
//! delivery router.
//!
//! `send_message` is the only way a message becomes visible. It commits to
//! the log first and only then broadcasts, under a per-conversation lock so
//! broadcasts leave in the same order the appends committed.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use bazaar_shared::protocol::{ConversationView, MessageView, ServerEvent, UserSummary};
use bazaar_shared::{ConversationId, ProductRef, UserId};
use bazaar_store::{Conversation, Database, Message};
use tracing::{debug, info};

use crate::delivery::{DeliveryRouter, SessionId};
use crate::error::ServerError;

#[derive(Clone)]
pub struct ChatService {
    db: Arc<Mutex<Database>>,
    router: DeliveryRouter,
    commit_locks: CommitLocks,
    max_message_chars: usize,
}

impl ChatService {
    pub fn new(db: Database, router: DeliveryRouter, max_message_chars: usize) -> Self {
        Self {
            db: Arc::new(Mutex::new(db)),
            router,
            commit_locks: CommitLocks::default(),
            max_message_chars,
        }
    }

    pub fn router(&self) -> &DeliveryRouter {
        &self.router
    }

    /// Run a store operation on the blocking pool.
    async fn with_db<T, F>(&self, f: F) -> Result<T, ServerError>
    where
        F: FnOnce(&Database) -> Result<T, ServerError> + Send + 'static,
        T: Send + 'static,
    {
        let db = self.db.clone();
        tokio::task::spawn_blocking(move || {
            let guard = db
                .lock()
                .map_err(|_| ServerError::Internal("database mutex poisoned".into()))?;
            f(&guard)
        })
        .await
        .map_err(|e| ServerError::Internal(format!("storage task failed: {e}")))?
    }

    // ------------------------------------------------------------------
    // Conversations
    // ------------------------------------------------------------------

    /// Return the requester's conversation with `other` about `product`,
    /// creating it on first use. Messages are fully loaded.
    pub async fn resolve_or_create_conversation(
        &self,
        requester: &UserId,
        other: &UserId,
        product: Option<ProductRef>,
    ) -> Result<ConversationView, ServerError> {
        if requester == other {
            return Err(ServerError::InvalidParticipants);
        }
        let (requester, other) = (requester.clone(), other.clone());
        self.with_db(move |db| {
            let conversation =
                db.resolve_or_create_conversation(&requester, &other, product.as_ref())?;
            full_view(db, conversation)
        })
        .await
    }

    /// Conversations of `requester`, most recently updated first, each with
    /// its last message.
    pub async fn list_conversations(
        &self,
        requester: &UserId,
    ) -> Result<Vec<ConversationView>, ServerError> {
        let requester = requester.clone();
        self.with_db(move |db| {
            let mut directory = Directory::new(db);
            let mut views = Vec::new();
            for conversation in db.list_conversations_for_user(&requester)? {
                let last = db.last_message(conversation.id)?;
                let last_message = last.map(|m| directory.message_view(m)).transpose()?;
                let mut view = directory.conversation_view(conversation)?;
                view.last_message = last_message;
                views.push(view);
            }
            Ok(views)
        })
        .await
    }

    pub async fn get_conversation(
        &self,
        requester: &UserId,
        conversation_id: ConversationId,
    ) -> Result<ConversationView, ServerError> {
        let requester = requester.clone();
        self.with_db(move |db| {
            let conversation = db.get_conversation(conversation_id)?;
            ensure_participant(&conversation, &requester)?;
            full_view(db, conversation)
        })
        .await
    }

    // ------------------------------------------------------------------
    // Messages
    // ------------------------------------------------------------------

    /// Messages of a conversation in append order. `after` skips everything
    /// up to and including that seq.
    pub async fn list_messages(
        &self,
        requester: &UserId,
        conversation_id: ConversationId,
        after: Option<i64>,
    ) -> Result<Vec<MessageView>, ServerError> {
        let requester = requester.clone();
        self.with_db(move |db| {
            let conversation = db.get_conversation(conversation_id)?;
            ensure_participant(&conversation, &requester)?;
            let messages = db.list_messages_after(conversation_id, after.unwrap_or(0))?;
            let mut directory = Directory::new(db);
            messages
                .into_iter()
                .map(|m| directory.message_view(m))
                .collect()
        })
        .await
    }

    /// Commit a message, then fan it out to the conversation's room.
    ///
    /// The returned view is the same value broadcast to live sessions. A
    /// failed commit broadcasts nothing.
    pub async fn send_message(
        &self,
        sender: &UserId,
        conversation_id: ConversationId,
        text: &str,
    ) -> Result<MessageView, ServerError> {
        let len = text.chars().count();
        if len > self.max_message_chars {
            return Err(ServerError::MessageTooLong {
                len,
                max: self.max_message_chars,
            });
        }

        let _commit = self.commit_locks.acquire(conversation_id).await;

        let (sender, text) = (sender.clone(), text.to_string());
        let view = self
            .with_db(move |db| {
                let message = db.append_message(conversation_id, &sender, &text)?;
                Directory::new(db).message_view(message)
            })
            .await?;

        let delivered = self
            .router
            .broadcast(
                conversation_id,
                ServerEvent::MessageCommitted {
                    conversation_id,
                    message: view.clone(),
                },
            )
            .await;

        debug!(
            conversation = %conversation_id,
            seq = view.seq,
            delivered,
            "Message committed"
        );

        Ok(view)
    }

    // ------------------------------------------------------------------
    // Live channel
    // ------------------------------------------------------------------

    /// Join a session to a conversation's room after checking that `user`
    /// is one of its participants. Past messages are not replayed.
    pub async fn join_room(
        &self,
        session: SessionId,
        user: &UserId,
        conversation_id: ConversationId,
    ) -> Result<(), ServerError> {
        let requester = user.clone();
        self.with_db(move |db| {
            let conversation = db.get_conversation(conversation_id)?;
            ensure_participant(&conversation, &requester)
        })
        .await?;

        if !self.router.join(session, conversation_id).await {
            // Session went away while we were checking; nothing to deliver to.
            debug!(session = %session, conversation = %conversation_id, "Join after disconnect");
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Identity directory
    // ------------------------------------------------------------------

    pub async fn upsert_profile(
        &self,
        user: &UserId,
        display_name: Option<String>,
        avatar_ref: Option<String>,
    ) -> Result<UserSummary, ServerError> {
        let user = user.clone();
        let summary = self
            .with_db(move |db| {
                Ok(db
                    .upsert_user(&user, display_name.as_deref(), avatar_ref.as_deref())?
                    .summary())
            })
            .await?;
        info!(user = %summary.id, "Profile updated");
        Ok(summary)
    }

    pub async fn resolve_user(&self, user: &UserId) -> Result<UserSummary, ServerError> {
        let user = user.clone();
        self.with_db(move |db| Ok(db.resolve_user(&user)?)).await
    }
}

fn ensure_participant(conversation: &Conversation, user: &UserId) -> Result<(), ServerError> {
    if conversation.has_participant(user) {
        Ok(())
    } else {
        Err(ServerError::Unauthorized(format!(
            "{user} is not a participant of conversation {}",
            conversation.id
        )))
    }
}

fn full_view(db: &Database, conversation: Conversation) -> Result<ConversationView, ServerError> {
    let messages = db.list_messages(conversation.id)?;
    let mut directory = Directory::new(db);
    let views = messages
        .into_iter()
        .map(|m| directory.message_view(m))
        .collect::<Result<Vec<_>, _>>()?;
    let mut view = directory.conversation_view(conversation)?;
    view.last_message = views.last().cloned();
    view.messages = Some(views);
    Ok(view)
}

/// Identity-directory lookups memoised for the duration of one request.
struct Directory<'a> {
    db: &'a Database,
    cache: HashMap<UserId, UserSummary>,
}

impl<'a> Directory<'a> {
    fn new(db: &'a Database) -> Self {
        Self {
            db,
            cache: HashMap::new(),
        }
    }

    fn summary(&mut self, id: &UserId) -> Result<UserSummary, ServerError> {
        if let Some(hit) = self.cache.get(id) {
            return Ok(hit.clone());
        }
        let summary = self.db.resolve_user(id)?;
        self.cache.insert(id.clone(), summary.clone());
        Ok(summary)
    }

    fn message_view(&mut self, m: Message) -> Result<MessageView, ServerError> {
        Ok(MessageView {
            id: m.id,
            conversation_id: m.conversation_id,
            seq: m.seq,
            sender: self.summary(&m.sender)?,
            text: m.text,
            timestamp: m.timestamp,
        })
    }

    fn conversation_view(&mut self, c: Conversation) -> Result<ConversationView, ServerError> {
        let participants = c
            .participants
            .iter()
            .map(|p| self.summary(p))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(ConversationView {
            id: c.id,
            participants,
            product_ref: c.product_ref,
            messages: None,
            last_message: None,
            created_at: c.created_at,
            updated_at: c.updated_at,
        })
    }
}

/// Per-conversation locks held across append + broadcast.
#[derive(Clone, Default)]
struct CommitLocks {
    locks: Arc<tokio::sync::Mutex<HashMap<ConversationId, Arc<tokio::sync::Mutex<()>>>>>,
}

impl CommitLocks {
    const PRUNE_THRESHOLD: usize = 1024;

    async fn acquire(&self, id: ConversationId) -> tokio::sync::OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().await;
            if locks.len() >= Self::PRUNE_THRESHOLD {
                // Only the map holds idle locks.
                locks.retain(|_, l| Arc::strong_count(l) > 1);
            }
            locks.entry(id).or_default().clone()
        };
        lock.lock_owned().await
    }
}

#[cfg(test)]
mod tests {
    use chrono::{SubsecRound, Utc};

    use super::*;

    fn uid(s: &str) -> UserId {
        UserId::parse(s).unwrap()
    }

    fn service() -> ChatService {
        ChatService::new(
            Database::open_in_memory().unwrap(),
            DeliveryRouter::new(64),
            4000,
        )
    }

    fn stored_messages(chat: &ChatService) -> i64 {
        chat.db
            .lock()
            .unwrap()
            .conn()
            .query_row("SELECT COUNT(*) FROM messages", [], |r| r.get(0))
            .unwrap()
    }

    #[tokio::test]
    async fn resolve_is_order_independent() {
        let chat = service();
        let (a, b) = (uid("alice"), uid("bob"));
        let p = ProductRef::from_optional(Some("lamp-7")).unwrap();

        let ab = chat
            .resolve_or_create_conversation(&a, &b, p.clone())
            .await
            .unwrap();
        let ba = chat
            .resolve_or_create_conversation(&b, &a, p)
            .await
            .unwrap();
        let general = chat
            .resolve_or_create_conversation(&a, &b, None)
            .await
            .unwrap();

        assert_eq!(ab.id, ba.id);
        assert_ne!(ab.id, general.id);
        assert_eq!(ab.messages, Some(vec![]));
        assert_eq!(ab.participants[0].id, a);
    }

    #[tokio::test]
    async fn resolve_rejects_self() {
        let chat = service();
        let a = uid("alice");
        assert!(matches!(
            chat.resolve_or_create_conversation(&a, &a, None).await,
            Err(ServerError::InvalidParticipants)
        ));
    }

    #[tokio::test]
    async fn concurrent_resolution_yields_one_conversation() {
        let chat = service();
        let (a, b) = (uid("alice"), uid("bob"));

        let mut handles = Vec::new();
        for i in 0..50 {
            let chat = chat.clone();
            let (requester, other) = if i % 2 == 0 {
                (a.clone(), b.clone())
            } else {
                (b.clone(), a.clone())
            };
            handles.push(tokio::spawn(async move {
                chat.resolve_or_create_conversation(&requester, &other, None)
                    .await
                    .unwrap()
                    .id
            }));
        }

        let mut ids = Vec::new();
        for h in handles {
            ids.push(h.await.unwrap());
        }
        assert!(ids.windows(2).all(|w| w[0] == w[1]));

        let count: i64 = chat
            .db
            .lock()
            .unwrap()
            .conn()
            .query_row("SELECT COUNT(*) FROM conversations", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn blank_message_is_invisible() {
        let chat = service();
        let (a, b) = (uid("alice"), uid("bob"));
        let conv = chat.resolve_or_create_conversation(&a, &b, None).await.unwrap();

        let (session, mut rx) = chat.router().connect(b.clone()).await;
        chat.join_room(session, &b, conv.id).await.unwrap();

        assert!(matches!(
            chat.send_message(&a, conv.id, "   ").await,
            Err(ServerError::EmptyMessage)
        ));
        assert_eq!(stored_messages(&chat), 0);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn outsider_cannot_send() {
        let chat = service();
        let (a, b) = (uid("alice"), uid("bob"));
        let conv = chat.resolve_or_create_conversation(&a, &b, None).await.unwrap();

        let (session, mut rx) = chat.router().connect(a.clone()).await;
        chat.join_room(session, &a, conv.id).await.unwrap();

        assert!(matches!(
            chat.send_message(&uid("mallory"), conv.id, "hi").await,
            Err(ServerError::Unauthorized(_))
        ));
        assert_eq!(stored_messages(&chat), 0);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn overlong_message_rejected_before_commit() {
        let chat = ChatService::new(
            Database::open_in_memory().unwrap(),
            DeliveryRouter::new(4),
            5,
        );
        let (a, b) = (uid("alice"), uid("bob"));
        let conv = chat.resolve_or_create_conversation(&a, &b, None).await.unwrap();

        assert!(matches!(
            chat.send_message(&a, conv.id, "too long").await,
            Err(ServerError::MessageTooLong { len: 8, max: 5 })
        ));
        assert_eq!(stored_messages(&chat), 0);
    }

    #[tokio::test]
    async fn send_to_unknown_conversation() {
        let chat = service();
        assert!(matches!(
            chat.send_message(&uid("alice"), ConversationId::new(), "hi").await,
            Err(ServerError::ConversationNotFound(_))
        ));
    }

    #[tokio::test]
    async fn join_requires_participation() {
        let chat = service();
        let (a, b, m) = (uid("alice"), uid("bob"), uid("mallory"));
        let conv = chat.resolve_or_create_conversation(&a, &b, None).await.unwrap();

        let (session, _rx) = chat.router().connect(m.clone()).await;
        assert!(matches!(
            chat.join_room(session, &m, conv.id).await,
            Err(ServerError::Unauthorized(_))
        ));
        assert!(!chat.router().is_joined(session, &conv.id).await);

        assert!(matches!(
            chat.join_room(session, &m, ConversationId::new()).await,
            Err(ServerError::ConversationNotFound(_))
        ));
    }

    #[tokio::test]
    async fn late_joiner_gets_no_replay_but_sees_log() {
        let chat = service();
        let (a, b) = (uid("alice"), uid("bob"));
        let conv = chat.resolve_or_create_conversation(&a, &b, None).await.unwrap();

        chat.send_message(&a, conv.id, "first").await.unwrap();
        chat.send_message(&b, conv.id, "second").await.unwrap();

        let (session, mut rx) = chat.router().connect(b.clone()).await;
        chat.join_room(session, &b, conv.id).await.unwrap();
        assert!(rx.try_recv().is_err());

        let log = chat.list_messages(&b, conv.id, None).await.unwrap();
        assert_eq!(
            log.iter().map(|m| m.text.as_str()).collect::<Vec<_>>(),
            ["first", "second"]
        );

        let third = chat.send_message(&a, conv.id, "third").await.unwrap();
        match rx.try_recv().unwrap() {
            ServerEvent::MessageCommitted { message, .. } => assert_eq!(message, third),
            other => panic!("unexpected event: {other:?}"),
        }
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn buyer_asks_seller_about_product() {
        let chat = service();
        let (buyer, seller) = (uid("buyer-a"), uid("seller-b"));
        {
            let db = chat.db.lock().unwrap();
            db.upsert_user(&buyer, Some("Ana"), Some("avatars/ana.png"))
                .unwrap();
        }
        let product = ProductRef::from_optional(Some("P")).unwrap();
        let conv = chat
            .resolve_or_create_conversation(&buyer, &seller, product)
            .await
            .unwrap();

        let (session, mut seller_rx) = chat.router().connect(seller.clone()).await;
        chat.join_room(session, &seller, conv.id).await.unwrap();

        let before = Utc::now().trunc_subsecs(6);
        let sent = chat
            .send_message(&buyer, conv.id, "Is this still available?")
            .await
            .unwrap();

        match seller_rx.try_recv().unwrap() {
            ServerEvent::MessageCommitted {
                conversation_id,
                message,
            } => {
                assert_eq!(conversation_id, conv.id);
                assert_eq!(message.text, "Is this still available?");
                assert_eq!(message.sender.id, buyer);
                assert_eq!(message.sender.display_name.as_deref(), Some("Ana"));
                assert!(message.timestamp >= before);
                assert_eq!(message, sent);
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn broadcasts_follow_commit_order() {
        let chat = service();
        let (a, b) = (uid("alice"), uid("bob"));
        let conv = chat.resolve_or_create_conversation(&a, &b, None).await.unwrap();
        let (session, mut rx) = chat.router().connect(b.clone()).await;
        chat.join_room(session, &b, conv.id).await.unwrap();

        let mut handles = Vec::new();
        for i in 0..30 {
            let chat = chat.clone();
            let sender = if i % 2 == 0 { a.clone() } else { b.clone() };
            handles.push(tokio::spawn(async move {
                chat.send_message(&sender, conv.id, &format!("m{i}")).await.unwrap()
            }));
        }
        for h in handles {
            h.await.unwrap();
        }

        let mut seqs = Vec::new();
        while let Ok(ServerEvent::MessageCommitted { message, .. }) = rx.try_recv() {
            seqs.push(message.seq);
        }
        assert_eq!(seqs, (1..=30).collect::<Vec<i64>>());
    }

    #[tokio::test]
    async fn listing_orders_by_recent_activity() {
        let chat = service();
        let (a, b, c) = (uid("alice"), uid("bob"), uid("carol"));
        let with_b = chat.resolve_or_create_conversation(&a, &b, None).await.unwrap();
        let with_c = chat.resolve_or_create_conversation(&a, &c, None).await.unwrap();

        chat.send_message(&c, with_c.id, "older").await.unwrap();
        chat.send_message(&b, with_b.id, "newer").await.unwrap();

        let list = chat.list_conversations(&a).await.unwrap();
        assert_eq!(list.len(), 2);
        assert_eq!(list[0].id, with_b.id);
        assert_eq!(list[0].last_message.as_ref().unwrap().text, "newer");
        assert_eq!(list[1].last_message.as_ref().unwrap().text, "older");
        assert!(list.iter().all(|c| c.messages.is_none()));

        let fresh = chat
            .resolve_or_create_conversation(&b, &c, None)
            .await
            .unwrap();
        let for_c = chat.list_conversations(&c).await.unwrap();
        let item = for_c.iter().find(|v| v.id == fresh.id).unwrap();
        assert!(item.last_message.is_none());
    }

    #[tokio::test]
    async fn outsider_cannot_read() {
        let chat = service();
        let (a, b) = (uid("alice"), uid("bob"));
        let conv = chat.resolve_or_create_conversation(&a, &b, None).await.unwrap();

        assert!(matches!(
            chat.list_messages(&uid("eve"), conv.id, None).await,
            Err(ServerError::Unauthorized(_))
        ));
        assert!(matches!(
            chat.get_conversation(&uid("eve"), conv.id).await,
            Err(ServerError::Unauthorized(_))
        ));
    }
}
