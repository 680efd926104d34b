//! In-memory delivery router: live sessions, their joined rooms, and fan-out.
//!
//! One room per conversation id. The router only knows about sessions on
//! this process; fan-out across several server processes would need a
//! shared pub/sub backbone and is not provided.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use bazaar_shared::protocol::ServerEvent;
use bazaar_shared::{ConversationId, UserId};
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Identifier of one live connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(pub Uuid);

impl SessionId {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

struct Session {
    user: UserId,
    tx: mpsc::Sender<ServerEvent>,
    rooms: HashSet<ConversationId>,
}

/// Both directions of the membership relation, kept under one lock so a
/// join racing a disconnect cannot leave a room pointing at a dead session.
#[derive(Default)]
struct Registry {
    sessions: HashMap<SessionId, Session>,
    rooms: HashMap<ConversationId, HashSet<SessionId>>,
}

impl Registry {
    fn remove_member(&mut self, room: &ConversationId, session: &SessionId) {
        let now_empty = match self.rooms.get_mut(room) {
            Some(members) => {
                members.remove(session);
                members.is_empty()
            }
            None => false,
        };
        if now_empty {
            self.rooms.remove(room);
            debug!(room = %room, "Removed empty room");
        }
    }
}

#[derive(Clone)]
pub struct DeliveryRouter {
    registry: Arc<RwLock<Registry>>,
    queue_capacity: usize,
}

impl DeliveryRouter {
    pub fn new(queue_capacity: usize) -> Self {
        Self {
            registry: Arc::new(RwLock::new(Registry::default())),
            queue_capacity: queue_capacity.max(1),
        }
    }

    /// Register a new live session. Returns its id and the receiver the
    /// transport drains towards the client.
    pub async fn connect(&self, user: UserId) -> (SessionId, mpsc::Receiver<ServerEvent>) {
        let (tx, rx) = mpsc::channel(self.queue_capacity);
        let id = SessionId::new();

        let mut registry = self.registry.write().await;
        registry.sessions.insert(
            id,
            Session {
                user: user.clone(),
                tx,
                rooms: HashSet::new(),
            },
        );

        info!(
            session = %id,
            user = %user,
            sessions = registry.sessions.len(),
            "Session connected"
        );

        (id, rx)
    }

    /// Add `room` to the session's memberships. Idempotent. Returns `false`
    /// when the session has already disconnected.
    ///
    /// No authorization happens here; callers verify participation first.
    pub async fn join(&self, session: SessionId, room: ConversationId) -> bool {
        let mut registry = self.registry.write().await;
        let Some(entry) = registry.sessions.get_mut(&session) else {
            debug!(session = %session, room = %room, "Join from disconnected session ignored");
            return false;
        };

        if entry.rooms.insert(room) {
            debug!(session = %session, user = %entry.user, room = %room, "Joined room");
        }
        registry.rooms.entry(room).or_default().insert(session);
        true
    }

    /// Drop a single membership. Returns whether the session was a member.
    pub async fn leave_room(&self, session: SessionId, room: ConversationId) -> bool {
        let mut registry = self.registry.write().await;
        let was_member = registry
            .sessions
            .get_mut(&session)
            .map(|s| s.rooms.remove(&room))
            .unwrap_or(false);
        if was_member {
            registry.remove_member(&room, &session);
        }
        was_member
    }

    /// Forget a session and all of its memberships. Called on disconnect.
    pub async fn leave(&self, session: SessionId) {
        let mut registry = self.registry.write().await;
        let Some(entry) = registry.sessions.remove(&session) else {
            return;
        };
        for room in &entry.rooms {
            registry.remove_member(room, &session);
        }

        info!(
            session = %session,
            user = %entry.user,
            rooms = entry.rooms.len(),
            sessions = registry.sessions.len(),
            "Session disconnected"
        );
    }

    /// Deliver `event` to every session joined to `room`, at most once each.
    /// Full or closed queues drop the event. Returns how many sessions
    /// accepted it.
    pub async fn broadcast(&self, room: ConversationId, event: ServerEvent) -> usize {
        let registry = self.registry.read().await;
        let Some(members) = registry.rooms.get(&room) else {
            return 0;
        };

        let mut delivered = 0;
        for session_id in members {
            let Some(session) = registry.sessions.get(session_id) else {
                warn!(room = %room, session = %session_id, "Room lists unknown session");
                continue;
            };
            match session.tx.try_send(event.clone()) {
                Ok(()) => delivered += 1,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    warn!(
                        room = %room,
                        session = %session_id,
                        user = %session.user,
                        "Dropping event for slow session"
                    );
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    debug!(room = %room, session = %session_id, "Dropping event for closed session");
                }
            }
        }
        delivered
    }

    /// Send an event to one session only (acks, errors).
    pub async fn notify(&self, session: SessionId, event: ServerEvent) -> bool {
        let registry = self.registry.read().await;
        match registry.sessions.get(&session) {
            Some(s) => s.tx.try_send(event).is_ok(),
            None => false,
        }
    }

    pub async fn session_count(&self) -> usize {
        self.registry.read().await.sessions.len()
    }

    pub async fn room_size(&self, room: &ConversationId) -> usize {
        self.registry
            .read()
            .await
            .rooms
            .get(room)
            .map(HashSet::len)
            .unwrap_or(0)
    }

    pub async fn is_joined(&self, session: SessionId, room: &ConversationId) -> bool {
        self.registry
            .read()
            .await
            .sessions
            .get(&session)
            .map(|s| s.rooms.contains(room))
            .unwrap_or(false)
    }
}
