//! Live channel over WebSocket.
//!
//! Each connection becomes one delivery-router session. Clients send
//! `join`/`leave` frames; the server pushes `messageCommitted` events for
//! joined rooms. Messages are never committed over this channel: the REST
//! `send_message` endpoint is the only commit path.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use bazaar_shared::protocol::{ClientEvent, ServerEvent};
use bazaar_shared::UserId;
use futures::{SinkExt, StreamExt};
use tracing::{debug, warn};

use crate::api::AppState;
use crate::auth::AuthUser;
use crate::chat::ChatService;
use crate::delivery::SessionId;
use crate::error::ServerError;

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state.chat, user))
}

async fn handle_socket(socket: WebSocket, chat: ChatService, user: UserId) {
    let (session, mut events) = chat.router().connect(user.clone()).await;
    let (mut sink, mut stream) = socket.split();

    // Drain the session queue towards the client. Ends when the router
    // drops the session or the socket stops accepting writes.
    let writer = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            let text = match serde_json::to_string(&event) {
                Ok(text) => text,
                Err(e) => {
                    warn!(error = %e, "Failed to encode live event");
                    continue;
                }
            };
            if sink.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
    });

    while let Some(frame) = stream.next().await {
        match frame {
            Ok(Message::Text(text)) => {
                let reply = handle_client_frame(&chat, session, &user, text.as_str()).await;
                chat.router().notify(session, reply).await;
            }
            Ok(Message::Close(_)) => break,
            Ok(Message::Binary(_)) => {
                let reply = ServerError::BadRequest("Binary frames are not supported".into())
                    .to_event();
                chat.router().notify(session, reply).await;
            }
            // Ping/pong are answered by axum.
            Ok(_) => {}
            Err(e) => {
                debug!(session = %session, error = %e, "WebSocket read error");
                break;
            }
        }
    }

    chat.router().leave(session).await;
    writer.abort();
}

/// Apply one client frame and produce the reply for that session.
async fn handle_client_frame(
    chat: &ChatService,
    session: SessionId,
    user: &UserId,
    raw: &str,
) -> ServerEvent {
    let event: ClientEvent = match serde_json::from_str(raw) {
        Ok(event) => event,
        Err(e) => return ServerError::BadRequest(format!("Malformed frame: {e}")).to_event(),
    };

    match event {
        ClientEvent::Join { conversation_id } => {
            match chat.join_room(session, user, conversation_id).await {
                Ok(()) => ServerEvent::Joined { conversation_id },
                Err(e) => {
                    debug!(session = %session, user = %user, error = %e, "Join refused");
                    e.to_event()
                }
            }
        }
        ClientEvent::Leave { conversation_id } => {
            chat.router().leave_room(session, conversation_id).await;
            ServerEvent::Left { conversation_id }
        }
    }
}
