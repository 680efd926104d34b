use std::sync::Arc;
use std::time::Instant;

use axum::{
    extract::rejection::{JsonRejection, QueryRejection},
    extract::{Path, Query, State},
    http::{Method, StatusCode},
    routing::{get, post, put},
    Json, Router,
};
use bazaar_shared::constants::PROTOCOL_VERSION;
use bazaar_shared::protocol::{ConversationView, MessageView, UserSummary};
use bazaar_shared::{ConversationId, ProductRef, UserId};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::auth::AuthUser;
use crate::chat::ChatService;
use crate::config::ServerConfig;
use crate::error::ServerError;
use crate::ws;

#[derive(Clone)]
pub struct AppState {
    pub chat: ChatService,
    pub config: Arc<ServerConfig>,
    pub started_at: Instant,
}

pub fn build_router(state: AppState) -> Router {
    let mut router = Router::new()
        .route("/health", get(health_check))
        .route("/info", get(server_info))
        .route(
            "/api/chats",
            post(resolve_or_create_chat).get(list_chats),
        )
        .route("/api/chats/{id}", get(get_chat))
        .route(
            "/api/chats/{id}/messages",
            get(list_messages).post(send_message),
        )
        .route("/api/users/me", put(update_profile))
        .route("/api/users/{id}", get(get_user))
        .route("/ws", get(ws::ws_handler));

    if state.config.cors_allow_any {
        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods([Method::GET, Method::POST, Method::PUT, Method::OPTIONS])
            .allow_headers(Any);
        router = router.layer(cors);
    }

    router.layer(TraceLayer::new_for_http()).with_state(state)
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    protocol: &'static str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ServerInfoResponse {
    name: String,
    version: &'static str,
    live_sessions: usize,
    uptime_secs: u64,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ResolveChatRequest {
    /// The other participant.
    user_id: String,
    #[serde(default)]
    product_id: Option<String>,
}

#[derive(Deserialize)]
struct SendMessageRequest {
    text: String,
}

#[derive(Deserialize)]
struct ListMessagesQuery {
    /// Only messages with a greater seq.
    after: Option<i64>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProfileRequest {
    #[serde(default)]
    display_name: Option<String>,
    #[serde(default)]
    avatar_ref: Option<String>,
}

async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        protocol: PROTOCOL_VERSION,
    })
}

async fn server_info(State(state): State<AppState>) -> Json<ServerInfoResponse> {
    Json(ServerInfoResponse {
        name: state.config.instance_name.clone(),
        version: env!("CARGO_PKG_VERSION"),
        live_sessions: state.chat.router().session_count().await,
        uptime_secs: state.started_at.elapsed().as_secs(),
    })
}

fn parse_conversation_id(raw: &str) -> Result<ConversationId, ServerError> {
    Ok(raw.parse::<ConversationId>()?)
}

async fn resolve_or_create_chat(
    State(state): State<AppState>,
    AuthUser(requester): AuthUser,
    payload: Result<Json<ResolveChatRequest>, JsonRejection>,
) -> Result<Json<ConversationView>, ServerError> {
    let Json(req) = payload?;
    let other = UserId::parse(req.user_id.trim())?;
    let product = ProductRef::from_optional(req.product_id.as_deref())?;

    let view = state
        .chat
        .resolve_or_create_conversation(&requester, &other, product)
        .await?;
    Ok(Json(view))
}

async fn list_chats(
    State(state): State<AppState>,
    AuthUser(requester): AuthUser,
) -> Result<Json<Vec<ConversationView>>, ServerError> {
    Ok(Json(state.chat.list_conversations(&requester).await?))
}

async fn get_chat(
    State(state): State<AppState>,
    AuthUser(requester): AuthUser,
    Path(id): Path<String>,
) -> Result<Json<ConversationView>, ServerError> {
    let id = parse_conversation_id(&id)?;
    Ok(Json(state.chat.get_conversation(&requester, id).await?))
}

async fn list_messages(
    State(state): State<AppState>,
    AuthUser(requester): AuthUser,
    Path(id): Path<String>,
    query: Result<Query<ListMessagesQuery>, QueryRejection>,
) -> Result<Json<Vec<MessageView>>, ServerError> {
    let id = parse_conversation_id(&id)?;
    let Query(query) = query?;
    Ok(Json(
        state.chat.list_messages(&requester, id, query.after).await?,
    ))
}

async fn send_message(
    State(state): State<AppState>,
    AuthUser(sender): AuthUser,
    Path(id): Path<String>,
    payload: Result<Json<SendMessageRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<MessageView>), ServerError> {
    let Json(req) = payload?;
    let id = parse_conversation_id(&id)?;
    let message = state.chat.send_message(&sender, id, &req.text).await?;
    Ok((StatusCode::CREATED, Json(message)))
}

async fn update_profile(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    payload: Result<Json<ProfileRequest>, JsonRejection>,
) -> Result<Json<UserSummary>, ServerError> {
    let Json(req) = payload?;
    let display_name = req
        .display_name
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty());
    let avatar_ref = req.avatar_ref.filter(|s| !s.trim().is_empty());

    Ok(Json(
        state
            .chat
            .upsert_profile(&user, display_name, avatar_ref)
            .await?,
    ))
}

async fn get_user(
    State(state): State<AppState>,
    _caller: AuthUser,
    Path(id): Path<String>,
) -> Result<Json<UserSummary>, ServerError> {
    let id = UserId::parse(&id)?;
    Ok(Json(state.chat.resolve_user(&id).await?))
}

pub async fn serve(state: AppState, addr: std::net::SocketAddr) -> anyhow::Result<()> {
    let app = build_router(state);

    info!(addr = %addr, "Starting HTTP API server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
