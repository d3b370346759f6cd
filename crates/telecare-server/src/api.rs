use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use axum::{
    extract::{rejection::PathRejection, Path, State},
    http::Method,
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use telecare_shared::protocol::ChatMessage;
use telecare_shared::types::UserId;
use telecare_store::{ChatStore, StoreError};

use crate::config::ServerConfig;
use crate::connection::ws_handler;
use crate::error::ServerError;
use crate::registry::Registry;
use crate::relay::Relay;

#[derive(Clone)]
pub struct AppState {
    pub relay: Relay,
    pub registry: Registry,
    pub store: Arc<dyn ChatStore>,
    pub config: Arc<ServerConfig>,
    pub connections: Arc<AtomicUsize>,
}

impl AppState {
    /// Spawns the registry actor, so this must run inside a tokio runtime.
    pub fn new(config: ServerConfig, store: Arc<dyn ChatStore>) -> Self {
        let registry = Registry::spawn();
        Self {
            relay: Relay::new(registry.clone(), store.clone()),
            registry,
            store,
            config: Arc::new(config),
            connections: Arc::new(AtomicUsize::new(0)),
        }
    }
}

pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_check))
        .route("/info", get(server_info))
        .route(&state.config.ws_path, get(ws_handler))
        .route("/api/chat/:user_id/:peer_id", get(chat_history))
        .route("/api/chat/:user_id/:peer_id/read", post(mark_read))
        .route("/api/unread/:user_id", get(unread_count))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    connections: usize,
    online_users: usize,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ServerInfoResponse {
    name: String,
    version: &'static str,
    ws_path: String,
    max_frame_bytes: usize,
    signaling_ttl_secs: u64,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct MarkReadResponse {
    updated: usize,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct UnreadResponse {
    user_id: UserId,
    unread: u64,
}

async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        connections: state.connections.load(Ordering::Relaxed),
        online_users: state.registry.len().await,
    })
}

async fn server_info(State(state): State<AppState>) -> Json<ServerInfoResponse> {
    Json(ServerInfoResponse {
        name: state.config.instance_name.clone(),
        version: env!("CARGO_PKG_VERSION"),
        ws_path: state.config.ws_path.clone(),
        max_frame_bytes: state.config.max_frame_bytes,
        signaling_ttl_secs: state.config.signaling_ttl_secs,
    })
}

/// Run a store call on the blocking pool.
async fn with_store<T, F>(state: &AppState, f: F) -> Result<T, ServerError>
where
    T: Send + 'static,
    F: FnOnce(&dyn ChatStore) -> Result<T, StoreError> + Send + 'static,
{
    let store = state.store.clone();
    tokio::task::spawn_blocking(move || f(store.as_ref()))
        .await
        .map_err(|e| ServerError::Internal(e.to_string()))?
        .map_err(ServerError::from)
}

/// Both user ids of a conversation route.
fn conversation_ids(
    path: Result<Path<(i64, i64)>, PathRejection>,
) -> Result<(UserId, UserId), ServerError> {
    let Path((user_id, peer_id)) = path.map_err(|e| ServerError::BadRequest(e.body_text()))?;
    Ok((UserId(user_id), UserId(peer_id)))
}

async fn chat_history(
    State(state): State<AppState>,
    path: Result<Path<(i64, i64)>, PathRejection>,
) -> Result<Json<Vec<ChatMessage>>, ServerError> {
    let (user, peer) = conversation_ids(path)?;
    let messages = with_store(&state, move |store| store.get_chat_messages(user, peer)).await?;
    Ok(Json(messages))
}

async fn mark_read(
    State(state): State<AppState>,
    path: Result<Path<(i64, i64)>, PathRejection>,
) -> Result<Json<MarkReadResponse>, ServerError> {
    let (reader, peer) = conversation_ids(path)?;
    let updated =
        with_store(&state, move |store| store.mark_conversation_read(reader, peer)).await?;
    if updated > 0 {
        info!(reader = %reader, peer = %peer, updated, "Conversation marked read");
    }
    Ok(Json(MarkReadResponse { updated }))
}

async fn unread_count(
    State(state): State<AppState>,
    path: Result<Path<i64>, PathRejection>,
) -> Result<Json<UnreadResponse>, ServerError> {
    let Path(user_id) = path.map_err(|e| ServerError::BadRequest(e.body_text()))?;
    let user = UserId(user_id);
    let unread = with_store(&state, move |store| store.unread_count(user)).await?;
    Ok(Json(UnreadResponse {
        user_id: user,
        unread,
    }))
}

/// Serve on an already-bound listener until `shutdown` resolves.
pub async fn serve_listener(
    listener: TcpListener,
    state: AppState,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> anyhow::Result<()> {
    let app = build_router(state);

    info!(addr = %listener.local_addr()?, "Starting HTTP / WebSocket server");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown)
    .await?;

    Ok(())
}

pub async fn serve(
    state: AppState,
    addr: SocketAddr,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> anyhow::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    serve_listener(listener, state, shutdown).await
}
