//! HTTP and WebSocket handlers for the Parley server.
//!
//! This module wires the core services into an axum router and owns the
//! push connection lifecycle.

use crate::auth::{self, AccountStore, AuthUser};
use crate::config::Config;
use crate::error::ApiError;
use crate::metrics::{self, ConnectionMetricsGuard};
use anyhow::Result;
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        DefaultBodyLimit, Path, Query, State,
    },
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use bytes::BytesMut;
use futures_util::StreamExt;
use parley_core::{
    InMemoryMessageStore, MessagePipeline, PipelineConfig, PresenceNotifier, PresenceRegistry,
    RateLimiterChain, SendRequest, SharedConnection,
};
use parley_protocol::{codec, ChatMessage, Encoding, Frame, UserId};
use parley_transport::{run_writer, PushConnection, WebSocketConnection};
use serde::Deserialize;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};

/// Shared server state.
pub struct AppState {
    /// Server configuration.
    pub config: Config,
    /// Live push connections by user.
    pub presence: Arc<PresenceRegistry>,
    /// Message storage.
    pub store: Arc<InMemoryMessageStore>,
    /// The send pipeline.
    pub pipeline: MessagePipeline,
    /// Accounts and sessions.
    pub accounts: AccountStore,
    /// Guards `POST /api/auth/signup`.
    pub signup_limiter: RateLimiterChain,
    /// Guards `POST /api/auth/login`.
    pub login_limiter: RateLimiterChain,
}

impl AppState {
    /// Create new app state.
    #[must_use]
    pub fn new(config: Config) -> Self {
        let presence = Arc::new(PresenceRegistry::new());
        let store = Arc::new(InMemoryMessageStore::new());
        let pipeline = MessagePipeline::with_config(
            store.clone(),
            Arc::new(PresenceNotifier::new(Arc::clone(&presence))),
            PipelineConfig {
                max_text_len: config.limits.max_text_len,
            },
        );

        let signup_limiter = RateLimiterChain::signup(config.rate_limit.signup_rule());
        let login_limiter = RateLimiterChain::login(
            config.rate_limit.login_ip_rule(),
            config.rate_limit.login_account_rule(),
        );

        Self {
            config,
            presence,
            store,
            pipeline,
            accounts: AccountStore::new(),
            signup_limiter,
            login_limiter,
        }
    }
}

/// Build the application router.
pub fn build_router(state: Arc<AppState>) -> Router {
    let body_limit = state.config.limits.max_body_bytes;

    Router::new()
        .route(&state.config.transport.websocket_path, get(ws_handler))
        .route("/health", get(health_handler))
        .route("/api/auth/signup", post(auth::signup_handler))
        .route("/api/auth/login", post(auth::login_handler))
        .route("/api/auth/logout", post(auth::logout_handler))
        .route("/api/auth/check", get(auth::check_handler))
        .route("/api/auth/update-profile", put(auth::update_profile_handler))
        .route("/api/messages/users", get(users_handler))
        .route("/api/messages/send/:id", post(send_handler))
        .route("/api/messages/:id", get(history_handler))
        .layer(DefaultBodyLimit::max(body_limit))
        .with_state(state)
}

/// Run the HTTP/WebSocket server.
///
/// # Errors
///
/// Returns an error if the server fails to start.
pub async fn run_server(config: Config) -> Result<()> {
    let state = Arc::new(AppState::new(config.clone()));

    // Start metrics server if enabled
    if config.metrics.enabled {
        if let Err(e) = metrics::start_metrics_server(config.metrics.port) {
            error!("Failed to start metrics server: {}", e);
        }
    }

    let _pruner = spawn_pruner(Arc::clone(&state));
    let app = build_router(state);

    // Bind and serve
    let addr = config.bind_addr()?;
    let listener = TcpListener::bind(addr).await?;

    info!("Parley server listening on {}", addr);
    info!(
        "WebSocket endpoint: ws://{}{}",
        addr, config.transport.websocket_path
    );

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}

/// Periodically drop rate limiter windows that have expired.
fn spawn_pruner(state: Arc<AppState>) -> JoinHandle<()> {
    let period = Duration::from_secs(state.config.rate_limit.prune_interval_secs.max(1));
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let pruned =
                state.signup_limiter.prune_expired() + state.login_limiter.prune_expired();
            if pruned > 0 {
                debug!(pruned, "Pruned expired rate windows");
            }
        }
    })
}

/// Health check handler.
async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "online": state.presence.len(),
    }))
}

/// Send request body.
#[derive(Debug, Default, Deserialize)]
struct SendBody {
    text: Option<String>,
    image: Option<String>,
}

/// `POST /api/messages/send/:id`
async fn send_handler(
    State(state): State<Arc<AppState>>,
    AuthUser(account): AuthUser,
    Path(receiver): Path<String>,
    Json(body): Json<SendBody>,
) -> Result<(StatusCode, Json<ChatMessage>), ApiError> {
    let start = Instant::now();
    let outcome = state
        .pipeline
        .send(SendRequest {
            sender: account.id,
            receiver,
            text: body.text,
            image: body.image,
        })
        .await?;
    metrics::record_send(outcome.delivery, start.elapsed().as_secs_f64());

    Ok((StatusCode::CREATED, Json(outcome.message)))
}

/// `GET /api/messages/:id`
async fn history_handler(
    State(state): State<Arc<AppState>>,
    AuthUser(account): AuthUser,
    Path(peer): Path<String>,
) -> Result<Json<Vec<ChatMessage>>, ApiError> {
    let messages = state.pipeline.history(&account.id, &peer).await?;
    Ok(Json(messages))
}

/// `GET /api/messages/users`
async fn users_handler(
    State(state): State<Arc<AppState>>,
    AuthUser(account): AuthUser,
) -> Json<Vec<auth::AccountProfile>> {
    Json(state.accounts.others(&account.id))
}

/// WebSocket query parameters.
#[derive(Debug, Default, Deserialize)]
struct WsParams {
    /// Session token, for clients that cannot set headers on the upgrade.
    token: Option<String>,
    /// `json` (default) or `msgpack`.
    encoding: Option<String>,
}

/// WebSocket upgrade handler.
async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    Query(params): Query<WsParams>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let token = params
        .token
        .or_else(|| auth::session_token(&headers))
        .ok_or(ApiError::Unauthorized)?;
    let account = state
        .accounts
        .authenticate(&token)
        .ok_or(ApiError::Unauthorized)?;

    let encoding = match params.encoding.as_deref() {
        Some(raw) => raw
            .parse::<Encoding>()
            .map_err(|e| ApiError::BadRequest(e.to_string()))?,
        None => Encoding::default(),
    };

    Ok(ws.on_upgrade(move |socket| handle_websocket(socket, state, account.id, encoding)))
}

/// Push the current online list to every connection.
fn broadcast_online_users(presence: &PresenceRegistry) {
    let frame = Frame::online_users(&presence.online_users());
    for connection in presence.connections() {
        if let Err(e) = connection.send(frame.clone()) {
            debug!(connection = %connection.id(), error = %e, "Online list push failed");
        }
    }
    metrics::set_users_online(presence.len());
}

/// Handle a WebSocket connection.
async fn handle_websocket(
    socket: WebSocket,
    state: Arc<AppState>,
    user: UserId,
    encoding: Encoding,
) {
    // Record connection metrics
    let _metrics_guard = ConnectionMetricsGuard::new();

    let (connection, rx) = WebSocketConnection::new();
    let connection_id = connection.id().clone();
    debug!(user = %user, connection = %connection_id, ?encoding, "WebSocket connected");

    let heartbeat = u32::try_from(state.config.heartbeat.interval_ms).unwrap_or(u32::MAX);
    if let Err(e) = connection.send(Frame::connected(connection_id.as_str(), heartbeat)) {
        error!(connection = %connection_id, error = %e, "Failed to queue Connected frame");
        return;
    }

    let (sink, mut stream) = socket.split();
    let mut writer = tokio::spawn(run_writer(sink, rx, encoding, connection_id.clone()));

    let handle: SharedConnection = Arc::new(connection.clone());
    if let Some(previous) = state.presence.register(user.clone(), handle) {
        warn!(user = %user, stale = %previous.id(), connection = %connection_id, "Replacing stale connection");
        if let Err(e) = previous.close("replaced") {
            debug!(connection = %previous.id(), error = %e, "Stale connection already gone");
        }
    }
    broadcast_online_users(&state.presence);

    // Read buffer for partial MessagePack frames
    let mut read_buffer = BytesMut::with_capacity(4096);

    loop {
        tokio::select! {
            _ = &mut writer => break,

            msg = stream.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => match codec::decode_json(&text) {
                        Ok(frame) => handle_client_frame(frame, &connection),
                        Err(e) => warn!(connection = %connection_id, error = %e, "Bad text frame"),
                    },
                    Some(Ok(Message::Binary(data))) => {
                        read_buffer.extend_from_slice(&data);
                        loop {
                            match codec::decode_from(&mut read_buffer) {
                                Ok(Some(frame)) => handle_client_frame(frame, &connection),
                                Ok(None) => break,
                                Err(e) => {
                                    warn!(connection = %connection_id, error = %e, "Bad binary frame");
                                    metrics::record_error("decode");
                                    read_buffer.clear();
                                    break;
                                }
                            }
                        }
                    }
                    Some(Ok(Message::Ping(_) | Message::Pong(_))) => {}
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(e)) => {
                        warn!(connection = %connection_id, error = %e, "WebSocket error");
                        metrics::record_error("websocket");
                        break;
                    }
                }
            }
        }
    }

    if state.presence.remove(&user, &connection_id) {
        broadcast_online_users(&state.presence);
    }
    drop(connection);
    writer.abort();

    debug!(user = %user, connection = %connection_id, "WebSocket disconnected");
}

/// Handle a frame sent by the client.
fn handle_client_frame(frame: Frame, connection: &WebSocketConnection) {
    match frame {
        Frame::Ping { timestamp } => {
            if let Err(e) = connection.send(Frame::pong(timestamp)) {
                debug!(connection = %connection.id(), error = %e, "Pong failed");
            }
        }
        Frame::Pong { .. } => trace!(connection = %connection.id(), "Pong"),
        other => {
            debug!(connection = %connection.id(), kind = other.kind(), "Ignoring client frame");
        }
    }
}
