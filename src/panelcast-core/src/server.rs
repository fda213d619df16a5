//! HTTP and WebSocket surface.
//!
//! Subscribers attach at `/ws/{channel}`. A small admin surface sits beside
//! it for health checks, injecting messages and starting or stopping the
//! scripted conversation.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::channel::Channel;
use crate::config::Config;
use crate::conversation::ConversationRunner;
use crate::error::PanelError;
use crate::relay::Relay;
use crate::session;

/// Shared application state passed to axum handlers.
#[derive(Clone)]
pub struct AppState {
    pub relay: Arc<Relay>,
    pub conversation: Arc<ConversationRunner>,
    pub outbound_buffer: usize,
}

impl AppState {
    pub fn new(relay: Arc<Relay>, config: &Config) -> Self {
        let conversation = ConversationRunner::new(
            Arc::clone(&relay),
            config.conversation.script_path.clone(),
            config.audience.clone(),
        );
        Self {
            relay,
            conversation: Arc::new(conversation),
            outbound_buffer: config.server.outbound_buffer,
        }
    }
}

/// Build the axum router with all routes.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/ws/{channel}", get(ws_handler))
        .route("/health", get(health_handler))
        .route("/messages", post(message_handler))
        .route("/conversation/start", post(start_conversation_handler))
        .route("/conversation/stop", post(stop_conversation_handler))
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

/// Bind the listener and serve until [`ServerHandle::shutdown`] is called.
pub async fn start(config: &Config) -> Result<ServerHandle, PanelError> {
    let relay = Relay::new(config.dispatch.clone());
    let state = AppState::new(Arc::clone(&relay), config);
    let conversation = Arc::clone(&state.conversation);
    let router = build_router(state);

    let listener = tokio::net::TcpListener::bind(&config.server.bind).await?;
    let local_addr = listener.local_addr()?;
    info!(%local_addr, "panelcast server listening");

    let shutdown = CancellationToken::new();
    let task = tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            if let Err(e) = axum::serve(listener, router)
                .with_graceful_shutdown(shutdown.cancelled_owned())
                .await
            {
                warn!(error = %e, "server terminated with error");
            }
        }
    });

    Ok(ServerHandle {
        local_addr,
        relay,
        conversation,
        shutdown,
        task,
    })
}

/// Handle returned by [`start`]; owns the serving task.
pub struct ServerHandle {
    local_addr: SocketAddr,
    relay: Arc<Relay>,
    conversation: Arc<ConversationRunner>,
    shutdown: CancellationToken,
    task: JoinHandle<()>,
}

impl ServerHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn relay(&self) -> &Arc<Relay> {
        &self.relay
    }

    pub fn conversation(&self) -> &Arc<ConversationRunner> {
        &self.conversation
    }

    /// Stop the conversation, close the relay and wait for the server to exit.
    pub async fn shutdown(self) {
        self.conversation.stop();
        self.relay.shutdown().await;
        self.shutdown.cancel();
        if let Err(e) = self.task.await {
            warn!(error = %e, "server task failed");
        }
        info!("panelcast server stopped");
    }
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    Path(channel): Path<String>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| {
        session::run_session(socket, channel, state.relay, state.outbound_buffer)
    })
}

async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    let relay = &state.relay;
    Json(json!({
        "status": "ok",
        "connections": relay.registry().counts(),
        "queue_len": relay.queue().len(),
        "drained": relay.queue().is_drained(),
        "speaking": relay.speaking().snapshot(),
        "conversation_running": state.conversation.is_running(),
    }))
}

#[derive(Debug, Deserialize)]
struct MessageRequest {
    text: String,
    channel: String,
}

async fn message_handler(
    State(state): State<AppState>,
    Json(request): Json<MessageRequest>,
) -> impl IntoResponse {
    let channel = match request.channel.parse::<Channel>() {
        Ok(channel) => channel,
        Err(e) => return error_response(StatusCode::BAD_REQUEST, &e),
    };

    match state.relay.enqueue(&request.text, channel) {
        Ok(key) => (
            StatusCode::ACCEPTED,
            Json(json!({ "queued": true, "channel": channel, "seq": key.seq })),
        ),
        Err(e) => error_response(StatusCode::SERVICE_UNAVAILABLE, &e),
    }
}

async fn start_conversation_handler(State(state): State<AppState>) -> impl IntoResponse {
    match state.conversation.start().await {
        Ok(title) => (StatusCode::OK, Json(json!({ "started": true, "title": title }))),
        Err(e @ PanelError::ConversationRunning) => error_response(StatusCode::CONFLICT, &e),
        Err(e) => error_response(StatusCode::BAD_REQUEST, &e),
    }
}

async fn stop_conversation_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({ "stopped": state.conversation.stop() }))
}

fn error_response(
    status: StatusCode,
    error: &PanelError,
) -> (StatusCode, Json<serde_json::Value>) {
    (status, Json(json!({ "error": error.to_string() })))
}
