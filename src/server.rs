//! HTTP/WebSocket surface: the interview endpoint plus health and stats.
//!
//! The WebSocket route is the only way into a session. The bearer
//! credential is verified before the upgrade so a rejected client is closed
//! with an authorization-refused status instead of a half-open socket.

use crate::auth::HttpTokenVerifier;
use crate::bank::QuestionBank;
use crate::channel::{ClientChannel, WebSocketChannel};
use crate::config::AppConfig;
use crate::error::{InterviewError, Result};
use crate::llm::HttpChatModel;
use crate::memory::SessionMemoryStore;
use crate::session::registry::ActiveSessions;
use crate::session::supervisor::{SessionServices, authenticate, run_session};
use crate::sink::{InteractionSink, SqliteSink};
use crate::stt::HttpSpeechToText;
use crate::tts::HttpTextToSpeech;
use axum::extract::{Query, State, WebSocketUpgrade};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// Shared state behind every route.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub services: Arc<SessionServices>,
    pub sink: Arc<SqliteSink>,
}

/// Build the process-wide service graph from a validated configuration.
///
/// # Errors
///
/// Returns `Bank`/`Storage` when the question bank or database cannot be
/// opened.
pub fn build_state(config: AppConfig) -> Result<AppState> {
    let config = Arc::new(config);
    let bank = Arc::new(QuestionBank::load(&config.bank.path)?);
    let sink = Arc::new(SqliteSink::open(&config.storage.db_path)?);

    let services = Arc::new(SessionServices {
        session: config.session.clone(),
        audio: config.audio.clone(),
        llm: config.llm.clone(),
        bank,
        memory: Arc::new(SessionMemoryStore::new(config.memory.ttl())),
        registry: Arc::new(ActiveSessions::new()),
        verifier: Arc::new(HttpTokenVerifier::new(config.auth.clone())),
        chat: Arc::new(HttpChatModel::new(config.llm.clone())),
        stt: Arc::new(HttpSpeechToText::new(config.stt.clone())),
        tts: Arc::new(HttpTextToSpeech::new(config.tts.clone())),
        sink: Arc::clone(&sink) as Arc<dyn InteractionSink>,
    });

    Ok(AppState {
        config,
        services,
        sink,
    })
}

/// Route table.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/ws/interview", get(ws_interview))
        .route("/health", get(health))
        .route("/stats", get(stats))
        .with_state(state)
}

/// Periodically sweep expired session memory.
pub fn spawn_memory_sweeper(
    memory: Arc<SessionMemoryStore>,
    interval: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(interval).await;
            let removed = memory.cleanup_expired();
            if removed > 0 {
                info!(removed, "expired session memory swept");
            }
        }
    })
}

/// Bind and serve until the listener fails.
///
/// # Errors
///
/// Returns `Config` when the address cannot be bound, `Session` when the
/// server loop fails.
pub async fn run(config: AppConfig) -> Result<()> {
    let state = build_state(config)?;
    let _sweeper = spawn_memory_sweeper(
        Arc::clone(&state.services.memory),
        state.config.memory.sweep_interval(),
    );

    let bind_addr = state.config.server.bind_addr.clone();
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .map_err(|e| InterviewError::Config(format!("failed to bind {bind_addr}: {e}")))?;
    info!(addr = %bind_addr, "interview server listening");

    axum::serve(listener, router(state))
        .await
        .map_err(|e| InterviewError::Session(format!("server loop failed: {e}")))
}

#[derive(Debug, Deserialize)]
struct WsQuery {
    token: String,
}

async fn ws_interview(
    State(state): State<AppState>,
    Query(query): Query<WsQuery>,
    ws: WebSocketUpgrade,
) -> Response {
    let user_id = match authenticate(&state.services, &query.token).await {
        Ok(user_id) => user_id,
        Err(e) => {
            warn!(error = %e, "websocket authorization refused");
            return StatusCode::FORBIDDEN.into_response();
        }
    };

    let services = Arc::clone(&state.services);
    ws.on_upgrade(move |socket| async move {
        let channel: Arc<dyn ClientChannel> = Arc::new(WebSocketChannel::new(socket));
        if let Err(e) = run_session(&services, channel, &user_id).await {
            error!(user_id, error = %e, "session ended with transport error");
        }
    })
}

async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "service": "interview",
        "active_sessions": state.services.registry.len(),
        "storage_healthy": state.sink.is_healthy(),
    }))
}

async fn stats(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "active_sessions": state.services.registry.len(),
        "session_config": {
            "duration_limit_seconds": state.config.session.duration_limit_seconds,
            "min_topics": state.config.session.min_topics,
            "max_followups_per_topic": state.config.session.max_followups_per_topic,
        },
        "memory": state.services.memory.stats(),
    }))
}
