//! HTTP server assembly
//!
//! Builds the axum application around the shared state: the Twilio
//! webhook routes, the call-session control surface used by the audio
//! transport, and a health endpoint.

pub mod sessions;

use anyhow::{Context, Result};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use base64::Engine;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use crate::agent::orchestrator::{OrchestratorError, SessionSummary};
use crate::config::Config;
use crate::notifications::NotificationService;
use crate::storage::CallStore;
use crate::telephony::webhooks;

pub use sessions::{SessionError, SessionRegistry};

/// Application-scope shared state: created at startup, cloned into
/// handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub store: CallStore,
    pub notifications: Arc<NotificationService>,
    pub sessions: Arc<SessionRegistry>,
}

impl AppState {
    pub fn new(
        config: Arc<Config>,
        store: CallStore,
        notifications: Arc<NotificationService>,
        sessions: Arc<SessionRegistry>,
    ) -> Self {
        Self {
            config,
            store,
            notifications,
            sessions,
        }
    }
}

/// Liveness endpoint
async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({
        "status": "healthy",
        "service": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
        "environment": state.config.app_env.as_str(),
    }))
}

#[derive(Debug, Deserialize)]
struct StartSessionRequest {
    #[serde(default)]
    from_number: String,
    #[serde(default = "default_language")]
    language: String,
}

fn default_language() -> String {
    "en".to_string()
}

#[derive(Debug, Deserialize)]
struct AudioTurnRequest {
    audio_data: String,
}

#[derive(Debug, Deserialize)]
struct SetLanguageRequest {
    language: String,
}

fn session_error_response(error: SessionError) -> axum::response::Response {
    let status = match &error {
        SessionError::NotFound(_) => StatusCode::NOT_FOUND,
        SessionError::Orchestrator(OrchestratorError::SessionAlreadyActive) => StatusCode::CONFLICT,
        SessionError::Orchestrator(OrchestratorError::SessionTimeout) => StatusCode::REQUEST_TIMEOUT,
        SessionError::Orchestrator(OrchestratorError::UnsupportedLanguage(_)) => {
            StatusCode::BAD_REQUEST
        }
        SessionError::Orchestrator(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, Json(json!({ "error": error.to_string() }))).into_response()
}

/// Start the call session and return the greeting audio
async fn start_session_handler(
    State(state): State<AppState>,
    Path(call_id): Path<String>,
    Json(req): Json<StartSessionRequest>,
) -> impl IntoResponse {
    match state
        .sessions
        .start_session(&call_id, &req.from_number, &req.language)
        .await
    {
        Ok(greeting) => (
            StatusCode::OK,
            Json(json!({
                "call_id": call_id,
                "audio_data": base64::engine::general_purpose::STANDARD.encode(&greeting.audio_bytes),
                "format": greeting.format.as_str(),
            })),
        )
            .into_response(),
        Err(e) => session_error_response(e),
    }
}

/// Run one audio turn through the session's pipeline
async fn audio_turn_handler(
    State(state): State<AppState>,
    Path(call_id): Path<String>,
    Json(req): Json<AudioTurnRequest>,
) -> impl IntoResponse {
    let audio = match base64::engine::general_purpose::STANDARD.decode(&req.audio_data) {
        Ok(audio) => audio,
        Err(e) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({ "error": format!("invalid audio data: {e}") })),
            )
                .into_response();
        }
    };

    match state.sessions.process_turn(&call_id, &audio).await {
        Ok(output) => (
            StatusCode::OK,
            Json(json!({
                "call_id": call_id,
                "text": output.assistant_text,
                "call_state": output.call_state.map(|s| s.as_str()),
                "audio_data": output
                    .audio
                    .map(|a| base64::engine::general_purpose::STANDARD.encode(&a.audio_bytes)),
            })),
        )
            .into_response(),
        Err(e) => session_error_response(e),
    }
}

/// Switch the session language mid-call
async fn set_language_handler(
    State(state): State<AppState>,
    Path(call_id): Path<String>,
    Json(req): Json<SetLanguageRequest>,
) -> impl IntoResponse {
    match state.sessions.set_language(&call_id, &req.language).await {
        Ok(()) => (
            StatusCode::OK,
            Json(json!({ "call_id": call_id, "language": req.language })),
        )
            .into_response(),
        Err(e) => session_error_response(e),
    }
}

/// End the session and return its summary
async fn end_session_handler(
    State(state): State<AppState>,
    Path(call_id): Path<String>,
) -> impl IntoResponse {
    match state.sessions.end_session(&call_id).await {
        Ok(SessionSummary::Ended {
            session_id,
            call_id,
            duration_seconds,
            turns_count,
            final_state,
            language,
        }) => (
            StatusCode::OK,
            Json(json!({
                "session_id": session_id,
                "call_id": call_id,
                "duration_seconds": duration_seconds,
                "turns_count": turns_count,
                "final_state": final_state.as_str(),
                "language": language,
            })),
        )
            .into_response(),
        Ok(SessionSummary::NoActiveSession) => (
            StatusCode::OK,
            Json(json!({ "status": "no_active_session" })),
        )
            .into_response(),
        Err(e) => session_error_response(e),
    }
}

/// Build the application router
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route(
            "/calls/{call_id}/session",
            post(start_session_handler).delete(end_session_handler),
        )
        .route("/calls/{call_id}/audio", post(audio_turn_handler))
        .route("/calls/{call_id}/language", post(set_language_handler))
        .merge(webhooks::routes())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve the application on the given bind address until shutdown
pub async fn start(state: AppState, bind: &str) -> Result<()> {
    let app = router(state);
    let listener = tokio::net::TcpListener::bind(bind)
        .await
        .with_context(|| format!("failed to bind {bind}"))?;
    tracing::info!(bind, "listening for webhooks");
    axum::serve(listener, app)
        .await
        .context("server terminated unexpectedly")?;
    Ok(())
}
