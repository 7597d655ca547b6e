//! HTTP routes.

use crate::chat::Orchestrator;
use crate::error::Error;
use crate::session::Turn;
use crate::stream::streaming_response;
use axum::extract::State;
use axum::response::Response;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Shared application state.
///
/// Backends are injected at construction so tests can substitute fakes.
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
}

/// Chat request body.
///
/// Fields are optional so absence maps to a 400 with an error body instead
/// of a deserialization rejection.
#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub history: Option<Vec<Turn>>,
    #[serde(rename = "userId")]
    pub user_id: Option<String>,
}

/// Health check response.
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub service: String,
}

/// Build the application router.
pub fn build_routes(state: AppState) -> Router {
    Router::new()
        .route("/api/chat", post(chat))
        .route("/health", get(health))
        .with_state(state)
}

/// POST /api/chat — stream a reply per the multiplexer protocol.
async fn chat(
    State(state): State<AppState>,
    Json(request): Json<ChatRequest>,
) -> Result<Response, Error> {
    let user_id = request
        .user_id
        .ok_or_else(|| Error::InvalidRequest("userId is required".into()))?;
    let history = request
        .history
        .ok_or_else(|| Error::InvalidRequest("history is required".into()))?;

    let stream = state.orchestrator.handle_turn(&user_id, history).await?;
    Ok(streaming_response(stream))
}

/// GET /health — liveness probe.
async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".into(),
        version: env!("CARGO_PKG_VERSION").into(),
        service: "yoyo-server".into(),
    })
}
