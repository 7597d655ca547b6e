//! Yoyo server - streaming chat companion backend for kids.
//!
//! Relays a child-facing chat UI to a generative text backend and a speech
//! synthesis backend while keeping per-user conversational state in Redis:
//! - transcript and derived profile with a sliding 24h retention window
//! - a keyword-toggled "game mode" overlay with its own short expiry
//! - one streamed response per turn: text deltas first, then an optional
//!   base64 audio payload behind a sentinel marker
//! - fire-and-forget profile enrichment after each completed turn
//!
//! ## Architecture
//!
//! ```text
//! Client ──POST /api/chat──▶ Orchestrator ──deltas──▶ stream multiplexer ──▶ Client
//!                               │   ▲                        │
//!                         Session Store              synthesis (deferred, once)
//!                               ▲
//!                        Enrichment task (detached)
//! ```

#![warn(clippy::all)]
#![allow(clippy::pedantic)]

pub mod chat;
pub mod config;
pub mod enrichment;
pub mod error;
pub mod generate;
pub mod logging;
pub mod routes;
pub mod session;
pub mod stream;
pub mod tts;

pub use chat::Orchestrator;
pub use error::{Error, Result};
pub use routes::{build_routes, AppState};

use axum::Router;
use config::Config;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;

/// Inline images arrive base64-encoded in the request body.
const MAX_BODY_BYTES: usize = 10 * 1024 * 1024;

/// Build the router with production backends from configuration.
pub fn build_router(config: &Config) -> anyhow::Result<Router> {
    let generator = Arc::new(generate::GeminiGenerator::new(&config.gemini)?);
    let tts = tts::AzureTts::from_config(&config.speech)
        .map(|t| Arc::new(t) as Arc<dyn tts::TextToSpeech>);
    let store = Arc::new(session::RedisSessionStore::new(&config.redis)?);

    let orchestrator = Orchestrator::new(generator, tts, store, &config.game);
    let state = AppState {
        orchestrator: Arc::new(orchestrator),
    };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Ok(build_routes(state)
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
        .layer(cors))
}

/// Start the server.
pub async fn start_server(config: &Config) -> anyhow::Result<()> {
    let addr = SocketAddr::from((
        config.server.host.parse::<std::net::IpAddr>()?,
        config.server.port,
    ));

    let router = build_router(config)?;

    tracing::info!("Starting yoyo-server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router).await?;

    Ok(())
}
