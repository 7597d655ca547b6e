//! Error types for the Yoyo backend.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias using the Yoyo error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Unified error type for the chat pipeline.
///
/// Only `InvalidRequest` and `UpstreamGeneration` are ever user-visible.
/// `Synthesis`, `Persistence` and `Enrichment` degrade silently at their
/// call sites: the chat flow trades durability and voice for availability.
#[derive(Error, Debug)]
pub enum Error {
    /// Malformed or empty client input
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Generation backend failed before or during streaming
    #[error("Generation failed: {0}")]
    UpstreamGeneration(String),

    /// Speech synthesis failed (non-fatal, audio is omitted)
    #[error("Synthesis failed: {0}")]
    Synthesis(String),

    /// Session store unavailable (non-fatal, degrades to session-less)
    #[error("Persistence unavailable: {0}")]
    Persistence(String),

    /// Background profile enrichment failed (contained, never surfaced)
    #[error("Enrichment failed: {0}")]
    Enrichment(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Get the HTTP status code for this error.
    pub const fn status_code(&self) -> u16 {
        match self {
            Self::InvalidRequest(_) => 400,
            _ => 500,
        }
    }

    /// Short machine-readable code for the error body.
    pub const fn code(&self) -> &'static str {
        match self {
            Self::InvalidRequest(_) => "invalid_request",
            Self::UpstreamGeneration(_) => "generation_failed",
            Self::Synthesis(_) => "synthesis_failed",
            Self::Persistence(_) => "persistence_unavailable",
            Self::Enrichment(_) => "enrichment_failed",
            Self::Config(_) => "config_error",
            Self::Io(_) | Self::Json(_) => "internal_error",
        }
    }
}

/// JSON error body returned to clients.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

        // Full detail stays server-side; clients get the message only for
        // input errors.
        let message = match &self {
            Self::InvalidRequest(msg) => msg.clone(),
            other => {
                tracing::error!(error = %other, "request failed");
                "internal server error".to_string()
            }
        };

        let body = ErrorResponse {
            error: message,
            code: self.code().to_string(),
        };

        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_status_codes() {
        assert_eq!(Error::InvalidRequest("empty".into()).status_code(), 400);
        assert_eq!(Error::UpstreamGeneration("boom".into()).status_code(), 500);
        assert_eq!(Error::Persistence("down".into()).status_code(), 500);
        assert_eq!(Error::Synthesis("503".into()).status_code(), 500);
    }

    #[test]
    fn test_error_codes() {
        assert_eq!(Error::InvalidRequest("x".into()).code(), "invalid_request");
        assert_eq!(Error::Enrichment("x".into()).code(), "enrichment_failed");
    }

    #[test]
    fn test_invalid_request_message_is_visible() {
        let resp = Error::InvalidRequest("history is empty".into()).into_response();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_internal_message_is_hidden() {
        let resp = Error::UpstreamGeneration("api key leaked".into()).into_response();
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
