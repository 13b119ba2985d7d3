use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

/// Per-request failure taxonomy. Every variant is terminal for its request;
/// nothing is retried at any layer.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("missing credentials")]
    MissingCredentials,

    /// Non-zero exit or empty stdout from the scraper process.
    #[error("scraper failed (exit {exit_code:?})")]
    ScraperFailed {
        exit_code: Option<i32>,
        details: String,
    },

    /// The scraper produced output that is not JSON.
    #[error("invalid JSON returned by scraper")]
    InvalidJson { details: String },

    #[error("scraper timed out after {secs}s")]
    Timeout { secs: u64 },

    #[error("too many concurrent scrapes")]
    Busy,

    #[error("failed to launch scraper: {0}")]
    Spawn(#[from] std::io::Error),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, body) = match &self {
            AppError::MissingCredentials => (
                StatusCode::BAD_REQUEST,
                json!({ "error": "Missing credentials" }),
            ),
            AppError::ScraperFailed { exit_code, details } => (
                StatusCode::INTERNAL_SERVER_ERROR,
                json!({ "error": "Scraper failed", "exitCode": exit_code, "details": details }),
            ),
            AppError::InvalidJson { details } => (
                StatusCode::INTERNAL_SERVER_ERROR,
                json!({ "error": "Invalid JSON returned by scraper", "details": details }),
            ),
            AppError::Timeout { secs } => (
                StatusCode::GATEWAY_TIMEOUT,
                json!({ "error": "Scraper timed out", "details": format!("no response within {secs}s") }),
            ),
            AppError::Busy => (
                StatusCode::SERVICE_UNAVAILABLE,
                json!({ "error": "Too many concurrent scrapes" }),
            ),
            AppError::Spawn(e) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                json!({ "error": "Scraper failed", "exitCode": null, "details": e.to_string() }),
            ),
        };
        (status, Json(body)).into_response()
    }
}
