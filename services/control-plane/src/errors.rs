//! Error taxonomy for the deployment coordinator (spec §7).
//!
//! `PlacementRefused` is data, not control flow: the router matches on it
//! and moves to the next platform rather than treating it as failure.

use axum::{http::StatusCode, response::IntoResponse, Json};
use serde_json::json;

#[derive(Debug, thiserror::Error)]
pub enum CoordinatorError {
    /// A single adapter declined to place a bot (capacity, transient backend
    /// condition). Recovered locally by the router; never surfaced directly.
    #[error("placement refused: {0}")]
    PlacementRefused(String),

    /// An adapter call errored outright. Logged and treated like a refusal
    /// by the router; surfaced to the bot record only if every platform and
    /// the global queue are exhausted too.
    #[error("placement failed: {0}")]
    PlacementFailed(String),

    /// A queue wait (pool-local or global) exceeded its deadline.
    #[error("queue timeout: {0}")]
    QueueTimeout(String),

    #[error("validation error: {0}")]
    Validation(String),

    /// Deliberately vague message: callers must not learn whether a
    /// resource exists if they don't own it (spec §6 ownership check).
    #[error("not found")]
    Authorization,

    /// A transient backend condition (network blip, rate limit). Retried
    /// with backoff in the image-pull/start path; logged-only elsewhere.
    #[error("backend transient error: {0}")]
    BackendTransient(String),

    /// A detected inconsistency between DB and backend state, handled by
    /// the orphan reconciler. Never surfaced to a caller.
    #[error("inconsistency: {0}")]
    Inconsistency(String),

    #[error("precondition failed: {0}")]
    Precondition(String),

    #[error(transparent)]
    Database(#[from] sqlx::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl IntoResponse for CoordinatorError {
    fn into_response(self) -> axum::response::Response {
        let (status, message) = match &self {
            CoordinatorError::PlacementRefused(m) | CoordinatorError::PlacementFailed(m) => {
                (StatusCode::SERVICE_UNAVAILABLE, m.clone())
            }
            CoordinatorError::QueueTimeout(m) => (StatusCode::GATEWAY_TIMEOUT, m.clone()),
            CoordinatorError::Validation(m) => (StatusCode::BAD_REQUEST, m.clone()),
            CoordinatorError::Authorization => {
                (StatusCode::NOT_FOUND, "not found".to_string())
            }
            CoordinatorError::BackendTransient(m) => (StatusCode::BAD_GATEWAY, m.clone()),
            CoordinatorError::Inconsistency(m) => {
                tracing::error!("inconsistency surfaced to caller unexpectedly: {}", m);
                (StatusCode::INTERNAL_SERVER_ERROR, "internal error".to_string())
            }
            CoordinatorError::Precondition(m) => (StatusCode::PRECONDITION_FAILED, m.clone()),
            CoordinatorError::Database(e) => {
                tracing::error!("database error: {}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, "internal error".to_string())
            }
            CoordinatorError::Other(e) => {
                tracing::error!("unhandled error: {}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, "internal error".to_string())
            }
        };

        (status, Json(json!({ "error": message }))).into_response()
    }
}

pub type Result<T> = std::result::Result<T, CoordinatorError>;
