use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use thiserror::Error;
use tracing::error;

/// Error taxonomy for the REST surface. Authorization failures are kept
/// distinct from missing entities so clients can tell "you may not" from
/// "it does not exist".
#[derive(Debug, Error)]
pub enum ApiError {
    /// Missing or malformed input; no writes have happened.
    #[error("{0}")]
    Validation(String),
    /// Referenced user/group/message/post is absent; no writes.
    #[error("{0}")]
    NotFound(String),
    /// Missing or invalid credentials.
    #[error("{0}")]
    Unauthenticated(String),
    /// Caller is not a participant/member/owner; checked before any write.
    #[error("{0}")]
    Unauthorized(String),
    /// Request conflicts with existing state (duplicate edge, taken email).
    #[error("{0}")]
    Conflict(String),
    /// Relational store, mirror store, or object storage failed.
    #[error(transparent)]
    Upstream(#[from] anyhow::Error),
}

impl ApiError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn unauthenticated(msg: impl Into<String>) -> Self {
        Self::Unauthenticated(msg.into())
    }

    pub fn unauthorized(msg: impl Into<String>) -> Self {
        Self::Unauthorized(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }
}

impl From<ripple_mirror::MirrorError> for ApiError {
    fn from(e: ripple_mirror::MirrorError) -> Self {
        Self::Upstream(anyhow::Error::new(e))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message, detail) = match self {
            ApiError::Validation(m) => (StatusCode::UNPROCESSABLE_ENTITY, m, None),
            ApiError::NotFound(m) => (StatusCode::NOT_FOUND, m, None),
            ApiError::Unauthenticated(m) => (StatusCode::UNAUTHORIZED, m, None),
            ApiError::Unauthorized(m) => (StatusCode::FORBIDDEN, m, None),
            ApiError::Conflict(m) => (StatusCode::CONFLICT, m, None),
            ApiError::Upstream(e) => {
                error!("upstream store error: {:#}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                    Some(e.to_string()),
                )
            }
        };

        let mut body = json!({ "success": false, "message": message });
        if let Some(detail) = detail {
            body["error"] = json!(detail);
        }
        (status, Json(body)).into_response()
    }
}
