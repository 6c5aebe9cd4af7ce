//! API error type
//!
//! Every error response has the same body:
//! `{"success": false, "error": <message>, "code": <CODE>, "timestamp": <RFC 3339>}`.
//! Server-side failures always carry the generic message; the detail is
//! logged and attached as an [`InternalErrorDetail`] extension, which
//! [`expose_internal_errors`] swaps into the body in development mode.

use axum::{
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::AppState;

const GENERIC_INTERNAL_MESSAGE: &str = "Internal server error";

#[derive(Debug, Error)]
pub enum ApiError {
    /// Missing or invalid credentials (401)
    #[error("Unauthorized")]
    Unauthorized,

    /// Valid credentials without the required role (403)
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// Invalid request (400)
    #[error("Invalid request: {0}")]
    BadRequest(String),

    /// Resource not found (404)
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// Conflicts with existing state (409)
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Internal server error (500)
    #[error("Internal server error: {0}")]
    Internal(String),

    /// rav-common error, mapped by kind
    #[error("{0}")]
    Common(#[from] rav_common::Error),
}

/// Detail of a 500 response, kept out of the body unless in development
#[derive(Debug, Clone)]
pub struct InternalErrorDetail(pub String);

fn error_body(status: StatusCode, code: &str, message: &str) -> Response {
    let body = Json(json!({
        "success": false,
        "error": message,
        "code": code,
        "timestamp": rav_common::time::now_db_string(),
    }));
    (status, body).into_response()
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message) = match self {
            ApiError::Unauthorized => {
                (StatusCode::UNAUTHORIZED, "UNAUTHORIZED", "Unauthorized".to_string())
            }
            ApiError::Forbidden(msg) => (StatusCode::FORBIDDEN, "FORBIDDEN", msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, "CONFLICT", msg),
            ApiError::Common(rav_common::Error::NotFound(msg)) => {
                (StatusCode::NOT_FOUND, "NOT_FOUND", msg)
            }
            ApiError::Common(rav_common::Error::InvalidInput(msg)) => {
                (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg)
            }
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", msg),
            ApiError::Common(err) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
                err.to_string(),
            ),
        };

        if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!(code, error = %message, "Request failed");
            let mut response = error_body(status, code, GENERIC_INTERNAL_MESSAGE);
            response.extensions_mut().insert(InternalErrorDetail(message));
            return response;
        }

        error_body(status, code, &message)
    }
}

/// Replace the generic 500 message with its detail when `server.development` is set
pub async fn expose_internal_errors(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let mut response = next.run(request).await;
    if state.config.server.development {
        if let Some(detail) = response.extensions_mut().remove::<InternalErrorDetail>() {
            return error_body(response.status(), "INTERNAL_ERROR", &detail.0);
        }
    }
    response
}

/// Result type for API handlers
pub type ApiResult<T> = Result<T, ApiError>;
