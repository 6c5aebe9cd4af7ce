//! Bearer-token authentication middleware
//!
//! Applied to the admin surface only. `/health`, the cron entry point and
//! the inbound webhooks carry their own checks.

use axum::{
    extract::{Request, State},
    http::header::AUTHORIZATION,
    middleware::Next,
    response::Response,
};
use rav_common::api::auth::{classify_token, parse_bearer, Role};
use tracing::warn;

use crate::error::ApiError;
use crate::AppState;

/// Authenticated caller, inserted as a request extension
#[derive(Debug, Clone, Copy)]
pub struct Caller {
    pub role: Role,
}

/// Reject requests without a recognised bearer token
pub async fn require_caller(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let header = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok());

    let role = parse_bearer(header)
        .and_then(|token| classify_token(&state.config.auth, token))
        .map_err(|e| {
            warn!(path = %request.uri().path(), error = %e, "Rejected API request");
            ApiError::Unauthorized
        })?;

    request.extensions_mut().insert(Caller { role });
    Ok(next.run(request).await)
}

/// Fail with 403 unless the caller holds the admin role
pub fn require_admin(caller: &Caller) -> Result<(), ApiError> {
    if caller.role.is_admin() {
        Ok(())
    } else {
        Err(ApiError::Forbidden("Admin token required".to_string()))
    }
}
