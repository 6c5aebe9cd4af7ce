//! Bearer-token authentication
//!
//! Pure functions only. No HTTP framework dependencies; the axum
//! middleware lives in the service crate.
//!
//! Tokens are compared as SHA-256 digests with a constant-time equality
//! check so response timing does not leak token prefixes.

use sha2::{Digest, Sha256};

use crate::config::AuthConfig;

/// Authentication failures
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApiAuthError {
    /// No `Authorization` header present
    MissingToken,
    /// Header present but not of the form `Bearer <token>`
    MalformedHeader,
    /// Token not recognised
    InvalidToken,
}

impl std::fmt::Display for ApiAuthError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ApiAuthError::MissingToken => write!(f, "Missing bearer token"),
            ApiAuthError::MalformedHeader => write!(f, "Malformed Authorization header"),
            ApiAuthError::InvalidToken => write!(f, "Invalid bearer token"),
        }
    }
}

impl std::error::Error for ApiAuthError {}

/// Access level granted to a caller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// May run pipeline actions and manual assignments
    Admin,
    /// May read diagnostics only
    ReadOnly,
}

impl Role {
    pub fn is_admin(self) -> bool {
        matches!(self, Role::Admin)
    }
}

/// Extract the token from an `Authorization` header value
pub fn parse_bearer(header: Option<&str>) -> Result<&str, ApiAuthError> {
    let header = header.ok_or(ApiAuthError::MissingToken)?;
    let (scheme, token) = header
        .trim()
        .split_once(' ')
        .ok_or(ApiAuthError::MalformedHeader)?;

    if !scheme.eq_ignore_ascii_case("bearer") {
        return Err(ApiAuthError::MalformedHeader);
    }

    let token = token.trim();
    if token.is_empty() {
        return Err(ApiAuthError::MalformedHeader);
    }

    Ok(token)
}

/// Constant-time comparison of two secrets
pub fn tokens_match(provided: &str, expected: &str) -> bool {
    let a = Sha256::digest(provided.as_bytes());
    let b = Sha256::digest(expected.as_bytes());
    a.iter().zip(b.iter()).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

/// Map a token to the role it grants
///
/// Every configured token is checked so the work done does not depend on
/// which list (if any) contains the token.
pub fn classify_token(config: &AuthConfig, token: &str) -> Result<Role, ApiAuthError> {
    let admin = config
        .admin_tokens
        .iter()
        .fold(false, |found, t| tokens_match(token, t) | found);
    let readonly = config
        .readonly_tokens
        .iter()
        .fold(false, |found, t| tokens_match(token, t) | found);

    if admin {
        Ok(Role::Admin)
    } else if readonly {
        Ok(Role::ReadOnly)
    } else {
        Err(ApiAuthError::InvalidToken)
    }
}

/// Validate an `Authorization` header against the cron shared secret
///
/// An unset or empty secret rejects every request.
pub fn validate_cron_secret(header: Option<&str>, secret: Option<&str>) -> Result<(), ApiAuthError> {
    let token = parse_bearer(header)?;
    match secret {
        Some(expected) if !expected.is_empty() && tokens_match(token, expected) => Ok(()),
        _ => Err(ApiAuthError::InvalidToken),
    }
}
