//! Error types for authentication and key management.

use chrono::{DateTime, Utc};
use thiserror::Error;

/// Authentication and token failures with their RFC 6749 / HTTP mapping
/// decided at the API boundary.
#[derive(Error, Debug)]
pub enum AuthError {
    /// Token could not be parsed or its signature did not verify.
    #[error("invalid token")]
    InvalidToken,

    /// Token signature verified but the token is past its expiry.
    #[error("token expired")]
    TokenExpired,

    /// Token is valid but of the wrong type for this operation.
    #[error("wrong token type: expected {expected}, got {actual}")]
    WrongTokenType { expected: String, actual: String },

    /// Unknown client or bad secret (client-credentials grant).
    #[error("invalid client credentials")]
    InvalidClient,

    /// Account exists but is suspended or its secret has expired.
    #[error("access denied: {reason}")]
    AccessDenied { reason: String },

    /// Unknown user or bad password (password grant).
    #[error("invalid credentials")]
    InvalidCredentials,

    /// Too many consecutive failures; retry after `locked_until`.
    #[error("account locked until {locked_until}")]
    AccountLocked { locked_until: DateTime<Utc> },

    /// No usable signing key is currently loaded.
    #[error("signing key unavailable: {0}")]
    KeyUnavailable(String),

    #[error("account store error: {0}")]
    Store(#[from] sled::Error),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl AuthError {
    /// RFC 6749 §5.2 error code for token-endpoint responses.
    pub fn oauth_error_code(&self) -> &'static str {
        match self {
            AuthError::InvalidClient | AuthError::InvalidCredentials => "invalid_client",
            AuthError::AccessDenied { .. } => "access_denied",
            AuthError::AccountLocked { .. } => "access_denied",
            AuthError::InvalidToken | AuthError::TokenExpired | AuthError::WrongTokenType { .. } => {
                "invalid_grant"
            }
            _ => "server_error",
        }
    }
}
