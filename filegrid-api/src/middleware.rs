//! Bearer-token authentication middleware.

use axum::extract::{Request, State};
use axum::http::header;
use axum::middleware::Next;
use axum::response::Response;
use filegrid_security::{AuthError, TokenType};

use crate::errors::ApiError;
use crate::AppState;

/// Authenticated caller context attached to the request.
#[derive(Debug, Clone)]
pub struct AuthContext {
    pub subject: String,
    pub username: Option<String>,
    pub role: Option<String>,
    pub token_type: TokenType,
}

impl AuthContext {
    /// Display name used for attribution (uploader, audit actor).
    pub fn display_name(&self) -> String {
        self.username.clone().unwrap_or_else(|| self.subject.clone())
    }

    pub fn is_service_account(&self) -> bool {
        self.token_type == TokenType::ServiceAccount
    }
}

/// Validate the bearer token and attach [`AuthContext`]. Refresh tokens are
/// not bearer credentials and are rejected here.
pub async fn require_bearer(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let token = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .ok_or(ApiError::Auth(AuthError::InvalidToken))?;

    let claims = state.tokens.validate(token, None)?;
    if claims.token_type == TokenType::Refresh {
        return Err(ApiError::Auth(AuthError::WrongTokenType {
            expected: "access".into(),
            actual: "refresh".into(),
        }));
    }

    request.extensions_mut().insert(AuthContext {
        subject: claims.sub,
        username: claims.username,
        role: claims.role,
        token_type: claims.token_type,
    });
    Ok(next.run(request).await)
}
