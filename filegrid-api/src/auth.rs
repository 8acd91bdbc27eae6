//! OAuth 2.0 token endpoint.
//!
//! `POST /api/v1/auth/token` serves three grants: `client_credentials`
//! (service accounts, the default), `password` (admin users, with lockout),
//! and `refresh_token`. Failures follow RFC 6749 §5.2: a JSON error body,
//! `WWW-Authenticate: Bearer error="…"`, and `Cache-Control: no-store` on
//! every response.

use axum::extract::State;
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use tracing::{info, warn};

use filegrid_security::{AuthError, TokenPair, TokenType};

use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct TokenRequest {
    #[serde(default)]
    pub grant_type: Option<String>,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub refresh_token: Option<String>,
}

pub async fn token(State(state): State<AppState>, Json(request): Json<TokenRequest>) -> Response {
    let grant_type = request.grant_type.as_deref().unwrap_or("client_credentials");
    let outcome = match grant_type {
        "client_credentials" => client_credentials(&state, &request).await,
        "password" => password(&state, &request).await,
        "refresh_token" => refresh(&state, &request),
        other => {
            warn!(grant_type = other, "unsupported grant type");
            return oauth_error(
                StatusCode::BAD_REQUEST,
                "unsupported_grant_type",
                &format!("grant type {other:?} is not supported"),
            );
        }
    };

    match outcome {
        Ok(pair) => {
            let mut response = (StatusCode::OK, Json(pair)).into_response();
            no_store(response.headers_mut());
            response
        }
        Err(err) => auth_failure(err),
    }
}

async fn client_credentials(state: &AppState, request: &TokenRequest) -> Result<TokenPair, AuthError> {
    let (Some(client_id), Some(client_secret)) =
        (request.client_id.as_deref(), request.client_secret.as_deref())
    else {
        return Err(AuthError::InvalidClient);
    };
    let account = state.accounts.verify_client_credentials(client_id, client_secret)?;
    info!(client_id, "client credentials grant succeeded");
    state.tokens.issue_pair_as(
        &account.client_id,
        TokenType::ServiceAccount,
        Some(account.client_id.clone()),
        Some("service_account".into()),
    )
}

async fn password(state: &AppState, request: &TokenRequest) -> Result<TokenPair, AuthError> {
    let (Some(username), Some(password)) =
        (request.username.as_deref(), request.password.as_deref())
    else {
        return Err(AuthError::InvalidCredentials);
    };
    let user = state.accounts.verify_password(username, password).await?;
    info!(username, "password grant succeeded");
    state.tokens.issue_pair_as(
        &user.username,
        TokenType::AdminUser,
        Some(user.username.clone()),
        Some(user.role.clone()),
    )
}

fn refresh(state: &AppState, request: &TokenRequest) -> Result<TokenPair, AuthError> {
    let refresh_token = request
        .refresh_token
        .as_deref()
        .ok_or(AuthError::InvalidToken)?;
    state.tokens.refresh_access(refresh_token)
}

fn auth_failure(err: AuthError) -> Response {
    let (status, code) = match &err {
        AuthError::InvalidClient | AuthError::InvalidCredentials => {
            (StatusCode::UNAUTHORIZED, "invalid_client")
        }
        AuthError::AccessDenied { .. } => (StatusCode::FORBIDDEN, "access_denied"),
        AuthError::AccountLocked { .. } => (StatusCode::LOCKED, "access_denied"),
        AuthError::InvalidToken | AuthError::TokenExpired | AuthError::WrongTokenType { .. } => {
            (StatusCode::UNAUTHORIZED, "invalid_grant")
        }
        _ => (StatusCode::INTERNAL_SERVER_ERROR, "server_error"),
    };
    oauth_error(status, code, &err.to_string())
}

fn oauth_error(status: StatusCode, code: &str, description: &str) -> Response {
    let body = Json(serde_json::json!({
        "error": code,
        "error_description": description,
    }));
    let mut response = (status, body).into_response();
    let headers = response.headers_mut();
    no_store(headers);
    if let Ok(value) = format!("Bearer error=\"{code}\"").parse() {
        headers.insert(header::WWW_AUTHENTICATE, value);
    }
    response
}

fn no_store(headers: &mut HeaderMap) {
    headers.insert(header::CACHE_CONTROL, "no-store".parse().expect("static header"));
    headers.insert(header::PRAGMA, "no-cache".parse().expect("static header"));
}
