//! Domain error → HTTP translation.
//!
//! The single place where error kinds become status codes. Services return
//! typed errors; handlers wrap them in [`ApiError`] and axum renders the
//! JSON body `{ "error": <kind>, "message": <text> }`.

use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;

use filegrid_admin::AdminError;
use filegrid_ingester::IngestError;
use filegrid_query::QueryError;
use filegrid_security::AuthError;
use filegrid_storage::StorageError;

#[derive(Debug)]
pub enum ApiError {
    Auth(AuthError),
    Ingest(IngestError),
    Query(QueryError),
    Storage(StorageError),
    Admin(AdminError),
    BadRequest(String),
}

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        ApiError::Auth(err)
    }
}

impl From<IngestError> for ApiError {
    fn from(err: IngestError) -> Self {
        match err {
            IngestError::Storage(inner) => ApiError::Storage(inner),
            IngestError::Admin(inner) => ApiError::Admin(inner),
            other => ApiError::Ingest(other),
        }
    }
}

impl From<QueryError> for ApiError {
    fn from(err: QueryError) -> Self {
        match err {
            QueryError::Storage(inner) => ApiError::Storage(inner),
            QueryError::Admin(inner) => ApiError::Admin(inner),
            other => ApiError::Query(other),
        }
    }
}

impl From<StorageError> for ApiError {
    fn from(err: StorageError) -> Self {
        ApiError::Storage(err)
    }
}

impl From<AdminError> for ApiError {
    fn from(err: AdminError) -> Self {
        ApiError::Admin(err)
    }
}

impl ApiError {
    /// `(status, kind, message, extra header)` for the response.
    fn parts(&self) -> (StatusCode, &'static str, String, Option<(header::HeaderName, String)>) {
        match self {
            ApiError::Auth(err) => {
                let (status, kind) = match err {
                    AuthError::InvalidToken | AuthError::WrongTokenType { .. } => {
                        (StatusCode::UNAUTHORIZED, "invalid_token")
                    }
                    AuthError::TokenExpired => (StatusCode::UNAUTHORIZED, "token_expired"),
                    AuthError::InvalidClient | AuthError::InvalidCredentials => {
                        (StatusCode::UNAUTHORIZED, "invalid_credentials")
                    }
                    AuthError::AccountLocked { .. } => (StatusCode::LOCKED, "account_locked"),
                    AuthError::AccessDenied { .. } => {
                        (StatusCode::FORBIDDEN, "insufficient_permissions")
                    }
                    AuthError::KeyUnavailable(_)
                    | AuthError::Store(_)
                    | AuthError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal"),
                };
                (status, kind, err.to_string(), None)
            }
            ApiError::Ingest(err) => {
                let (status, kind) = match err {
                    IngestError::NoAvailableStorage => {
                        (StatusCode::SERVICE_UNAVAILABLE, "no_available_storage")
                    }
                    IngestError::FileTooLarge { .. } => {
                        (StatusCode::PAYLOAD_TOO_LARGE, "file_too_large")
                    }
                    IngestError::ChecksumMismatch { .. } => {
                        (StatusCode::INTERNAL_SERVER_ERROR, "checksum_mismatch")
                    }
                    IngestError::ElementUnavailable(_) => {
                        (StatusCode::SERVICE_UNAVAILABLE, "element_unavailable")
                    }
                    IngestError::TransactionNotFound(_) => {
                        (StatusCode::NOT_FOUND, "transaction_not_found")
                    }
                    IngestError::Compression(_) => (StatusCode::BAD_REQUEST, "invalid_request"),
                    IngestError::Storage(_) | IngestError::Admin(_) | IngestError::Internal(_) => {
                        (StatusCode::INTERNAL_SERVER_ERROR, "internal")
                    }
                };
                (status, kind, err.to_string(), None)
            }
            ApiError::Query(err) => match err {
                QueryError::FileNotFound(_) => {
                    (StatusCode::NOT_FOUND, "file_not_found", err.to_string(), None)
                }
                QueryError::ModeForbidden(_) => {
                    (StatusCode::BAD_REQUEST, "mode_forbidden", err.to_string(), None)
                }
                QueryError::RangeNotSatisfiable { total } => (
                    StatusCode::RANGE_NOT_SATISFIABLE,
                    "range_not_satisfiable",
                    err.to_string(),
                    Some((header::CONTENT_RANGE, format!("bytes */{total}"))),
                ),
                QueryError::ElementUnavailable(_) => (
                    StatusCode::SERVICE_UNAVAILABLE,
                    "element_unavailable",
                    err.to_string(),
                    None,
                ),
                QueryError::Storage(_) | QueryError::Admin(_) | QueryError::Internal(_) => (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal",
                    err.to_string(),
                    None,
                ),
            },
            ApiError::Storage(err) => {
                let (status, kind) = match err {
                    StorageError::ModeForbidden { .. } => (StatusCode::BAD_REQUEST, "mode_forbidden"),
                    StorageError::InvalidTransition { .. } => {
                        (StatusCode::BAD_REQUEST, "invalid_transition")
                    }
                    StorageError::InsufficientSpace { .. } => {
                        (StatusCode::INSUFFICIENT_STORAGE, "insufficient_space")
                    }
                    StorageError::FileTooLarge { .. } => {
                        (StatusCode::PAYLOAD_TOO_LARGE, "file_too_large")
                    }
                    StorageError::NotFound(_) => (StatusCode::NOT_FOUND, "file_not_found"),
                    StorageError::PathTraversal(_) | StorageError::InvalidFilename(_) => {
                        (StatusCode::BAD_REQUEST, "invalid_request")
                    }
                    StorageError::Corrupt(_)
                    | StorageError::Io(_)
                    | StorageError::Catalog(_)
                    | StorageError::Serde(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal"),
                };
                (status, kind, err.to_string(), None)
            }
            ApiError::Admin(err) => {
                let (status, kind) = match err {
                    AdminError::FileNotFound(_) | AdminError::FileDeleted(_) => {
                        (StatusCode::NOT_FOUND, "file_not_found")
                    }
                    AdminError::TransactionNotFound(_) => {
                        (StatusCode::NOT_FOUND, "transaction_not_found")
                    }
                    AdminError::NotTemporary(_)
                    | AdminError::AlreadyFinalized(_)
                    | AdminError::MissingTtl
                    | AdminError::FileExists(_)
                    | AdminError::TransactionTerminal(_) => {
                        (StatusCode::BAD_REQUEST, "invalid_request")
                    }
                    AdminError::ElementNotFound(_) => {
                        (StatusCode::SERVICE_UNAVAILABLE, "element_unavailable")
                    }
                    AdminError::Db(_) | AdminError::Serde(_) | AdminError::Internal(_) => {
                        (StatusCode::INTERNAL_SERVER_ERROR, "internal")
                    }
                };
                (status, kind, err.to_string(), None)
            }
            ApiError::BadRequest(message) => (
                StatusCode::BAD_REQUEST,
                "invalid_request",
                message.clone(),
                None,
            ),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, kind, message, extra_header) = self.parts();
        let body = Json(serde_json::json!({
            "error": kind,
            "message": message,
        }));
        let mut response = (status, body).into_response();
        if let Some((name, value)) = extra_header {
            if let Ok(value) = value.parse() {
                response.headers_mut().insert(name, value);
            }
        }
        response
    }
}
