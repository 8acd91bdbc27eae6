//! RS256 token issuance and validation.

use chrono::Utc;
use filegrid_core::TokenConfig;
use jsonwebtoken::{Algorithm, Header, Validation};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

use crate::errors::AuthError;
use crate::keys::KeyManager;

/// Kind of token, embedded in the `type` claim.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenType {
    Access,
    Refresh,
    ServiceAccount,
    AdminUser,
}

impl TokenType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TokenType::Access => "access",
            TokenType::Refresh => "refresh",
            TokenType::ServiceAccount => "service_account",
            TokenType::AdminUser => "admin_user",
        }
    }
}

/// JWT claims carried by filegrid tokens. Refresh tokens carry only the
/// subject and type; context claims are omitted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    #[serde(rename = "type")]
    pub token_type: TokenType,
    pub iat: i64,
    pub exp: i64,
    pub iss: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
}

/// Access + refresh token pair returned by the token endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: String,
    pub expires_in: i64,
    pub issued_at: chrono::DateTime<Utc>,
}

/// Issues and validates RS256 tokens against the key manager's key set.
pub struct TokenService {
    keys: Arc<KeyManager>,
    config: TokenConfig,
}

impl TokenService {
    pub fn new(keys: Arc<KeyManager>, config: TokenConfig) -> Self {
        Self { keys, config }
    }

    /// Mint a single token of `token_type` with lifetime `ttl_secs`.
    fn issue(
        &self,
        sub: &str,
        token_type: TokenType,
        ttl_secs: i64,
        username: Option<String>,
        role: Option<String>,
    ) -> Result<String, AuthError> {
        let now = Utc::now();
        let claims = Claims {
            sub: sub.to_string(),
            token_type,
            iat: now.timestamp(),
            exp: now.timestamp() + ttl_secs,
            iss: self.config.issuer.clone(),
            username,
            role,
        };
        let (version, encoding) = self.keys.current_signing_key()?;
        let mut header = Header::new(Algorithm::RS256);
        header.kid = Some(version.to_string());
        jsonwebtoken::encode(&header, &claims, &encoding)
            .map_err(|err| AuthError::Internal(anyhow::anyhow!("token encoding failed: {err}")))
    }

    /// Mint the access/refresh pair handed out by the token endpoint.
    /// `access_type` distinguishes plain access tokens from the
    /// service-account and admin-user grants.
    pub fn issue_pair_as(
        &self,
        sub: &str,
        access_type: TokenType,
        username: Option<String>,
        role: Option<String>,
    ) -> Result<TokenPair, AuthError> {
        let access = self.issue(sub, access_type, self.config.access_ttl_secs, username, role)?;
        let refresh = self.issue(sub, TokenType::Refresh, self.config.refresh_ttl_secs, None, None)?;
        Ok(TokenPair {
            access_token: access,
            refresh_token: refresh,
            token_type: "Bearer".into(),
            expires_in: self.config.access_ttl_secs,
            issued_at: Utc::now(),
        })
    }

    /// Validate `token` against every currently active public key.
    ///
    /// The `kid` header narrows the search when present; a token signed by a
    /// superseded (but unexpired) key still verifies. Failures are typed:
    /// expired, wrong type, or plain invalid.
    pub fn validate(&self, token: &str, expected: Option<TokenType>) -> Result<Claims, AuthError> {
        let header = jsonwebtoken::decode_header(token).map_err(|_| AuthError::InvalidToken)?;
        let kid = header.kid.as_deref();

        let mut validation = Validation::new(Algorithm::RS256);
        validation.leeway = self.config.clock_skew_secs;
        validation.set_issuer(&[&self.config.issuer]);

        let keys = self.keys.active_public_keys();
        if keys.is_empty() {
            return Err(AuthError::KeyUnavailable("no verification keys loaded".into()));
        }

        // Prefer the key named by the kid hint, then fall back to the rest.
        let ordered = keys
            .iter()
            .filter(|(version, _)| Some(version.to_string().as_str()) == kid)
            .chain(keys.iter().filter(|(version, _)| Some(version.to_string().as_str()) != kid));

        let mut last_error = AuthError::InvalidToken;
        for (version, decoding) in ordered {
            match jsonwebtoken::decode::<Claims>(token, decoding, &validation) {
                Ok(data) => {
                    let claims = data.claims;
                    if let Some(expected) = expected {
                        if claims.token_type != expected {
                            return Err(AuthError::WrongTokenType {
                                expected: expected.as_str().into(),
                                actual: claims.token_type.as_str().into(),
                            });
                        }
                    }
                    debug!(%version, sub = %claims.sub, "token validated");
                    return Ok(claims);
                }
                Err(err) => {
                    use jsonwebtoken::errors::ErrorKind;
                    last_error = match err.kind() {
                        ErrorKind::ExpiredSignature => AuthError::TokenExpired,
                        _ => AuthError::InvalidToken,
                    };
                    // An expired signature is conclusive: the signature
                    // verified, the token is simply old.
                    if matches!(last_error, AuthError::TokenExpired) {
                        return Err(last_error);
                    }
                }
            }
        }
        Err(last_error)
    }

    /// Mint a plain access/refresh pair.
    pub fn issue_pair(
        &self,
        sub: &str,
        username: Option<String>,
        role: Option<String>,
    ) -> Result<TokenPair, AuthError> {
        self.issue_pair_as(sub, TokenType::Access, username, role)
    }

    /// Exchange a valid refresh token for a fresh access token.
    pub fn refresh_access(&self, refresh_token: &str) -> Result<TokenPair, AuthError> {
        let claims = self.validate(refresh_token, Some(TokenType::Refresh))?;
        self.issue_pair(&claims.sub, None, None)
    }

    pub fn access_ttl_secs(&self) -> i64 {
        self.config.access_ttl_secs
    }
}
