//! Service accounts and admin users.
//!
//! Service accounts authenticate machine-to-machine via the client
//! credentials grant: bcrypt-hashed secrets, an active/suspended status, and
//! an optional secret expiry. Admin users authenticate with username and
//! password under a lockout policy: five consecutive failures lock the
//! account for fifteen minutes, and a successful login resets the counter.

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use filegrid_core::LockoutConfig;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

use crate::errors::AuthError;

const SERVICE_ACCOUNTS_TREE: &str = "service_accounts";
const ADMIN_USERS_TREE: &str = "admin_users";

/// Lifecycle status of a service account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AccountStatus {
    Active,
    Suspended,
}

/// Machine credential for the client-credentials grant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceAccount {
    pub client_id: String,
    /// bcrypt hash of the client secret.
    pub secret_hash: String,
    pub status: AccountStatus,
    pub secret_expires_at: Option<DateTime<Utc>>,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Human administrator credential for the password grant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdminUser {
    pub username: String,
    /// bcrypt hash of the password.
    pub password_hash: String,
    pub role: String,
    pub failed_attempts: u32,
    pub locked_until: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub last_login_at: Option<DateTime<Utc>>,
}

/// sled-backed store for both credential kinds.
pub struct AccountStore {
    service_accounts: sled::Tree,
    admin_users: sled::Tree,
    lockout: LockoutConfig,
    /// Per-username locks serializing lockout-counter updates.
    row_locks: DashMap<String, Arc<tokio::sync::Mutex<()>>>,
    bcrypt_cost: u32,
}

impl AccountStore {
    pub fn open(db: &sled::Db, lockout: LockoutConfig) -> Result<Self, AuthError> {
        Ok(Self {
            service_accounts: db.open_tree(SERVICE_ACCOUNTS_TREE)?,
            admin_users: db.open_tree(ADMIN_USERS_TREE)?,
            lockout,
            row_locks: DashMap::new(),
            bcrypt_cost: bcrypt::DEFAULT_COST,
        })
    }

    /// Lower the bcrypt cost; test fixtures only.
    pub fn with_bcrypt_cost(mut self, cost: u32) -> Self {
        self.bcrypt_cost = cost;
        self
    }

    pub fn create_service_account(
        &self,
        client_id: &str,
        client_secret: &str,
        secret_expires_at: Option<DateTime<Utc>>,
    ) -> Result<ServiceAccount, AuthError> {
        let account = ServiceAccount {
            client_id: client_id.to_string(),
            secret_hash: bcrypt::hash(client_secret, self.bcrypt_cost)
                .map_err(|err| AuthError::Internal(anyhow::anyhow!("bcrypt failure: {err}")))?,
            status: AccountStatus::Active,
            secret_expires_at,
            description: None,
            created_at: Utc::now(),
        };
        self.put_service_account(&account)?;
        info!(client_id, "service account created");
        Ok(account)
    }

    pub fn create_admin_user(
        &self,
        username: &str,
        password: &str,
        role: &str,
    ) -> Result<AdminUser, AuthError> {
        let user = AdminUser {
            username: username.to_string(),
            password_hash: bcrypt::hash(password, self.bcrypt_cost)
                .map_err(|err| AuthError::Internal(anyhow::anyhow!("bcrypt failure: {err}")))?,
            role: role.to_string(),
            failed_attempts: 0,
            locked_until: None,
            created_at: Utc::now(),
            last_login_at: None,
        };
        self.put_admin_user(&user)?;
        info!(username, role, "admin user created");
        Ok(user)
    }

    pub fn get_service_account(&self, client_id: &str) -> Result<Option<ServiceAccount>, AuthError> {
        Ok(self
            .service_accounts
            .get(client_id.as_bytes())?
            .and_then(|raw| serde_json::from_slice(&raw).ok()))
    }

    pub fn set_service_account_status(
        &self,
        client_id: &str,
        status: AccountStatus,
    ) -> Result<(), AuthError> {
        let mut account = self
            .get_service_account(client_id)?
            .ok_or(AuthError::InvalidClient)?;
        account.status = status;
        self.put_service_account(&account)
    }

    /// Client-credentials verification.
    pub fn verify_client_credentials(
        &self,
        client_id: &str,
        client_secret: &str,
    ) -> Result<ServiceAccount, AuthError> {
        let account = self
            .get_service_account(client_id)?
            .ok_or(AuthError::InvalidClient)?;

        let matches = bcrypt::verify(client_secret, &account.secret_hash)
            .map_err(|err| AuthError::Internal(anyhow::anyhow!("bcrypt failure: {err}")))?;
        if !matches {
            warn!(client_id, "client secret mismatch");
            return Err(AuthError::InvalidClient);
        }
        if account.status != AccountStatus::Active {
            return Err(AuthError::AccessDenied {
                reason: "service account suspended".into(),
            });
        }
        if let Some(expires_at) = account.secret_expires_at {
            if expires_at <= Utc::now() {
                return Err(AuthError::AccessDenied {
                    reason: "client secret expired".into(),
                });
            }
        }
        Ok(account)
    }

    /// Password verification with lockout bookkeeping. The counter update and
    /// the verification run under a per-user lock so concurrent attempts
    /// cannot skip the threshold.
    pub async fn verify_password(
        &self,
        username: &str,
        password: &str,
    ) -> Result<AdminUser, AuthError> {
        let row_lock = self
            .row_locks
            .entry(username.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone();
        let _guard = row_lock.lock().await;

        let mut user = self
            .get_admin_user(username)?
            .ok_or(AuthError::InvalidCredentials)?;
        let now = Utc::now();

        if let Some(locked_until) = user.locked_until {
            if locked_until > now {
                return Err(AuthError::AccountLocked { locked_until });
            }
            // Lock elapsed; the window restarts.
            user.locked_until = None;
            user.failed_attempts = 0;
        }

        let matches = bcrypt::verify(password, &user.password_hash)
            .map_err(|err| AuthError::Internal(anyhow::anyhow!("bcrypt failure: {err}")))?;

        if !matches {
            user.failed_attempts += 1;
            if user.failed_attempts >= self.lockout.threshold {
                let locked_until = now + Duration::minutes(self.lockout.duration_minutes);
                user.locked_until = Some(locked_until);
                warn!(username, %locked_until, "admin account locked after repeated failures");
            }
            self.put_admin_user(&user)?;
            return Err(AuthError::InvalidCredentials);
        }

        user.failed_attempts = 0;
        user.locked_until = None;
        user.last_login_at = Some(now);
        self.put_admin_user(&user)?;
        Ok(user)
    }

    pub fn get_admin_user(&self, username: &str) -> Result<Option<AdminUser>, AuthError> {
        Ok(self
            .admin_users
            .get(username.as_bytes())?
            .and_then(|raw| serde_json::from_slice(&raw).ok()))
    }

    fn put_service_account(&self, account: &ServiceAccount) -> Result<(), AuthError> {
        let raw = serde_json::to_vec(account)
            .map_err(|err| AuthError::Internal(anyhow::anyhow!("serialize failure: {err}")))?;
        self.service_accounts.insert(account.client_id.as_bytes(), raw)?;
        Ok(())
    }

    fn put_admin_user(&self, user: &AdminUser) -> Result<(), AuthError> {
        let raw = serde_json::to_vec(user)
            .map_err(|err| AuthError::Internal(anyhow::anyhow!("serialize failure: {err}")))?;
        self.admin_users.insert(user.username.as_bytes(), raw)?;
        Ok(())
    }
}
