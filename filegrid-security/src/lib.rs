//! # Filegrid Security
//!
//! Identity and token infrastructure for the platform:
//!
//! - **Key manager**: RSA-2048 signing keys persisted as PEM files, reloaded
//!   atomically on filesystem change, with an overlap window so tokens minted
//!   under a superseded key keep verifying.
//! - **Rotation job**: scheduled key rollover guarded by a distributed lock
//!   so replicas never double-rotate.
//! - **Token service**: RS256 access/refresh JWT issuance and validation with
//!   typed failure reasons and bounded clock skew.
//! - **Account store**: service accounts (client-credentials grant, bcrypt
//!   secrets) and admin users (password grant with lockout).

mod accounts;
mod errors;
mod keys;
mod rotation;
mod tokens;

pub use accounts::{AccountStatus, AccountStore, AdminUser, ServiceAccount};
pub use errors::AuthError;
pub use keys::{JwtKey, KeyManager};
pub use rotation::RotationJob;
pub use tokens::{Claims, TokenPair, TokenService, TokenType};
