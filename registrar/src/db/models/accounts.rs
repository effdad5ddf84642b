//! Database row models for accounts.

use crate::api::models::accounts::{AuthSource, Role};
use crate::types::AccountId;
use chrono::{DateTime, Utc};
use sqlx::FromRow;

/// Full account row as stored in Postgres.
#[derive(Debug, Clone, FromRow)]
pub struct Account {
    pub id: AccountId,
    pub username: String,
    /// Absent for accounts provisioned through SSO.
    pub password_hash: Option<String>,
    pub role: Role,
    pub full_name: String,
    pub email: Option<String>,
    pub phone_number: Option<String>,
    pub is_blocked: bool,
    pub is_disabled: bool,
    pub failed_login_attempts: i32,
    pub auth_source: AuthSource,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Narrow projection used on the hot login path. Fetched in a single query so
/// the lockout decision and the hash verification see the same snapshot.
#[derive(Debug, Clone, FromRow)]
pub struct CredentialRecord {
    pub id: AccountId,
    pub username: String,
    pub password_hash: Option<String>,
    pub role: Role,
    pub full_name: String,
    pub email: Option<String>,
    pub phone_number: Option<String>,
    pub is_blocked: bool,
    pub is_disabled: bool,
    pub failed_login_attempts: i32,
}

/// Request to create a new account in the database
#[derive(Debug, Clone)]
pub struct AccountCreateDBRequest {
    pub username: String,
    pub password_hash: Option<String>,
    pub role: Role,
    pub full_name: String,
    pub email: Option<String>,
    pub phone_number: Option<String>,
    pub auth_source: AuthSource,
}

/// Request to update an existing account. `None` fields are left untouched.
#[derive(Debug, Clone, Default)]
pub struct AccountUpdateDBRequest {
    pub id: AccountId,
    pub password_hash: Option<String>,
    pub full_name: Option<String>,
    pub email: Option<String>,
    pub phone_number: Option<String>,
}
