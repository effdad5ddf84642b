//! API request/response models for accounts and authentication.

use crate::db::models::accounts::{Account, CredentialRecord};
use crate::types::AccountId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Role determines which parts of the platform an account can reach.
/// Stored as TEXT in postgres, uppercase on the wire and in the database.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, sqlx::Type, PartialEq, Eq, ToSchema)]
#[sqlx(type_name = "TEXT", rename_all = "UPPERCASE")]
#[serde(rename_all = "UPPERCASE")]
pub enum Role {
    Admin,
    Teacher,
}

/// How the account authenticates. Native accounts carry a password hash,
/// SSO accounts never do, the system account is for seeding only.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, sqlx::Type, PartialEq, Eq, ToSchema)]
#[sqlx(type_name = "TEXT", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum AuthSource {
    Native,
    Sso,
    System,
}

// Authentication request models

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct SsoExchangeRequest {
    /// Token minted by the trusted identity provider.
    pub token: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct PasswordChangeRequest {
    pub current_password: String,
    pub new_password: String,
}

// Authentication response models

/// Response after successful login or SSO exchange
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct AuthResponse {
    /// The authenticated identity payload
    pub account: CurrentUser,
    /// Session token, also set as the session cookie
    pub token: String,
    /// Success message
    pub message: String,
}

/// Generic success response
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct AuthSuccessResponse {
    pub message: String,
}

/// Pre-login capability probe for the login page.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct LoginInfo {
    pub password_login_enabled: bool,
    pub sso_enabled: bool,
    pub password_min_length: usize,
    pub password_max_length: usize,
}

/// Response models that implement IntoResponse for cleaner handler code
use axum::{
    Json,
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
};

/// Structured response for successful login or SSO exchange
pub struct LoginResponse {
    pub auth_response: AuthResponse,
    pub cookie: String,
}

impl IntoResponse for LoginResponse {
    fn into_response(self) -> Response {
        let mut headers = HeaderMap::new();
        headers.insert(header::SET_COOKIE, self.cookie.parse().unwrap());
        (StatusCode::OK, headers, Json(self.auth_response)).into_response()
    }
}

/// Structured response for successful logout
pub struct LogoutResponse {
    pub auth_response: AuthSuccessResponse,
    pub cookie: String,
}

impl IntoResponse for LogoutResponse {
    fn into_response(self) -> Response {
        let mut headers = HeaderMap::new();
        headers.insert(header::SET_COOKIE, self.cookie.parse().unwrap());
        (StatusCode::OK, headers, Json(self.auth_response)).into_response()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct AccountResponse {
    #[schema(value_type = String, format = "uuid")]
    pub id: AccountId,
    pub username: String,
    pub role: Role,
    pub full_name: String,
    pub email: Option<String>,
    pub phone_number: Option<String>,
    pub is_blocked: bool,
    pub is_disabled: bool,
    pub auth_source: AuthSource,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<Account> for AccountResponse {
    fn from(db: Account) -> Self {
        Self {
            id: db.id,
            username: db.username,
            role: db.role,
            full_name: db.full_name,
            email: db.email,
            phone_number: db.phone_number,
            is_blocked: db.is_blocked,
            is_disabled: db.is_disabled,
            auth_source: db.auth_source,
            created_at: db.created_at,
            updated_at: db.updated_at,
        }
    }
}

/// The authenticated principal attached to a request after the session gate.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CurrentUser {
    #[schema(value_type = String, format = "uuid")]
    pub id: AccountId,
    pub username: String,
    pub role: Role,
    pub full_name: String,
    pub email: Option<String>,
    pub phone_number: Option<String>,
}

impl CurrentUser {
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

impl From<CredentialRecord> for CurrentUser {
    fn from(record: CredentialRecord) -> Self {
        Self {
            id: record.id,
            username: record.username,
            role: record.role,
            full_name: record.full_name,
            email: record.email,
            phone_number: record.phone_number,
        }
    }
}

impl From<Account> for CurrentUser {
    fn from(db: Account) -> Self {
        Self {
            id: db.id,
            username: db.username,
            role: db.role,
            full_name: db.full_name,
            email: db.email,
            phone_number: db.phone_number,
        }
    }
}
