use crate::db::errors::DbError;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error as ThisError;

#[derive(ThisError, Debug)]
pub enum Error {
    /// Wrong username or password. Deliberately indistinguishable between
    /// "no such account" and "wrong password".
    #[error("Invalid username or password")]
    InvalidCredentials,

    /// Account blocked by the lockout mechanism or an administrator
    #[error("Account is blocked")]
    AccountBlocked,

    /// Account disabled by an administrator
    #[error("Account is disabled")]
    AccountDisabled,

    /// A session or SSO token was presented but failed verification
    #[error("Invalid or expired token")]
    InvalidToken,

    /// A protected route was hit with no token at all
    #[error("Authentication required")]
    MissingToken,

    /// SSO token exchange failed for a reason other than the account state
    #[error("SSO token exchange failed")]
    SsoExchangeFailed,

    /// Caller is authenticated but the role does not allow the operation
    #[error("Insufficient permissions for {resource}")]
    InsufficientPermissions { resource: String },

    /// Invalid request data or business rule violation
    #[error("{message}")]
    BadRequest { message: String },

    /// Requested resource not found
    #[error("{resource} with ID {id} not found")]
    NotFound { resource: String, id: String },

    /// Conflict error, e.g., for unique constraint violations
    #[error("Conflict: {message}")]
    Conflict { message: String },

    /// Generic internal service error
    #[error("Failed to {operation}")]
    Internal { operation: String },

    /// Database operation error
    #[error(transparent)]
    Database(#[from] DbError),

    /// Unexpected error with full context chain
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl Error {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Error::InvalidCredentials | Error::InvalidToken | Error::MissingToken | Error::SsoExchangeFailed => {
                StatusCode::UNAUTHORIZED
            }
            Error::AccountBlocked | Error::AccountDisabled | Error::InsufficientPermissions { .. } => {
                StatusCode::FORBIDDEN
            }
            Error::BadRequest { .. } => StatusCode::BAD_REQUEST,
            Error::NotFound { .. } => StatusCode::NOT_FOUND,
            Error::Conflict { .. } => StatusCode::CONFLICT,
            Error::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            Error::Database(db_err) => match db_err {
                DbError::NotFound => StatusCode::NOT_FOUND,
                DbError::UniqueViolation { .. } => StatusCode::CONFLICT,
                DbError::Timeout | DbError::Other(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
            Error::Other(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Machine-readable reason code so clients can branch without parsing
    /// the human message.
    pub fn reason(&self) -> &'static str {
        match self {
            Error::InvalidCredentials => "invalid_credentials",
            Error::AccountBlocked => "account_blocked",
            Error::AccountDisabled => "account_disabled",
            Error::InvalidToken => "invalid_token",
            Error::MissingToken => "missing_token",
            Error::SsoExchangeFailed => "sso_exchange_failed",
            Error::InsufficientPermissions { .. } => "insufficient_permissions",
            Error::BadRequest { .. } => "bad_request",
            Error::NotFound { .. } => "not_found",
            Error::Conflict { .. } => "conflict",
            Error::Internal { .. } | Error::Other(_) => "internal_error",
            Error::Database(db_err) => match db_err {
                DbError::NotFound => "not_found",
                DbError::UniqueViolation { .. } => "conflict",
                DbError::Timeout | DbError::Other(_) => "internal_error",
            },
        }
    }

    /// Returns a user-safe error message, without leaking internal implementation details
    pub fn user_message(&self) -> String {
        match self {
            Error::InvalidCredentials => "Invalid username or password".to_string(),
            Error::AccountBlocked => "Account is blocked. Contact an administrator.".to_string(),
            Error::AccountDisabled => "Account is disabled. Contact an administrator.".to_string(),
            Error::InvalidToken => "Invalid or expired token".to_string(),
            Error::MissingToken => "Authentication required".to_string(),
            Error::SsoExchangeFailed => "SSO token exchange failed".to_string(),
            Error::InsufficientPermissions { resource } => {
                format!("Insufficient permissions for {resource}")
            }
            Error::BadRequest { message } => message.clone(),
            Error::NotFound { resource, id } => {
                format!("{resource} with ID {id} not found")
            }
            Error::Conflict { message } => message.clone(),
            Error::Internal { .. } => "Internal server error".to_string(),
            Error::Database(db_err) => match db_err {
                DbError::NotFound => "Resource not found".to_string(),
                DbError::UniqueViolation { constraint, table, .. } => {
                    match (table.as_deref(), constraint.as_deref()) {
                        (Some("accounts"), Some(c)) if c.contains("username") => {
                            "This username is already taken".to_string()
                        }
                        _ => "Resource already exists".to_string(),
                    }
                }
                DbError::Timeout | DbError::Other(_) => "Database error occurred".to_string(),
            },
            Error::Other(_) => "Internal server error".to_string(),
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        // Log full error details for debugging - different log levels based on severity
        match &self {
            Error::Database(DbError::Other(_)) | Error::Database(DbError::Timeout) | Error::Internal { .. } | Error::Other(_) => {
                tracing::error!("Internal service error: {:#}", self);
            }
            Error::Database(_) | Error::Conflict { .. } => {
                tracing::warn!("Conflict error: {}", self);
            }
            Error::InvalidCredentials
            | Error::AccountBlocked
            | Error::AccountDisabled
            | Error::InvalidToken
            | Error::MissingToken
            | Error::SsoExchangeFailed
            | Error::InsufficientPermissions { .. } => {
                tracing::info!("Authorization error: {}", self);
            }
            Error::BadRequest { .. } | Error::NotFound { .. } => {
                tracing::debug!("Client error: {}", self);
            }
        }

        let status = self.status_code();
        let body = serde_json::json!({
            "message": self.user_message(),
            "reason": self.reason(),
        });

        (status, axum::response::Json(body)).into_response()
    }
}

/// Convert from String errors (e.g., from external functions)
impl From<String> for Error {
    fn from(msg: String) -> Self {
        Error::Internal { operation: msg }
    }
}

/// Type alias for service operation results
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(Error::InvalidCredentials.status_code(), StatusCode::UNAUTHORIZED);
        assert_eq!(Error::MissingToken.status_code(), StatusCode::UNAUTHORIZED);
        assert_eq!(Error::InvalidToken.status_code(), StatusCode::UNAUTHORIZED);
        assert_eq!(Error::SsoExchangeFailed.status_code(), StatusCode::UNAUTHORIZED);
        assert_eq!(Error::AccountBlocked.status_code(), StatusCode::FORBIDDEN);
        assert_eq!(Error::AccountDisabled.status_code(), StatusCode::FORBIDDEN);
        assert_eq!(Error::Database(DbError::Timeout).status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_invalid_credentials_does_not_leak_account_existence() {
        // Both "no such user" and "wrong password" collapse to the same variant,
        // so the message and reason are identical by construction.
        let err = Error::InvalidCredentials;
        assert_eq!(err.reason(), "invalid_credentials");
        assert_eq!(err.user_message(), "Invalid username or password");
    }

    #[test]
    fn test_internal_errors_are_opaque() {
        let err = Error::Internal {
            operation: "verify password hash for account 1234".to_string(),
        };
        assert!(!err.user_message().contains("1234"));
        assert_eq!(err.reason(), "internal_error");
    }
}
