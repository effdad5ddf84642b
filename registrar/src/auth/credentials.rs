//! Credential validation: the password login decision path.
//!
//! One row read drives the whole decision, so the lockout flags and the
//! stored hash come from the same snapshot. Unknown usernames and accounts
//! without a local password burn a verification against a dummy hash so the
//! response timing does not reveal whether the username exists.

use sqlx::PgPool;
use tracing::{debug, instrument, warn};

use crate::{
    api::models::accounts::CurrentUser,
    auth::{
        lockout::{self, LockoutCheck},
        password::{self, DUMMY_HASH},
    },
    config::Config,
    db::{errors::DbError, handlers::Accounts},
    errors::{Error, Result},
};

/// Verify a password off the async runtime. The result of the dummy-hash
/// path is always discarded by the caller.
async fn verify_blocking(password: String, hash: String) -> Result<bool> {
    tokio::task::spawn_blocking(move || password::verify_string(&password, &hash))
        .await
        .map_err(|e| Error::Internal {
            operation: format!("join password verification task: {e}"),
        })?
}

/// Authenticate a username/password pair against the credential store.
///
/// Returns the identity payload on success. Every failure mode maps to one
/// of the typed error kinds; store and hasher failures surface as internal
/// errors so authentication fails closed.
#[instrument(skip_all, fields(username = %username))]
pub async fn login(db: &PgPool, config: &Config, username: &str, password: &str) -> Result<CurrentUser> {
    if username.is_empty() || password.is_empty() {
        return Err(Error::BadRequest {
            message: "Username and password are required".to_string(),
        });
    }

    let mut conn = db.acquire().await.map_err(DbError::from)?;
    let record = Accounts::new(&mut conn).find_by_username(username).await?;

    let Some(record) = record else {
        // Unknown username: equalize timing, then fail generically
        let _ = verify_blocking(password.to_string(), DUMMY_HASH.to_string()).await;
        debug!("Login attempt for unknown username");
        return Err(Error::InvalidCredentials);
    };

    match lockout::check(record.is_disabled, record.is_blocked) {
        LockoutCheck::Disabled => return Err(Error::AccountDisabled),
        LockoutCheck::Blocked => return Err(Error::AccountBlocked),
        LockoutCheck::Proceed => {}
    }

    let Some(hash) = record.password_hash.clone() else {
        // SSO-provisioned account with no local password: same timing envelope
        let _ = verify_blocking(password.to_string(), DUMMY_HASH.to_string()).await;
        debug!("Password login attempt for account without a local password");
        return Err(Error::InvalidCredentials);
    };

    if verify_blocking(password.to_string(), hash).await? {
        Accounts::new(&mut conn).record_login_success(record.id).await?;
        Ok(CurrentUser::from(record))
    } else {
        let recorded = Accounts::new(&mut conn)
            .record_login_failure(record.id, config.auth.lockout_threshold)
            .await?;
        if let Some(recorded) = recorded {
            if recorded.is_blocked {
                warn!(
                    failed_login_attempts = recorded.failed_login_attempts,
                    "Account blocked after repeated failed logins"
                );
            }
        }
        // The attempt that trips the block still reports invalid credentials;
        // only the next attempt sees the blocked state.
        Err(Error::InvalidCredentials)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::models::accounts::Role;
    use crate::test_utils::{create_test_account, create_test_config, create_test_sso_account};
    use sqlx::PgPool;

    #[sqlx::test]
    #[test_log::test]
    async fn test_login_success(pool: PgPool) {
        let config = create_test_config();
        let account = create_test_account(&pool, "alice", "correct horse", Role::Teacher).await;

        let user = login(&pool, &config, "alice", "correct horse").await.unwrap();
        assert_eq!(user.id, account.id);
        assert_eq!(user.username, "alice");
        assert_eq!(user.role, Role::Teacher);
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_login_empty_fields_rejected(pool: PgPool) {
        let config = create_test_config();

        let err = login(&pool, &config, "", "password").await.unwrap_err();
        assert!(matches!(err, Error::BadRequest { .. }));

        let err = login(&pool, &config, "alice", "").await.unwrap_err();
        assert!(matches!(err, Error::BadRequest { .. }));
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_unknown_username_is_invalid_credentials(pool: PgPool) {
        let config = create_test_config();

        let err = login(&pool, &config, "nobody", "whatever").await.unwrap_err();
        assert!(matches!(err, Error::InvalidCredentials));
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_wrong_password_increments_counter(pool: PgPool) {
        let config = create_test_config();
        let account = create_test_account(&pool, "alice", "correct horse", Role::Teacher).await;

        let err = login(&pool, &config, "alice", "wrong").await.unwrap_err();
        assert!(matches!(err, Error::InvalidCredentials));

        let mut conn = pool.acquire().await.unwrap();
        let record = Accounts::new(&mut conn).find_by_username("alice").await.unwrap().unwrap();
        assert_eq!(record.id, account.id);
        assert_eq!(record.failed_login_attempts, 1);
        assert!(!record.is_blocked);
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_block_trips_at_threshold_with_off_by_one_reporting(pool: PgPool) {
        let config = create_test_config();
        create_test_account(&pool, "alice", "correct horse", Role::Teacher).await;

        // The tripping attempt itself still reports invalid credentials
        for _ in 0..config.auth.lockout_threshold {
            let err = login(&pool, &config, "alice", "wrong").await.unwrap_err();
            assert!(matches!(err, Error::InvalidCredentials));
        }

        // Only the next attempt sees the blocked state, even with the right password
        let err = login(&pool, &config, "alice", "correct horse").await.unwrap_err();
        assert!(matches!(err, Error::AccountBlocked));

        // Blocked rows are frozen: no further counter mutation
        let mut conn = pool.acquire().await.unwrap();
        let record = Accounts::new(&mut conn).find_by_username("alice").await.unwrap().unwrap();
        assert_eq!(record.failed_login_attempts, config.auth.lockout_threshold);
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_success_resets_counter(pool: PgPool) {
        let config = create_test_config();
        create_test_account(&pool, "alice", "correct horse", Role::Teacher).await;

        login(&pool, &config, "alice", "wrong").await.unwrap_err();
        login(&pool, &config, "alice", "wrong").await.unwrap_err();
        login(&pool, &config, "alice", "correct horse").await.unwrap();

        let mut conn = pool.acquire().await.unwrap();
        let record = Accounts::new(&mut conn).find_by_username("alice").await.unwrap().unwrap();
        assert_eq!(record.failed_login_attempts, 0);
        assert!(!record.is_blocked);
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_disabled_account_refused_before_blocked(pool: PgPool) {
        let config = create_test_config();
        let account = create_test_account(&pool, "alice", "correct horse", Role::Teacher).await;

        sqlx::query("UPDATE accounts SET is_disabled = TRUE, is_blocked = TRUE WHERE id = $1")
            .bind(account.id)
            .execute(&pool)
            .await
            .unwrap();

        let err = login(&pool, &config, "alice", "correct horse").await.unwrap_err();
        assert!(matches!(err, Error::AccountDisabled));
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_sso_only_account_cannot_password_login(pool: PgPool) {
        let config = create_test_config();
        create_test_sso_account(&pool, "ssouser", Role::Teacher).await;

        let err = login(&pool, &config, "ssouser", "anything").await.unwrap_err();
        assert!(matches!(err, Error::InvalidCredentials));
    }
}
