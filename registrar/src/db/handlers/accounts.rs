//! Database repository for accounts.
//!
//! Besides the generic CRUD surface this carries the lockout bookkeeping:
//! failure counting and blocking happen in single UPDATE statements so two
//! concurrent failed logins cannot read the same counter value and lose an
//! increment.

use crate::types::{AccountId, abbrev_uuid};
use crate::{
    db::{
        errors::{DbError, Result},
        handlers::repository::Repository,
        models::accounts::{Account, AccountCreateDBRequest, AccountUpdateDBRequest, CredentialRecord},
    },
};
use sqlx::PgConnection;
use tracing::instrument;

/// Outcome of recording a failed login attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FailureRecorded {
    pub failed_login_attempts: i32,
    pub is_blocked: bool,
}

pub struct Accounts<'c> {
    db: &'c mut PgConnection,
}

#[async_trait::async_trait]
impl<'c> Repository for Accounts<'c> {
    type CreateRequest = AccountCreateDBRequest;
    type UpdateRequest = AccountUpdateDBRequest;
    type Response = Account;
    type Id = AccountId;

    #[instrument(skip(self, request), fields(username = %request.username), err)]
    async fn create(&mut self, request: &Self::CreateRequest) -> Result<Self::Response> {
        let account = sqlx::query_as::<_, Account>(
            r#"
            INSERT INTO accounts (username, password_hash, role, full_name, email, phone_number, auth_source)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING *
            "#,
        )
        .bind(&request.username)
        .bind(&request.password_hash)
        .bind(request.role)
        .bind(&request.full_name)
        .bind(&request.email)
        .bind(&request.phone_number)
        .bind(request.auth_source)
        .fetch_one(&mut *self.db)
        .await?;

        Ok(account)
    }

    #[instrument(skip(self), fields(account_id = %abbrev_uuid(&id)), err)]
    async fn get_by_id(&mut self, id: Self::Id) -> Result<Option<Self::Response>> {
        let account = sqlx::query_as::<_, Account>("SELECT * FROM accounts WHERE id = $1")
            .bind(id)
            .fetch_optional(&mut *self.db)
            .await?;

        Ok(account)
    }

    #[instrument(skip(self, request), fields(account_id = %abbrev_uuid(&id)), err)]
    async fn update(&mut self, id: Self::Id, request: &Self::UpdateRequest) -> Result<Self::Response> {
        let account = sqlx::query_as::<_, Account>(
            r#"
            UPDATE accounts SET
                password_hash = COALESCE($2, password_hash),
                full_name = COALESCE($3, full_name),
                email = COALESCE($4, email),
                phone_number = COALESCE($5, phone_number),
                updated_at = NOW()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(&request.password_hash)
        .bind(&request.full_name)
        .bind(&request.email)
        .bind(&request.phone_number)
        .fetch_optional(&mut *self.db)
        .await?
        .ok_or(DbError::NotFound)?;

        Ok(account)
    }
}

impl<'c> Accounts<'c> {
    pub fn new(db: &'c mut PgConnection) -> Self {
        Self { db }
    }

    /// Fetch the login projection for a username. The lockout flags and the
    /// hash come from the same row read so the caller decides on one snapshot.
    #[instrument(skip(self, username), err)]
    pub async fn find_by_username(&mut self, username: &str) -> Result<Option<CredentialRecord>> {
        let record = sqlx::query_as::<_, CredentialRecord>(
            r#"
            SELECT id, username, password_hash, role, full_name, email, phone_number,
                   is_blocked, is_disabled, failed_login_attempts
            FROM accounts WHERE username = $1
            "#,
        )
        .bind(username)
        .fetch_optional(&mut *self.db)
        .await?;

        Ok(record)
    }

    /// Record one failed password attempt and block the account when the
    /// counter reaches `threshold`. Increment and block decision are a single
    /// statement, and already-blocked or disabled rows are left untouched.
    #[instrument(skip(self), fields(account_id = %abbrev_uuid(&id)), err)]
    pub async fn record_login_failure(&mut self, id: AccountId, threshold: i32) -> Result<Option<FailureRecorded>> {
        let row = sqlx::query_as::<_, (i32, bool)>(
            r#"
            UPDATE accounts SET
                failed_login_attempts = failed_login_attempts + 1,
                is_blocked = (failed_login_attempts + 1 >= $2),
                updated_at = NOW()
            WHERE id = $1 AND NOT is_blocked AND NOT is_disabled
            RETURNING failed_login_attempts, is_blocked
            "#,
        )
        .bind(id)
        .bind(threshold)
        .fetch_optional(&mut *self.db)
        .await?;

        Ok(row.map(|(failed_login_attempts, is_blocked)| FailureRecorded {
            failed_login_attempts,
            is_blocked,
        }))
    }

    /// Reset the failure counter and clear the blocked flag after a successful
    /// authentication. The flag is cleared too: a failure racing the
    /// verification can trip the block between the snapshot read and this
    /// write, and a success must not leave that block behind.
    #[instrument(skip(self), fields(account_id = %abbrev_uuid(&id)), err)]
    pub async fn record_login_success(&mut self, id: AccountId) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE accounts SET
                failed_login_attempts = 0,
                is_blocked = FALSE,
                updated_at = NOW()
            WHERE id = $1 AND (failed_login_attempts > 0 OR is_blocked)
            "#,
        )
        .bind(id)
        .execute(&mut *self.db)
        .await?;

        Ok(())
    }

    /// Set the blocked flag. Unblocking also zeroes the failure counter so the
    /// account gets a fresh allowance rather than re-blocking on the next miss.
    #[instrument(skip(self), fields(account_id = %abbrev_uuid(&id), blocked), err)]
    pub async fn set_blocked(&mut self, id: AccountId, blocked: bool) -> Result<Account> {
        let account = sqlx::query_as::<_, Account>(
            r#"
            UPDATE accounts SET
                is_blocked = $2,
                failed_login_attempts = CASE WHEN $2 THEN failed_login_attempts ELSE 0 END,
                updated_at = NOW()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(blocked)
        .fetch_optional(&mut *self.db)
        .await?
        .ok_or(DbError::NotFound)?;

        Ok(account)
    }
}
