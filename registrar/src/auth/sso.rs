//! SSO token exchange.
//!
//! Tokens minted by a trusted identity provider are verified against a
//! separate trust root (`auth.sso.secret`, never the session secret) and
//! exchanged for a local identity payload. The handler then issues a regular
//! session token, identical to the password path.

use jsonwebtoken::{DecodingKey, Validation, decode};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use tracing::{debug, error, instrument, warn};

use crate::{
    api::models::accounts::{AuthSource, CurrentUser, Role},
    auth::lockout::{self, LockoutCheck},
    config::Config,
    db::{
        errors::DbError,
        handlers::{Accounts, Repository},
        models::accounts::AccountCreateDBRequest,
    },
    errors::{Error, Result},
};

/// Claims consumed from the identity provider's token.
#[derive(Debug, Serialize, Deserialize)]
pub struct SsoClaims {
    /// Username the subject maps onto locally
    pub sub: String,
    pub name: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    /// Optional role claim, `ADMIN` or `TEACHER`
    #[serde(default)]
    pub role: Option<String>,
    pub exp: i64,
}

/// Verify the external token against the SSO trust root.
fn verify_sso_token(token: &str, config: &Config) -> Result<SsoClaims> {
    let secret = config.auth.sso.secret.as_ref().ok_or_else(|| Error::Internal {
        operation: "SSO exchange: auth.sso.secret is required".to_string(),
    })?;

    let key = DecodingKey::from_secret(secret.as_bytes());
    let mut validation = Validation::default();
    if let Some(issuer) = &config.auth.sso.issuer {
        validation.set_issuer(&[issuer]);
    }

    let token_data = decode::<SsoClaims>(token, &key, &validation).map_err(|e| match e.kind() {
        // Token-shaped defects collapse to the generic invalid-token failure
        jsonwebtoken::errors::ErrorKind::InvalidToken
        | jsonwebtoken::errors::ErrorKind::InvalidSignature
        | jsonwebtoken::errors::ErrorKind::ExpiredSignature
        | jsonwebtoken::errors::ErrorKind::MissingRequiredClaim(_)
        | jsonwebtoken::errors::ErrorKind::InvalidIssuer
        | jsonwebtoken::errors::ErrorKind::InvalidAudience
        | jsonwebtoken::errors::ErrorKind::InvalidSubject
        | jsonwebtoken::errors::ErrorKind::ImmatureSignature
        | jsonwebtoken::errors::ErrorKind::Base64(_)
        | jsonwebtoken::errors::ErrorKind::Json(_)
        | jsonwebtoken::errors::ErrorKind::Utf8(_)
        | jsonwebtoken::errors::ErrorKind::InvalidAlgorithm => Error::InvalidToken,

        // Key material problems are server-side
        _ => Error::Internal {
            operation: format!("SSO token verification: {e}"),
        },
    })?;

    Ok(token_data.claims)
}

fn parse_role(claim: Option<&str>) -> Result<Role> {
    match claim {
        None => Ok(Role::Teacher),
        Some("ADMIN") => Ok(Role::Admin),
        Some("TEACHER") => Ok(Role::Teacher),
        Some(other) => {
            warn!(role = other, "SSO token carried an unknown role claim");
            Err(Error::InsufficientPermissions {
                resource: "session exchange with unknown role".to_string(),
            })
        }
    }
}

/// Exchange an externally-issued token for a local identity payload.
///
/// Account-state refusals (blocked, disabled, forbidden role) surface
/// distinctly; internal failures are logged in full and surface as the
/// generic exchange failure so nothing leaks to the caller.
#[instrument(skip_all)]
pub async fn exchange(db: &PgPool, config: &Config, token: &str) -> Result<CurrentUser> {
    if token.is_empty() {
        return Err(Error::MissingToken);
    }

    if !config.auth.sso.enabled {
        debug!("SSO exchange attempted while disabled");
        return Err(Error::SsoExchangeFailed);
    }

    let claims = match verify_sso_token(token, config) {
        Ok(claims) => claims,
        Err(Error::InvalidToken) => return Err(Error::InvalidToken),
        Err(e) => {
            error!("SSO token verification failed internally: {:#}", e);
            return Err(Error::SsoExchangeFailed);
        }
    };

    let role = parse_role(claims.role.as_deref())?;

    let mut conn = db.acquire().await.map_err(DbError::from)?;
    let mut repo = Accounts::new(&mut conn);

    let record = match repo.find_by_username(&claims.sub).await {
        Ok(record) => record,
        Err(e) => {
            error!("SSO exchange account lookup failed: {:#}", e);
            return Err(Error::SsoExchangeFailed);
        }
    };

    if let Some(record) = record {
        match lockout::check(record.is_disabled, record.is_blocked) {
            LockoutCheck::Disabled => return Err(Error::AccountDisabled),
            LockoutCheck::Blocked => return Err(Error::AccountBlocked),
            LockoutCheck::Proceed => {}
        }
        return Ok(CurrentUser::from(record));
    }

    if !config.auth.sso.auto_provision {
        debug!("SSO subject has no local account and auto-provision is off");
        return Err(Error::SsoExchangeFailed);
    }

    let request = AccountCreateDBRequest {
        username: claims.sub,
        password_hash: None,
        role,
        full_name: claims.name,
        email: claims.email,
        phone_number: claims.phone,
        auth_source: AuthSource::Sso,
    };

    match repo.create(&request).await {
        Ok(account) => Ok(CurrentUser::from(account)),
        Err(e) => {
            error!("SSO auto-provisioning failed: {:#}", e);
            Err(Error::SsoExchangeFailed)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{create_test_account, create_test_config};
    use chrono::Utc;
    use jsonwebtoken::{EncodingKey, Header, encode};
    use sqlx::PgPool;

    fn sso_config() -> Config {
        let mut config = create_test_config();
        config.auth.sso.enabled = true;
        config.auth.sso.secret = Some("sso-shared-secret".to_string());
        config.auth.sso.auto_provision = true;
        config
    }

    fn mint_token(secret: &str, claims: &serde_json::Value) -> String {
        encode(&Header::default(), claims, &EncodingKey::from_secret(secret.as_bytes())).unwrap()
    }

    fn valid_claims(username: &str) -> serde_json::Value {
        serde_json::json!({
            "sub": username,
            "name": "Pat Jones",
            "email": "pjones@school.example",
            "exp": (Utc::now() + chrono::Duration::hours(1)).timestamp(),
        })
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_exchange_existing_account(pool: PgPool) {
        let config = sso_config();
        let account = create_test_account(&pool, "pjones", "irrelevant", Role::Teacher).await;

        let token = mint_token("sso-shared-secret", &valid_claims("pjones"));
        let user = exchange(&pool, &config, &token).await.unwrap();
        assert_eq!(user.id, account.id);
        assert_eq!(user.username, "pjones");
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_exchange_auto_provisions_unknown_subject(pool: PgPool) {
        let config = sso_config();

        let token = mint_token("sso-shared-secret", &valid_claims("newteacher"));
        let user = exchange(&pool, &config, &token).await.unwrap();
        assert_eq!(user.username, "newteacher");
        assert_eq!(user.role, Role::Teacher);

        // Provisioned with SSO provenance and no local password
        let mut conn = pool.acquire().await.unwrap();
        let record = Accounts::new(&mut conn).find_by_username("newteacher").await.unwrap().unwrap();
        assert!(record.password_hash.is_none());
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_exchange_unknown_subject_without_provisioning(pool: PgPool) {
        let mut config = sso_config();
        config.auth.sso.auto_provision = false;

        let token = mint_token("sso-shared-secret", &valid_claims("stranger"));
        let err = exchange(&pool, &config, &token).await.unwrap_err();
        assert!(matches!(err, Error::SsoExchangeFailed));

        // No identity was created
        let mut conn = pool.acquire().await.unwrap();
        assert!(Accounts::new(&mut conn).find_by_username("stranger").await.unwrap().is_none());
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_exchange_untrusted_signature_creates_nothing(pool: PgPool) {
        let config = sso_config();

        let token = mint_token("a-different-secret", &valid_claims("mallory"));
        let err = exchange(&pool, &config, &token).await.unwrap_err();
        assert!(matches!(err, Error::InvalidToken));

        let mut conn = pool.acquire().await.unwrap();
        assert!(Accounts::new(&mut conn).find_by_username("mallory").await.unwrap().is_none());
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_exchange_issuer_mismatch(pool: PgPool) {
        let mut config = sso_config();
        config.auth.sso.issuer = Some("https://idp.school.example".to_string());

        let mut claims = valid_claims("pjones");
        claims["iss"] = serde_json::json!("https://evil.example");
        let token = mint_token("sso-shared-secret", &claims);

        let err = exchange(&pool, &config, &token).await.unwrap_err();
        assert!(matches!(err, Error::InvalidToken));
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_exchange_unknown_role_is_forbidden(pool: PgPool) {
        let config = sso_config();

        let mut claims = valid_claims("pjones");
        claims["role"] = serde_json::json!("JANITOR");
        let token = mint_token("sso-shared-secret", &claims);

        let err = exchange(&pool, &config, &token).await.unwrap_err();
        assert!(matches!(err, Error::InsufficientPermissions { .. }));
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_exchange_role_claim_respected(pool: PgPool) {
        let config = sso_config();

        let mut claims = valid_claims("headmaster");
        claims["role"] = serde_json::json!("ADMIN");
        let token = mint_token("sso-shared-secret", &claims);

        let user = exchange(&pool, &config, &token).await.unwrap();
        assert_eq!(user.role, Role::Admin);
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_exchange_blocked_and_disabled_are_distinct(pool: PgPool) {
        let config = sso_config();
        let account = create_test_account(&pool, "pjones", "irrelevant", Role::Teacher).await;

        sqlx::query("UPDATE accounts SET is_blocked = TRUE WHERE id = $1")
            .bind(account.id)
            .execute(&pool)
            .await
            .unwrap();
        let token = mint_token("sso-shared-secret", &valid_claims("pjones"));
        let err = exchange(&pool, &config, &token).await.unwrap_err();
        assert!(matches!(err, Error::AccountBlocked));

        sqlx::query("UPDATE accounts SET is_disabled = TRUE WHERE id = $1")
            .bind(account.id)
            .execute(&pool)
            .await
            .unwrap();
        let err = exchange(&pool, &config, &token).await.unwrap_err();
        assert!(matches!(err, Error::AccountDisabled));
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_exchange_disabled_feature(pool: PgPool) {
        let mut config = sso_config();
        config.auth.sso.enabled = false;

        let token = mint_token("sso-shared-secret", &valid_claims("pjones"));
        let err = exchange(&pool, &config, &token).await.unwrap_err();
        assert!(matches!(err, Error::SsoExchangeFailed));
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_exchange_empty_token(pool: PgPool) {
        let config = sso_config();

        let err = exchange(&pool, &config, "").await.unwrap_err();
        assert!(matches!(err, Error::MissingToken));
    }
}
