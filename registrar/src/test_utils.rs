//! Shared helpers for integration tests.

use crate::api::models::accounts::{AuthSource, Role};
use crate::auth::password::{self, Argon2Params};
use crate::db::handlers::{Accounts, Repository};
use crate::db::models::accounts::{Account, AccountCreateDBRequest};
use crate::{AppState, build_router, config::Config};
use axum_test::TestServer;
use sqlx::PgPool;

pub fn create_test_config() -> Config {
    let mut config = Config::default();
    config.host = "127.0.0.1".to_string();
    config.port = 0;
    config.auth.session.secret = Some("test-secret-key-for-testing-only".to_string());
    // Cheap hashing so account fixtures don't dominate test time
    config.auth.password.argon2_memory_kib = 1024;
    config.auth.password.argon2_iterations = 1;
    config.auth.password.argon2_parallelism = 1;
    config.enable_metrics = false;
    config.enable_otel_export = false;
    config
}

pub fn create_test_state(pool: PgPool, config: Config) -> AppState {
    AppState::builder().db(pool).config(config).build()
}

pub fn create_test_server(pool: PgPool, config: Config) -> TestServer {
    let state = create_test_state(pool, config);
    let router = build_router(state).expect("Failed to build router");
    TestServer::new(router).expect("Failed to create test server")
}

pub async fn create_test_account(pool: &PgPool, username: &str, password: &str, role: Role) -> Account {
    let params = Argon2Params {
        memory_kib: 1024,
        iterations: 1,
        parallelism: 1,
    };
    let password_hash = password::hash_string_with_params(password, Some(params)).expect("Failed to hash test password");

    let mut conn = pool.acquire().await.expect("Failed to acquire connection");
    Accounts::new(&mut conn)
        .create(&AccountCreateDBRequest {
            username: username.to_string(),
            password_hash: Some(password_hash),
            role,
            full_name: format!("Test {username}"),
            email: Some(format!("{username}@school.example")),
            phone_number: None,
            auth_source: AuthSource::Native,
        })
        .await
        .expect("Failed to create test account")
}

/// Create an SSO-provisioned account, which carries no password hash.
pub async fn create_test_sso_account(pool: &PgPool, username: &str, role: Role) -> Account {
    let mut conn = pool.acquire().await.expect("Failed to acquire connection");
    Accounts::new(&mut conn)
        .create(&AccountCreateDBRequest {
            username: username.to_string(),
            password_hash: None,
            role,
            full_name: format!("Test {username}"),
            email: None,
            phone_number: None,
            auth_source: AuthSource::Sso,
        })
        .await
        .expect("Failed to create test account")
}

/// Log in through the HTTP surface and return the issued session token.
pub async fn login_session_token(server: &TestServer, username: &str, password: &str) -> String {
    let response = server
        .post("/authentication/login")
        .json(&serde_json::json!({"username": username, "password": password}))
        .await;
    response.assert_status_ok();
    response.json::<serde_json::Value>()["token"]
        .as_str()
        .expect("Login response missing token")
        .to_string()
}
