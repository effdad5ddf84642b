//! # registrar: Authentication and Session Core
//!
//! `registrar` is the authentication service of the school administration
//! platform. It owns the account credential store and issues the session
//! tokens every other service on the platform trusts.
//!
//! ## Overview
//!
//! Staff sign in with a username and password, or arrive with a token minted
//! by the district's identity provider and exchange it for a local session.
//! Either way the service hands back a signed session token, both in the
//! response body (for API clients) and as an HttpOnly cookie (for browsers).
//! Subsequent requests pass through the session gate, which verifies the
//! token and attaches the authenticated identity to the request.
//!
//! Password logins are protected by a brute-force lockout: each consecutive
//! failure increments a per-account counter, and once the counter reaches the
//! configured threshold the account is blocked until an administrator
//! unblocks it. A successful login resets the counter.
//!
//! ## Architecture
//!
//! The service is built on [Axum](https://github.com/tokio-rs/axum) with
//! PostgreSQL for persistence. The **API layer** ([`api`]) exposes the
//! authentication routes at `/authentication/*` and the management API at
//! `/admin/api/v1/*`. The **authentication layer** ([`auth`]) holds the
//! credential verification, lockout, session token, and SSO exchange logic.
//! The **database layer** ([`db`]) uses the repository pattern to abstract
//! data access.
//!
//! ## Quick Start
//!
//! ```no_run
//! use clap::Parser;
//! use registrar::{Application, Config};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let args = registrar::config::Args::parse();
//!     let config = Config::load(&args)?;
//!
//!     registrar::telemetry::init_telemetry(config.enable_otel_export)?;
//!
//!     let app = Application::new(config).await?;
//!     app.serve(async {
//!         tokio::signal::ctrl_c().await.expect("Failed to listen for Ctrl+C");
//!     })
//!     .await?;
//!
//!     Ok(())
//! }
//! ```
//!
//! ## Configuration
//!
//! See the [`config`] module for configuration options.

pub mod api;
pub mod auth;
pub mod config;
pub mod db;
pub mod errors;
mod openapi;
pub mod telemetry;
mod types;

#[cfg(test)]
pub mod test_utils;

use crate::{
    api::models::accounts::{AuthSource, Role},
    auth::password,
    db::handlers::{Accounts, Repository},
    db::models::accounts::{AccountCreateDBRequest, AccountUpdateDBRequest},
    errors::Error,
    openapi::ApiDoc,
};
use axum::http::HeaderValue;
use axum::{
    Router, http,
    routing::{get, post},
};
use axum_prometheus::PrometheusMetricLayer;
use bon::Builder;
pub use config::Config;
use sqlx::{Executor, PgPool, postgres::PgPoolOptions};
use tokio::net::TcpListener;
use tower_http::{
    cors::CorsLayer,
    trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer},
};
use tracing::{Level, debug, info, instrument};
use utoipa::OpenApi;
use utoipa_scalar::{Scalar, Servable};

pub use types::AccountId;

/// Application state shared across all request handlers.
#[derive(Clone, Builder)]
pub struct AppState {
    pub db: PgPool,
    pub config: Config,
}

/// Get the registrar database migrator
pub fn migrator() -> sqlx::migrate::Migrator {
    sqlx::migrate!("./migrations")
}

/// Create the initial admin account if it doesn't exist.
///
/// Idempotent: creates the account on first startup, or updates the password
/// when one is provided and the account already exists. Runs inside a
/// transaction so a crash mid-seed leaves no partial account behind.
#[instrument(skip_all)]
pub async fn create_initial_admin(username: &str, password: Option<&str>, db: &PgPool) -> Result<AccountId, Error> {
    let password_hash = password.map(password::hash_string).transpose()?;

    let mut tx = db.begin().await.map_err(|e| Error::Database(e.into()))?;
    let mut accounts = Accounts::new(&mut tx);

    if let Some(existing) = accounts.find_by_username(username).await? {
        if password_hash.is_some() {
            let update = AccountUpdateDBRequest {
                id: existing.id,
                password_hash,
                ..Default::default()
            };
            Accounts::new(&mut tx).update(existing.id, &update).await?;
        }
        tx.commit().await.map_err(|e| Error::Database(e.into()))?;
        return Ok(existing.id);
    }

    let created = Accounts::new(&mut tx)
        .create(&AccountCreateDBRequest {
            username: username.to_string(),
            password_hash,
            role: Role::Admin,
            full_name: "Administrator".to_string(),
            email: None,
            phone_number: None,
            auth_source: AuthSource::System,
        })
        .await?;

    tx.commit().await.map_err(|e| Error::Database(e.into()))?;
    info!("Created initial admin account '{}'", username);
    Ok(created.id)
}

/// Connect to PostgreSQL, run migrations, and seed the initial admin account
async fn setup_database(config: &Config) -> anyhow::Result<PgPool> {
    let statement_timeout_ms = config.database.statement_timeout.as_millis();
    let pool = PgPoolOptions::new()
        .max_connections(config.database.max_connections)
        .acquire_timeout(config.database.acquire_timeout)
        .after_connect(move |conn, _meta| {
            Box::pin(async move {
                conn.execute(format!("SET statement_timeout = {statement_timeout_ms}").as_str()).await?;
                Ok(())
            })
        })
        .connect(&config.database.url)
        .await?;

    migrator().run(&pool).await?;

    create_initial_admin(&config.admin_username, config.admin_password.as_deref(), &pool)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to create initial admin account: {e}"))?;

    Ok(pool)
}

/// Create CORS layer from configuration
fn create_cors_layer(config: &Config) -> anyhow::Result<CorsLayer> {
    if config.cors.permissive {
        return Ok(CorsLayer::permissive());
    }

    let mut origins = Vec::new();
    for origin in &config.cors.allowed_origins {
        origins.push(origin.parse::<HeaderValue>()?);
    }

    Ok(CorsLayer::new()
        .allow_origin(origins)
        .allow_credentials(true)
        .allow_headers([http::header::AUTHORIZATION, http::header::CONTENT_TYPE])
        .allow_methods([http::Method::GET, http::Method::POST, http::Method::PATCH, http::Method::DELETE])
        .expose_headers(vec![http::header::LOCATION]))
}

/// Build the application router with all endpoints and middleware.
///
/// Authentication routes live at the root so they can be masked when the
/// service is deployed behind an SSO proxy; administrative routes are nested
/// under `/admin/api/v1` and enforce the session gate per handler.
#[instrument(skip_all)]
pub fn build_router(state: AppState) -> anyhow::Result<Router> {
    let auth_routes = Router::new()
        .route("/authentication/login-info", get(api::handlers::auth::get_login_info))
        .route("/authentication/login", post(api::handlers::auth::login))
        .route("/authentication/sso", post(api::handlers::auth::sso_exchange))
        .route("/authentication/logout", post(api::handlers::auth::logout))
        .route("/authentication/me", get(api::handlers::auth::me))
        .route("/authentication/password-change", post(api::handlers::auth::change_password))
        .with_state(state.clone());

    let api_routes = Router::new()
        .route("/accounts/{id}/unblock", post(api::handlers::accounts::unblock_account))
        .with_state(state.clone());

    let router = Router::new()
        .route("/healthz", get(|| async { "OK" }))
        .route(
            "/api-docs/openapi.json",
            get(|| async { axum::Json(ApiDoc::openapi()) }),
        )
        .merge(auth_routes)
        .nest("/admin/api/v1", api_routes)
        .merge(Scalar::with_url("/admin/docs", ApiDoc::openapi()));

    let cors_layer = create_cors_layer(&state.config)?;
    let mut router = router.layer(cors_layer);

    if state.config.enable_metrics {
        let (prometheus_layer, metric_handle) = PrometheusMetricLayer::pair();
        router = router
            .route("/internal/metrics", get(|| async move { metric_handle.render() }))
            .layer(prometheus_layer);
    }

    let router = router.layer(
        TraceLayer::new_for_http()
            .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
            .on_request(DefaultOnRequest::new().level(Level::INFO))
            .on_response(DefaultOnResponse::new().level(Level::INFO)),
    );

    Ok(router)
}

/// Main application struct that owns all resources and lifecycle.
///
/// 1. **Create**: [`Application::new`] connects to the database, runs
///    migrations, and seeds the initial admin account
/// 2. **Serve**: [`Application::serve`] binds to a TCP port and handles
///    requests until the shutdown future resolves
pub struct Application {
    router: Router,
    config: Config,
    pool: PgPool,
}

impl Application {
    /// Create a new application instance with all resources initialized
    pub async fn new(config: Config) -> anyhow::Result<Self> {
        debug!("Starting registrar with configuration: {:#?}", config);

        let pool = setup_database(&config).await?;

        let state = AppState::builder().db(pool.clone()).config(config.clone()).build();
        let router = build_router(state)?;

        Ok(Self { router, config, pool })
    }

    /// Start serving the application
    pub async fn serve<F>(self, shutdown: F) -> anyhow::Result<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let bind_addr = self.config.bind_address();
        let listener = TcpListener::bind(&bind_addr).await?;
        info!("Registrar listening on http://{}", bind_addr);

        axum::serve(listener, self.router.into_make_service())
            .with_graceful_shutdown(shutdown)
            .await?;

        info!("Closing database connections...");
        self.pool.close().await;

        info!("Shutting down telemetry...");
        telemetry::shutdown_telemetry();

        Ok(())
    }
}
