use axum::{Json, extract::State};

use crate::{
    AppState,
    api::models::accounts::{
        AuthResponse, AuthSuccessResponse, CurrentUser, LoginInfo, LoginRequest, LoginResponse, LogoutResponse,
        PasswordChangeRequest, SsoExchangeRequest,
    },
    auth::{credentials, password, session, sso},
    db::handlers::{Accounts, Repository},
    db::models::accounts::AccountUpdateDBRequest,
    errors::Error,
};

/// Get login information
#[utoipa::path(
    get,
    path = "/authentication/login-info",
    tag = "authentication",
    responses(
        (status = 200, description = "Login capability info", body = LoginInfo),
    )
)]
#[tracing::instrument(skip_all)]
pub async fn get_login_info(State(state): State<AppState>) -> Result<Json<LoginInfo>, Error> {
    Ok(Json(LoginInfo {
        password_login_enabled: true,
        sso_enabled: state.config.auth.sso.enabled,
        password_min_length: state.config.auth.password.min_length,
        password_max_length: state.config.auth.password.max_length,
    }))
}

/// Login with username and password
#[utoipa::path(
    post,
    path = "/authentication/login",
    request_body = LoginRequest,
    tag = "authentication",
    responses(
        (status = 200, description = "Login successful", body = AuthResponse),
        (status = 400, description = "Missing username or password"),
        (status = 401, description = "Invalid credentials"),
        (status = 403, description = "Account blocked or disabled"),
    )
)]
#[tracing::instrument(skip_all)]
pub async fn login(State(state): State<AppState>, Json(request): Json<LoginRequest>) -> Result<LoginResponse, Error> {
    let user = credentials::login(&state.db, &state.config, &request.username, &request.password).await?;

    let token = session::create_session_token(&user, &state.config)?;
    let cookie = create_session_cookie(&token, &state.config);

    let auth_response = AuthResponse {
        account: user,
        token,
        message: "Login successful".to_string(),
    };

    Ok(LoginResponse { auth_response, cookie })
}

/// Exchange an SSO token for a local session
#[utoipa::path(
    post,
    path = "/authentication/sso",
    request_body = SsoExchangeRequest,
    tag = "authentication",
    responses(
        (status = 200, description = "Exchange successful", body = AuthResponse),
        (status = 401, description = "Missing, invalid, or untrusted token"),
        (status = 403, description = "Account blocked or disabled, or unknown role"),
    )
)]
#[tracing::instrument(skip_all)]
pub async fn sso_exchange(State(state): State<AppState>, Json(request): Json<SsoExchangeRequest>) -> Result<LoginResponse, Error> {
    let user = sso::exchange(&state.db, &state.config, &request.token).await?;

    // Issue the same session shape as the password path
    let token = session::create_session_token(&user, &state.config)?;
    let cookie = create_session_cookie(&token, &state.config);

    let auth_response = AuthResponse {
        account: user,
        token,
        message: "SSO exchange successful".to_string(),
    };

    Ok(LoginResponse { auth_response, cookie })
}

/// Logout (clear session)
#[utoipa::path(
    post,
    path = "/authentication/logout",
    tag = "authentication",
    responses(
        (status = 200, description = "Logout successful", body = AuthSuccessResponse),
    )
)]
#[tracing::instrument(skip_all)]
pub async fn logout(State(state): State<AppState>) -> Result<LogoutResponse, Error> {
    let cookie = create_clearing_cookie(&state.config);

    let auth_response = AuthSuccessResponse {
        message: "Logout successful".to_string(),
    };

    Ok(LogoutResponse { auth_response, cookie })
}

/// Get the authenticated identity
#[utoipa::path(
    get,
    path = "/authentication/me",
    tag = "authentication",
    responses(
        (status = 200, description = "Authenticated identity", body = CurrentUser),
        (status = 401, description = "Missing or invalid session token"),
    ),
    security(
        ("session_token" = [])
    )
)]
#[tracing::instrument(skip_all)]
pub async fn me(current_user: CurrentUser) -> Json<CurrentUser> {
    Json(current_user)
}

/// Change password for the authenticated account
#[utoipa::path(
    post,
    path = "/authentication/password-change",
    request_body = PasswordChangeRequest,
    tag = "authentication",
    responses(
        (status = 200, description = "Password changed successfully", body = AuthSuccessResponse),
        (status = 400, description = "Invalid request"),
        (status = 401, description = "Current password is incorrect"),
    ),
    security(
        ("session_token" = [])
    )
)]
#[tracing::instrument(skip_all)]
pub async fn change_password(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Json(request): Json<PasswordChangeRequest>,
) -> Result<Json<AuthSuccessResponse>, Error> {
    let mut pool_conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    let mut repo = Accounts::new(&mut pool_conn);

    let account = repo.get_by_id(current_user.id).await?.ok_or(Error::InvalidToken)?;

    // SSO-provisioned accounts have no local password to change
    let password_hash = account.password_hash.as_ref().ok_or_else(|| Error::BadRequest {
        message: "Account has no local password".to_string(),
    })?;

    // Verify current password
    let current_password = request.current_password.clone();
    let hash = password_hash.clone();
    let is_valid = tokio::task::spawn_blocking(move || password::verify_string(&current_password, &hash))
        .await
        .map_err(|e| Error::Internal {
            operation: format!("spawn password verification task: {e}"),
        })??;

    if !is_valid {
        return Err(Error::InvalidCredentials);
    }

    // Validate new password length
    let password_config = &state.config.auth.password;
    if request.new_password.len() < password_config.min_length {
        return Err(Error::BadRequest {
            message: format!("Password must be at least {} characters", password_config.min_length),
        });
    }
    if request.new_password.len() > password_config.max_length {
        return Err(Error::BadRequest {
            message: format!("Password must be no more than {} characters", password_config.max_length),
        });
    }

    // Hash new password
    let params = crate::auth::password::Argon2Params::from(password_config);
    let new_password_hash = tokio::task::spawn_blocking({
        let password = request.new_password.clone();
        move || password::hash_string_with_params(&password, Some(params))
    })
    .await
    .map_err(|e| Error::Internal {
        operation: format!("spawn password hashing task: {e}"),
    })??;

    let update_request = AccountUpdateDBRequest {
        id: current_user.id,
        password_hash: Some(new_password_hash),
        ..Default::default()
    };

    repo.update(current_user.id, &update_request).await?;

    Ok(Json(AuthSuccessResponse {
        message: "Password changed successfully".to_string(),
    }))
}

/// Helper function to create a session cookie
fn create_session_cookie(token: &str, config: &crate::config::Config) -> String {
    let session_config = &config.auth.session;
    let max_age = session_config.timeout.as_secs();

    let mut cookie = format!(
        "{}={}; Path=/; HttpOnly; SameSite={}; Max-Age={}",
        session_config.cookie_name, token, session_config.cookie_same_site, max_age
    );
    if session_config.cookie_secure {
        cookie.push_str("; Secure");
    }
    cookie
}

/// Expired cookie with the same attributes as the session cookie. Browsers
/// only overwrite a cookie when name and attributes match, so the clearing
/// cookie must honor the same config.
fn create_clearing_cookie(config: &crate::config::Config) -> String {
    let session_config = &config.auth.session;

    let mut cookie = format!(
        "{}=; Path=/; HttpOnly; SameSite={}; Max-Age=0",
        session_config.cookie_name, session_config.cookie_same_site
    );
    if session_config.cookie_secure {
        cookie.push_str("; Secure");
    }
    cookie
}
