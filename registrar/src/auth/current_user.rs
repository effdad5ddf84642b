//! Session gate: extracts the authenticated identity from request parts.
//!
//! Two transports carry the session token: the `Authorization: Bearer`
//! header (direct API clients) and the session cookie (browsers). Bearer is
//! tried first; the first transport that verifies wins. Handlers receive the
//! verified payload by value and do their own role gating.

use crate::{
    AppState,
    api::models::accounts::CurrentUser,
    auth::session,
    errors::{Error, Result},
};
use axum::{extract::FromRequestParts, http::request::Parts};
use tracing::{debug, instrument, trace};

/// Extract identity from a Bearer token if present and valid
/// Returns:
/// - None: No Authorization header or not a Bearer token
/// - Some(Ok(user)): Valid session token found and verified
/// - Some(Err(error)): Bearer token present but invalid/malformed
#[instrument(skip(parts, config))]
fn try_bearer_auth(parts: &Parts, config: &crate::config::Config) -> Option<Result<CurrentUser>> {
    let auth_header = parts.headers.get(axum::http::header::AUTHORIZATION)?;

    let auth_str = match auth_header.to_str() {
        Ok(s) => s,
        Err(e) => {
            return Some(Err(Error::BadRequest {
                message: format!("Invalid authorization header: {e}"),
            }));
        }
    };

    let token = auth_str.strip_prefix("Bearer ")?;

    Some(session::verify_session_token(token, config))
}

/// Extract identity from the session cookie if present and valid
/// Returns:
/// - None: No session cookie present
/// - Some(Ok(user)): Valid session token found and verified
/// - Some(Err(error)): Session cookie present but invalid/malformed
#[instrument(skip(parts, config))]
fn try_cookie_auth(parts: &Parts, config: &crate::config::Config) -> Option<Result<CurrentUser>> {
    let cookie_header = parts.headers.get(axum::http::header::COOKIE)?;

    let cookie_str = match cookie_header.to_str() {
        Ok(s) => s,
        Err(e) => {
            return Some(Err(Error::BadRequest {
                message: format!("Invalid cookie header: {e}"),
            }));
        }
    };
    let cookie_name = &config.auth.session.cookie_name;

    for cookie in cookie_str.split(';') {
        let cookie = cookie.trim();
        if let Some((name, value)) = cookie.split_once('=') {
            if name == cookie_name {
                return Some(session::verify_session_token(value, config));
            }
        }
    }
    None
}

impl FromRequestParts<AppState> for CurrentUser {
    type Rejection = Error;

    #[instrument(skip(parts, state))]
    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self> {
        // Try both transports and accumulate failures. The first success
        // wins; only fail once every presented credential has been rejected.
        let mut auth_errors = Vec::new();
        let mut any_auth_attempted = false;

        match try_bearer_auth(parts, &state.config) {
            Some(Ok(user)) => {
                debug!("Found bearer-authenticated account: {}", user.id);
                return Ok(user);
            }
            Some(Err(e)) => {
                trace!("Bearer authentication failed: {:?}", e);
                any_auth_attempted = true;
                auth_errors.push(("bearer", e));
            }
            None => {
                trace!("No bearer authentication attempted");
            }
        }

        match try_cookie_auth(parts, &state.config) {
            Some(Ok(user)) => {
                debug!("Found cookie-authenticated account: {}", user.id);
                return Ok(user);
            }
            Some(Err(e)) => {
                trace!("Cookie authentication failed: {:?}", e);
                any_auth_attempted = true;
                auth_errors.push(("cookie", e));
            }
            None => {
                trace!("No cookie authentication attempted");
            }
        }

        if !any_auth_attempted {
            trace!("No session credential found in request");
            Err(Error::MissingToken)
        } else {
            trace!("All authentication attempts failed ({}): {:?}", auth_errors.len(), auth_errors);
            Err(Error::InvalidToken)
        }
    }
}
