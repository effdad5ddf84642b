//! OpenAPI documentation for the management API.

use utoipa::{
    Modify, OpenApi,
    openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme},
};

use crate::api;

/// Session token security scheme (Bearer header; browsers use the cookie instead).
struct SessionSecurityAddon;

impl Modify for SessionSecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.security_schemes.insert(
                "session_token".to_string(),
                SecurityScheme::Http(
                    HttpBuilder::new()
                        .scheme(HttpAuthScheme::Bearer)
                        .bearer_format("JWT")
                        .description(Some(
                            "Session token issued by `/authentication/login` or `/authentication/sso`. \
                             Include it in the `Authorization` header:\n\n\
                             ```\nAuthorization: Bearer YOUR_SESSION_TOKEN\n```\n\n\
                             Browser clients carry the same token in the session cookie.",
                        ))
                        .build(),
                ),
            );
        }
    }
}

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Registrar API",
        description = "Authentication and session service for the school administration platform."
    ),
    paths(
        api::handlers::auth::get_login_info,
        api::handlers::auth::login,
        api::handlers::auth::sso_exchange,
        api::handlers::auth::logout,
        api::handlers::auth::me,
        api::handlers::auth::change_password,
        api::handlers::accounts::unblock_account,
    ),
    components(schemas(
        crate::api::models::accounts::LoginRequest,
        crate::api::models::accounts::SsoExchangeRequest,
        crate::api::models::accounts::PasswordChangeRequest,
        crate::api::models::accounts::AuthResponse,
        crate::api::models::accounts::AuthSuccessResponse,
        crate::api::models::accounts::LoginInfo,
        crate::api::models::accounts::AccountResponse,
        crate::api::models::accounts::CurrentUser,
        crate::api::models::accounts::Role,
        crate::api::models::accounts::AuthSource,
    )),
    modifiers(&SessionSecurityAddon),
    tags(
        (name = "authentication", description = "Login, logout, SSO exchange, and session inspection"),
        (name = "accounts", description = "Administrative account management"),
    )
)]
pub struct ApiDoc;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_openapi_spec_generates() {
        let spec = ApiDoc::openapi();
        let json = spec.to_json().expect("Spec should serialize");
        assert!(json.contains("/authentication/login"));
        assert!(json.contains("/admin/api/v1/accounts/{id}/unblock"));
        assert!(json.contains("session_token"));
    }
}
