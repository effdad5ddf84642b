use axum::{
    Json,
    extract::{Path, State},
};

use crate::{
    AppState,
    api::models::accounts::{AccountResponse, CurrentUser},
    db::handlers::Accounts,
    errors::Error,
    types::AccountId,
};

/// Unblock an account and reset its failure counter
#[utoipa::path(
    post,
    path = "/admin/api/v1/accounts/{id}/unblock",
    tag = "accounts",
    params(
        ("id" = String, Path, description = "Account ID"),
    ),
    responses(
        (status = 200, description = "Account unblocked", body = AccountResponse),
        (status = 401, description = "Missing or invalid session token"),
        (status = 403, description = "Caller is not an admin"),
        (status = 404, description = "Account not found"),
    ),
    security(
        ("session_token" = [])
    )
)]
#[tracing::instrument(skip_all, fields(account_id = %id))]
pub async fn unblock_account(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Path(id): Path<AccountId>,
) -> Result<Json<AccountResponse>, Error> {
    if !current_user.is_admin() {
        return Err(Error::InsufficientPermissions {
            resource: format!("unblock account {id}"),
        });
    }

    let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    let account = Accounts::new(&mut conn)
        .set_blocked(id, false)
        .await
        .map_err(|e| match e {
            crate::db::errors::DbError::NotFound => Error::NotFound {
                resource: "Account".to_string(),
                id: id.to_string(),
            },
            other => Error::Database(other),
        })?;

    Ok(Json(AccountResponse::from(account)))
}
