//! # Account Handlers
//!
//! Account settings and the management of linked OAuth providers.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::auth::CurrentUser;
use crate::error::{ApiError, conflict, not_found};
use crate::handlers::oauth::begin_authorization;
use crate::handlers::types::UserResponse;
use crate::repositories::{
    OAuthAccountRepository, OAuthTokenRepository, UnlinkError, can_unlink,
};
use crate::server::AppState;

/// Where the browser returns after linking a provider.
const SETTINGS_PAGE: &str = "/account/settings";

/// One linked provider identity
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct LinkedProvider {
    #[schema(example = "github")]
    pub provider: String,
    #[schema(example = "ada@example.com")]
    pub email: Option<String>,
    pub name: Option<String>,
    pub picture: Option<String>,
    #[schema(example = "2024-01-15T10:30:00Z")]
    pub linked_at: String,
    pub last_login_at: Option<String>,
    /// Whether unlinking would still leave a way to sign in
    pub can_unlink: bool,
}

/// Account settings of the signed-in user
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct AccountSettingsResponse {
    pub user: UserResponse,
    pub roles: Vec<String>,
    pub has_password: bool,
    pub linked_providers: Vec<LinkedProvider>,
    /// Configured providers not linked yet
    #[schema(example = json!(["google", "microsoft"]))]
    pub available_providers: Vec<String>,
}

/// Authorization URL to send the browser to
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct AuthorizeUrlResponse {
    pub authorize_url: String,
}

/// Account settings
#[utoipa::path(
    get,
    path = "/account/settings",
    security(("bearer_auth" = []), ("session_cookie" = [])),
    responses(
        (status = 200, description = "Profile, roles and linked providers", body = AccountSettingsResponse),
        (status = 401, description = "Not signed in", body = ApiError),
        (status = 500, description = "Internal server error", body = ApiError)
    ),
    tag = "account"
)]
pub async fn settings(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
) -> Result<Json<AccountSettingsResponse>, ApiError> {
    let accounts = OAuthAccountRepository::new(state.db.clone())
        .list_for_user(user.id)
        .await?;
    let has_password = user.has_password();
    let unlinkable = can_unlink(has_password, accounts.len() as u64);

    let available_providers = state
        .providers
        .names()
        .into_iter()
        .filter(|name| !accounts.iter().any(|a| a.provider == *name))
        .map(str::to_string)
        .collect();

    let linked_providers = accounts
        .into_iter()
        .map(|account| LinkedProvider {
            provider: account.provider,
            email: account.email,
            name: account.name,
            picture: account.picture,
            linked_at: account.created_at.to_rfc3339(),
            last_login_at: account.last_login_at.map(|t| t.to_rfc3339()),
            can_unlink: unlinkable,
        })
        .collect();

    Ok(Json(AccountSettingsResponse {
        user: UserResponse::from(&user),
        roles: state.resolver.role_names(&user).await,
        has_password,
        linked_providers,
        available_providers,
    }))
}

/// Start linking a provider to the signed-in account
#[utoipa::path(
    post,
    path = "/account/oauth/{provider}/link",
    security(("bearer_auth" = []), ("session_cookie" = [])),
    params(
        ("provider" = String, Path, description = "Provider name")
    ),
    responses(
        (status = 200, description = "Authorization URL for the provider", body = AuthorizeUrlResponse),
        (status = 401, description = "Not signed in", body = ApiError),
        (status = 404, description = "Provider not configured", body = ApiError),
        (status = 409, description = "Provider already linked", body = ApiError),
        (status = 500, description = "Internal server error", body = ApiError)
    ),
    tag = "account"
)]
pub async fn link_provider(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(provider): Path<String>,
) -> Result<Json<AuthorizeUrlResponse>, ApiError> {
    let existing = OAuthAccountRepository::new(state.db.clone())
        .find_for_user_and_provider(user.id, &provider)
        .await?;
    if existing.is_some() {
        return Err(conflict(&format!("{provider} is already linked")));
    }

    let url = begin_authorization(
        &state,
        &provider,
        Some(user.id),
        Some(SETTINGS_PAGE.to_string()),
    )
    .await?;

    Ok(Json(AuthorizeUrlResponse {
        authorize_url: url.to_string(),
    }))
}

/// Unlink a provider from the signed-in account
///
/// Refused when the provider is the last way to sign in. Tokens are revoked
/// at the provider on a best-effort basis.
#[utoipa::path(
    delete,
    path = "/account/oauth/{provider}",
    security(("bearer_auth" = []), ("session_cookie" = [])),
    params(
        ("provider" = String, Path, description = "Provider name")
    ),
    responses(
        (status = 204, description = "Provider unlinked"),
        (status = 401, description = "Not signed in", body = ApiError),
        (status = 404, description = "Provider not linked", body = ApiError),
        (status = 409, description = "Last authentication method", body = ApiError),
        (status = 500, description = "Internal server error", body = ApiError)
    ),
    tag = "account"
)]
pub async fn unlink_provider(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(provider): Path<String>,
) -> Result<StatusCode, ApiError> {
    let accounts = OAuthAccountRepository::new(state.db.clone());
    let tokens = OAuthTokenRepository::new(state.db.clone(), state.token_cipher.clone());

    // Read the tokens first; they are deleted together with the account.
    let revocable = match accounts.find_for_user_and_provider(user.id, &provider).await? {
        Some(account) => match tokens.find_for_account(account.id).await? {
            Some(row) => match tokens.decrypt(&row) {
                Ok(stored) => Some(stored),
                Err(e) => {
                    tracing::warn!(error = %e, "Stored token unreadable; skipping revocation");
                    None
                }
            },
            None => None,
        },
        None => None,
    };

    match accounts.unlink(&user, &provider).await {
        Ok(_) => {}
        Err(UnlinkError::NotLinked(_)) => return Err(not_found("Linked provider")),
        Err(e @ UnlinkError::LastAuthMethod) => return Err(conflict(&e.to_string())),
        Err(UnlinkError::Database(e)) => return Err(e.into()),
    }

    if let (Some(stored), Ok(client)) = (revocable, state.providers.get(&provider)) {
        let token = stored.refresh_token.unwrap_or(stored.access_token);
        let revoked = client.revoke_token(&token).await;
        tracing::info!(user_id = user.id, provider = %provider, revoked, "Provider token revocation attempted");
    }

    Ok(StatusCode::NO_CONTENT)
}
