//! # OAuth Sign-in Handlers
//!
//! Starts the authorization code flow with PKCE and completes it on the
//! provider callback. The callback signs in the owner of a known provider
//! identity, links a new identity when the flow was started from the account
//! page, links by verified email, or creates a new user.

use axum::{
    extract::{Path, Query, State},
    http::{
        HeaderValue, StatusCode,
        header::{LOCATION, SET_COOKIE},
    },
    response::{IntoResponse, Response},
};
use metrics::counter;
use serde::Deserialize;
use thiserror::Error;
use url::Url;
use utoipa::IntoParams;

use crate::error::{ApiError, internal_error, not_found};
use crate::models::{oauth_account, user};
use crate::oauth::{OAuthError, OAuthProvider, TokenSet, UserInfo};
use crate::repositories::{
    AccountProfile, NewUser, OAuthAccountRepository, OAuthStateRepository, OAuthTokenRepository,
    UserRepository, user::normalize_email,
};
use crate::seeds::DEFAULT_USER_ROLE;
use crate::server::AppState;

/// Where failed callbacks send the browser.
const LOGIN_PAGE: &str = "/auth/login";

/// Query parameters accepted when starting a sign-in
#[derive(Debug, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct LoginQuery {
    /// Local path to return to after signing in (default: `/`)
    #[param(example = "/posts/12")]
    pub next: Option<String>,
}

/// Query parameters sent by the provider to the callback
#[derive(Debug, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct CallbackQuery {
    pub code: Option<String>,
    pub state: Option<String>,
    /// Set by the provider when the user denied access or the request failed
    pub error: Option<String>,
    pub error_description: Option<String>,
}

/// Why a callback did not sign anyone in.
#[derive(Debug, Error)]
pub enum CallbackFailure {
    #[error("provider returned error '{0}'")]
    ProviderDenied(String),
    #[error("callback carried no authorization code")]
    MissingCode,
    #[error("state is unknown, expired, already used, or issued for another provider")]
    InvalidState,
    #[error(transparent)]
    UnknownProvider(OAuthError),
    #[error("code exchange failed: {0}")]
    Exchange(OAuthError),
    #[error("profile lookup failed: {0}")]
    Profile(OAuthError),
    #[error("this provider identity belongs to another user")]
    AccountInUse,
    #[error("the user already has an account with this provider")]
    AlreadyLinked,
    #[error("provider did not supply an email address")]
    EmailRequired,
    #[error("an existing user has this email and the provider did not verify it")]
    EmailInUse,
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl CallbackFailure {
    /// Short code placed in the `error` query parameter of the login page.
    pub fn code(&self) -> &'static str {
        match self {
            CallbackFailure::ProviderDenied(_) => "access_denied",
            CallbackFailure::MissingCode => "missing_code",
            CallbackFailure::InvalidState => "invalid_state",
            CallbackFailure::UnknownProvider(_) => "unknown_provider",
            CallbackFailure::Exchange(_) => "token_exchange_failed",
            CallbackFailure::Profile(_) => "profile_unavailable",
            CallbackFailure::AccountInUse => "account_in_use",
            CallbackFailure::AlreadyLinked => "already_linked",
            CallbackFailure::EmailRequired => "email_required",
            CallbackFailure::EmailInUse => "email_in_use",
            CallbackFailure::Internal(_) => "server_error",
        }
    }
}

impl From<sea_orm::DbErr> for CallbackFailure {
    fn from(error: sea_orm::DbErr) -> Self {
        CallbackFailure::Internal(error.into())
    }
}

/// Accepts only local absolute paths, so the callback cannot be turned into
/// an open redirect.
pub fn sanitize_next(next: Option<&str>) -> Option<String> {
    let next = next?.trim();
    let local = next.starts_with('/')
        && !next.starts_with("//")
        && !next.contains('\\')
        && !next.chars().any(char::is_control);
    local.then(|| next.to_string())
}

/// `302 Found` to `location`.
pub(crate) fn found(location: &str) -> Response {
    let location = HeaderValue::from_str(location).unwrap_or(HeaderValue::from_static("/"));
    (StatusCode::FOUND, [(LOCATION, location)]).into_response()
}

fn login_error_redirect(code: &str) -> Response {
    found(&format!("{LOGIN_PAGE}?error={code}"))
}

/// Records a new authorization request and returns the provider URL.
pub(crate) async fn begin_authorization(
    state: &AppState,
    provider_name: &str,
    link_user_id: Option<i32>,
    next: Option<String>,
) -> Result<Url, ApiError> {
    let provider = state
        .providers
        .get(provider_name)
        .map_err(|_| not_found("OAuth provider"))?;

    let state_token = provider.generate_state();
    let pkce = provider.generate_pkce_pair();

    OAuthStateRepository::new(state.db.clone())
        .create(
            provider.name(),
            &state_token,
            &pkce.verifier,
            link_user_id,
            next,
        )
        .await?;

    provider
        .build_authorization_url(&state_token, &pkce)
        .map_err(|e| {
            tracing::error!(provider = provider_name, error = %e, "Failed to build authorization URL");
            internal_error()
        })
}

/// Start signing in with a provider
#[utoipa::path(
    get,
    path = "/auth/oauth/{provider}/login",
    params(
        ("provider" = String, Path, description = "Provider name: google, github, microsoft or facebook"),
        LoginQuery
    ),
    responses(
        (status = 302, description = "Redirect to the provider's consent page"),
        (status = 404, description = "Provider not configured", body = ApiError),
        (status = 429, description = "Too many attempts", body = ApiError),
        (status = 500, description = "Internal server error", body = ApiError)
    ),
    tag = "auth"
)]
pub async fn login(
    State(state): State<AppState>,
    Path(provider): Path<String>,
    Query(query): Query<LoginQuery>,
) -> Result<Response, ApiError> {
    let next = sanitize_next(query.next.as_deref());
    let url = begin_authorization(&state, &provider, None, next).await?;
    tracing::debug!(provider = %provider, "Redirecting to OAuth provider");
    Ok(found(url.as_str()))
}

/// Complete sign-in after the provider redirects back
///
/// Failures redirect to `/auth/login?error={code}`.
#[utoipa::path(
    get,
    path = "/auth/oauth/{provider}/callback",
    params(
        ("provider" = String, Path, description = "Provider name"),
        CallbackQuery
    ),
    responses(
        (status = 302, description = "Signed in and redirected to `next`, or redirected to the login page with an error code", headers(
            ("Set-Cookie", description = "Session cookie `bloggy_session` on success")
        )),
        (status = 429, description = "Too many attempts", body = ApiError)
    ),
    tag = "auth"
)]
pub async fn callback(
    State(state): State<AppState>,
    Path(provider): Path<String>,
    Query(query): Query<CallbackQuery>,
) -> Response {
    match complete_callback(&state, &provider, query).await {
        Ok((user, redirect_to)) => {
            let token = match state.sessions.issue(user.id) {
                Ok(token) => token,
                Err(_) => return login_error_redirect("server_error"),
            };
            counter!("oauth_logins_total", "provider" => provider.clone(), "outcome" => "success")
                .increment(1);
            tracing::info!(provider = %provider, user_id = user.id, "OAuth sign-in completed");

            let location = HeaderValue::from_str(&redirect_to).unwrap_or(HeaderValue::from_static("/"));
            (
                StatusCode::FOUND,
                [
                    (LOCATION, location),
                    (SET_COOKIE, state.sessions.session_cookie(&token)),
                ],
            )
                .into_response()
        }
        Err(failure) => {
            counter!("oauth_logins_total", "provider" => provider.clone(), "outcome" => "failure")
                .increment(1);
            match &failure {
                CallbackFailure::Internal(e) => {
                    tracing::error!(provider = %provider, error = ?e, "OAuth callback failed");
                }
                other => {
                    tracing::warn!(provider = %provider, error = %other, code = other.code(), "OAuth callback rejected");
                }
            }
            login_error_redirect(failure.code())
        }
    }
}

async fn complete_callback(
    state: &AppState,
    provider_name: &str,
    query: CallbackQuery,
) -> Result<(user::Model, String), CallbackFailure> {
    let states = OAuthStateRepository::new(state.db.clone());

    if let Some(error) = query.error {
        // Burn the state so it cannot be replayed.
        if let Some(token) = query.state.as_deref() {
            states.find_and_consume(provider_name, token).await?;
        }
        tracing::info!(
            provider = provider_name,
            error = %error,
            description = query.error_description.as_deref().unwrap_or(""),
            "Provider reported an authorization error"
        );
        return Err(CallbackFailure::ProviderDenied(error));
    }

    let provider = state
        .providers
        .get(provider_name)
        .map_err(CallbackFailure::UnknownProvider)?;

    let token = query.state.ok_or(CallbackFailure::InvalidState)?;
    let pending = states
        .find_and_consume(provider.name(), &token)
        .await?
        .ok_or(CallbackFailure::InvalidState)?;
    let code = query.code.filter(|c| !c.is_empty()).ok_or(CallbackFailure::MissingCode)?;

    let tokens = provider
        .exchange_code_for_tokens(&code, &pending.code_verifier)
        .await
        .map_err(CallbackFailure::Exchange)?;
    let info = provider
        .get_user_info(&tokens.access_token)
        .await
        .map_err(CallbackFailure::Profile)?;

    let (user, account) = resolve_account(state, provider.as_ref(), &info, pending.link_user_id).await?;
    store_tokens(state, &account, &tokens).await?;

    let redirect_to = pending.redirect_to.unwrap_or_else(|| "/".to_string());
    Ok((user, redirect_to))
}

fn profile_of(info: &UserInfo) -> AccountProfile {
    AccountProfile {
        email: info.email.as_deref().map(normalize_email),
        name: info.name.clone(),
        picture: info.picture.clone(),
        raw: (!info.raw.is_null()).then(|| info.raw.clone()),
    }
}

/// First and last name from the profile, falling back to splitting the
/// display name, then to the local part of the email.
pub fn names_of(info: &UserInfo) -> (String, String) {
    let display = info.name.as_deref().map(str::trim).unwrap_or("");
    let (display_first, display_last) = display.split_once(' ').unwrap_or((display, ""));

    let first = info
        .given_name
        .clone()
        .filter(|n| !n.trim().is_empty())
        .or_else(|| (!display_first.is_empty()).then(|| display_first.to_string()))
        .or_else(|| {
            info.email
                .as_deref()
                .and_then(|email| email.split('@').next())
                .map(str::to_string)
        })
        .unwrap_or_default();
    let last = info
        .family_name
        .clone()
        .filter(|n| !n.trim().is_empty())
        .unwrap_or_else(|| display_last.trim().to_string());

    (first, last)
}

async fn resolve_account(
    state: &AppState,
    provider: &dyn OAuthProvider,
    info: &UserInfo,
    link_user_id: Option<i32>,
) -> Result<(user::Model, oauth_account::Model), CallbackFailure> {
    let provider_name = provider.name();
    let accounts = OAuthAccountRepository::new(state.db.clone());
    let users = UserRepository::new(state.db.clone());
    let profile = profile_of(info);

    // Known identity: sign its owner in.
    if let Some(account) = accounts.find_by_provider_user(provider_name, &info.id).await? {
        if link_user_id.is_some_and(|id| id != account.user_id) {
            return Err(CallbackFailure::AccountInUse);
        }
        let user = users
            .find_by_id(account.user_id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("OAuth account {} has no user", account.id))?;
        let account = accounts.record_login(account, profile).await?;
        return Ok((user, account));
    }

    // Linking from the account page.
    if let Some(user_id) = link_user_id {
        let user = users
            .find_by_id(user_id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("user {user_id} started a link and no longer exists"))?;
        if accounts
            .find_for_user_and_provider(user.id, provider_name)
            .await?
            .is_some()
        {
            return Err(CallbackFailure::AlreadyLinked);
        }
        let account = accounts
            .create(user.id, provider_name, &info.id, profile)
            .await?;
        tracing::info!(user_id = user.id, provider = provider_name, "OAuth account linked");
        return Ok((user, account));
    }

    let email = info
        .email
        .as_deref()
        .map(normalize_email)
        .filter(|e| !e.is_empty())
        .ok_or(CallbackFailure::EmailRequired)?;

    let user = match users.find_by_email(&email).await? {
        Some(existing) => {
            if !info.email_verified {
                return Err(CallbackFailure::EmailInUse);
            }
            if accounts
                .find_for_user_and_provider(existing.id, provider_name)
                .await?
                .is_some()
            {
                return Err(CallbackFailure::AlreadyLinked);
            }
            tracing::info!(user_id = existing.id, provider = provider_name, "Linking OAuth account by verified email");
            existing
        }
        None => {
            let (first_name, last_name) = names_of(info);
            users
                .create_with_role(
                    NewUser {
                        email,
                        first_name,
                        last_name,
                        password_hash: None,
                    },
                    DEFAULT_USER_ROLE,
                )
                .await?
        }
    };

    let account = accounts
        .create(user.id, provider_name, &info.id, profile)
        .await?;
    Ok((user, account))
}

async fn store_tokens(
    state: &AppState,
    account: &oauth_account::Model,
    tokens: &TokenSet,
) -> Result<(), CallbackFailure> {
    OAuthTokenRepository::new(state.db.clone(), state.token_cipher.clone())
        .store(account.id, tokens)
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_next_accepts_local_paths_only() {
        assert_eq!(sanitize_next(Some("/posts/3")).as_deref(), Some("/posts/3"));
        assert_eq!(sanitize_next(Some("/")).as_deref(), Some("/"));
        assert_eq!(sanitize_next(None), None);
        assert_eq!(sanitize_next(Some("https://evil.example")), None);
        assert_eq!(sanitize_next(Some("//evil.example")), None);
        assert_eq!(sanitize_next(Some("/\\evil.example")), None);
        assert_eq!(sanitize_next(Some("posts")), None);
    }

    #[test]
    fn test_names_prefer_structured_fields() {
        let info = UserInfo {
            name: Some("Grace Brewster Hopper".to_string()),
            given_name: Some("Grace".to_string()),
            family_name: Some("Hopper".to_string()),
            ..UserInfo::default()
        };
        assert_eq!(names_of(&info), ("Grace".to_string(), "Hopper".to_string()));
    }

    #[test]
    fn test_names_fall_back_to_display_name_then_email() {
        let info = UserInfo {
            name: Some("Grace Brewster Hopper".to_string()),
            ..UserInfo::default()
        };
        assert_eq!(
            names_of(&info),
            ("Grace".to_string(), "Brewster Hopper".to_string())
        );

        let info = UserInfo {
            email: Some("octocat@example.com".to_string()),
            ..UserInfo::default()
        };
        assert_eq!(names_of(&info), ("octocat".to_string(), String::new()));
    }

    #[test]
    fn test_failure_codes_are_query_safe() {
        let failures = [
            CallbackFailure::ProviderDenied("access_denied".into()),
            CallbackFailure::MissingCode,
            CallbackFailure::InvalidState,
            CallbackFailure::AccountInUse,
            CallbackFailure::AlreadyLinked,
            CallbackFailure::EmailRequired,
            CallbackFailure::EmailInUse,
            CallbackFailure::Internal(anyhow::anyhow!("boom")),
        ];
        for failure in failures {
            assert!(failure.code().chars().all(|c| c.is_ascii_lowercase() || c == '_'));
        }
    }
}
