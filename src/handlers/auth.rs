//! # Session Handlers
//!
//! Password registration and sign-in, sign-out, and the current user.

use axum::{
    extract::State,
    http::{StatusCode, header::SET_COOKIE},
    response::{IntoResponse, Json, Response},
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use utoipa::ToSchema;

use crate::auth::{CurrentUser, clear_session_cookie, hash_password, verify_password};
use crate::error::{ApiError, conflict, internal_error, unauthorized, validation_error};
use crate::handlers::types::{SessionResponse, UserResponse, require_text};
use crate::models::user;
use crate::repositories::{NewUser, UserRepository};
use crate::seeds::DEFAULT_USER_ROLE;
use crate::server::AppState;

/// Shortest accepted password, in characters.
pub const MIN_PASSWORD_LEN: usize = 8;

/// Request payload for registering with a password
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct RegisterRequest {
    #[schema(example = "ada@example.com")]
    pub email: String,
    /// At least 8 characters
    #[schema(example = "correct horse battery staple")]
    pub password: String,
    #[schema(example = "Ada")]
    pub first_name: String,
    #[schema(example = "Lovelace")]
    pub last_name: String,
}

/// Request payload for password sign-in
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct LoginRequest {
    #[schema(example = "ada@example.com")]
    pub email: String,
    #[schema(example = "correct horse battery staple")]
    pub password: String,
}

/// The signed-in user with effective roles and permissions
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct MeResponse {
    #[serde(flatten)]
    pub user: UserResponse,
    pub roles: Vec<String>,
    pub permissions: Vec<String>,
}

fn validate_registration(request: &RegisterRequest) -> Result<(), ApiError> {
    require_text("email", &request.email)?;
    let email = request.email.trim();
    let well_formed = email
        .split_once('@')
        .is_some_and(|(local, domain)| !local.is_empty() && domain.contains('.'));
    if !well_formed {
        return Err(validation_error(
            "email is not a valid address",
            json!({ "field": "email", "message": "email must look like name@example.com" }),
        ));
    }

    if request.password.chars().count() < MIN_PASSWORD_LEN {
        return Err(validation_error(
            "password is too short",
            json!({
                "field": "password",
                "message": format!("password must be at least {MIN_PASSWORD_LEN} characters"),
                "min_length": MIN_PASSWORD_LEN
            }),
        ));
    }

    require_text("first_name", &request.first_name)?;
    require_text("last_name", &request.last_name)
}

/// Issues a session for `user` and renders it as body plus cookie.
pub(crate) fn session_response(
    state: &AppState,
    user: &user::Model,
    status: StatusCode,
) -> Result<Response, ApiError> {
    let token = state.sessions.issue(user.id)?;
    let cookie = state.sessions.session_cookie(&token);
    let body = SessionResponse {
        token,
        expires_in: state.sessions.ttl().as_secs(),
        user: UserResponse::from(user),
    };
    Ok((status, [(SET_COOKIE, cookie)], Json(body)).into_response())
}

/// Register with email and password
///
/// New users receive the default `Author` role and are signed in.
#[utoipa::path(
    post,
    path = "/auth/register",
    request_body = RegisterRequest,
    responses(
        (status = 201, description = "User created and signed in", body = SessionResponse, headers(
            ("Set-Cookie", description = "Session cookie `bloggy_session`")
        )),
        (status = 400, description = "Validation failed", body = ApiError),
        (status = 409, description = "Email already registered", body = ApiError),
        (status = 429, description = "Too many attempts", body = ApiError),
        (status = 500, description = "Internal server error", body = ApiError)
    ),
    tag = "auth"
)]
pub async fn register(
    State(state): State<AppState>,
    Json(request): Json<RegisterRequest>,
) -> Result<Response, ApiError> {
    validate_registration(&request)?;

    let users = UserRepository::new(state.db.clone());
    if users.find_by_email(&request.email).await?.is_some() {
        return Err(conflict("Email already registered"));
    }

    let password_hash = hash_password(&request.password).map_err(|e| {
        tracing::error!(error = %e, "Password hashing failed");
        internal_error()
    })?;

    let user = users
        .create_with_role(
            NewUser {
                email: request.email,
                first_name: request.first_name,
                last_name: request.last_name,
                password_hash: Some(password_hash),
            },
            DEFAULT_USER_ROLE,
        )
        .await?;

    tracing::info!(user_id = user.id, "User registered");
    session_response(&state, &user, StatusCode::CREATED)
}

/// Sign in with email and password
#[utoipa::path(
    post,
    path = "/auth/login",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Signed in", body = SessionResponse, headers(
            ("Set-Cookie", description = "Session cookie `bloggy_session`")
        )),
        (status = 401, description = "Invalid email or password", body = ApiError),
        (status = 429, description = "Too many attempts", body = ApiError),
        (status = 500, description = "Internal server error", body = ApiError)
    ),
    tag = "auth"
)]
pub async fn login(
    State(state): State<AppState>,
    Json(request): Json<LoginRequest>,
) -> Result<Response, ApiError> {
    let user = UserRepository::new(state.db.clone())
        .find_by_email(&request.email)
        .await?;

    let authenticated = user.filter(|user| {
        user.password_hash
            .as_deref()
            .is_some_and(|hash| verify_password(&request.password, hash))
    });

    match authenticated {
        Some(user) => {
            tracing::info!(user_id = user.id, "User signed in");
            session_response(&state, &user, StatusCode::OK)
        }
        None => {
            tracing::info!("Password sign-in rejected");
            Err(unauthorized(Some("Invalid email or password")))
        }
    }
}

/// Sign out by clearing the session cookie
#[utoipa::path(
    post,
    path = "/auth/logout",
    responses(
        (status = 204, description = "Session cookie cleared")
    ),
    tag = "auth"
)]
pub async fn logout() -> impl IntoResponse {
    (StatusCode::NO_CONTENT, [(SET_COOKIE, clear_session_cookie())])
}

/// The signed-in user
#[utoipa::path(
    get,
    path = "/auth/me",
    security(("bearer_auth" = []), ("session_cookie" = [])),
    responses(
        (status = 200, description = "Current user", body = MeResponse),
        (status = 401, description = "Not signed in", body = ApiError)
    ),
    tag = "auth"
)]
pub async fn me(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
) -> Result<Json<MeResponse>, ApiError> {
    let grants = state.resolver.grants(user.id).await.map_err(|e| {
        tracing::error!(user_id = user.id, error = %e, "Failed to load grants");
        internal_error()
    })?;

    let mut permissions: Vec<String> = grants.permissions.iter().cloned().collect();
    permissions.sort();

    Ok(Json(MeResponse {
        user: UserResponse::from(&user),
        roles: grants.roles.clone(),
        permissions,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(email: &str, password: &str) -> RegisterRequest {
        RegisterRequest {
            email: email.to_string(),
            password: password.to_string(),
            first_name: "Ada".to_string(),
            last_name: "Lovelace".to_string(),
        }
    }

    #[test]
    fn test_registration_validation() {
        assert!(validate_registration(&request("ada@example.com", "long enough")).is_ok());
        assert!(validate_registration(&request("not-an-email", "long enough")).is_err());
        assert!(validate_registration(&request("ada@localhost", "long enough")).is_err());
        assert!(validate_registration(&request("ada@example.com", "short")).is_err());

        let mut blank_name = request("ada@example.com", "long enough");
        blank_name.last_name = " ".to_string();
        let error = validate_registration(&blank_name).unwrap_err();
        assert_eq!(error.details.expect("details")["field"], "last_name");
    }
}
