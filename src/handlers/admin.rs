//! # Admin RBAC Handlers
//!
//! Role, permission and assignment management. Every route requires
//! `role.manage`; holders of the admin role pass regardless. Mutations drop
//! the affected entries from the permission cache.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use utoipa::ToSchema;

use crate::auth::AuthContext;
use crate::error::{ApiError, conflict, not_found, validation_error};
use crate::handlers::types::{
    AdminUserResponse, PageMeta, PaginationQuery, PermissionResponse, RoleResponse, UserPage,
    UserResponse, require_text,
};
use crate::models::{role, user};
use crate::rbac::ADMIN_ROLE;
use crate::repositories::{PermissionRepository, RoleRepository, UserRepository};
use crate::server::AppState;

/// Permission guarding every admin route.
const MANAGE_ROLES: &str = "role.manage";

/// Longest accepted role name.
const MAX_ROLE_NAME_LEN: usize = 64;

/// Request payload for creating a role
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct CreateRoleRequest {
    #[schema(example = "Editor")]
    pub name: String,
    #[schema(example = "Edits anyone's posts")]
    pub description: Option<String>,
}

fn roles(state: &AppState) -> RoleRepository {
    RoleRepository::new(state.db.clone()).with_cache(state.resolver.cache().clone())
}

async fn load_role(repo: &RoleRepository, id: i32) -> Result<role::Model, ApiError> {
    repo.find_by_id(id).await?.ok_or_else(|| not_found("Role"))
}

async fn load_user(state: &AppState, id: i32) -> Result<user::Model, ApiError> {
    UserRepository::new(state.db.clone())
        .find_by_id(id)
        .await?
        .ok_or_else(|| not_found("User"))
}

async fn role_response(repo: &RoleRepository, role: &role::Model) -> Result<RoleResponse, ApiError> {
    let permissions = repo.permissions_for_role(role).await?;
    Ok(RoleResponse::new(role, &permissions))
}

async fn admin_user_response(
    repo: &RoleRepository,
    user: &user::Model,
) -> Result<AdminUserResponse, ApiError> {
    let roles = repo.roles_for_user(user.id).await?;
    Ok(AdminUserResponse {
        user: UserResponse::from(user),
        roles: roles.into_iter().map(|r| r.name).collect(),
        has_password: user.has_password(),
    })
}

/// List roles with their permissions
#[utoipa::path(
    get,
    path = "/api/admin/roles",
    security(("bearer_auth" = []), ("session_cookie" = [])),
    responses(
        (status = 200, description = "All roles", body = Vec<RoleResponse>),
        (status = 401, description = "Not signed in", body = ApiError),
        (status = 403, description = "Missing permission role.manage", body = ApiError),
        (status = 500, description = "Internal server error", body = ApiError)
    ),
    tag = "admin"
)]
pub async fn list_roles(
    State(state): State<AppState>,
    auth: AuthContext,
) -> Result<Json<Vec<RoleResponse>>, ApiError> {
    auth.requires_permission(MANAGE_ROLES, None).await?;

    let repo = roles(&state);
    let mut response = Vec::new();
    for role in repo.list().await? {
        response.push(role_response(&repo, &role).await?);
    }
    Ok(Json(response))
}

/// Create a role
#[utoipa::path(
    post,
    path = "/api/admin/roles",
    security(("bearer_auth" = []), ("session_cookie" = [])),
    request_body = CreateRoleRequest,
    responses(
        (status = 201, description = "Role created", body = RoleResponse),
        (status = 400, description = "Validation failed", body = ApiError),
        (status = 401, description = "Not signed in", body = ApiError),
        (status = 403, description = "Missing permission role.manage", body = ApiError),
        (status = 409, description = "Role name taken", body = ApiError),
        (status = 500, description = "Internal server error", body = ApiError)
    ),
    tag = "admin"
)]
pub async fn create_role(
    State(state): State<AppState>,
    auth: AuthContext,
    Json(request): Json<CreateRoleRequest>,
) -> Result<(StatusCode, Json<RoleResponse>), ApiError> {
    auth.requires_permission(MANAGE_ROLES, None).await?;

    require_text("name", &request.name)?;
    let name = request.name.trim();
    if name.chars().count() > MAX_ROLE_NAME_LEN {
        return Err(validation_error(
            "name exceeds maximum length",
            json!({ "field": "name", "max_length": MAX_ROLE_NAME_LEN }),
        ));
    }

    let repo = roles(&state);
    if repo.find_by_name(name).await?.is_some() {
        return Err(conflict(&format!("Role {name} already exists")));
    }
    let role = repo.create(name, request.description.as_deref()).await?;
    tracing::info!(role_id = role.id, role = %role.name, "Role created");

    Ok((StatusCode::CREATED, Json(RoleResponse::new(&role, &[]))))
}

/// Delete a role
#[utoipa::path(
    delete,
    path = "/api/admin/roles/{id}",
    security(("bearer_auth" = []), ("session_cookie" = [])),
    params(
        ("id" = i32, Path, description = "Role id")
    ),
    responses(
        (status = 204, description = "Role deleted with its assignments and grants"),
        (status = 401, description = "Not signed in", body = ApiError),
        (status = 403, description = "Missing permission role.manage", body = ApiError),
        (status = 404, description = "Role not found", body = ApiError),
        (status = 409, description = "The admin role cannot be deleted", body = ApiError),
        (status = 500, description = "Internal server error", body = ApiError)
    ),
    tag = "admin"
)]
pub async fn delete_role(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(id): Path<i32>,
) -> Result<StatusCode, ApiError> {
    auth.requires_permission(MANAGE_ROLES, None).await?;

    let repo = roles(&state);
    let role = load_role(&repo, id).await?;
    if role.name.eq_ignore_ascii_case(ADMIN_ROLE) {
        return Err(conflict("The admin role cannot be deleted"));
    }

    repo.delete(role.id).await?;
    tracing::info!(role_id = role.id, role = %role.name, "Role deleted");
    Ok(StatusCode::NO_CONTENT)
}

/// List all permissions
#[utoipa::path(
    get,
    path = "/api/admin/permissions",
    security(("bearer_auth" = []), ("session_cookie" = [])),
    responses(
        (status = 200, description = "Permission catalog", body = Vec<PermissionResponse>),
        (status = 401, description = "Not signed in", body = ApiError),
        (status = 403, description = "Missing permission role.manage", body = ApiError),
        (status = 500, description = "Internal server error", body = ApiError)
    ),
    tag = "admin"
)]
pub async fn list_permissions(
    State(state): State<AppState>,
    auth: AuthContext,
) -> Result<Json<Vec<PermissionResponse>>, ApiError> {
    auth.requires_permission(MANAGE_ROLES, None).await?;

    let permissions = PermissionRepository::new(state.db.clone()).list().await?;
    Ok(Json(permissions.iter().map(PermissionResponse::from).collect()))
}

/// Grant a permission to a role
#[utoipa::path(
    post,
    path = "/api/admin/roles/{id}/permissions/{permission_id}",
    security(("bearer_auth" = []), ("session_cookie" = [])),
    params(
        ("id" = i32, Path, description = "Role id"),
        ("permission_id" = i32, Path, description = "Permission id")
    ),
    responses(
        (status = 200, description = "Role with the permission granted", body = RoleResponse),
        (status = 401, description = "Not signed in", body = ApiError),
        (status = 403, description = "Missing permission role.manage", body = ApiError),
        (status = 404, description = "Role or permission not found", body = ApiError),
        (status = 500, description = "Internal server error", body = ApiError)
    ),
    tag = "admin"
)]
pub async fn grant_permission(
    State(state): State<AppState>,
    auth: AuthContext,
    Path((id, permission_id)): Path<(i32, i32)>,
) -> Result<Json<RoleResponse>, ApiError> {
    auth.requires_permission(MANAGE_ROLES, None).await?;
    let admin = auth.require_user()?;

    let repo = roles(&state);
    let role = load_role(&repo, id).await?;
    let permission = PermissionRepository::new(state.db.clone())
        .find_by_id(permission_id)
        .await?
        .ok_or_else(|| not_found("Permission"))?;

    if repo
        .grant_permission(role.id, permission.id, Some(admin.id))
        .await?
    {
        tracing::info!(role = %role.name, permission = %permission.name, granted_by = admin.id, "Permission granted");
    }

    Ok(Json(role_response(&repo, &role).await?))
}

/// Revoke a permission from a role
#[utoipa::path(
    delete,
    path = "/api/admin/roles/{id}/permissions/{permission_id}",
    security(("bearer_auth" = []), ("session_cookie" = [])),
    params(
        ("id" = i32, Path, description = "Role id"),
        ("permission_id" = i32, Path, description = "Permission id")
    ),
    responses(
        (status = 204, description = "Permission revoked"),
        (status = 401, description = "Not signed in", body = ApiError),
        (status = 403, description = "Missing permission role.manage", body = ApiError),
        (status = 404, description = "The role does not hold the permission", body = ApiError),
        (status = 500, description = "Internal server error", body = ApiError)
    ),
    tag = "admin"
)]
pub async fn revoke_permission(
    State(state): State<AppState>,
    auth: AuthContext,
    Path((id, permission_id)): Path<(i32, i32)>,
) -> Result<StatusCode, ApiError> {
    auth.requires_permission(MANAGE_ROLES, None).await?;

    if !roles(&state).revoke_permission(id, permission_id).await? {
        return Err(not_found("Permission grant"));
    }
    tracing::info!(role_id = id, permission_id, "Permission revoked");
    Ok(StatusCode::NO_CONTENT)
}

/// List users with their roles
#[utoipa::path(
    get,
    path = "/api/admin/users",
    security(("bearer_auth" = []), ("session_cookie" = [])),
    params(PaginationQuery),
    responses(
        (status = 200, description = "One page of users", body = UserPage),
        (status = 401, description = "Not signed in", body = ApiError),
        (status = 403, description = "Missing permission role.manage", body = ApiError),
        (status = 500, description = "Internal server error", body = ApiError)
    ),
    tag = "admin"
)]
pub async fn list_users(
    State(state): State<AppState>,
    auth: AuthContext,
    Query(query): Query<PaginationQuery>,
) -> Result<Json<UserPage>, ApiError> {
    auth.requires_permission(MANAGE_ROLES, None).await?;

    let (page, per_page) = query.resolve();
    let (users, total) = UserRepository::new(state.db.clone())
        .list(page, per_page)
        .await?;

    let repo = roles(&state);
    let mut data = Vec::with_capacity(users.len());
    for user in &users {
        data.push(admin_user_response(&repo, user).await?);
    }

    Ok(Json(UserPage {
        data,
        meta: PageMeta::new(page, per_page, total),
    }))
}

/// Assign a role to a user
#[utoipa::path(
    post,
    path = "/api/admin/users/{id}/roles/{role_id}",
    security(("bearer_auth" = []), ("session_cookie" = [])),
    params(
        ("id" = i32, Path, description = "User id"),
        ("role_id" = i32, Path, description = "Role id")
    ),
    responses(
        (status = 200, description = "User with the role assigned", body = AdminUserResponse),
        (status = 401, description = "Not signed in", body = ApiError),
        (status = 403, description = "Missing permission role.manage", body = ApiError),
        (status = 404, description = "User or role not found", body = ApiError),
        (status = 500, description = "Internal server error", body = ApiError)
    ),
    tag = "admin"
)]
pub async fn assign_role(
    State(state): State<AppState>,
    auth: AuthContext,
    Path((id, role_id)): Path<(i32, i32)>,
) -> Result<Json<AdminUserResponse>, ApiError> {
    auth.requires_permission(MANAGE_ROLES, None).await?;
    let admin = auth.require_user()?;

    let repo = roles(&state);
    let user = load_user(&state, id).await?;
    let role = load_role(&repo, role_id).await?;

    if repo.assign_to_user(user.id, role.id, Some(admin.id)).await? {
        tracing::info!(user_id = user.id, role = %role.name, assigned_by = admin.id, "Role assigned");
    }

    Ok(Json(admin_user_response(&repo, &user).await?))
}

/// Remove a role from a user
#[utoipa::path(
    delete,
    path = "/api/admin/users/{id}/roles/{role_id}",
    security(("bearer_auth" = []), ("session_cookie" = [])),
    params(
        ("id" = i32, Path, description = "User id"),
        ("role_id" = i32, Path, description = "Role id")
    ),
    responses(
        (status = 204, description = "Role removed"),
        (status = 401, description = "Not signed in", body = ApiError),
        (status = 403, description = "Missing permission role.manage", body = ApiError),
        (status = 404, description = "The user does not hold the role", body = ApiError),
        (status = 500, description = "Internal server error", body = ApiError)
    ),
    tag = "admin"
)]
pub async fn remove_role(
    State(state): State<AppState>,
    auth: AuthContext,
    Path((id, role_id)): Path<(i32, i32)>,
) -> Result<StatusCode, ApiError> {
    auth.requires_permission(MANAGE_ROLES, None).await?;

    if !roles(&state).remove_from_user(id, role_id).await? {
        return Err(not_found("Role assignment"));
    }
    tracing::info!(user_id = id, role_id, "Role removed");
    Ok(StatusCode::NO_CONTENT)
}
