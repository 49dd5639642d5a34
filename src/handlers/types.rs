//! # Common API Types
//!
//! This module contains shared types used across multiple API handlers,
//! including response bodies, pagination and input validation.

use serde::{Deserialize, Serialize};
use serde_json::json;
use utoipa::{IntoParams, ToSchema};

use crate::error::{ApiError, validation_error};
use crate::models::{comment, permission, post, role, user};

/// Default page size for list endpoints
pub const DEFAULT_PER_PAGE: u64 = 20;
/// Largest accepted page size
pub const MAX_PER_PAGE: u64 = 100;

/// Page selection for list endpoints
#[derive(Debug, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct PaginationQuery {
    /// Page number, starting at 1 (default: 1)
    #[param(example = 1)]
    pub page: Option<u64>,
    /// Items per page (default: 20, max: 100)
    #[param(example = 20)]
    pub per_page: Option<u64>,
}

impl PaginationQuery {
    /// `(page, per_page)` with defaults applied and bounds clamped.
    ///
    /// `page` is capped so the row offset `page * per_page` stays within a
    /// signed 64-bit SQL integer.
    pub fn resolve(&self) -> (u64, u64) {
        let per_page = self
            .per_page
            .unwrap_or(DEFAULT_PER_PAGE)
            .clamp(1, MAX_PER_PAGE);
        let max_page = i64::MAX as u64 / per_page;
        let page = self.page.unwrap_or(1).clamp(1, max_page);
        (page, per_page)
    }
}

/// Position of a page within a list
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, PartialEq, Eq)]
pub struct PageMeta {
    #[schema(example = 1)]
    pub page: u64,
    #[schema(example = 20)]
    pub per_page: u64,
    /// Total number of items across all pages
    #[schema(example = 42)]
    pub total: u64,
    #[schema(example = 3)]
    pub total_pages: u64,
}

impl PageMeta {
    pub fn new(page: u64, per_page: u64, total: u64) -> Self {
        Self {
            page,
            per_page,
            total,
            total_pages: total.div_ceil(per_page.max(1)),
        }
    }
}

/// Public view of a user
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct UserResponse {
    #[schema(example = 7)]
    pub id: i32,
    #[schema(example = "ada@example.com")]
    pub email: String,
    #[schema(example = "Ada")]
    pub first_name: String,
    #[schema(example = "Lovelace")]
    pub last_name: String,
    /// Timestamp when the user registered (ISO 8601)
    #[schema(example = "2024-01-15T10:30:00Z")]
    pub created_at: String,
}

impl From<&user::Model> for UserResponse {
    fn from(user: &user::Model) -> Self {
        Self {
            id: user.id,
            email: user.email.clone(),
            first_name: user.first_name.clone(),
            last_name: user.last_name.clone(),
            created_at: user.created_at.to_rfc3339(),
        }
    }
}

/// Issued session
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct SessionResponse {
    /// Bearer token; also set as the `bloggy_session` cookie
    pub token: String,
    /// Seconds until the token expires
    #[schema(example = 86400)]
    pub expires_in: u64,
    pub user: UserResponse,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct PostResponse {
    #[schema(example = 12)]
    pub id: i32,
    #[schema(example = "Hello, world")]
    pub title: String,
    #[schema(example = "My first post.")]
    pub text: String,
    /// Author of the post
    #[schema(example = 7)]
    pub user_id: i32,
    #[schema(example = "2024-01-15T10:30:00Z")]
    pub created_at: String,
    #[schema(example = "2024-01-15T10:30:00Z")]
    pub updated_at: String,
}

impl From<&post::Model> for PostResponse {
    fn from(post: &post::Model) -> Self {
        Self {
            id: post.id,
            title: post.title.clone(),
            text: post.text.clone(),
            user_id: post.user_id,
            created_at: post.created_at.to_rfc3339(),
            updated_at: post.updated_at.to_rfc3339(),
        }
    }
}

/// A post together with its comments, oldest first
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct PostDetailResponse {
    #[serde(flatten)]
    pub post: PostResponse,
    pub comments: Vec<CommentResponse>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CommentResponse {
    #[schema(example = 31)]
    pub id: i32,
    #[schema(example = "Nice post!")]
    pub text: String,
    #[schema(example = 12)]
    pub post_id: i32,
    #[schema(example = 9)]
    pub user_id: i32,
    #[schema(example = "2024-01-15T11:00:00Z")]
    pub created_at: String,
}

impl From<&comment::Model> for CommentResponse {
    fn from(comment: &comment::Model) -> Self {
        Self {
            id: comment.id,
            text: comment.text.clone(),
            post_id: comment.post_id,
            user_id: comment.user_id,
            created_at: comment.created_at.to_rfc3339(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct RoleResponse {
    #[schema(example = 3)]
    pub id: i32,
    #[schema(example = "Author")]
    pub name: String,
    pub description: Option<String>,
    /// Names of the permissions granted to the role
    #[schema(example = json!(["post.create", "post.edit.own"]))]
    pub permissions: Vec<String>,
}

impl RoleResponse {
    pub fn new(role: &role::Model, permissions: &[permission::Model]) -> Self {
        Self {
            id: role.id,
            name: role.name.clone(),
            description: role.description.clone(),
            permissions: permissions.iter().map(|p| p.name.clone()).collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct PermissionResponse {
    #[schema(example = 5)]
    pub id: i32,
    #[schema(example = "post.edit.own")]
    pub name: String,
    #[schema(example = "post")]
    pub resource: String,
    #[schema(example = "edit")]
    pub action: String,
    /// `own`, `any`, or empty for unscoped permissions
    #[schema(example = "own")]
    pub scope: String,
    pub description: Option<String>,
}

impl From<&permission::Model> for PermissionResponse {
    fn from(permission: &permission::Model) -> Self {
        Self {
            id: permission.id,
            name: permission.name.clone(),
            resource: permission.resource.clone(),
            action: permission.action.clone(),
            scope: permission.scope.clone(),
            description: permission.description.clone(),
        }
    }
}

/// A user with the names of their roles
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct AdminUserResponse {
    #[serde(flatten)]
    pub user: UserResponse,
    #[schema(example = json!(["Author"]))]
    pub roles: Vec<String>,
    pub has_password: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct PostPage {
    pub data: Vec<PostResponse>,
    pub meta: PageMeta,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct UserPage {
    pub data: Vec<AdminUserResponse>,
    pub meta: PageMeta,
}

/// Rejects blank values of a required text field.
pub fn require_text(field: &str, value: &str) -> Result<(), ApiError> {
    if value.trim().is_empty() {
        return Err(validation_error(
            &format!("{field} is required"),
            json!({ "field": field, "message": format!("{field} must not be empty") }),
        ));
    }
    Ok(())
}

/// Post titles are required and at most [`post::MAX_TITLE_LEN`] characters.
pub fn validate_title(title: &str) -> Result<(), ApiError> {
    require_text("title", title)?;

    let length = title.trim().chars().count();
    if length > post::MAX_TITLE_LEN {
        return Err(validation_error(
            "title exceeds maximum length",
            json!({
                "field": "title",
                "message": format!("title cannot exceed {} characters", post::MAX_TITLE_LEN),
                "max_length": post::MAX_TITLE_LEN,
                "actual_length": length
            }),
        ));
    }
    Ok(())
}
