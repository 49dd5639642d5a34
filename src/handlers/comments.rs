//! # Comments API Handlers

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::auth::AuthContext;
use crate::error::{ApiError, not_found};
use crate::handlers::posts::load_post;
use crate::handlers::types::{CommentResponse, require_text};
use crate::models::comment;
use crate::repositories::CommentRepository;
use crate::server::AppState;

/// Request payload for writing or editing a comment
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct CommentRequest {
    #[schema(example = "Nice post!")]
    pub text: String,
}

async fn load_comment(state: &AppState, id: i32) -> Result<comment::Model, ApiError> {
    CommentRepository::new(state.db.clone())
        .find_by_id(id)
        .await?
        .ok_or_else(|| not_found("Comment"))
}

/// List the comments on a post, oldest first
#[utoipa::path(
    get,
    path = "/api/posts/{id}/comments",
    params(
        ("id" = i32, Path, description = "Post id")
    ),
    responses(
        (status = 200, description = "Comments on the post", body = Vec<CommentResponse>),
        (status = 404, description = "Post not found", body = ApiError),
        (status = 500, description = "Internal server error", body = ApiError)
    ),
    tag = "comments"
)]
pub async fn list_comments(
    State(state): State<AppState>,
    Path(post_id): Path<i32>,
) -> Result<Json<Vec<CommentResponse>>, ApiError> {
    let post = load_post(&state, post_id).await?;
    let comments = CommentRepository::new(state.db.clone())
        .list_for_post(post.id)
        .await?;
    Ok(Json(comments.iter().map(CommentResponse::from).collect()))
}

/// Comment on a post
#[utoipa::path(
    post,
    path = "/api/posts/{id}/comments",
    security(("bearer_auth" = []), ("session_cookie" = [])),
    params(
        ("id" = i32, Path, description = "Post id")
    ),
    request_body = CommentRequest,
    responses(
        (status = 201, description = "Comment created", body = CommentResponse),
        (status = 400, description = "Validation failed", body = ApiError),
        (status = 401, description = "Not signed in", body = ApiError),
        (status = 403, description = "Missing permission comment.create", body = ApiError),
        (status = 404, description = "Post not found", body = ApiError),
        (status = 500, description = "Internal server error", body = ApiError)
    ),
    tag = "comments"
)]
pub async fn create_comment(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(post_id): Path<i32>,
    Json(request): Json<CommentRequest>,
) -> Result<(StatusCode, Json<CommentResponse>), ApiError> {
    auth.requires_permission("comment.create", None).await?;
    let user = auth.require_user()?;
    require_text("text", &request.text)?;

    let post = load_post(&state, post_id).await?;
    let comment = CommentRepository::new(state.db.clone())
        .create(post.id, user.id, &request.text)
        .await?;
    tracing::info!(comment_id = comment.id, post_id = post.id, user_id = user.id, "Comment created");

    Ok((StatusCode::CREATED, Json(CommentResponse::from(&comment))))
}

/// Edit a comment
#[utoipa::path(
    put,
    path = "/api/comments/{id}",
    security(("bearer_auth" = []), ("session_cookie" = [])),
    params(
        ("id" = i32, Path, description = "Comment id")
    ),
    request_body = CommentRequest,
    responses(
        (status = 200, description = "Comment updated", body = CommentResponse),
        (status = 400, description = "Validation failed", body = ApiError),
        (status = 401, description = "Not signed in", body = ApiError),
        (status = 403, description = "Missing permission comment.edit for this comment", body = ApiError),
        (status = 404, description = "Comment not found", body = ApiError),
        (status = 500, description = "Internal server error", body = ApiError)
    ),
    tag = "comments"
)]
pub async fn update_comment(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(id): Path<i32>,
    Json(request): Json<CommentRequest>,
) -> Result<Json<CommentResponse>, ApiError> {
    auth.require_user()?;
    let comment = load_comment(&state, id).await?;
    auth.requires_permission("comment.edit", Some(&comment)).await?;
    require_text("text", &request.text)?;

    let comment = CommentRepository::new(state.db.clone())
        .update_text(comment, &request.text)
        .await?;
    Ok(Json(CommentResponse::from(&comment)))
}

/// Delete a comment
#[utoipa::path(
    delete,
    path = "/api/comments/{id}",
    security(("bearer_auth" = []), ("session_cookie" = [])),
    params(
        ("id" = i32, Path, description = "Comment id")
    ),
    responses(
        (status = 204, description = "Comment deleted"),
        (status = 401, description = "Not signed in", body = ApiError),
        (status = 403, description = "Missing permission comment.delete for this comment", body = ApiError),
        (status = 404, description = "Comment not found", body = ApiError),
        (status = 500, description = "Internal server error", body = ApiError)
    ),
    tag = "comments"
)]
pub async fn delete_comment(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(id): Path<i32>,
) -> Result<StatusCode, ApiError> {
    auth.require_user()?;
    let comment = load_comment(&state, id).await?;
    auth.requires_permission("comment.delete", Some(&comment)).await?;

    CommentRepository::new(state.db.clone())
        .delete(comment.id)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}
