//! # Posts API Handlers
//!
//! Reading is public. Writing goes through the RBAC guards; edits and deletes
//! pass the loaded post so `own` grants only cover the author's posts.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::auth::AuthContext;
use crate::error::{ApiError, not_found};
use crate::handlers::types::{
    CommentResponse, PageMeta, PaginationQuery, PostDetailResponse, PostPage, PostResponse,
    require_text, validate_title,
};
use crate::models::post;
use crate::repositories::{CommentRepository, PostRepository};
use crate::server::AppState;

/// Request payload for creating a post
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct CreatePostRequest {
    /// 1 to 200 characters
    #[schema(example = "Hello, world")]
    pub title: String,
    #[schema(example = "My first post.")]
    pub text: String,
}

/// Request payload for editing a post; omitted fields are kept
#[derive(Debug, Default, Serialize, Deserialize, ToSchema)]
pub struct UpdatePostRequest {
    #[schema(example = "Hello again")]
    pub title: Option<String>,
    pub text: Option<String>,
}

pub(crate) async fn load_post(state: &AppState, id: i32) -> Result<post::Model, ApiError> {
    PostRepository::new(state.db.clone())
        .find_by_id(id)
        .await?
        .ok_or_else(|| not_found("Post"))
}

/// List posts, newest first
#[utoipa::path(
    get,
    path = "/api/posts",
    params(PaginationQuery),
    responses(
        (status = 200, description = "One page of posts", body = PostPage),
        (status = 500, description = "Internal server error", body = ApiError)
    ),
    tag = "posts"
)]
pub async fn list_posts(
    State(state): State<AppState>,
    Query(query): Query<PaginationQuery>,
) -> Result<Json<PostPage>, ApiError> {
    let (page, per_page) = query.resolve();
    let (posts, total) = PostRepository::new(state.db.clone())
        .list(page, per_page)
        .await?;

    Ok(Json(PostPage {
        data: posts.iter().map(PostResponse::from).collect(),
        meta: PageMeta::new(page, per_page, total),
    }))
}

/// Get a post with its comments
#[utoipa::path(
    get,
    path = "/api/posts/{id}",
    params(
        ("id" = i32, Path, description = "Post id")
    ),
    responses(
        (status = 200, description = "The post and its comments", body = PostDetailResponse),
        (status = 404, description = "Post not found", body = ApiError),
        (status = 500, description = "Internal server error", body = ApiError)
    ),
    tag = "posts"
)]
pub async fn get_post(
    State(state): State<AppState>,
    Path(id): Path<i32>,
) -> Result<Json<PostDetailResponse>, ApiError> {
    let post = load_post(&state, id).await?;
    let comments = CommentRepository::new(state.db.clone())
        .list_for_post(post.id)
        .await?;

    Ok(Json(PostDetailResponse {
        post: PostResponse::from(&post),
        comments: comments.iter().map(CommentResponse::from).collect(),
    }))
}

/// Create a post
#[utoipa::path(
    post,
    path = "/api/posts",
    security(("bearer_auth" = []), ("session_cookie" = [])),
    request_body = CreatePostRequest,
    responses(
        (status = 201, description = "Post created", body = PostResponse, headers(
            ("Location", description = "URL of the created post")
        )),
        (status = 400, description = "Validation failed", body = ApiError),
        (status = 401, description = "Not signed in", body = ApiError),
        (status = 403, description = "Missing permission post.create", body = ApiError),
        (status = 500, description = "Internal server error", body = ApiError)
    ),
    tag = "posts"
)]
pub async fn create_post(
    State(state): State<AppState>,
    auth: AuthContext,
    Json(request): Json<CreatePostRequest>,
) -> Result<(StatusCode, [(&'static str, String); 1], Json<PostResponse>), ApiError> {
    auth.requires_permission("post.create", None).await?;
    let user = auth.require_user()?;

    validate_title(&request.title)?;
    require_text("text", &request.text)?;

    let post = PostRepository::new(state.db.clone())
        .create(user.id, request.title.trim(), &request.text)
        .await?;
    tracing::info!(post_id = post.id, user_id = user.id, "Post created");

    Ok((
        StatusCode::CREATED,
        [("Location", format!("/api/posts/{}", post.id))],
        Json(PostResponse::from(&post)),
    ))
}

/// Edit a post
#[utoipa::path(
    put,
    path = "/api/posts/{id}",
    security(("bearer_auth" = []), ("session_cookie" = [])),
    params(
        ("id" = i32, Path, description = "Post id")
    ),
    request_body = UpdatePostRequest,
    responses(
        (status = 200, description = "Post updated", body = PostResponse),
        (status = 400, description = "Validation failed", body = ApiError),
        (status = 401, description = "Not signed in", body = ApiError),
        (status = 403, description = "Missing permission post.edit for this post", body = ApiError),
        (status = 404, description = "Post not found", body = ApiError),
        (status = 500, description = "Internal server error", body = ApiError)
    ),
    tag = "posts"
)]
pub async fn update_post(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(id): Path<i32>,
    Json(request): Json<UpdatePostRequest>,
) -> Result<Json<PostResponse>, ApiError> {
    auth.require_user()?;
    let post = load_post(&state, id).await?;
    auth.requires_permission("post.edit", Some(&post)).await?;

    if let Some(title) = request.title.as_deref() {
        validate_title(title)?;
    }
    if let Some(text) = request.text.as_deref() {
        require_text("text", text)?;
    }

    let post = PostRepository::new(state.db.clone())
        .update(
            post,
            request.title.as_deref().map(str::trim),
            request.text.as_deref(),
        )
        .await?;

    Ok(Json(PostResponse::from(&post)))
}

/// Delete a post and its comments
#[utoipa::path(
    delete,
    path = "/api/posts/{id}",
    security(("bearer_auth" = []), ("session_cookie" = [])),
    params(
        ("id" = i32, Path, description = "Post id")
    ),
    responses(
        (status = 204, description = "Post deleted"),
        (status = 401, description = "Not signed in", body = ApiError),
        (status = 403, description = "Missing permission post.delete for this post", body = ApiError),
        (status = 404, description = "Post not found", body = ApiError),
        (status = 500, description = "Internal server error", body = ApiError)
    ),
    tag = "posts"
)]
pub async fn delete_post(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(id): Path<i32>,
) -> Result<StatusCode, ApiError> {
    let user = auth.require_user()?;
    let post = load_post(&state, id).await?;
    auth.requires_permission("post.delete", Some(&post)).await?;

    PostRepository::new(state.db.clone()).delete(post.id).await?;
    tracing::info!(post_id = post.id, user_id = user.id, "Post deleted");

    Ok(StatusCode::NO_CONTENT)
}
