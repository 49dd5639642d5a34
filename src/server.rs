//! # Server Configuration
//!
//! This module contains the application state, the router and the serve loop
//! for Bloggy.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    Router, middleware,
    routing::{delete, get, post, put},
};
use sea_orm::DatabaseConnection;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use utoipa::{
    Modify, OpenApi,
    openapi::security::{ApiKey, ApiKeyValue, HttpAuthScheme, HttpBuilder, SecurityScheme},
};
use utoipa_swagger_ui::SwaggerUi;

use crate::auth::{SESSION_COOKIE, SessionManager};
use crate::config::AppConfig;
use crate::crypto::TokenCipher;
use crate::handlers;
use crate::oauth::ProviderRegistry;
use crate::rate_limit::{RateLimiter, rate_limit_middleware};
use crate::rbac::{PermissionCache, PermissionResolver};
use crate::telemetry::trace_context_middleware;
use crate::token_refresh::TokenMaintenance;

/// Application state containing shared resources
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub db: Arc<DatabaseConnection>,
    pub resolver: PermissionResolver,
    pub sessions: Arc<SessionManager>,
    pub providers: Arc<ProviderRegistry>,
    pub token_cipher: TokenCipher,
    pub rate_limiter: Arc<RateLimiter>,
}

impl AppState {
    /// Builds the state from configuration. Fails when the token key is
    /// unusable or a configured provider cannot be built.
    pub fn new(config: AppConfig, db: DatabaseConnection) -> anyhow::Result<Self> {
        let db = Arc::new(db);
        let token_cipher = TokenCipher::from_config(&config)?;
        let providers = ProviderRegistry::from_config(&config)?;
        let sessions = SessionManager::from_config(&config);
        let rate_limiter = RateLimiter::from_config(&config.rate_limit);
        let resolver = PermissionResolver::new(db.clone(), Arc::new(PermissionCache::default()));

        Ok(Self {
            config: Arc::new(config),
            db,
            resolver,
            sessions: Arc::new(sessions),
            providers: Arc::new(providers),
            token_cipher,
            rate_limiter: Arc::new(rate_limiter),
        })
    }

    /// Replaces the provider registry.
    pub fn with_providers(mut self, providers: ProviderRegistry) -> Self {
        self.providers = Arc::new(providers);
        self
    }
}

/// Creates and configures the Axum application router
pub fn create_app(state: AppState) -> Router {
    // Credential endpoints are throttled per (client ip, route).
    let throttled = Router::new()
        .route("/auth/register", post(handlers::auth::register))
        .route("/auth/login", post(handlers::auth::login))
        .route("/auth/oauth/{provider}/login", get(handlers::oauth::login))
        .route(
            "/auth/oauth/{provider}/callback",
            get(handlers::oauth::callback),
        )
        .route_layer(middleware::from_fn_with_state(
            state.rate_limiter.clone(),
            rate_limit_middleware,
        ));

    Router::new()
        .route("/", get(handlers::root))
        .route("/health", get(handlers::health))
        .route("/auth/logout", post(handlers::auth::logout))
        .route("/auth/me", get(handlers::auth::me))
        .route("/account/settings", get(handlers::account::settings))
        .route(
            "/account/oauth/{provider}/link",
            post(handlers::account::link_provider),
        )
        .route(
            "/account/oauth/{provider}",
            delete(handlers::account::unlink_provider),
        )
        .route(
            "/api/posts",
            get(handlers::posts::list_posts).post(handlers::posts::create_post),
        )
        .route(
            "/api/posts/{id}",
            get(handlers::posts::get_post)
                .put(handlers::posts::update_post)
                .delete(handlers::posts::delete_post),
        )
        .route(
            "/api/posts/{id}/comments",
            get(handlers::comments::list_comments).post(handlers::comments::create_comment),
        )
        .route(
            "/api/comments/{id}",
            put(handlers::comments::update_comment)
                .delete(handlers::comments::delete_comment),
        )
        .route(
            "/api/admin/roles",
            get(handlers::admin::list_roles).post(handlers::admin::create_role),
        )
        .route("/api/admin/roles/{id}", delete(handlers::admin::delete_role))
        .route(
            "/api/admin/roles/{id}/permissions/{permission_id}",
            post(handlers::admin::grant_permission).delete(handlers::admin::revoke_permission),
        )
        .route("/api/admin/permissions", get(handlers::admin::list_permissions))
        .route("/api/admin/users", get(handlers::admin::list_users))
        .route(
            "/api/admin/users/{id}/roles/{role_id}",
            post(handlers::admin::assign_role).delete(handlers::admin::remove_role),
        )
        .merge(throttled)
        .layer(middleware::from_fn(trace_context_middleware))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
        .merge(SwaggerUi::new("/api/docs").url("/api/openapi.json", ApiDoc::openapi()))
}

/// Starts the server with the given configuration
pub async fn run_server(
    config: AppConfig,
    db: DatabaseConnection,
) -> Result<(), Box<dyn std::error::Error>> {
    let addr = config
        .bind_addr()
        .map_err(|e| format!("Invalid server address: {}", e))?;
    let state = AppState::new(config, db)?;
    let shutdown = CancellationToken::new();

    spawn_rate_limit_purge(state.rate_limiter.clone(), shutdown.clone());

    let maintenance = if state.config.token_refresh.tick_seconds > 0 {
        let service = TokenMaintenance::from_state(&state);
        let token = shutdown.clone();
        Some(tokio::spawn(async move { service.run(token).await }))
    } else {
        tracing::info!("Token maintenance disabled");
        None
    };

    let app = create_app(state.clone());
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, profile = %state.config.profile, "Server listening");

    let signal = shutdown.clone();
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => tracing::info!("Shutdown signal received"),
            _ = signal.cancelled() => {}
        }
    })
    .await?;

    shutdown.cancel();
    if let Some(handle) = maintenance
        && let Err(e) = handle.await
    {
        tracing::error!(error = %e, "Token maintenance task ended abnormally");
    }

    tracing::info!("Server stopped");
    Ok(())
}

/// Drops finished rate limit windows once per minute.
fn spawn_rate_limit_purge(limiter: Arc<RateLimiter>, shutdown: CancellationToken) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(60));
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    let purged = limiter.purge_expired(Instant::now());
                    if purged > 0 {
                        tracing::debug!(purged, "Purged rate limit windows");
                    }
                }
            }
        }
    });
}

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer_auth",
                SecurityScheme::Http(
                    HttpBuilder::new()
                        .scheme(HttpAuthScheme::Bearer)
                        .bearer_format("JWT")
                        .build(),
                ),
            );
            components.add_security_scheme(
                "session_cookie",
                SecurityScheme::ApiKey(ApiKey::Cookie(ApiKeyValue::new(SESSION_COOKIE))),
            );
        }
    }
}

/// OpenAPI documentation
#[derive(OpenApi)]
#[openapi(
    paths(
        crate::handlers::root,
        crate::handlers::health,
        crate::handlers::auth::register,
        crate::handlers::auth::login,
        crate::handlers::auth::logout,
        crate::handlers::auth::me,
        crate::handlers::oauth::login,
        crate::handlers::oauth::callback,
        crate::handlers::account::settings,
        crate::handlers::account::link_provider,
        crate::handlers::account::unlink_provider,
        crate::handlers::posts::list_posts,
        crate::handlers::posts::get_post,
        crate::handlers::posts::create_post,
        crate::handlers::posts::update_post,
        crate::handlers::posts::delete_post,
        crate::handlers::comments::list_comments,
        crate::handlers::comments::create_comment,
        crate::handlers::comments::update_comment,
        crate::handlers::comments::delete_comment,
        crate::handlers::admin::list_roles,
        crate::handlers::admin::create_role,
        crate::handlers::admin::delete_role,
        crate::handlers::admin::list_permissions,
        crate::handlers::admin::grant_permission,
        crate::handlers::admin::revoke_permission,
        crate::handlers::admin::list_users,
        crate::handlers::admin::assign_role,
        crate::handlers::admin::remove_role,
    ),
    components(
        schemas(
            crate::models::ServiceInfo,
            crate::error::ApiError,
            crate::handlers::HealthResponse,
            crate::handlers::types::UserResponse,
            crate::handlers::types::SessionResponse,
            crate::handlers::types::PostResponse,
            crate::handlers::types::PostDetailResponse,
            crate::handlers::types::CommentResponse,
            crate::handlers::types::RoleResponse,
            crate::handlers::types::PermissionResponse,
            crate::handlers::types::PostPage,
            crate::handlers::types::UserPage,
            crate::handlers::auth::RegisterRequest,
            crate::handlers::auth::LoginRequest,
            crate::handlers::auth::MeResponse,
            crate::handlers::account::AccountSettingsResponse,
            crate::handlers::account::LinkedProvider,
            crate::handlers::account::AuthorizeUrlResponse,
            crate::handlers::posts::CreatePostRequest,
            crate::handlers::posts::UpdatePostRequest,
            crate::handlers::comments::CommentRequest,
            crate::handlers::admin::CreateRoleRequest,
            crate::handlers::types::AdminUserResponse,
            crate::handlers::types::PageMeta,
        )
    ),
    modifiers(&SecurityAddon),
    tags(
        (name = "root", description = "Service information"),
        (name = "auth", description = "Sessions, registration and OAuth sign-in"),
        (name = "account", description = "Account settings and linked providers"),
        (name = "posts", description = "Posts"),
        (name = "comments", description = "Comments on posts"),
        (name = "admin", description = "Role and permission management"),
    ),
    info(
        title = "Bloggy API",
        description = "Micro-blogging API with social sign-in and role-based access control",
        version = env!("CARGO_PKG_VERSION"),
    )
)]
pub struct ApiDoc;
