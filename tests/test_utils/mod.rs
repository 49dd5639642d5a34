//! Test utilities shared by the integration tests.
//!
//! Every test gets its own in-memory SQLite database with migrations applied
//! and the RBAC catalog seeded.

#![allow(dead_code)]

use anyhow::Result;
use axum::{
    body::Body,
    http::{Request, header},
    response::Response,
};
use bloggy::{
    auth::{SESSION_COOKIE, hash_password},
    config::AppConfig,
    models::user,
    repositories::{NewUser, UserRepository},
    seeds::seed_rbac,
    server::AppState,
};
use migration::{Migrator, MigratorTrait};
use sea_orm::{Database, DatabaseConnection};
use serde_json::Value;

pub const TEST_PASSWORD: &str = "correct horse battery";

/// Sets up an in-memory SQLite database with all migrations applied and the
/// permission catalog and default roles seeded.
pub async fn setup_test_db() -> Result<DatabaseConnection> {
    let db = Database::connect("sqlite::memory:").await?;
    Migrator::up(&db, None).await?;
    seed_rbac(&db).await?;
    Ok(db)
}

/// Configuration for tests: local profile, in-memory database, no providers.
pub fn test_config() -> AppConfig {
    AppConfig {
        profile: "test".to_string(),
        database_url: "sqlite::memory:".to_string(),
        token_encryption_key: Some(vec![7u8; 32]),
        session_secret: Some("s".repeat(32)),
        ..AppConfig::default()
    }
}

/// Seeded database plus the state built on top of it.
pub async fn setup_state(config: AppConfig) -> Result<AppState> {
    let db = setup_test_db().await?;
    AppState::new(config, db)
}

/// Creates a user holding `role`. With `password` set the user can sign in
/// with it; otherwise the account is OAuth-only.
pub async fn create_user(
    state: &AppState,
    email: &str,
    role: &str,
    password: Option<&str>,
) -> Result<user::Model> {
    let password_hash = password.map(hash_password).transpose()?;
    UserRepository::new(state.db.clone())
        .create_with_role(
            NewUser {
                email: email.to_string(),
                first_name: "Test".to_string(),
                last_name: role.to_string(),
                password_hash,
            },
            role,
        )
        .await
}

/// Session cookie header value for `user`.
pub fn session_cookie(state: &AppState, user: &user::Model) -> String {
    let token = state.sessions.issue(user.id).expect("session token");
    format!("{SESSION_COOKIE}={token}")
}

/// Builds a request, optionally signed in and optionally with a JSON body.
pub fn request(method: &str, uri: &str, cookie: Option<&str>, body: Option<Value>) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(cookie) = cookie {
        builder = builder.header(header::COOKIE, cookie);
    }
    match body {
        Some(json) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(json.to_string()))
            .expect("request"),
        None => builder.body(Body::empty()).expect("request"),
    }
}

/// Reads a JSON response body.
pub async fn read_json(response: Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body");
    serde_json::from_slice(&bytes).expect("json body")
}
