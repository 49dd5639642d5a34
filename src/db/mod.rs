//! Database connection and pool management for Bloggy.
//!
//! Chooses the backend from configuration (a SQLite file or in-memory
//! database by default, Turso when `TURSO_DATABASE_URL` is set) and opens a
//! SeaORM connection. Turso is reached over HTTP, so it is health checked with
//! exponential backoff before the connection is handed out.

mod turso;

pub use turso::{HranaValue, TursoProxy};

use anyhow::{Context, Result};
use sea_orm::{
    ConnectOptions, ConnectionTrait, Database, DatabaseConnection, DatabaseTransaction, DbBackend,
    DbErr, ProxyDatabaseTrait, TransactionError, TransactionTrait,
};
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;

use crate::config::AppConfig;

/// Connection attempts made before giving up on a remote database.
pub const CONNECT_ATTEMPTS: u32 = 3;

const INITIAL_RETRY_DELAY: Duration = Duration::from_millis(200);

/// Errors that can occur during database operations.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Failed to connect to database after {attempts} attempts: {source}")]
    ConnectionFailed {
        attempts: u32,
        #[source]
        source: sea_orm::DbErr,
    },
    #[error("Invalid database configuration: {message}")]
    InvalidConfiguration { message: String },
}

/// Backend selected from configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatabaseKind {
    Sqlite,
    Turso,
}

impl DatabaseKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DatabaseKind::Sqlite => "sqlite",
            DatabaseKind::Turso => "turso",
        }
    }
}

/// Owns the backend choice and connection options for the application pool.
#[derive(Clone)]
pub struct DatabaseManager {
    kind: DatabaseKind,
    url: String,
    auth_token: Option<String>,
    max_connections: u32,
    acquire_timeout: Duration,
    retry_delay: Duration,
}

impl fmt::Debug for DatabaseManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatabaseManager")
            .field("kind", &self.kind)
            .field("url", &self.url)
            .field("max_connections", &self.max_connections)
            .field("acquire_timeout", &self.acquire_timeout)
            .finish_non_exhaustive()
    }
}

impl DatabaseManager {
    /// Resolves the backend from configuration.
    ///
    /// A configured Turso URL takes precedence over `DATABASE_URL`.
    pub fn from_config(cfg: &AppConfig) -> Result<Self, DatabaseError> {
        let (kind, url) = match cfg.turso_database_url.as_deref() {
            Some(turso_url) => (DatabaseKind::Turso, turso_url.to_string()),
            None => {
                if cfg.database_url.is_empty() {
                    return Err(DatabaseError::InvalidConfiguration {
                        message: "Database URL cannot be empty".to_string(),
                    });
                }
                (detect_kind(&cfg.database_url)?, cfg.database_url.clone())
            }
        };

        Ok(Self {
            kind,
            url,
            auth_token: cfg.turso_auth_token.clone(),
            max_connections: cfg.db_max_connections,
            acquire_timeout: Duration::from_millis(cfg.db_acquire_timeout_ms),
            retry_delay: INITIAL_RETRY_DELAY,
        })
    }

    /// Overrides the delay before the second connection attempt. Later
    /// attempts keep doubling it.
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    pub fn kind(&self) -> DatabaseKind {
        self.kind
    }

    /// Whether the URL names an in-process SQLite database that lives only as
    /// long as its connection.
    pub fn is_in_memory(&self) -> bool {
        self.kind == DatabaseKind::Sqlite
            && (self.url.contains(":memory:") || self.url.contains("mode=memory"))
    }

    fn connect_options(&self) -> ConnectOptions {
        let mut opt = ConnectOptions::new(&self.url);
        opt.acquire_timeout(self.acquire_timeout)
            .sqlx_logging(true)
            .sqlx_logging_level(log::LevelFilter::Debug);

        if self.is_in_memory() {
            // Every pooled connection would otherwise see its own empty database.
            opt.max_connections(1).min_connections(1);
        } else {
            opt.max_connections(self.max_connections)
                .idle_timeout(Duration::from_secs(600)) // 10 minutes
                .max_lifetime(Duration::from_secs(1800)); // 30 minutes
        }
        opt
    }

    /// Opens the database connection.
    ///
    /// Turso gets [`CONNECT_ATTEMPTS`] health checks with exponential backoff;
    /// local SQLite is opened once.
    pub async fn connect(&self) -> Result<DatabaseConnection, DatabaseError> {
        match self.kind {
            DatabaseKind::Sqlite => {
                let opt = self.connect_options();
                self.with_retries(1, || Database::connect(opt.clone()))
                    .await
            }
            DatabaseKind::Turso => self.connect_turso().await,
        }
    }

    async fn connect_turso(&self) -> Result<DatabaseConnection, DatabaseError> {
        let auth_token =
            self.auth_token
                .as_deref()
                .ok_or_else(|| DatabaseError::InvalidConfiguration {
                    message: "TURSO_AUTH_TOKEN is required when TURSO_DATABASE_URL is set"
                        .to_string(),
                })?;
        let proxy = TursoProxy::new(&self.url, auth_token, self.acquire_timeout).map_err(|e| {
            DatabaseError::InvalidConfiguration {
                message: format!("Cannot build Turso HTTP client: {e}"),
            }
        })?;

        self.with_retries(CONNECT_ATTEMPTS, || proxy.ping()).await?;

        let proxy: Box<dyn ProxyDatabaseTrait> = Box::new(proxy);
        Database::connect_proxy(DbBackend::Sqlite, Arc::new(proxy))
            .await
            .map_err(|source| DatabaseError::ConnectionFailed {
                attempts: 1,
                source,
            })
    }

    async fn with_retries<T, F, Fut>(
        &self,
        attempts: u32,
        mut attempt_fn: F,
    ) -> Result<T, DatabaseError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, DbErr>>,
    {
        let mut retry_delay = self.retry_delay;

        for attempt in 1..=attempts {
            match attempt_fn().await {
                Ok(value) => {
                    log::info!(
                        "Connected to {} database (attempt {})",
                        self.kind.as_str(),
                        attempt
                    );
                    return Ok(value);
                }
                Err(e) if attempt == attempts => {
                    log::error!(
                        "Failed to connect to {} database after {} attempts: {}",
                        self.kind.as_str(),
                        attempts,
                        e
                    );
                    return Err(DatabaseError::ConnectionFailed {
                        attempts,
                        source: e,
                    });
                }
                Err(e) => {
                    log::warn!(
                        "Database connection attempt {} failed: {}, retrying in {:?}",
                        attempt,
                        e,
                        retry_delay
                    );
                    sleep(retry_delay).await;
                    retry_delay *= 2;
                }
            }
        }

        Err(DatabaseError::InvalidConfiguration {
            message: "no connection attempts were made".to_string(),
        })
    }
}

fn detect_kind(url: &str) -> Result<DatabaseKind, DatabaseError> {
    if url.starts_with("sqlite:") {
        Ok(DatabaseKind::Sqlite)
    } else if url.starts_with("libsql://") {
        Ok(DatabaseKind::Turso)
    } else {
        Err(DatabaseError::InvalidConfiguration {
            message: format!(
                "unsupported database URL scheme in '{}'",
                url.split("://").next().unwrap_or(url)
            ),
        })
    }
}

/// Initializes the application pool described by `cfg`.
pub async fn init_pool(cfg: &AppConfig) -> Result<DatabaseConnection> {
    let manager = DatabaseManager::from_config(cfg)?;
    Ok(manager.connect().await?)
}

/// Runs `work` in a transaction: committed when it returns `Ok`, rolled back
/// otherwise.
pub async fn transaction<F, T>(db: &DatabaseConnection, work: F) -> Result<T>
where
    F: for<'c> FnOnce(
            &'c DatabaseTransaction,
        ) -> Pin<Box<dyn Future<Output = Result<T, DbErr>> + Send + 'c>>
        + Send,
    T: Send,
{
    db.transaction::<F, T, DbErr>(work)
        .await
        .map_err(|e| match e {
            TransactionError::Connection(e) | TransactionError::Transaction(e) => e.into(),
        })
}

/// Health check for the database connection.
///
/// Verifies that the database connection is still active by executing a
/// simple query.
pub async fn health_check(db: &DatabaseConnection) -> Result<()> {
    use sea_orm::Statement;

    let stmt = Statement::from_string(db.get_database_backend(), "SELECT 1".to_string());

    db.query_one(stmt)
        .await
        .context("Database health check failed")?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_string_contains, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_empty_database_url_rejected() {
        let config = AppConfig {
            database_url: String::new(),
            ..AppConfig::default()
        };

        assert!(matches!(
            DatabaseManager::from_config(&config),
            Err(DatabaseError::InvalidConfiguration { .. })
        ));
    }

    #[test]
    fn test_backend_detection() {
        assert_eq!(
            detect_kind("sqlite://bloggy.db?mode=rwc").unwrap(),
            DatabaseKind::Sqlite
        );
        assert_eq!(
            detect_kind("libsql://bloggy.turso.io").unwrap(),
            DatabaseKind::Turso
        );
        assert!(detect_kind("postgres://localhost/bloggy").is_err());
        assert!(detect_kind("mysql://localhost/bloggy").is_err());
    }

    #[test]
    fn test_turso_url_takes_precedence() {
        let config = AppConfig {
            turso_database_url: Some("libsql://bloggy.turso.io".to_string()),
            turso_auth_token: Some("token".to_string()),
            ..AppConfig::default()
        };
        let manager = DatabaseManager::from_config(&config).unwrap();
        assert_eq!(manager.kind(), DatabaseKind::Turso);
    }

    fn turso_config(url: &str) -> AppConfig {
        AppConfig {
            database_url: "sqlite::memory:".to_string(),
            turso_database_url: Some(url.to_string()),
            turso_auth_token: Some("turso-token".to_string()),
            ..AppConfig::default()
        }
    }

    fn pipeline_ok(result: serde_json::Value) -> ResponseTemplate {
        ResponseTemplate::new(200).set_body_json(json!({
            "baton": null,
            "base_url": null,
            "results": [
                { "type": "ok", "response": { "type": "execute", "result": result } },
                { "type": "ok", "response": { "type": "close" } }
            ]
        }))
    }

    fn select_one() -> serde_json::Value {
        json!({
            "cols": [{ "name": "1", "decltype": null }],
            "rows": [[{ "type": "integer", "value": "1" }]],
            "affected_row_count": 0,
            "last_insert_rowid": null
        })
    }

    #[tokio::test]
    async fn test_turso_connect_retries_until_healthy() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v2/pipeline"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(2)
            .expect(2)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/v2/pipeline"))
            .and(header("authorization", "Bearer turso-token"))
            .respond_with(pipeline_ok(select_one()))
            .mount(&server)
            .await;

        let manager = DatabaseManager::from_config(&turso_config(&server.uri()))
            .unwrap()
            .with_retry_delay(Duration::from_millis(5));
        assert_eq!(manager.kind(), DatabaseKind::Turso);

        let db = manager.connect().await.expect("third attempt succeeds");
        assert_eq!(db.get_database_backend(), DbBackend::Sqlite);
        assert_eq!(server.received_requests().await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_turso_connect_gives_up_after_three_attempts() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v2/pipeline"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let started = std::time::Instant::now();
        let result = DatabaseManager::from_config(&turso_config(&server.uri()))
            .unwrap()
            .with_retry_delay(Duration::from_millis(20))
            .connect()
            .await;

        assert!(matches!(
            result,
            Err(DatabaseError::ConnectionFailed {
                attempts: CONNECT_ATTEMPTS,
                ..
            })
        ));
        assert_eq!(server.received_requests().await.unwrap().len(), 3);
        // Backoff sleeps 20ms then 40ms.
        assert!(started.elapsed() >= Duration::from_millis(60));
    }

    #[tokio::test]
    async fn test_turso_rows_reach_entities() {
        use crate::models::user;
        use sea_orm::EntityTrait;

        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v2/pipeline"))
            .and(body_string_contains("SELECT 1"))
            .respond_with(pipeline_ok(select_one()))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/v2/pipeline"))
            .and(body_string_contains("password_hash"))
            .respond_with(pipeline_ok(json!({
                "cols": [
                    { "name": "id", "decltype": "integer" },
                    { "name": "email", "decltype": "varchar" },
                    { "name": "first_name", "decltype": "varchar" },
                    { "name": "last_name", "decltype": "varchar" },
                    { "name": "password_hash", "decltype": "varchar" },
                    { "name": "created_at", "decltype": "timestamp_with_timezone_text" },
                    { "name": "updated_at", "decltype": "timestamp_with_timezone_text" }
                ],
                "rows": [[
                    { "type": "integer", "value": "3" },
                    { "type": "text", "value": "ada@example.com" },
                    { "type": "text", "value": "Ada" },
                    { "type": "text", "value": "Lovelace" },
                    { "type": "null" },
                    { "type": "text", "value": "2025-03-01T12:30:00+00:00" },
                    { "type": "text", "value": "2025-03-01T12:30:00+00:00" }
                ]],
                "affected_row_count": 0,
                "last_insert_rowid": null
            })))
            .mount(&server)
            .await;

        let db = init_pool(&turso_config(&server.uri()))
            .await
            .expect("connects");
        let found = user::Entity::find_by_id(3)
            .one(&db)
            .await
            .expect("query")
            .expect("row");

        assert_eq!(found.id, 3);
        assert_eq!(found.email, "ada@example.com");
        assert_eq!(found.password_hash, None);
    }

    #[tokio::test]
    async fn test_transaction_rolls_back_on_error() {
        let config = AppConfig {
            database_url: "sqlite::memory:".to_string(),
            ..AppConfig::default()
        };
        let db = init_pool(&config).await.expect("connects");
        db.execute_unprepared("CREATE TABLE t (v INTEGER NOT NULL)")
            .await
            .unwrap();

        let result: Result<()> = transaction(&db, |txn| {
            Box::pin(async move {
                txn.execute_unprepared("INSERT INTO t (v) VALUES (1)").await?;
                Err(DbErr::Custom("boom".to_string()))
            })
        })
        .await;
        assert!(result.is_err());

        transaction(&db, |txn| {
            Box::pin(async move {
                txn.execute_unprepared("INSERT INTO t (v) VALUES (2)").await?;
                Ok(())
            })
        })
        .await
        .unwrap();

        let row = db
            .query_one(sea_orm::Statement::from_string(
                db.get_database_backend(),
                "SELECT COUNT(*) AS n FROM t".to_string(),
            ))
            .await
            .unwrap()
            .unwrap();
        let count: i64 = row.try_get("", "n").unwrap();
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn test_in_memory_pool_connects_and_is_healthy() {
        let config = AppConfig {
            database_url: "sqlite::memory:".to_string(),
            ..AppConfig::default()
        };
        let manager = DatabaseManager::from_config(&config).unwrap();
        assert!(manager.is_in_memory());

        let db = manager.connect().await.expect("connects");
        health_check(&db).await.expect("healthy");
    }
}
