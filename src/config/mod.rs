//! Configuration loading for Bloggy.
//!
//! Loads layered `.env` files and environment variables prefixed with
//! `BLOGGY_`, producing a typed [`AppConfig`]. A handful of well-known bare
//! keys (`DATABASE_URL`, `TURSO_*`, `OAUTH_TOKEN_ENCRYPTION_KEY` and the
//! provider client credentials) are accepted without the prefix.

use std::{collections::BTreeMap, env, net::SocketAddr, path::PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Environment prefix stripped from every recognised key.
const ENV_PREFIX: &str = "BLOGGY_";

/// Keys accepted verbatim, without the `BLOGGY_` prefix.
const PASSTHROUGH_KEYS: &[&str] = &[
    "DATABASE_URL",
    "TURSO_DATABASE_URL",
    "TURSO_AUTH_TOKEN",
    "OAUTH_TOKEN_ENCRYPTION_KEY",
    "GOOGLE_CLIENT_ID",
    "GOOGLE_CLIENT_SECRET",
    "GITHUB_CLIENT_ID",
    "GITHUB_CLIENT_SECRET",
    "MICROSOFT_CLIENT_ID",
    "MICROSOFT_CLIENT_SECRET",
    "FACEBOOK_CLIENT_ID",
    "FACEBOOK_CLIENT_SECRET",
];

/// Names of the OAuth providers Bloggy knows how to configure.
pub const OAUTH_PROVIDERS: &[&str] = &["google", "github", "microsoft", "facebook"];

/// Application configuration derived from `BLOGGY_*` environment variables.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct AppConfig {
    #[serde(default = "default_profile")]
    pub profile: String,
    #[serde(default = "default_api_bind_addr")]
    pub api_bind_addr: String,
    /// Externally reachable base URL, used to build OAuth redirect URIs.
    #[serde(default = "default_public_url")]
    pub public_url: String,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default = "default_log_format")]
    pub log_format: String,
    #[serde(default = "default_database_url")]
    pub database_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub turso_database_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub turso_auth_token: Option<String>,
    #[serde(default = "default_db_max_connections")]
    pub db_max_connections: u32,
    #[serde(default = "default_db_acquire_timeout_ms")]
    pub db_acquire_timeout_ms: u64,
    /// Raw 32-byte key for OAuth token encryption at rest.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_encryption_key: Option<Vec<u8>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_secret: Option<String>,
    #[serde(default = "default_session_ttl_seconds")]
    pub session_ttl_seconds: u64,
    #[serde(default)]
    pub oauth: OAuthConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    #[serde(default)]
    pub token_refresh: TokenRefreshConfig,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub admin_email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub admin_password: Option<String>,
}

/// Client credentials for a single OAuth provider.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct OAuthClientConfig {
    pub client_id: String,
    pub client_secret: String,
}

/// OAuth provider configuration. A provider is enabled when both its client
/// id and secret are present.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct OAuthConfig {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub clients: BTreeMap<String, OAuthClientConfig>,
    /// Timeout applied to every provider HTTP call.
    #[serde(default = "default_oauth_http_timeout_seconds")]
    pub http_timeout_seconds: u64,
}

impl Default for OAuthConfig {
    fn default() -> Self {
        Self {
            clients: BTreeMap::new(),
            http_timeout_seconds: default_oauth_http_timeout_seconds(),
        }
    }
}

impl OAuthConfig {
    /// Returns the credentials for `provider`, if configured.
    pub fn client(&self, provider: &str) -> Option<&OAuthClientConfig> {
        self.clients.get(provider)
    }
}

/// Fixed-window limits applied to the authentication endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct RateLimitConfig {
    /// Requests allowed per key within one window (default: 10)
    ///
    /// Environment variable: `BLOGGY_RATE_LIMIT_MAX_REQUESTS`
    #[serde(default = "default_rate_limit_max_requests")]
    pub max_requests: u32,

    /// Window length in seconds (default: 60)
    ///
    /// Environment variable: `BLOGGY_RATE_LIMIT_WINDOW_SECONDS`
    #[serde(default = "default_rate_limit_window_seconds")]
    pub window_seconds: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_requests: default_rate_limit_max_requests(),
            window_seconds: default_rate_limit_window_seconds(),
        }
    }
}

impl RateLimitConfig {
    /// Validate rate limit bounds
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_requests == 0 {
            return Err(ConfigError::InvalidRateLimitMaxRequests {
                value: self.max_requests,
            });
        }
        if self.window_seconds == 0 || self.window_seconds > 86400 {
            return Err(ConfigError::InvalidRateLimitWindow {
                value: self.window_seconds,
            });
        }
        Ok(())
    }
}

/// Background OAuth token maintenance run by `serve`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct TokenRefreshConfig {
    /// Seconds between maintenance passes (default: 300, 0 disables)
    ///
    /// Environment variable: `BLOGGY_TOKEN_REFRESH_TICK_SECONDS`
    #[serde(default = "default_token_refresh_tick_seconds")]
    pub tick_seconds: u64,

    /// Tokens expiring within this many seconds are refreshed (default: 600)
    ///
    /// Environment variable: `BLOGGY_TOKEN_REFRESH_LEAD_TIME_SECONDS`
    #[serde(default = "default_token_refresh_lead_time_seconds")]
    pub lead_time_seconds: u64,
}

impl Default for TokenRefreshConfig {
    fn default() -> Self {
        Self {
            tick_seconds: default_token_refresh_tick_seconds(),
            lead_time_seconds: default_token_refresh_lead_time_seconds(),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            profile: default_profile(),
            api_bind_addr: default_api_bind_addr(),
            public_url: default_public_url(),
            log_level: default_log_level(),
            log_format: default_log_format(),
            database_url: default_database_url(),
            turso_database_url: None,
            turso_auth_token: None,
            db_max_connections: default_db_max_connections(),
            db_acquire_timeout_ms: default_db_acquire_timeout_ms(),
            token_encryption_key: None,
            session_secret: None,
            session_ttl_seconds: default_session_ttl_seconds(),
            oauth: OAuthConfig::default(),
            rate_limit: RateLimitConfig::default(),
            token_refresh: TokenRefreshConfig::default(),
            admin_email: None,
            admin_password: None,
        }
    }
}

impl AppConfig {
    /// Returns the configured bind address as a socket address.
    pub fn bind_addr(&self) -> Result<SocketAddr, std::net::AddrParseError> {
        self.api_bind_addr.parse()
    }

    /// Whether the profile denotes a production deployment.
    pub fn is_production(&self) -> bool {
        matches!(self.profile.as_str(), "production" | "prod")
    }

    /// Redirect URI registered with the provider for `provider`.
    pub fn oauth_redirect_uri(&self, provider: &str) -> String {
        format!(
            "{}/auth/oauth/{}/callback",
            self.public_url.trim_end_matches('/'),
            provider
        )
    }

    /// Returns a redacted JSON representation (secrets are redacted).
    pub fn redacted_json(&self) -> serde_json::Result<String> {
        let mut config = self.clone();
        if config.token_encryption_key.is_some() {
            config.token_encryption_key = Some(b"[REDACTED]".to_vec());
        }
        if config.session_secret.is_some() {
            config.session_secret = Some("[REDACTED]".to_string());
        }
        if config.turso_auth_token.is_some() {
            config.turso_auth_token = Some("[REDACTED]".to_string());
        }
        if config.admin_password.is_some() {
            config.admin_password = Some("[REDACTED]".to_string());
        }
        for client in config.oauth.clients.values_mut() {
            client.client_secret = "[REDACTED]".to_string();
        }
        serde_json::to_string_pretty(&config)
    }

    /// Validates the configuration, returning an error if required settings are missing.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(ref key) = self.token_encryption_key {
            if key.len() != 32 {
                return Err(ConfigError::InvalidTokenKeyLength { length: key.len() });
            }
        } else if self.is_production() {
            return Err(ConfigError::MissingTokenEncryptionKey);
        }

        match self.session_secret {
            Some(ref secret) if secret.len() < 32 => {
                return Err(ConfigError::SessionSecretTooShort {
                    length: secret.len(),
                });
            }
            None if self.is_production() => return Err(ConfigError::MissingSessionSecret),
            _ => {}
        }

        if self.session_ttl_seconds < 60 {
            return Err(ConfigError::InvalidSessionTtl {
                value: self.session_ttl_seconds,
            });
        }

        if self.db_max_connections == 0 {
            return Err(ConfigError::InvalidDbMaxConnections {
                value: self.db_max_connections,
            });
        }

        if self.turso_database_url.is_some() && self.turso_auth_token.is_none() {
            return Err(ConfigError::MissingTursoAuthToken);
        }

        if self.oauth.http_timeout_seconds == 0 {
            return Err(ConfigError::InvalidOAuthTimeout {
                value: self.oauth.http_timeout_seconds,
            });
        }

        self.rate_limit.validate()?;

        Ok(())
    }
}

fn default_profile() -> String {
    "local".to_string()
}

fn default_api_bind_addr() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_public_url() -> String {
    "http://localhost:8080".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "json".to_string()
}

fn default_database_url() -> String {
    "sqlite://bloggy.db?mode=rwc".to_string()
}

fn default_db_max_connections() -> u32 {
    10
}

fn default_db_acquire_timeout_ms() -> u64 {
    5000
}

fn default_session_ttl_seconds() -> u64 {
    86400 // 24 hours
}

fn default_oauth_http_timeout_seconds() -> u64 {
    10
}

fn default_rate_limit_max_requests() -> u32 {
    10
}

fn default_rate_limit_window_seconds() -> u64 {
    60 // 1 minute
}

fn default_token_refresh_tick_seconds() -> u64 {
    300 // 5 minutes
}

fn default_token_refresh_lead_time_seconds() -> u64 {
    600 // 10 minutes
}

/// Errors that can occur while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load environment file {path}: {source}")]
    EnvFile {
        path: PathBuf,
        source: dotenvy::Error,
    },
    #[error("invalid api bind address '{value}': {source}")]
    InvalidBindAddr {
        value: String,
        source: std::net::AddrParseError,
    },
    #[error("token encryption key is missing; set OAUTH_TOKEN_ENCRYPTION_KEY environment variable")]
    MissingTokenEncryptionKey,
    #[error("token encryption key is invalid base64: {error}")]
    InvalidTokenKeyBase64 { error: String },
    #[error("token encryption key must decode to exactly 32 bytes, got {length} bytes")]
    InvalidTokenKeyLength { length: usize },
    #[error("session secret is missing; set BLOGGY_SESSION_SECRET environment variable")]
    MissingSessionSecret,
    #[error("session secret must be at least 32 bytes, got {length}")]
    SessionSecretTooShort { length: usize },
    #[error("session ttl must be at least 60 seconds, got {value}")]
    InvalidSessionTtl { value: u64 },
    #[error("database max connections must be positive, got {value}")]
    InvalidDbMaxConnections { value: u32 },
    #[error("TURSO_DATABASE_URL is set but TURSO_AUTH_TOKEN is missing")]
    MissingTursoAuthToken,
    #[error("OAuth provider {provider} needs both {prefix}_CLIENT_ID and {prefix}_CLIENT_SECRET")]
    IncompleteOAuthClient { provider: String, prefix: String },
    #[error("OAuth http timeout must be positive, got {value}")]
    InvalidOAuthTimeout { value: u64 },
    #[error("rate limit max requests must be positive, got {value}")]
    InvalidRateLimitMaxRequests { value: u32 },
    #[error("rate limit window must be between 1 and 86400 seconds, got {value}")]
    InvalidRateLimitWindow { value: u64 },
}

/// Loads configuration using layered `.env` files and `BLOGGY_*` env vars.
pub struct ConfigLoader {
    base_dir: PathBuf,
}

impl ConfigLoader {
    /// Creates a new loader rooted at the current working directory.
    pub fn new() -> Self {
        Self {
            base_dir: env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
        }
    }

    /// Creates a loader rooted at the provided directory (useful for tests).
    pub fn with_base_dir(base_dir: PathBuf) -> Self {
        Self { base_dir }
    }

    /// Loads configuration from env files, then the process environment.
    pub fn load(&self) -> Result<AppConfig, ConfigError> {
        let (mut layered, profile_hint) = self.collect_layered_env()?;

        // Overlay process environment last so it wins.
        for (key, value) in env::vars() {
            if let Some(name) = accepted_key(&key) {
                layered.insert(name, value);
            }
        }

        let profile = take_non_empty(&mut layered, "PROFILE").unwrap_or(profile_hint);
        let api_bind_addr =
            take_non_empty(&mut layered, "API_BIND_ADDR").unwrap_or_else(default_api_bind_addr);
        let public_url =
            take_non_empty(&mut layered, "PUBLIC_URL").unwrap_or_else(default_public_url);
        let log_level = take_non_empty(&mut layered, "LOG_LEVEL").unwrap_or_else(default_log_level);
        let log_format =
            take_non_empty(&mut layered, "LOG_FORMAT").unwrap_or_else(default_log_format);
        let database_url =
            take_non_empty(&mut layered, "DATABASE_URL").unwrap_or_else(default_database_url);
        let turso_database_url = take_non_empty(&mut layered, "TURSO_DATABASE_URL");
        let turso_auth_token = take_non_empty(&mut layered, "TURSO_AUTH_TOKEN");
        let db_max_connections = layered
            .remove("DB_MAX_CONNECTIONS")
            .and_then(|v| v.parse().ok())
            .unwrap_or_else(default_db_max_connections);
        let db_acquire_timeout_ms = layered
            .remove("DB_ACQUIRE_TIMEOUT_MS")
            .and_then(|v| v.parse().ok())
            .unwrap_or_else(default_db_acquire_timeout_ms);

        let token_encryption_key = match take_non_empty(&mut layered, "OAUTH_TOKEN_ENCRYPTION_KEY")
        {
            Some(key_str) => {
                use base64::{Engine as _, engine::general_purpose};
                let decoded = general_purpose::STANDARD
                    .decode(key_str.trim())
                    .or_else(|_| general_purpose::URL_SAFE.decode(key_str.trim()))
                    .map_err(|e| ConfigError::InvalidTokenKeyBase64 {
                        error: e.to_string(),
                    })?;
                Some(decoded)
            }
            None => None,
        };

        let session_secret = take_non_empty(&mut layered, "SESSION_SECRET");
        let session_ttl_seconds = layered
            .remove("SESSION_TTL_SECONDS")
            .and_then(|v| v.parse().ok())
            .unwrap_or_else(default_session_ttl_seconds);

        let mut clients = BTreeMap::new();
        for provider in OAUTH_PROVIDERS {
            let prefix = provider.to_uppercase();
            let client_id = take_non_empty(&mut layered, &format!("{prefix}_CLIENT_ID"));
            let client_secret = take_non_empty(&mut layered, &format!("{prefix}_CLIENT_SECRET"));
            match (client_id, client_secret) {
                (Some(client_id), Some(client_secret)) => {
                    clients.insert(
                        provider.to_string(),
                        OAuthClientConfig {
                            client_id,
                            client_secret,
                        },
                    );
                }
                (None, None) => {}
                _ => {
                    return Err(ConfigError::IncompleteOAuthClient {
                        provider: provider.to_string(),
                        prefix,
                    });
                }
            }
        }
        let oauth = OAuthConfig {
            clients,
            http_timeout_seconds: layered
                .remove("OAUTH_HTTP_TIMEOUT_SECONDS")
                .and_then(|v| v.parse().ok())
                .unwrap_or_else(default_oauth_http_timeout_seconds),
        };

        let rate_limit = RateLimitConfig {
            max_requests: layered
                .remove("RATE_LIMIT_MAX_REQUESTS")
                .and_then(|v| v.parse().ok())
                .unwrap_or_else(default_rate_limit_max_requests),
            window_seconds: layered
                .remove("RATE_LIMIT_WINDOW_SECONDS")
                .and_then(|v| v.parse().ok())
                .unwrap_or_else(default_rate_limit_window_seconds),
        };

        let token_refresh = TokenRefreshConfig {
            tick_seconds: layered
                .remove("TOKEN_REFRESH_TICK_SECONDS")
                .and_then(|v| v.parse().ok())
                .unwrap_or_else(default_token_refresh_tick_seconds),
            lead_time_seconds: layered
                .remove("TOKEN_REFRESH_LEAD_TIME_SECONDS")
                .and_then(|v| v.parse().ok())
                .unwrap_or_else(default_token_refresh_lead_time_seconds),
        };

        let admin_email = take_non_empty(&mut layered, "ADMIN_EMAIL");
        let admin_password = take_non_empty(&mut layered, "ADMIN_PASSWORD");

        let config = AppConfig {
            profile,
            api_bind_addr,
            public_url,
            log_level,
            log_format,
            database_url,
            turso_database_url,
            turso_auth_token,
            db_max_connections,
            db_acquire_timeout_ms,
            token_encryption_key,
            session_secret,
            session_ttl_seconds,
            oauth,
            rate_limit,
            token_refresh,
            admin_email,
            admin_password,
        };

        config.validate()?;

        match config.bind_addr() {
            Ok(_) => Ok(config),
            Err(source) => Err(ConfigError::InvalidBindAddr {
                value: config.api_bind_addr.clone(),
                source,
            }),
        }
    }

    fn collect_layered_env(&self) -> Result<(BTreeMap<String, String>, String), ConfigError> {
        let mut values = BTreeMap::new();

        self.merge_dotenv(self.base_dir.join(".env"), &mut values)?;
        self.merge_dotenv(self.base_dir.join(".env.local"), &mut values)?;

        let profile = env::var("BLOGGY_PROFILE")
            .ok()
            .or_else(|| values.get("PROFILE").cloned())
            .unwrap_or_else(default_profile);

        self.merge_dotenv(
            self.base_dir.join(format!(".env.{}", &profile)),
            &mut values,
        )?;
        self.merge_dotenv(
            self.base_dir.join(format!(".env.{}.local", &profile)),
            &mut values,
        )?;

        Ok((values, profile))
    }

    fn merge_dotenv(
        &self,
        path: PathBuf,
        values: &mut BTreeMap<String, String>,
    ) -> Result<(), ConfigError> {
        match dotenvy::from_path_iter(&path) {
            Ok(iter) => {
                for item in iter {
                    let (key, value) = item.map_err(|source| ConfigError::EnvFile {
                        path: path.clone(),
                        source,
                    })?;
                    if let Some(name) = accepted_key(&key) {
                        values.insert(name, value);
                    }
                }
                Ok(())
            }
            Err(dotenvy::Error::Io(ref io_err))
                if io_err.kind() == std::io::ErrorKind::NotFound =>
            {
                Ok(())
            }
            Err(err) => Err(ConfigError::EnvFile { path, source: err }),
        }
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

/// Maps an environment key to its configuration name, or `None` if the key is
/// not ours.
fn accepted_key(key: &str) -> Option<String> {
    if let Some(stripped) = key.strip_prefix(ENV_PREFIX) {
        return Some(stripped.to_string());
    }
    PASSTHROUGH_KEYS
        .contains(&key)
        .then(|| key.to_string())
}

fn take_non_empty(values: &mut BTreeMap<String, String>, key: &str) -> Option<String> {
    values
        .remove(key)
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accepted_key_strips_prefix_and_passes_known_keys() {
        assert_eq!(accepted_key("BLOGGY_LOG_LEVEL").as_deref(), Some("LOG_LEVEL"));
        assert_eq!(accepted_key("DATABASE_URL").as_deref(), Some("DATABASE_URL"));
        assert_eq!(
            accepted_key("GITHUB_CLIENT_SECRET").as_deref(),
            Some("GITHUB_CLIENT_SECRET")
        );
        assert_eq!(accepted_key("HOME"), None);
    }

    #[test]
    fn test_production_requires_secrets() {
        let config = AppConfig {
            profile: "production".to_string(),
            ..AppConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::MissingTokenEncryptionKey)
        ));

        let config = AppConfig {
            profile: "production".to_string(),
            token_encryption_key: Some(vec![7u8; 32]),
            ..AppConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::MissingSessionSecret)
        ));

        let config = AppConfig {
            profile: "production".to_string(),
            token_encryption_key: Some(vec![7u8; 32]),
            session_secret: Some("s".repeat(32)),
            ..AppConfig::default()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_local_profile_allows_missing_secrets() {
        assert!(AppConfig::default().validate().is_ok());
    }

    #[test]
    fn test_rate_limit_validation() {
        let invalid = RateLimitConfig {
            max_requests: 0,
            window_seconds: 60,
        };
        assert!(invalid.validate().is_err());

        let invalid = RateLimitConfig {
            max_requests: 5,
            window_seconds: 0,
        };
        assert!(invalid.validate().is_err());

        assert!(RateLimitConfig::default().validate().is_ok());
    }

    #[test]
    fn test_redirect_uri_trims_trailing_slash() {
        let config = AppConfig {
            public_url: "https://blog.example.com/".to_string(),
            ..AppConfig::default()
        };
        assert_eq!(
            config.oauth_redirect_uri("github"),
            "https://blog.example.com/auth/oauth/github/callback"
        );
    }

    #[test]
    fn test_redacted_json_hides_secrets() {
        let mut config = AppConfig {
            session_secret: Some("super-secret-session-value-123456".to_string()),
            ..AppConfig::default()
        };
        config.oauth.clients.insert(
            "google".to_string(),
            OAuthClientConfig {
                client_id: "client".to_string(),
                client_secret: "hunter2".to_string(),
            },
        );
        let json = config.redacted_json().expect("serializes");
        assert!(!json.contains("hunter2"));
        assert!(!json.contains("super-secret-session-value"));
        assert!(json.contains("[REDACTED]"));
    }
}
