//! Provider registry
//!
//! Holds the OAuth providers that have client credentials configured.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use crate::config::{AppConfig, OAUTH_PROVIDERS};

use super::provider::{OAuthClient, OAuthError, OAuthProvider, ProviderEndpoints};
use super::{facebook, github, google, microsoft};

/// Production endpoints for a provider name.
pub fn default_endpoints(provider: &str) -> Option<ProviderEndpoints> {
    match provider {
        "google" => Some(google::default_endpoints()),
        "github" => Some(github::default_endpoints()),
        "microsoft" => Some(microsoft::default_endpoints()),
        "facebook" => Some(facebook::default_endpoints()),
        _ => None,
    }
}

/// Builds the provider called `name`.
pub fn build_provider(
    name: &str,
    client: OAuthClient,
    endpoints: ProviderEndpoints,
    http: reqwest::Client,
    timeout: Duration,
) -> Result<Arc<dyn OAuthProvider>, OAuthError> {
    let provider: Arc<dyn OAuthProvider> = match name {
        "google" => Arc::new(google::GoogleProvider::new(client, endpoints, http, timeout)),
        "github" => Arc::new(github::GitHubProvider::new(client, endpoints, http, timeout)),
        "microsoft" => Arc::new(microsoft::MicrosoftProvider::new(
            client, endpoints, http, timeout,
        )),
        "facebook" => Arc::new(facebook::FacebookProvider::new(
            client, endpoints, http, timeout,
        )),
        other => return Err(OAuthError::UnknownProvider(other.to_string())),
    };
    Ok(provider)
}

/// Registry of configured providers keyed by name
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    providers: BTreeMap<&'static str, Arc<dyn OAuthProvider>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers every provider with credentials in `config`. Providers
    /// without credentials are skipped with a log line.
    pub fn from_config(config: &AppConfig) -> Result<Self, OAuthError> {
        let http = reqwest::Client::new();
        let timeout = Duration::from_secs(config.oauth.http_timeout_seconds);
        let mut registry = Self::new();

        for name in OAUTH_PROVIDERS {
            let Some(credentials) = config.oauth.client(name) else {
                tracing::info!(provider = name, "OAuth provider not configured; skipping");
                continue;
            };
            let endpoints =
                default_endpoints(name).ok_or_else(|| OAuthError::UnknownProvider(name.to_string()))?;
            let client = OAuthClient {
                client_id: credentials.client_id.clone(),
                client_secret: credentials.client_secret.clone(),
                redirect_uri: config.oauth_redirect_uri(name),
            };
            registry.register(build_provider(name, client, endpoints, http.clone(), timeout)?);
        }

        tracing::info!(providers = ?registry.names(), "OAuth providers registered");
        Ok(registry)
    }

    pub fn register(&mut self, provider: Arc<dyn OAuthProvider>) {
        self.providers.insert(provider.name(), provider);
    }

    pub fn get(&self, name: &str) -> Result<Arc<dyn OAuthProvider>, OAuthError> {
        self.providers
            .get(name)
            .cloned()
            .ok_or_else(|| OAuthError::UnknownProvider(name.to_string()))
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.providers.keys().copied().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{OAuthClientConfig, OAuthConfig};

    #[test]
    fn test_registry_only_contains_configured_providers() {
        let mut oauth = OAuthConfig::default();
        oauth.clients.insert(
            "github".to_string(),
            OAuthClientConfig {
                client_id: "id".to_string(),
                client_secret: "secret".to_string(),
            },
        );
        let config = AppConfig {
            oauth,
            ..AppConfig::default()
        };

        let registry = ProviderRegistry::from_config(&config).unwrap();
        assert_eq!(registry.names(), vec!["github"]);
        assert!(registry.get("github").is_ok());
        assert!(matches!(
            registry.get("google"),
            Err(OAuthError::UnknownProvider(_))
        ));
    }

    #[test]
    fn test_build_unknown_provider_fails() {
        let client = OAuthClient {
            client_id: "id".to_string(),
            client_secret: "secret".to_string(),
            redirect_uri: "http://localhost/cb".to_string(),
        };
        let endpoints = google::default_endpoints();
        assert!(
            build_provider("myspace", client, endpoints, reqwest::Client::new(), Duration::from_secs(1))
                .is_err()
        );
        assert!(default_endpoints("myspace").is_none());
    }
}
