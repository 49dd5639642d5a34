//! OAuth provider trait definition
//!
//! Defines the interface every social login provider implements, plus the
//! state and PKCE helpers and the HTTP plumbing the providers share.

use std::time::Duration;

use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use rand::{RngCore, rngs::OsRng};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use thiserror::Error;
use url::Url;

/// Bytes of entropy in a state token.
const STATE_BYTES: usize = 32;
/// Bytes of entropy in a PKCE verifier (86 base64url characters).
const PKCE_VERIFIER_BYTES: usize = 64;
/// Longest upstream body kept in an error.
const MAX_ERROR_BODY: usize = 512;

/// Errors raised while talking to an OAuth provider. None of them are
/// retried.
#[derive(Debug, Error)]
pub enum OAuthError {
    #[error("{provider} returned HTTP {status}: {body}")]
    Http {
        provider: &'static str,
        status: u16,
        body: String,
    },
    #[error("{provider} rejected the request: {error}")]
    Rejected {
        provider: &'static str,
        error: String,
        description: Option<String>,
    },
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),
    #[error("malformed response from {provider}: {details}")]
    MalformedResponse {
        provider: &'static str,
        details: String,
    },
    #[error("invalid URL: {0}")]
    Url(#[from] url::ParseError),
    #[error("provider '{0}' is not configured")]
    UnknownProvider(String),
    #[error("{provider} does not support {operation}")]
    Unsupported {
        provider: &'static str,
        operation: &'static str,
    },
}

/// PKCE verifier and its S256 challenge (RFC 7636).
#[derive(Debug, Clone)]
pub struct PkcePair {
    pub verifier: String,
    pub challenge: String,
    pub method: &'static str,
}

/// Random state token: 32 bytes, base64url without padding.
pub fn generate_state() -> String {
    let mut bytes = [0u8; STATE_BYTES];
    OsRng.fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// `base64url_nopad(sha256(verifier))`
pub fn pkce_challenge(verifier: &str) -> String {
    URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes()))
}

pub fn generate_pkce_pair() -> PkcePair {
    let mut bytes = [0u8; PKCE_VERIFIER_BYTES];
    OsRng.fill_bytes(&mut bytes);
    let verifier = URL_SAFE_NO_PAD.encode(bytes);
    let challenge = pkce_challenge(&verifier);
    PkcePair {
        verifier,
        challenge,
        method: "S256",
    }
}

/// Tokens returned by a code exchange or refresh.
#[derive(Clone, Deserialize)]
pub struct TokenSet {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default = "default_token_type")]
    pub token_type: String,
    #[serde(default)]
    pub scope: Option<String>,
    /// Seconds until the access token expires
    #[serde(default)]
    pub expires_in: Option<i64>,
    #[serde(default, alias = "refresh_token_expires_in")]
    pub refresh_expires_in: Option<i64>,
    #[serde(default)]
    pub id_token: Option<String>,
}

fn default_token_type() -> String {
    "Bearer".to_string()
}

impl std::fmt::Debug for TokenSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenSet")
            .field("access_token", &"<redacted>")
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "<redacted>"))
            .field("token_type", &self.token_type)
            .field("scope", &self.scope)
            .field("expires_in", &self.expires_in)
            .finish()
    }
}

/// Provider profile normalized to one shape.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct UserInfo {
    /// Stable provider user id
    pub id: String,
    pub email: Option<String>,
    pub email_verified: bool,
    pub name: Option<String>,
    pub given_name: Option<String>,
    pub family_name: Option<String>,
    pub picture: Option<String>,
    pub locale: Option<String>,
    /// Unmodified profile payload
    #[serde(default)]
    pub raw: Value,
}

/// Client registration with a provider.
#[derive(Debug, Clone)]
pub struct OAuthClient {
    pub client_id: String,
    pub client_secret: String,
    pub redirect_uri: String,
}

/// Provider URLs. Overridable so tests can point at a mock server.
#[derive(Debug, Clone)]
pub struct ProviderEndpoints {
    pub authorize_url: String,
    pub token_url: String,
    /// Base URL of the provider's profile API
    pub api_base_url: String,
    pub revoke_url: Option<String>,
}

#[async_trait]
pub trait OAuthProvider: Send + Sync {
    /// Lowercase provider name used in routes and storage
    fn name(&self) -> &'static str;

    fn scopes(&self) -> &[String];

    fn generate_state(&self) -> String {
        generate_state()
    }

    fn generate_pkce_pair(&self) -> PkcePair {
        generate_pkce_pair()
    }

    /// URL the browser is sent to, carrying `state` and the PKCE challenge.
    fn build_authorization_url(&self, state: &str, pkce: &PkcePair) -> Result<Url, OAuthError>;

    async fn exchange_code_for_tokens(
        &self,
        code: &str,
        code_verifier: &str,
    ) -> Result<TokenSet, OAuthError>;

    async fn refresh_access_token(&self, refresh_token: &str) -> Result<TokenSet, OAuthError>;

    async fn get_user_info(&self, access_token: &str) -> Result<UserInfo, OAuthError>;

    /// Revokes a token at the provider. Providers without revocation report
    /// `false`.
    async fn revoke_token(&self, _token: &str) -> bool {
        false
    }
}

/// HTTP plumbing shared by the providers.
#[derive(Debug, Clone)]
pub struct ProviderHttp {
    pub provider: &'static str,
    pub client: OAuthClient,
    pub endpoints: ProviderEndpoints,
    pub scopes: Vec<String>,
    http: reqwest::Client,
    timeout: Duration,
}

impl ProviderHttp {
    pub fn new(
        provider: &'static str,
        client: OAuthClient,
        endpoints: ProviderEndpoints,
        scopes: &[&str],
        http: reqwest::Client,
        timeout: Duration,
    ) -> Self {
        Self {
            provider,
            client,
            endpoints,
            scopes: scopes.iter().map(|s| s.to_string()).collect(),
            http,
            timeout,
        }
    }

    pub fn http(&self) -> &reqwest::Client {
        &self.http
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Authorization URL with the standard code-flow and PKCE parameters.
    pub fn authorization_url(
        &self,
        state: &str,
        pkce: &PkcePair,
        scope_separator: &str,
        extra: &[(&str, &str)],
    ) -> Result<Url, OAuthError> {
        let mut url = Url::parse(&self.endpoints.authorize_url)?;
        {
            let mut query = url.query_pairs_mut();
            query
                .append_pair("client_id", &self.client.client_id)
                .append_pair("redirect_uri", &self.client.redirect_uri)
                .append_pair("response_type", "code")
                .append_pair("scope", &self.scopes.join(scope_separator))
                .append_pair("state", state)
                .append_pair("code_challenge", &pkce.challenge)
                .append_pair("code_challenge_method", pkce.method);
            for (key, value) in extra {
                query.append_pair(key, value);
            }
        }
        Ok(url)
    }

    pub async fn exchange_code(&self, code: &str, code_verifier: &str) -> Result<TokenSet, OAuthError> {
        let form = [
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", self.client.redirect_uri.as_str()),
            ("client_id", self.client.client_id.as_str()),
            ("client_secret", self.client.client_secret.as_str()),
            ("code_verifier", code_verifier),
        ];
        self.token_request(&form).await
    }

    pub async fn refresh(&self, refresh_token: &str) -> Result<TokenSet, OAuthError> {
        let form = [
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
            ("client_id", self.client.client_id.as_str()),
            ("client_secret", self.client.client_secret.as_str()),
        ];
        self.token_request(&form).await
    }

    async fn token_request(&self, form: &[(&str, &str)]) -> Result<TokenSet, OAuthError> {
        let response = self
            .http
            .post(&self.endpoints.token_url)
            .header("Accept", "application/json")
            .timeout(self.timeout)
            .form(form)
            .send()
            .await?;

        let body = self.read_json(response).await?;

        // Some providers report failures with a 200 and an `error` field.
        if let Some(error) = body.get("error").and_then(Value::as_str) {
            return Err(OAuthError::Rejected {
                provider: self.provider,
                error: error.to_string(),
                description: body
                    .get("error_description")
                    .and_then(Value::as_str)
                    .map(str::to_string),
            });
        }

        serde_json::from_value(body).map_err(|e| OAuthError::MalformedResponse {
            provider: self.provider,
            details: format!("token response: {e}"),
        })
    }

    /// Authenticated GET against the profile API, returning the JSON body.
    pub async fn get_json(
        &self,
        url: &str,
        access_token: &str,
        headers: &[(&str, &str)],
    ) -> Result<Value, OAuthError> {
        let mut request = self
            .http
            .get(url)
            .bearer_auth(access_token)
            .header("Accept", "application/json")
            .timeout(self.timeout);
        for (name, value) in headers {
            request = request.header(*name, *value);
        }
        let response = request.send().await?;
        self.read_json(response).await
    }

    async fn read_json(&self, response: reqwest::Response) -> Result<Value, OAuthError> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::warn!(
                provider = self.provider,
                status = status.as_u16(),
                "OAuth provider request failed"
            );
            return Err(OAuthError::Http {
                provider: self.provider,
                status: status.as_u16(),
                body: truncate(body),
            });
        }

        response
            .json::<Value>()
            .await
            .map_err(|e| OAuthError::MalformedResponse {
                provider: self.provider,
                details: e.to_string(),
            })
    }

    pub fn malformed(&self, details: impl Into<String>) -> OAuthError {
        OAuthError::MalformedResponse {
            provider: self.provider,
            details: details.into(),
        }
    }
}

fn truncate(body: String) -> String {
    if body.chars().count() > MAX_ERROR_BODY {
        let truncated: String = body.chars().take(MAX_ERROR_BODY).collect();
        format!("{truncated}...")
    } else {
        body
    }
}

/// String field of a JSON object, ignoring empty strings.
pub(crate) fn str_field(value: &Value, key: &str) -> Option<String> {
    value
        .get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Provider ids arrive as strings or numbers.
pub(crate) fn id_field(value: &Value, key: &str) -> Option<String> {
    match value.get(key)? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
