//! Google sign-in (OpenID Connect over OAuth 2.0)

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use url::Url;

use super::provider::{
    OAuthClient, OAuthError, OAuthProvider, PkcePair, ProviderEndpoints, ProviderHttp, TokenSet,
    UserInfo, id_field, str_field,
};

pub const GOOGLE_SCOPES: &[&str] = &["openid", "email", "profile"];

pub fn default_endpoints() -> ProviderEndpoints {
    ProviderEndpoints {
        authorize_url: "https://accounts.google.com/o/oauth2/v2/auth".to_string(),
        token_url: "https://oauth2.googleapis.com/token".to_string(),
        api_base_url: "https://openidconnect.googleapis.com".to_string(),
        revoke_url: Some("https://oauth2.googleapis.com/revoke".to_string()),
    }
}

pub struct GoogleProvider {
    http: ProviderHttp,
}

impl GoogleProvider {
    pub fn new(
        client: OAuthClient,
        endpoints: ProviderEndpoints,
        http: reqwest::Client,
        timeout: Duration,
    ) -> Self {
        Self {
            http: ProviderHttp::new("google", client, endpoints, GOOGLE_SCOPES, http, timeout),
        }
    }
}

/// Maps an OpenID Connect userinfo document.
pub fn parse_user_info(raw: Value) -> Option<UserInfo> {
    Some(UserInfo {
        id: id_field(&raw, "sub")?,
        email: str_field(&raw, "email"),
        email_verified: raw
            .get("email_verified")
            .and_then(Value::as_bool)
            .unwrap_or(false),
        name: str_field(&raw, "name"),
        given_name: str_field(&raw, "given_name"),
        family_name: str_field(&raw, "family_name"),
        picture: str_field(&raw, "picture"),
        locale: str_field(&raw, "locale"),
        raw,
    })
}

#[async_trait]
impl OAuthProvider for GoogleProvider {
    fn name(&self) -> &'static str {
        "google"
    }

    fn scopes(&self) -> &[String] {
        &self.http.scopes
    }

    fn build_authorization_url(&self, state: &str, pkce: &PkcePair) -> Result<Url, OAuthError> {
        // Offline access so the first consent yields a refresh token.
        self.http.authorization_url(
            state,
            pkce,
            " ",
            &[
                ("access_type", "offline"),
                ("include_granted_scopes", "true"),
                ("prompt", "consent"),
            ],
        )
    }

    async fn exchange_code_for_tokens(
        &self,
        code: &str,
        code_verifier: &str,
    ) -> Result<TokenSet, OAuthError> {
        self.http.exchange_code(code, code_verifier).await
    }

    async fn refresh_access_token(&self, refresh_token: &str) -> Result<TokenSet, OAuthError> {
        self.http.refresh(refresh_token).await
    }

    async fn get_user_info(&self, access_token: &str) -> Result<UserInfo, OAuthError> {
        let url = format!("{}/v1/userinfo", self.http.endpoints.api_base_url);
        let raw = self.http.get_json(&url, access_token, &[]).await?;
        parse_user_info(raw).ok_or_else(|| self.http.malformed("userinfo without 'sub'"))
    }

    /// Never fails: any error is logged and reported as `false`.
    async fn revoke_token(&self, token: &str) -> bool {
        let Some(revoke_url) = self.http.endpoints.revoke_url.as_deref() else {
            return false;
        };

        let result = self
            .http
            .http()
            .post(revoke_url)
            .timeout(self.http.timeout())
            .form(&[("token", token)])
            .send()
            .await;

        match result {
            Ok(response) if response.status().is_success() => true,
            Ok(response) => {
                tracing::warn!(
                    status = response.status().as_u16(),
                    "Google token revocation was refused"
                );
                false
            }
            Err(e) => {
                tracing::warn!(error = %e, "Google token revocation failed");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oauth::generate_pkce_pair;
    use serde_json::json;

    fn provider() -> GoogleProvider {
        GoogleProvider::new(
            OAuthClient {
                client_id: "google-client".to_string(),
                client_secret: "google-secret".to_string(),
                redirect_uri: "http://localhost:8080/auth/oauth/google/callback".to_string(),
            },
            default_endpoints(),
            reqwest::Client::new(),
            Duration::from_secs(5),
        )
    }

    #[test]
    fn test_authorization_url_carries_pkce_and_offline_access() {
        let pkce = generate_pkce_pair();
        let url = provider().build_authorization_url("state-123", &pkce).unwrap();
        assert_eq!(url.host_str(), Some("accounts.google.com"));

        let query: std::collections::HashMap<_, _> = url.query_pairs().into_owned().collect();
        assert_eq!(query["client_id"], "google-client");
        assert_eq!(query["state"], "state-123");
        assert_eq!(query["scope"], "openid email profile");
        assert_eq!(query["code_challenge"], pkce.challenge);
        assert_eq!(query["code_challenge_method"], "S256");
        assert_eq!(query["access_type"], "offline");
        assert_eq!(query["response_type"], "code");
    }

    #[test]
    fn test_parse_user_info() {
        let info = parse_user_info(json!({
            "sub": "1098",
            "email": "ada@example.com",
            "email_verified": true,
            "name": "Ada Lovelace",
            "given_name": "Ada",
            "family_name": "Lovelace",
            "picture": "https://example.com/a.png",
            "locale": "en"
        }))
        .unwrap();
        assert_eq!(info.id, "1098");
        assert!(info.email_verified);
        assert_eq!(info.given_name.as_deref(), Some("Ada"));
        assert!(parse_user_info(json!({"email": "x@example.com"})).is_none());
    }

    #[tokio::test]
    async fn test_revoke_swallows_network_errors() {
        let mut endpoints = default_endpoints();
        endpoints.revoke_url = Some("http://127.0.0.1:9/revoke".to_string());
        let provider = GoogleProvider::new(
            provider().http.client.clone(),
            endpoints,
            reqwest::Client::new(),
            Duration::from_millis(500),
        );
        assert!(!provider.revoke_token("token").await);
    }
}
