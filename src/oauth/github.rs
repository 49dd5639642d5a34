//! GitHub sign-in
//!
//! GitHub's `/user` payload only carries the public email, so the primary
//! verified address is read from `/user/emails`.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use url::Url;

use super::provider::{
    OAuthClient, OAuthError, OAuthProvider, PkcePair, ProviderEndpoints, ProviderHttp, TokenSet,
    UserInfo, id_field, str_field,
};

pub const GITHUB_SCOPES: &[&str] = &["read:user", "user:email"];

const USER_AGENT: &str = "Bloggy/0.1";
const ACCEPT: &str = "application/vnd.github+json";

pub fn default_endpoints() -> ProviderEndpoints {
    ProviderEndpoints {
        authorize_url: "https://github.com/login/oauth/authorize".to_string(),
        token_url: "https://github.com/login/oauth/access_token".to_string(),
        api_base_url: "https://api.github.com".to_string(),
        revoke_url: None,
    }
}

/// Entry of `GET /user/emails`
#[derive(Debug, Clone, Deserialize)]
pub struct GitHubEmail {
    pub email: String,
    #[serde(default)]
    pub primary: bool,
    #[serde(default)]
    pub verified: bool,
}

pub struct GitHubProvider {
    http: ProviderHttp,
}

impl GitHubProvider {
    pub fn new(
        client: OAuthClient,
        endpoints: ProviderEndpoints,
        http: reqwest::Client,
        timeout: Duration,
    ) -> Self {
        Self {
            http: ProviderHttp::new("github", client, endpoints, GITHUB_SCOPES, http, timeout),
        }
    }

    async fn primary_email(&self, access_token: &str) -> Result<Option<GitHubEmail>, OAuthError> {
        let url = format!("{}/user/emails", self.http.endpoints.api_base_url);
        let raw = self
            .http
            .get_json(&url, access_token, &[("User-Agent", USER_AGENT), ("Accept", ACCEPT)])
            .await?;
        let emails: Vec<GitHubEmail> = serde_json::from_value(raw)
            .map_err(|e| self.http.malformed(format!("emails response: {e}")))?;
        Ok(select_primary_email(emails))
    }
}

/// The primary verified address, else any verified one.
pub fn select_primary_email(emails: Vec<GitHubEmail>) -> Option<GitHubEmail> {
    let mut verified = emails.into_iter().filter(|e| e.verified);
    let first = verified.next()?;
    if first.primary {
        return Some(first);
    }
    Some(verified.find(|e| e.primary).unwrap_or(first))
}

/// Maps a `/user` payload, with the address picked from `/user/emails`.
pub fn parse_user_info(raw: Value, email: Option<GitHubEmail>) -> Option<UserInfo> {
    let id = id_field(&raw, "id")?;
    let name = str_field(&raw, "name").or_else(|| str_field(&raw, "login"));
    let (email, email_verified) = match email {
        Some(e) => (Some(e.email), e.verified),
        None => (str_field(&raw, "email"), false),
    };
    let (given_name, family_name) = match name.as_deref().and_then(|n| n.split_once(' ')) {
        Some((given, family)) => (Some(given.to_string()), Some(family.trim().to_string())),
        None => (name.clone(), None),
    };

    Some(UserInfo {
        id,
        email,
        email_verified,
        name,
        given_name,
        family_name,
        picture: str_field(&raw, "avatar_url"),
        locale: None,
        raw,
    })
}

#[async_trait]
impl OAuthProvider for GitHubProvider {
    fn name(&self) -> &'static str {
        "github"
    }

    fn scopes(&self) -> &[String] {
        &self.http.scopes
    }

    fn build_authorization_url(&self, state: &str, pkce: &PkcePair) -> Result<Url, OAuthError> {
        self.http
            .authorization_url(state, pkce, " ", &[("allow_signup", "true")])
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
        let url = format!("{}/user", self.http.endpoints.api_base_url);
        let raw = self
            .http
            .get_json(&url, access_token, &[("User-Agent", USER_AGENT), ("Accept", ACCEPT)])
            .await?;

        let email = match self.primary_email(access_token).await {
            Ok(email) => email,
            Err(e) => {
                tracing::warn!(error = %e, "GitHub email lookup failed; using profile email");
                None
            }
        };

        parse_user_info(raw, email).ok_or_else(|| self.http.malformed("user without 'id'"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn email(address: &str, primary: bool, verified: bool) -> GitHubEmail {
        GitHubEmail {
            email: address.to_string(),
            primary,
            verified,
        }
    }

    #[test]
    fn test_select_primary_verified_email() {
        let chosen = select_primary_email(vec![
            email("old@example.com", false, true),
            email("main@example.com", true, true),
        ])
        .unwrap();
        assert_eq!(chosen.email, "main@example.com");

        let fallback = select_primary_email(vec![
            email("main@example.com", true, false),
            email("other@example.com", false, true),
        ])
        .unwrap();
        assert_eq!(fallback.email, "other@example.com");

        assert!(select_primary_email(vec![email("x@example.com", true, false)]).is_none());
    }

    #[test]
    fn test_parse_user_info_prefers_verified_email() {
        let raw = json!({
            "id": 583231,
            "login": "octocat",
            "name": "The Octocat",
            "email": "public@example.com",
            "avatar_url": "https://avatars.githubusercontent.com/u/583231"
        });

        let info = parse_user_info(raw.clone(), Some(email("octo@example.com", true, true))).unwrap();
        assert_eq!(info.id, "583231");
        assert_eq!(info.email.as_deref(), Some("octo@example.com"));
        assert!(info.email_verified);
        assert_eq!(info.given_name.as_deref(), Some("The"));

        let info = parse_user_info(raw, None).unwrap();
        assert_eq!(info.email.as_deref(), Some("public@example.com"));
        assert!(!info.email_verified);
    }

    #[test]
    fn test_parse_user_info_falls_back_to_login() {
        let info = parse_user_info(json!({"id": 1, "login": "octocat"}), None).unwrap();
        assert_eq!(info.name.as_deref(), Some("octocat"));
        assert!(info.email.is_none());
    }
}
