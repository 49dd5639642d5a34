//! Facebook Login, profile from the Graph API
//!
//! Facebook issues long-lived access tokens and no refresh tokens.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use url::Url;

use super::provider::{
    OAuthClient, OAuthError, OAuthProvider, PkcePair, ProviderEndpoints, ProviderHttp, TokenSet,
    UserInfo, id_field, str_field,
};

pub const FACEBOOK_SCOPES: &[&str] = &["email", "public_profile"];

const GRAPH_VERSION: &str = "v18.0";
const PROFILE_FIELDS: &str = "id,name,email,first_name,last_name,picture.type(large),locale";

pub fn default_endpoints() -> ProviderEndpoints {
    ProviderEndpoints {
        authorize_url: format!("https://www.facebook.com/{GRAPH_VERSION}/dialog/oauth"),
        token_url: format!("https://graph.facebook.com/{GRAPH_VERSION}/oauth/access_token"),
        api_base_url: "https://graph.facebook.com".to_string(),
        revoke_url: None,
    }
}

pub struct FacebookProvider {
    http: ProviderHttp,
}

impl FacebookProvider {
    pub fn new(
        client: OAuthClient,
        endpoints: ProviderEndpoints,
        http: reqwest::Client,
        timeout: Duration,
    ) -> Self {
        Self {
            http: ProviderHttp::new("facebook", client, endpoints, FACEBOOK_SCOPES, http, timeout),
        }
    }
}

/// Maps a Graph `/me` payload. Facebook only returns confirmed addresses.
pub fn parse_user_info(raw: Value) -> Option<UserInfo> {
    let email = str_field(&raw, "email");
    let picture = raw
        .pointer("/picture/data/url")
        .and_then(Value::as_str)
        .map(str::to_string);

    Some(UserInfo {
        id: id_field(&raw, "id")?,
        email_verified: email.is_some(),
        email,
        name: str_field(&raw, "name"),
        given_name: str_field(&raw, "first_name"),
        family_name: str_field(&raw, "last_name"),
        picture,
        locale: str_field(&raw, "locale"),
        raw,
    })
}

#[async_trait]
impl OAuthProvider for FacebookProvider {
    fn name(&self) -> &'static str {
        "facebook"
    }

    fn scopes(&self) -> &[String] {
        &self.http.scopes
    }

    fn build_authorization_url(&self, state: &str, pkce: &PkcePair) -> Result<Url, OAuthError> {
        self.http.authorization_url(state, pkce, ",", &[])
    }

    async fn exchange_code_for_tokens(
        &self,
        code: &str,
        code_verifier: &str,
    ) -> Result<TokenSet, OAuthError> {
        self.http.exchange_code(code, code_verifier).await
    }

    async fn refresh_access_token(&self, _refresh_token: &str) -> Result<TokenSet, OAuthError> {
        Err(OAuthError::Unsupported {
            provider: "facebook",
            operation: "token refresh",
        })
    }

    async fn get_user_info(&self, access_token: &str) -> Result<UserInfo, OAuthError> {
        let mut url = Url::parse(&format!(
            "{}/{GRAPH_VERSION}/me",
            self.http.endpoints.api_base_url
        ))?;
        url.query_pairs_mut().append_pair("fields", PROFILE_FIELDS);
        let raw = self.http.get_json(url.as_str(), access_token, &[]).await?;
        parse_user_info(raw).ok_or_else(|| self.http.malformed("profile without 'id'"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_user_info() {
        let info = parse_user_info(json!({
            "id": "10158",
            "name": "Jane Doe",
            "email": "jane@example.com",
            "first_name": "Jane",
            "last_name": "Doe",
            "picture": {"data": {"url": "https://graph.facebook.com/pic.jpg"}}
        }))
        .unwrap();
        assert_eq!(info.id, "10158");
        assert!(info.email_verified);
        assert_eq!(info.picture.as_deref(), Some("https://graph.facebook.com/pic.jpg"));
    }

    #[test]
    fn test_profile_without_email_is_unverified() {
        let info = parse_user_info(json!({"id": "1", "name": "No Email"})).unwrap();
        assert!(info.email.is_none());
        assert!(!info.email_verified);
    }

    #[tokio::test]
    async fn test_refresh_is_unsupported() {
        let provider = FacebookProvider::new(
            OAuthClient {
                client_id: "fb".to_string(),
                client_secret: "secret".to_string(),
                redirect_uri: "http://localhost/cb".to_string(),
            },
            default_endpoints(),
            reqwest::Client::new(),
            Duration::from_secs(1),
        );
        assert!(matches!(
            provider.refresh_access_token("anything").await,
            Err(OAuthError::Unsupported { .. })
        ));
        assert!(!provider.revoke_token("anything").await);
    }
}
