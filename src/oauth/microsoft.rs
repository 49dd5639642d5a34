//! Microsoft identity platform sign-in, profile from Microsoft Graph

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use url::Url;

use super::provider::{
    OAuthClient, OAuthError, OAuthProvider, PkcePair, ProviderEndpoints, ProviderHttp, TokenSet,
    UserInfo, id_field, str_field,
};

pub const MICROSOFT_SCOPES: &[&str] = &["openid", "email", "profile", "offline_access", "User.Read"];

pub fn default_endpoints() -> ProviderEndpoints {
    ProviderEndpoints {
        authorize_url: "https://login.microsoftonline.com/common/oauth2/v2.0/authorize".to_string(),
        token_url: "https://login.microsoftonline.com/common/oauth2/v2.0/token".to_string(),
        api_base_url: "https://graph.microsoft.com".to_string(),
        revoke_url: None,
    }
}

pub struct MicrosoftProvider {
    http: ProviderHttp,
}

impl MicrosoftProvider {
    pub fn new(
        client: OAuthClient,
        endpoints: ProviderEndpoints,
        http: reqwest::Client,
        timeout: Duration,
    ) -> Self {
        Self {
            http: ProviderHttp::new("microsoft", client, endpoints, MICROSOFT_SCOPES, http, timeout),
        }
    }
}

/// Maps a Graph `/me` payload. `mail` is the directory-managed address and
/// counts as verified; `userPrincipalName` is only a fallback.
pub fn parse_user_info(raw: Value) -> Option<UserInfo> {
    let mail = str_field(&raw, "mail");
    let email_verified = mail.is_some();
    let email = mail.or_else(|| str_field(&raw, "userPrincipalName").filter(|upn| upn.contains('@')));

    Some(UserInfo {
        id: id_field(&raw, "id")?,
        email,
        email_verified,
        name: str_field(&raw, "displayName"),
        given_name: str_field(&raw, "givenName"),
        family_name: str_field(&raw, "surname"),
        picture: None,
        locale: str_field(&raw, "preferredLanguage"),
        raw,
    })
}

#[async_trait]
impl OAuthProvider for MicrosoftProvider {
    fn name(&self) -> &'static str {
        "microsoft"
    }

    fn scopes(&self) -> &[String] {
        &self.http.scopes
    }

    fn build_authorization_url(&self, state: &str, pkce: &PkcePair) -> Result<Url, OAuthError> {
        self.http
            .authorization_url(state, pkce, " ", &[("response_mode", "query")])
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
        let url = format!("{}/v1.0/me", self.http.endpoints.api_base_url);
        let raw = self.http.get_json(&url, access_token, &[]).await?;
        parse_user_info(raw).ok_or_else(|| self.http.malformed("profile without 'id'"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_user_info_with_mail() {
        let info = parse_user_info(json!({
            "id": "87d349ed-44d7-43e1-9a83-5f2406dee5bd",
            "displayName": "Megan Bowen",
            "givenName": "Megan",
            "surname": "Bowen",
            "mail": "MeganB@contoso.com",
            "userPrincipalName": "MeganB@contoso.com",
            "preferredLanguage": "en-US"
        }))
        .unwrap();
        assert_eq!(info.email.as_deref(), Some("MeganB@contoso.com"));
        assert!(info.email_verified);
        assert_eq!(info.family_name.as_deref(), Some("Bowen"));
        assert_eq!(info.locale.as_deref(), Some("en-US"));
    }

    #[test]
    fn test_parse_user_info_principal_name_is_unverified() {
        let info = parse_user_info(json!({
            "id": "abc",
            "mail": null,
            "userPrincipalName": "someone@outlook.com"
        }))
        .unwrap();
        assert_eq!(info.email.as_deref(), Some("someone@outlook.com"));
        assert!(!info.email_verified);
    }
}
