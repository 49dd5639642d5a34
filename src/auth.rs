//! # Authentication
//!
//! Sessions are HS256 JWTs carrying the user id. The token is accepted from an
//! `Authorization: Bearer` header or from the `bloggy_session` cookie, and
//! resolved into an [`AuthContext`] that handlers use for RBAC checks.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use argon2::{
    Argon2,
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
};
use axum::{
    extract::FromRequestParts,
    http::{
        HeaderMap, HeaderValue,
        header::{AUTHORIZATION, COOKIE},
        request::Parts,
    },
};
use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use rand::{RngCore, rngs::OsRng};
use serde::{Deserialize, Serialize};

use crate::config::AppConfig;
use crate::error::{ApiError, internal_error, unauthorized};
use crate::models::user;
use crate::rbac::{self, Owned, PermissionResolver};
use crate::repositories::UserRepository;
use crate::server::AppState;

/// Name of the session cookie.
pub const SESSION_COOKIE: &str = "bloggy_session";

/// JWT claims of a session token
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionClaims {
    /// User id
    pub sub: String,
    pub iat: u64,
    pub exp: u64,
}

/// Issues and verifies session tokens.
#[derive(Clone)]
pub struct SessionManager {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    ttl: Duration,
    secure_cookie: bool,
}

impl std::fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionManager")
            .field("ttl", &self.ttl)
            .field("secure_cookie", &self.secure_cookie)
            .finish_non_exhaustive()
    }
}

impl SessionManager {
    pub fn new(secret: &[u8], ttl: Duration, secure_cookie: bool) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(secret),
            decoding_key: DecodingKey::from_secret(secret),
            ttl,
            secure_cookie,
        }
    }

    /// Builds the manager from configuration. Without a configured secret a
    /// random one is generated, so sessions do not survive a restart.
    pub fn from_config(config: &AppConfig) -> Self {
        let ttl = Duration::from_secs(config.session_ttl_seconds);
        let secure = config.is_production();

        match config.session_secret.as_deref() {
            Some(secret) => Self::new(secret.as_bytes(), ttl, secure),
            None => {
                tracing::warn!(
                    profile = %config.profile,
                    "BLOGGY_SESSION_SECRET not set; sessions use an ephemeral secret"
                );
                let mut secret = [0u8; 32];
                OsRng.fill_bytes(&mut secret);
                Self::new(&secret, ttl, secure)
            }
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Issues a session token for `user_id`.
    pub fn issue(&self, user_id: i32) -> Result<String, ApiError> {
        let now = unix_now();
        let claims = SessionClaims {
            sub: user_id.to_string(),
            iat: now,
            exp: now + self.ttl.as_secs(),
        };

        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key).map_err(|e| {
            tracing::error!(error = %e, "Failed to sign session token");
            internal_error()
        })
    }

    /// Returns the user id of a valid, unexpired token.
    pub fn verify(&self, token: &str) -> Option<i32> {
        let validation = Validation::new(Algorithm::HS256);
        match decode::<SessionClaims>(token, &self.decoding_key, &validation) {
            Ok(data) => data.claims.sub.parse().ok(),
            Err(e) => {
                tracing::debug!(error = %e, "Session token rejected");
                None
            }
        }
    }

    /// `Set-Cookie` value carrying `token`.
    pub fn session_cookie(&self, token: &str) -> HeaderValue {
        let mut cookie = format!(
            "{SESSION_COOKIE}={token}; Path=/; HttpOnly; SameSite=Lax; Max-Age={}",
            self.ttl.as_secs()
        );
        if self.secure_cookie {
            cookie.push_str("; Secure");
        }
        HeaderValue::from_str(&cookie).unwrap_or_else(|_| clear_session_cookie())
    }
}

/// `Set-Cookie` value that removes the session cookie.
pub fn clear_session_cookie() -> HeaderValue {
    HeaderValue::from_static("bloggy_session=; Path=/; HttpOnly; SameSite=Lax; Max-Age=0")
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}

/// Hashes a password with Argon2id and a fresh salt, as a PHC string.
pub fn hash_password(password: &str) -> Result<String, argon2::password_hash::Error> {
    let salt = SaltString::generate(&mut OsRng);
    Ok(Argon2::default()
        .hash_password(password.as_bytes(), &salt)?
        .to_string())
}

/// Checks `password` against a stored PHC string. Malformed hashes never match.
pub fn verify_password(password: &str, password_hash: &str) -> bool {
    match PasswordHash::new(password_hash) {
        Ok(parsed) => Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok(),
        Err(e) => {
            tracing::warn!(error = %e, "Stored password hash is malformed");
            false
        }
    }
}

/// Random URL-safe token for one-off secrets.
pub fn random_token(len: usize) -> String {
    let mut bytes = vec![0u8; len];
    OsRng.fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Session token from the `Authorization` header, falling back to the cookie.
pub fn extract_session_token(headers: &HeaderMap) -> Option<String> {
    if let Some(token) = headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
    {
        return Some(token.trim().to_string());
    }

    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, value)| *name == SESSION_COOKIE && !value.is_empty())
        .map(|(_, value)| value.to_string())
}

/// Per-request authentication state: the signed-in user, if any, plus the
/// resolver used for authorization checks.
#[derive(Clone)]
pub struct AuthContext {
    pub user: Option<user::Model>,
    pub resolver: PermissionResolver,
}

impl AuthContext {
    pub fn user(&self) -> Option<&user::Model> {
        self.user.as_ref()
    }

    /// The signed-in user, or 401.
    pub fn require_user(&self) -> Result<&user::Model, ApiError> {
        self.user.as_ref().ok_or_else(|| unauthorized(None))
    }

    pub async fn requires_role(&self, names: &[&str]) -> Result<(), ApiError> {
        rbac::requires_role(&self.resolver, self.user(), names).await
    }

    pub async fn requires_permission(
        &self,
        name: &str,
        instance: Option<&(dyn Owned + Sync)>,
    ) -> Result<(), ApiError> {
        rbac::requires_permission(&self.resolver, self.user(), name, instance).await
    }
}

/// Resolves the session into a user. Invalid or stale sessions are anonymous.
async fn load_session_user(parts: &Parts, state: &AppState) -> Result<Option<user::Model>, ApiError> {
    let Some(token) = extract_session_token(&parts.headers) else {
        return Ok(None);
    };
    let Some(user_id) = state.sessions.verify(&token) else {
        return Ok(None);
    };

    let user = UserRepository::new(state.db.clone())
        .find_by_id(user_id)
        .await?;
    if user.is_none() {
        tracing::info!(user_id, "Session refers to a deleted user");
    }
    Ok(user)
}

impl FromRequestParts<AppState> for AuthContext {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let user = load_session_user(parts, state).await?;
        Ok(AuthContext {
            user,
            resolver: state.resolver.clone(),
        })
    }
}

/// Extractor for routes that require a signed-in user.
#[derive(Debug, Clone)]
pub struct CurrentUser(pub user::Model);

impl FromRequestParts<AppState> for CurrentUser {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        load_session_user(parts, state)
            .await?
            .map(CurrentUser)
            .ok_or_else(|| unauthorized(None))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager() -> SessionManager {
        SessionManager::new(&[7u8; 32], Duration::from_secs(3600), false)
    }

    #[test]
    fn test_session_roundtrip() {
        let sessions = manager();
        let token = sessions.issue(42).unwrap();
        assert_eq!(sessions.verify(&token), Some(42));
    }

    #[test]
    fn test_session_from_other_secret_rejected() {
        let token = manager().issue(42).unwrap();
        let other = SessionManager::new(&[8u8; 32], Duration::from_secs(3600), false);
        assert_eq!(other.verify(&token), None);
        assert_eq!(other.verify("not-a-jwt"), None);
    }

    #[test]
    fn test_expired_session_rejected() {
        let claims = SessionClaims {
            sub: "42".to_string(),
            iat: 1_000,
            exp: 2_000,
        };
        let token = encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(&[7u8; 32]),
        )
        .unwrap();
        assert_eq!(manager().verify(&token), None);
    }

    #[test]
    fn test_password_hash_verifies() {
        let hash = hash_password("correct horse battery staple").unwrap();
        assert!(hash.starts_with("$argon2id$"));
        assert!(verify_password("correct horse battery staple", &hash));
        assert!(!verify_password("wrong", &hash));
        assert!(!verify_password("anything", "not a phc string"));
    }

    #[test]
    fn test_extract_token_prefers_bearer() {
        let mut headers = HeaderMap::new();
        headers.insert(COOKIE, HeaderValue::from_static("theme=dark; bloggy_session=cookie-token"));
        assert_eq!(extract_session_token(&headers).as_deref(), Some("cookie-token"));

        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer header-token"));
        assert_eq!(extract_session_token(&headers).as_deref(), Some("header-token"));
    }

    #[test]
    fn test_extract_token_ignores_other_schemes_and_empty_cookie() {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_static("Basic dXNlcjpwdw=="));
        headers.insert(COOKIE, HeaderValue::from_static("bloggy_session="));
        assert_eq!(extract_session_token(&headers), None);
    }

    #[test]
    fn test_session_cookie_attributes() {
        let cookie = manager().session_cookie("abc");
        let cookie = cookie.to_str().unwrap();
        assert!(cookie.starts_with("bloggy_session=abc;"));
        assert!(cookie.contains("HttpOnly"));
        assert!(cookie.contains("Max-Age=3600"));
        assert!(!cookie.contains("Secure"));

        let secure = SessionManager::new(&[7u8; 32], Duration::from_secs(60), true);
        assert!(secure.session_cookie("abc").to_str().unwrap().ends_with("; Secure"));
    }
}
