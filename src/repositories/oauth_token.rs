//! # OAuth Token Repository
//!
//! Stores provider tokens. Values are encrypted with the [`TokenCipher`]
//! before they reach the database and decrypted only on read.

use anyhow::{Result, anyhow};
use chrono::{DateTime, Duration, Utc};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder, Set,
};
use std::sync::Arc;

use crate::crypto::TokenCipher;
use crate::models::oauth_token::{self, Entity as OAuthToken};
use crate::oauth::TokenSet;

/// Decrypted token material.
#[derive(Clone)]
pub struct StoredTokens {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub token_type: String,
    pub scope: Option<String>,
    pub access_token_expires_at: Option<DateTime<Utc>>,
}

impl std::fmt::Debug for StoredTokens {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoredTokens")
            .field("access_token", &"<redacted>")
            .field(
                "refresh_token",
                &self.refresh_token.as_ref().map(|_| "<redacted>"),
            )
            .field("token_type", &self.token_type)
            .field("scope", &self.scope)
            .field("access_token_expires_at", &self.access_token_expires_at)
            .finish()
    }
}

fn expiry(now: DateTime<Utc>, seconds: Option<i64>) -> Option<DateTime<Utc>> {
    seconds.map(|s| now + Duration::seconds(s))
}

/// Repository for OAuth token database operations
#[derive(Debug, Clone)]
pub struct OAuthTokenRepository {
    /// Database connection pool
    pub db: Arc<DatabaseConnection>,
    cipher: TokenCipher,
}

impl OAuthTokenRepository {
    pub fn new(db: Arc<DatabaseConnection>, cipher: TokenCipher) -> Self {
        Self { db, cipher }
    }

    pub async fn find_for_account(&self, account_id: i32) -> Result<Option<oauth_token::Model>> {
        let token = OAuthToken::find()
            .filter(oauth_token::Column::OauthAccountId.eq(account_id))
            .order_by_desc(oauth_token::Column::UpdatedAt)
            .one(&*self.db)
            .await?;
        Ok(token)
    }

    /// Stores `tokens` for an account, replacing what was there. A token set
    /// without a refresh token keeps the previously stored one.
    pub async fn store(&self, account_id: i32, tokens: &TokenSet) -> Result<oauth_token::Model> {
        let now = Utc::now();
        let access = self
            .cipher
            .encrypt_token(&tokens.access_token)
            .map_err(|e| anyhow!("Token encryption failed: {}", e))?;
        let refresh = tokens
            .refresh_token
            .as_deref()
            .map(|t| self.cipher.encrypt_token(t))
            .transpose()
            .map_err(|e| anyhow!("Token encryption failed: {}", e))?;
        let access_expires = expiry(now, tokens.expires_in).map(Into::into);
        let refresh_expires = expiry(now, tokens.refresh_expires_in).map(Into::into);

        match self.find_for_account(account_id).await? {
            Some(existing) => {
                let mut active: oauth_token::ActiveModel = existing.into();
                active.access_token_encrypted = Set(access);
                if refresh.is_some() {
                    active.refresh_token_encrypted = Set(refresh);
                    active.refresh_token_expires_at = Set(refresh_expires);
                }
                active.token_type = Set(tokens.token_type.clone());
                if tokens.scope.is_some() {
                    active.scope = Set(tokens.scope.clone());
                }
                active.access_token_expires_at = Set(access_expires);
                active.updated_at = Set(now.into());
                Ok(active.update(&*self.db).await?)
            }
            None => {
                let model = oauth_token::ActiveModel {
                    oauth_account_id: Set(account_id),
                    access_token_encrypted: Set(access),
                    refresh_token_encrypted: Set(refresh),
                    token_type: Set(tokens.token_type.clone()),
                    scope: Set(tokens.scope.clone()),
                    access_token_expires_at: Set(access_expires),
                    refresh_token_expires_at: Set(refresh_expires),
                    created_at: Set(now.into()),
                    updated_at: Set(now.into()),
                    ..Default::default()
                };
                Ok(model.insert(&*self.db).await?)
            }
        }
    }

    /// Decrypts a stored row.
    pub fn decrypt(&self, token: &oauth_token::Model) -> Result<StoredTokens> {
        let access_token = self
            .cipher
            .decrypt_token(&token.access_token_encrypted)
            .map_err(|e| {
                tracing::error!(token_id = token.id, "Token decryption failed");
                anyhow!("Token decryption failed: {}", e)
            })?;
        let refresh_token = token
            .refresh_token_encrypted
            .as_deref()
            .map(|t| self.cipher.decrypt_token(t))
            .transpose()
            .map_err(|e| anyhow!("Token decryption failed: {}", e))?;

        Ok(StoredTokens {
            access_token,
            refresh_token,
            token_type: token.token_type.clone(),
            scope: token.scope.clone(),
            access_token_expires_at: token.access_token_expires_at.map(|t| t.with_timezone(&Utc)),
        })
    }

    /// Refreshable tokens whose access token expires at or before `before`.
    pub async fn list_expiring(&self, before: DateTime<Utc>) -> Result<Vec<oauth_token::Model>> {
        let tokens = OAuthToken::find()
            .filter(oauth_token::Column::AccessTokenExpiresAt.lte(before))
            .filter(oauth_token::Column::RefreshTokenEncrypted.is_not_null())
            .order_by_asc(oauth_token::Column::AccessTokenExpiresAt)
            .all(&*self.db)
            .await?;
        Ok(tokens)
    }

    /// Deletes tokens that are expired and cannot be refreshed.
    pub async fn delete_expired_unrefreshable(&self, now: DateTime<Utc>) -> Result<u64> {
        let result = OAuthToken::delete_many()
            .filter(oauth_token::Column::AccessTokenExpiresAt.lt(now))
            .filter(oauth_token::Column::RefreshTokenEncrypted.is_null())
            .exec(&*self.db)
            .await?;
        Ok(result.rows_affected)
    }
}
