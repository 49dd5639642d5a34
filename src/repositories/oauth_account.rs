//! # OAuth Account Repository
//!
//! Linked provider identities and the rule that keeps every user with at
//! least one way to sign in.

use anyhow::Result;
use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, DbErr, EntityTrait, PaginatorTrait,
    QueryFilter, QueryOrder, Set, TransactionTrait,
};
use serde_json::Value as JsonValue;
use std::sync::Arc;
use thiserror::Error;

use crate::models::oauth_account::{self, Entity as OAuthAccount};
use crate::models::{oauth_token, user};

/// Profile fields copied from the provider on link and on every login.
#[derive(Debug, Clone, Default)]
pub struct AccountProfile {
    pub email: Option<String>,
    pub name: Option<String>,
    pub picture: Option<String>,
    pub raw: Option<JsonValue>,
}

/// Why an unlink was refused.
#[derive(Debug, Error)]
pub enum UnlinkError {
    #[error("no {0} account is linked")]
    NotLinked(String),
    #[error("cannot unlink the last authentication method; set a password or link another provider first")]
    LastAuthMethod,
    #[error(transparent)]
    Database(#[from] anyhow::Error),
}

impl From<DbErr> for UnlinkError {
    fn from(err: DbErr) -> Self {
        Self::Database(err.into())
    }
}

/// A user may drop a linked account only if something else still lets them
/// sign in: a password, or another linked account.
pub fn can_unlink(has_password: bool, linked_accounts: u64) -> bool {
    has_password || linked_accounts > 1
}

/// Repository for OAuth account database operations
#[derive(Debug, Clone)]
pub struct OAuthAccountRepository {
    /// Database connection pool
    pub db: Arc<DatabaseConnection>,
}

impl OAuthAccountRepository {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    pub async fn find_by_id(&self, id: i32) -> Result<Option<oauth_account::Model>> {
        Ok(OAuthAccount::find_by_id(id).one(&*self.db).await?)
    }

    /// Looks up the account for a provider identity.
    pub async fn find_by_provider_user(
        &self,
        provider: &str,
        provider_user_id: &str,
    ) -> Result<Option<oauth_account::Model>> {
        let account = OAuthAccount::find()
            .filter(oauth_account::Column::Provider.eq(provider))
            .filter(oauth_account::Column::ProviderUserId.eq(provider_user_id))
            .one(&*self.db)
            .await?;
        Ok(account)
    }

    pub async fn find_for_user_and_provider(
        &self,
        user_id: i32,
        provider: &str,
    ) -> Result<Option<oauth_account::Model>> {
        let account = OAuthAccount::find()
            .filter(oauth_account::Column::UserId.eq(user_id))
            .filter(oauth_account::Column::Provider.eq(provider))
            .one(&*self.db)
            .await?;
        Ok(account)
    }

    pub async fn list_for_user(&self, user_id: i32) -> Result<Vec<oauth_account::Model>> {
        let accounts = OAuthAccount::find()
            .filter(oauth_account::Column::UserId.eq(user_id))
            .order_by_asc(oauth_account::Column::Provider)
            .all(&*self.db)
            .await?;
        Ok(accounts)
    }

    pub async fn count_for_user(&self, user_id: i32) -> Result<u64> {
        let count = OAuthAccount::find()
            .filter(oauth_account::Column::UserId.eq(user_id))
            .count(&*self.db)
            .await?;
        Ok(count)
    }

    /// Links a provider identity to a user.
    pub async fn create(
        &self,
        user_id: i32,
        provider: &str,
        provider_user_id: &str,
        profile: AccountProfile,
    ) -> Result<oauth_account::Model> {
        let now = Utc::now();
        let model = oauth_account::ActiveModel {
            user_id: Set(user_id),
            provider: Set(provider.to_string()),
            provider_user_id: Set(provider_user_id.to_string()),
            email: Set(profile.email),
            name: Set(profile.name),
            picture: Set(profile.picture),
            profile_data: Set(profile.raw),
            created_at: Set(now.into()),
            last_login_at: Set(Some(now.into())),
            ..Default::default()
        };
        Ok(model.insert(&*self.db).await?)
    }

    /// Refreshes the stored profile and stamps `last_login_at`.
    pub async fn record_login(
        &self,
        account: oauth_account::Model,
        profile: AccountProfile,
    ) -> Result<oauth_account::Model> {
        let mut active: oauth_account::ActiveModel = account.into();
        if profile.email.is_some() {
            active.email = Set(profile.email);
        }
        if profile.name.is_some() {
            active.name = Set(profile.name);
        }
        if profile.picture.is_some() {
            active.picture = Set(profile.picture);
        }
        if profile.raw.is_some() {
            active.profile_data = Set(profile.raw);
        }
        active.last_login_at = Set(Some(Utc::now().into()));
        Ok(active.update(&*self.db).await?)
    }

    /// Removes the user's account for `provider`, with its tokens.
    ///
    /// Refused with [`UnlinkError::LastAuthMethod`] when the user has no
    /// password and this is their only linked account. The delete runs first
    /// and the remaining methods are counted inside the same transaction, so
    /// concurrent unlinks of different providers cannot both pass the check.
    pub async fn unlink(
        &self,
        user: &user::Model,
        provider: &str,
    ) -> Result<oauth_account::Model, UnlinkError> {
        let txn = self.db.begin().await?;

        let Some(account) = OAuthAccount::find()
            .filter(oauth_account::Column::UserId.eq(user.id))
            .filter(oauth_account::Column::Provider.eq(provider))
            .one(&txn)
            .await?
        else {
            txn.rollback().await?;
            return Err(UnlinkError::NotLinked(provider.to_string()));
        };

        oauth_token::Entity::delete_many()
            .filter(oauth_token::Column::OauthAccountId.eq(account.id))
            .exec(&txn)
            .await?;
        OAuthAccount::delete_by_id(account.id).exec(&txn).await?;

        let remaining = OAuthAccount::find()
            .filter(oauth_account::Column::UserId.eq(user.id))
            .count(&txn)
            .await?;
        let has_password = user::Entity::find_by_id(user.id)
            .one(&txn)
            .await?
            .is_some_and(|current| current.has_password());

        if !can_unlink(has_password, remaining + 1) {
            txn.rollback().await?;
            return Err(UnlinkError::LastAuthMethod);
        }

        txn.commit().await?;
        tracing::info!(user_id = user.id, provider, "OAuth account unlinked");
        Ok(account)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_can_unlink_rules() {
        assert!(can_unlink(true, 1));
        assert!(can_unlink(true, 0));
        assert!(can_unlink(false, 2));
        assert!(!can_unlink(false, 1));
        assert!(!can_unlink(false, 0));
    }
}
