//! # OAuth State Repository
//!
//! This module provides database operations for in-flight OAuth
//! authorization requests.

use chrono::{DateTime, Duration, Utc};
use sea_orm::{ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, Set};
use std::sync::Arc;

use crate::models::oauth_state::{self, Entity, Model};

/// How long an authorization request stays valid.
pub const STATE_TTL_MINUTES: i64 = 10;

/// Repository for OAuth state database operations
#[derive(Debug, Clone)]
pub struct OAuthStateRepository {
    db: Arc<DatabaseConnection>,
}

impl OAuthStateRepository {
    /// Create a new OAuth state repository
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Create a new OAuth state record
    pub async fn create(
        &self,
        provider: &str,
        state: &str,
        code_verifier: &str,
        link_user_id: Option<i32>,
        redirect_to: Option<String>,
    ) -> Result<Model, sea_orm::DbErr> {
        let now = Utc::now();

        oauth_state::ActiveModel {
            provider: Set(provider.to_string()),
            state: Set(state.to_string()),
            code_verifier: Set(code_verifier.to_string()),
            link_user_id: Set(link_user_id),
            redirect_to: Set(redirect_to),
            expires_at: Set((now + Duration::minutes(STATE_TTL_MINUTES)).into()),
            created_at: Set(now.into()),
            ..Default::default()
        }
        .insert(&*self.db)
        .await
    }

    /// Find an unexpired OAuth state by provider and state token
    pub async fn find_by_provider_state(
        &self,
        provider: &str,
        state: &str,
    ) -> Result<Option<Model>, sea_orm::DbErr> {
        Entity::find()
            .filter(oauth_state::Column::Provider.eq(provider))
            .filter(oauth_state::Column::State.eq(state))
            .filter(oauth_state::Column::ExpiresAt.gt(Utc::now()))
            .one(&*self.db)
            .await
    }

    /// Find and consume an OAuth state (delete it after retrieval)
    ///
    /// Only the caller whose delete removes the row gets the state back, so a
    /// state token is honored at most once.
    pub async fn find_and_consume(
        &self,
        provider: &str,
        state: &str,
    ) -> Result<Option<Model>, sea_orm::DbErr> {
        let Some(found) = self.find_by_provider_state(provider, state).await? else {
            return Ok(None);
        };

        let deleted = Entity::delete_by_id(found.id).exec(&*self.db).await?;
        if deleted.rows_affected == 0 {
            return Ok(None);
        }

        Ok(Some(found))
    }

    /// Clean up expired OAuth states
    pub async fn cleanup_expired(&self, now: DateTime<Utc>) -> Result<u64, sea_orm::DbErr> {
        let result = Entity::delete_many()
            .filter(oauth_state::Column::ExpiresAt.lt(now))
            .exec(&*self.db)
            .await?;

        Ok(result.rows_affected)
    }
}
