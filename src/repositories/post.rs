//! Post repository for database operations

use anyhow::{Result, anyhow};
use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, PaginatorTrait, QueryFilter,
    QueryOrder, Set,
};
use std::sync::Arc;

use crate::db;
use crate::models::comment;
use crate::models::post::{self, Entity as Post};

/// Repository for post database operations
#[derive(Debug, Clone)]
pub struct PostRepository {
    /// Database connection pool
    pub db: Arc<DatabaseConnection>,
}

impl PostRepository {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    pub async fn find_by_id(&self, id: i32) -> Result<Option<post::Model>> {
        Ok(Post::find_by_id(id).one(&*self.db).await?)
    }

    /// Newest first. Pages start at 1; returns the page and the total count.
    pub async fn list(&self, page: u64, per_page: u64) -> Result<(Vec<post::Model>, u64)> {
        let paginator = Post::find()
            .order_by_desc(post::Column::CreatedAt)
            .order_by_desc(post::Column::Id)
            .paginate(&*self.db, per_page);
        let total = paginator.num_items().await?;
        let posts = paginator.fetch_page(page.saturating_sub(1)).await?;
        Ok((posts, total))
    }

    pub async fn create(&self, user_id: i32, title: &str, text: &str) -> Result<post::Model> {
        let now = Utc::now();
        let model = post::ActiveModel {
            title: Set(title.to_string()),
            text: Set(text.to_string()),
            user_id: Set(user_id),
            created_at: Set(now.into()),
            updated_at: Set(now.into()),
            ..Default::default()
        };

        Ok(model.insert(&*self.db).await?)
    }

    /// Replaces the given fields; `None` keeps the current value.
    pub async fn update(
        &self,
        post: post::Model,
        title: Option<&str>,
        text: Option<&str>,
    ) -> Result<post::Model> {
        let mut active: post::ActiveModel = post.into();
        if let Some(title) = title {
            active.title = Set(title.to_string());
        }
        if let Some(text) = text {
            active.text = Set(text.to_string());
        }
        active.updated_at = Set(Utc::now().into());
        Ok(active.update(&*self.db).await?)
    }

    /// Deletes a post together with its comments.
    pub async fn delete(&self, id: i32) -> Result<()> {
        let removed = db::transaction(&self.db, |txn| {
            Box::pin(async move {
                comment::Entity::delete_many()
                    .filter(comment::Column::PostId.eq(id))
                    .exec(txn)
                    .await?;
                Ok(Post::delete_by_id(id).exec(txn).await?.rows_affected)
            })
        })
        .await?;
        if removed == 0 {
            return Err(anyhow!("Post {} not found", id));
        }
        Ok(())
    }
}
