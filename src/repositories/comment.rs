//! Comment repository for database operations

use anyhow::{Result, anyhow};
use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder, Set,
};
use std::sync::Arc;

use crate::models::comment::{self, Entity as Comment};

/// Repository for comment database operations
#[derive(Debug, Clone)]
pub struct CommentRepository {
    /// Database connection pool
    pub db: Arc<DatabaseConnection>,
}

impl CommentRepository {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    pub async fn find_by_id(&self, id: i32) -> Result<Option<comment::Model>> {
        Ok(Comment::find_by_id(id).one(&*self.db).await?)
    }

    /// Comments on a post, oldest first.
    pub async fn list_for_post(&self, post_id: i32) -> Result<Vec<comment::Model>> {
        let comments = Comment::find()
            .filter(comment::Column::PostId.eq(post_id))
            .order_by_asc(comment::Column::CreatedAt)
            .order_by_asc(comment::Column::Id)
            .all(&*self.db)
            .await?;
        Ok(comments)
    }

    pub async fn create(&self, post_id: i32, user_id: i32, text: &str) -> Result<comment::Model> {
        let model = comment::ActiveModel {
            text: Set(text.to_string()),
            post_id: Set(post_id),
            user_id: Set(user_id),
            created_at: Set(Utc::now().into()),
            ..Default::default()
        };

        Ok(model.insert(&*self.db).await?)
    }

    pub async fn update_text(&self, comment: comment::Model, text: &str) -> Result<comment::Model> {
        let mut active: comment::ActiveModel = comment.into();
        active.text = Set(text.to_string());
        Ok(active.update(&*self.db).await?)
    }

    pub async fn delete(&self, id: i32) -> Result<()> {
        let result = Comment::delete_by_id(id).exec(&*self.db).await?;
        if result.rows_affected == 0 {
            return Err(anyhow!("Comment {} not found", id));
        }
        Ok(())
    }
}
