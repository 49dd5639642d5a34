//! User repository for database operations

use anyhow::Result;
use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, DbErr, EntityTrait, PaginatorTrait,
    QueryFilter, QueryOrder, Set,
};
use std::sync::Arc;

use crate::db;
use crate::models::role::{self, Entity as Role};
use crate::models::user::{self, Entity as User};
use crate::models::user_role;

/// Fields required to create a user.
#[derive(Debug, Clone, Default)]
pub struct NewUser {
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    /// Argon2 PHC string; `None` for OAuth-only accounts
    pub password_hash: Option<String>,
}

/// Emails are compared and stored lowercased.
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Repository for user database operations
#[derive(Debug, Clone)]
pub struct UserRepository {
    /// Database connection pool
    pub db: Arc<DatabaseConnection>,
}

impl UserRepository {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    pub async fn find_by_id(&self, id: i32) -> Result<Option<user::Model>> {
        Ok(User::find_by_id(id).one(&*self.db).await?)
    }

    pub async fn find_by_email(&self, email: &str) -> Result<Option<user::Model>> {
        let user = User::find()
            .filter(user::Column::Email.eq(normalize_email(email)))
            .one(&*self.db)
            .await?;
        Ok(user)
    }

    /// Creates a user. A duplicate email surfaces as a unique violation.
    pub async fn create(&self, new_user: NewUser) -> Result<user::Model> {
        Ok(new_user_model(new_user).insert(&*self.db).await?)
    }

    /// Creates a user holding the role `role_name`. Both rows are written in
    /// one transaction, so a missing role leaves no user behind.
    pub async fn create_with_role(&self, new_user: NewUser, role_name: &str) -> Result<user::Model> {
        let wanted = role_name.to_string();
        let created = db::transaction(&self.db, |txn| {
            Box::pin(async move {
                let found = Role::find()
                    .filter(role::Column::Name.eq(wanted.as_str()))
                    .one(txn)
                    .await?
                    .ok_or_else(|| DbErr::RecordNotFound(format!("role {wanted}")))?;

                let user = new_user_model(new_user).insert(txn).await?;
                user_role::ActiveModel {
                    user_id: Set(user.id),
                    role_id: Set(found.id),
                    assigned_at: Set(Utc::now().into()),
                    assigned_by: Set(None),
                    ..Default::default()
                }
                .insert(txn)
                .await?;

                Ok(user)
            })
        })
        .await?;

        log::info!("Created user {} with role {}", created.id, role_name);
        Ok(created)
    }

    pub async fn set_password_hash(
        &self,
        user: user::Model,
        password_hash: Option<String>,
    ) -> Result<user::Model> {
        let mut active: user::ActiveModel = user.into();
        active.password_hash = Set(password_hash);
        active.updated_at = Set(Utc::now().into());
        Ok(active.update(&*self.db).await?)
    }

    /// Lists users ordered by id, one page at a time (pages start at 1).
    pub async fn list(&self, page: u64, per_page: u64) -> Result<(Vec<user::Model>, u64)> {
        let paginator = User::find()
            .order_by_asc(user::Column::Id)
            .paginate(&*self.db, per_page);
        let total = paginator.num_items().await?;
        let users = paginator.fetch_page(page.saturating_sub(1)).await?;
        Ok((users, total))
    }

    pub async fn count(&self) -> Result<u64> {
        Ok(User::find().count(&*self.db).await?)
    }
}

fn new_user_model(new_user: NewUser) -> user::ActiveModel {
    let now = Utc::now();
    user::ActiveModel {
        email: Set(normalize_email(&new_user.email)),
        first_name: Set(new_user.first_name.trim().to_string()),
        last_name: Set(new_user.last_name.trim().to_string()),
        password_hash: Set(new_user.password_hash),
        created_at: Set(now.into()),
        updated_at: Set(now.into()),
        ..Default::default()
    }
}
