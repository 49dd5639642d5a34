//! Permission repository for database operations

use anyhow::Result;
use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder, Set,
};
use std::sync::Arc;

use crate::models::permission::{self, Entity as Permission};
use crate::rbac::generate_permission_name;

/// Repository for permission database operations
#[derive(Debug, Clone)]
pub struct PermissionRepository {
    /// Database connection pool
    pub db: Arc<DatabaseConnection>,
}

impl PermissionRepository {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    pub async fn list(&self) -> Result<Vec<permission::Model>> {
        let permissions = Permission::find()
            .order_by_asc(permission::Column::Name)
            .all(&*self.db)
            .await?;
        Ok(permissions)
    }

    pub async fn find_by_id(&self, id: i32) -> Result<Option<permission::Model>> {
        Ok(Permission::find_by_id(id).one(&*self.db).await?)
    }

    pub async fn find_by_name(&self, name: &str) -> Result<Option<permission::Model>> {
        let permission = Permission::find()
            .filter(permission::Column::Name.eq(name))
            .one(&*self.db)
            .await?;
        Ok(permission)
    }

    /// Inserts a permission. The name is derived from the triple on save and
    /// rejected if it does not satisfy the permission grammar.
    pub async fn create(
        &self,
        resource: &str,
        action: &str,
        scope: &str,
        description: Option<&str>,
    ) -> Result<permission::Model> {
        let model = permission::ActiveModel {
            resource: Set(resource.to_string()),
            action: Set(action.to_string()),
            scope: Set(scope.to_string()),
            description: Set(description.map(str::to_string)),
            created_at: Set(Utc::now().into()),
            ..Default::default()
        };

        Ok(model.insert(&*self.db).await?)
    }

    /// Returns the permission for the triple, creating it when absent. The
    /// flag is `true` when a row was inserted.
    pub async fn find_or_create(
        &self,
        resource: &str,
        action: &str,
        scope: &str,
        description: Option<&str>,
    ) -> Result<(permission::Model, bool)> {
        let name = generate_permission_name(resource, action, scope);
        if let Some(existing) = self.find_by_name(&name).await? {
            return Ok((existing, false));
        }
        let created = self.create(resource, action, scope, description).await?;
        Ok((created, true))
    }
}
