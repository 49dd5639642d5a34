//! Role repository for database operations
//!
//! Covers roles themselves plus their two association tables. Every mutation
//! of a user's roles or a role's permissions drops the affected entries from
//! the permission cache when one is attached.

use anyhow::{Result, anyhow};
use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, ModelTrait, QueryFilter,
    QueryOrder, Set,
};
use std::sync::Arc;

use crate::db;
use crate::models::{
    permission,
    role::{self, Entity as Role},
    role_permission, user_role,
};
use crate::rbac::PermissionCache;

/// Repository for role database operations
#[derive(Clone)]
pub struct RoleRepository {
    /// Database connection pool
    pub db: Arc<DatabaseConnection>,
    cache: Option<Arc<PermissionCache>>,
}

impl RoleRepository {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db, cache: None }
    }

    /// Attaches the cache to invalidate on mutation.
    pub fn with_cache(mut self, cache: Arc<PermissionCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    fn invalidate_user(&self, user_id: i32) {
        if let Some(cache) = &self.cache {
            cache.invalidate(user_id);
        }
    }

    fn invalidate_all(&self) {
        if let Some(cache) = &self.cache {
            cache.invalidate_all();
        }
    }

    pub async fn list(&self) -> Result<Vec<role::Model>> {
        Ok(Role::find()
            .order_by_asc(role::Column::Name)
            .all(&*self.db)
            .await?)
    }

    pub async fn find_by_id(&self, id: i32) -> Result<Option<role::Model>> {
        Ok(Role::find_by_id(id).one(&*self.db).await?)
    }

    pub async fn find_by_name(&self, name: &str) -> Result<Option<role::Model>> {
        Ok(Role::find()
            .filter(role::Column::Name.eq(name))
            .one(&*self.db)
            .await?)
    }

    pub async fn create(&self, name: &str, description: Option<&str>) -> Result<role::Model> {
        let model = role::ActiveModel {
            name: Set(name.trim().to_string()),
            description: Set(description.map(str::to_string)),
            created_at: Set(Utc::now().into()),
            ..Default::default()
        };
        Ok(model.insert(&*self.db).await?)
    }

    /// Returns the role named `name`, creating it when absent. The flag is
    /// `true` when a row was inserted.
    pub async fn find_or_create(
        &self,
        name: &str,
        description: Option<&str>,
    ) -> Result<(role::Model, bool)> {
        if let Some(existing) = self.find_by_name(name).await? {
            return Ok((existing, false));
        }
        Ok((self.create(name, description).await?, true))
    }

    /// Deletes a role; its assignments and grants go with it.
    pub async fn delete(&self, id: i32) -> Result<()> {
        let removed = db::transaction(&self.db, |txn| {
            Box::pin(async move {
                user_role::Entity::delete_many()
                    .filter(user_role::Column::RoleId.eq(id))
                    .exec(txn)
                    .await?;
                role_permission::Entity::delete_many()
                    .filter(role_permission::Column::RoleId.eq(id))
                    .exec(txn)
                    .await?;
                Ok(Role::delete_by_id(id).exec(txn).await?.rows_affected)
            })
        })
        .await?;
        if removed == 0 {
            return Err(anyhow!("Role {} not found", id));
        }
        self.invalidate_all();
        Ok(())
    }

    /// Roles held by a user, ordered by name.
    pub async fn roles_for_user(&self, user_id: i32) -> Result<Vec<role::Model>> {
        let roles = Role::find()
            .inner_join(user_role::Entity)
            .filter(user_role::Column::UserId.eq(user_id))
            .order_by_asc(role::Column::Name)
            .all(&*self.db)
            .await?;
        Ok(roles)
    }

    /// Permissions granted to a role, ordered by name.
    pub async fn permissions_for_role(&self, role: &role::Model) -> Result<Vec<permission::Model>> {
        let permissions = role
            .find_related(permission::Entity)
            .order_by_asc(permission::Column::Name)
            .all(&*self.db)
            .await?;
        Ok(permissions)
    }

    /// Assigns a role to a user. Returns `false` when the user already held it.
    pub async fn assign_to_user(
        &self,
        user_id: i32,
        role_id: i32,
        assigned_by: Option<i32>,
    ) -> Result<bool> {
        let existing = user_role::Entity::find()
            .filter(user_role::Column::UserId.eq(user_id))
            .filter(user_role::Column::RoleId.eq(role_id))
            .one(&*self.db)
            .await?;
        if existing.is_some() {
            return Ok(false);
        }

        user_role::ActiveModel {
            user_id: Set(user_id),
            role_id: Set(role_id),
            assigned_at: Set(Utc::now().into()),
            assigned_by: Set(assigned_by),
            ..Default::default()
        }
        .insert(&*self.db)
        .await?;

        self.invalidate_user(user_id);
        Ok(true)
    }

    /// Removes a role from a user. Returns `false` when it was not assigned.
    pub async fn remove_from_user(&self, user_id: i32, role_id: i32) -> Result<bool> {
        let result = user_role::Entity::delete_many()
            .filter(user_role::Column::UserId.eq(user_id))
            .filter(user_role::Column::RoleId.eq(role_id))
            .exec(&*self.db)
            .await?;

        self.invalidate_user(user_id);
        Ok(result.rows_affected > 0)
    }

    /// Grants a permission to a role. Returns `false` when already granted.
    pub async fn grant_permission(
        &self,
        role_id: i32,
        permission_id: i32,
        granted_by: Option<i32>,
    ) -> Result<bool> {
        let existing = role_permission::Entity::find()
            .filter(role_permission::Column::RoleId.eq(role_id))
            .filter(role_permission::Column::PermissionId.eq(permission_id))
            .one(&*self.db)
            .await?;
        if existing.is_some() {
            return Ok(false);
        }

        role_permission::ActiveModel {
            role_id: Set(role_id),
            permission_id: Set(permission_id),
            granted_at: Set(Utc::now().into()),
            granted_by: Set(granted_by),
            ..Default::default()
        }
        .insert(&*self.db)
        .await?;

        self.invalidate_all();
        Ok(true)
    }

    /// Revokes a permission from a role. Returns `false` when it was not granted.
    pub async fn revoke_permission(&self, role_id: i32, permission_id: i32) -> Result<bool> {
        let result = role_permission::Entity::delete_many()
            .filter(role_permission::Column::RoleId.eq(role_id))
            .filter(role_permission::Column::PermissionId.eq(permission_id))
            .exec(&*self.db)
            .await?;

        self.invalidate_all();
        Ok(result.rows_affected > 0)
    }
}
