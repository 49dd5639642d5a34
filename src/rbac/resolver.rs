//! Effective permission resolution.
//!
//! A user's permissions are the union of the permissions of all their roles.
//! Checks run in a fixed order:
//!
//! 1. an `admin` role allows everything;
//! 2. `resource.action.any` allows;
//! 3. `resource.action.own` allows when no instance is given or the instance
//!    is owned by the user;
//! 4. the unscoped `resource.action` allows;
//! 5. anything else is denied.
//!
//! Lookup failures are logged and treated as a denial.

use std::sync::Arc;

use metrics::counter;
use sea_orm::{
    ColumnTrait, DatabaseConnection, EntityTrait, JoinType, QueryFilter, QuerySelect,
    RelationTrait,
};

use super::{PermissionCache, RbacError, UserGrants};
use crate::models::{permission, role, role_permission, user, user_role};

/// A record with an owning user. Guards hold it across awaits, so it must be
/// shareable between threads.
pub trait Owned: Sync {
    fn owner_id(&self) -> i32;
}

/// Pure decision over already-loaded grants.
pub fn decide(
    grants: &UserGrants,
    user_id: i32,
    resource: &str,
    action: &str,
    instance: Option<&(dyn Owned + Sync)>,
) -> bool {
    if grants.is_admin() {
        return true;
    }

    if grants.has_permission(&format!("{resource}.{action}.any")) {
        return true;
    }

    if grants.has_permission(&format!("{resource}.{action}.own")) {
        match instance {
            None => return true,
            Some(record) if record.owner_id() == user_id => return true,
            Some(_) => {}
        }
    }

    grants.has_permission(&format!("{resource}.{action}"))
}

/// Resolves roles and permissions for users, memoizing per user.
#[derive(Clone)]
pub struct PermissionResolver {
    db: Arc<DatabaseConnection>,
    cache: Arc<PermissionCache>,
}

impl PermissionResolver {
    pub fn new(db: Arc<DatabaseConnection>, cache: Arc<PermissionCache>) -> Self {
        Self { db, cache }
    }

    pub fn cache(&self) -> &Arc<PermissionCache> {
        &self.cache
    }

    /// Drops the memoized grants of one user.
    pub fn invalidate(&self, user_id: i32) {
        self.cache.invalidate(user_id);
    }

    /// Drops all memoized grants.
    pub fn invalidate_all(&self) {
        self.cache.invalidate_all();
    }

    /// Returns the user's grants, loading them on a cache miss.
    pub async fn grants(&self, user_id: i32) -> Result<Arc<UserGrants>, RbacError> {
        if let Some(grants) = self.cache.get(user_id) {
            return Ok(grants);
        }

        let generation = self.cache.generation();
        let grants = Arc::new(self.fetch_grants(user_id).await?);
        if !self.cache.insert_if_current(user_id, Arc::clone(&grants), generation) {
            tracing::debug!(user_id, "grants changed while loading; not cached");
        }
        Ok(grants)
    }

    /// Like [`PermissionResolver::grants`], but a failed lookup yields no
    /// grants at all.
    pub async fn grants_or_empty(&self, user_id: i32) -> Arc<UserGrants> {
        match self.grants(user_id).await {
            Ok(grants) => grants,
            Err(error) => {
                tracing::warn!(user_id, error = %error, "permission lookup failed; denying");
                Arc::new(UserGrants::default())
            }
        }
    }

    async fn fetch_grants(&self, user_id: i32) -> Result<UserGrants, RbacError> {
        let roles: Vec<String> = role::Entity::find()
            .select_only()
            .column(role::Column::Name)
            .join(JoinType::InnerJoin, role::Relation::UserRole.def())
            .filter(user_role::Column::UserId.eq(user_id))
            .into_tuple()
            .all(self.db.as_ref())
            .await?;

        let permissions: Vec<String> = permission::Entity::find()
            .select_only()
            .column(permission::Column::Name)
            .distinct()
            .join(
                JoinType::InnerJoin,
                permission::Relation::RolePermission.def(),
            )
            .join(JoinType::InnerJoin, role_permission::Relation::Role.def())
            .join(JoinType::InnerJoin, role::Relation::UserRole.def())
            .filter(user_role::Column::UserId.eq(user_id))
            .into_tuple()
            .all(self.db.as_ref())
            .await?;

        Ok(UserGrants {
            roles,
            permissions: permissions.into_iter().collect(),
        })
    }

    pub async fn role_names(&self, user: &user::Model) -> Vec<String> {
        self.grants_or_empty(user.id).await.roles.clone()
    }

    pub async fn has_role(&self, user: &user::Model, name: &str) -> bool {
        self.grants_or_empty(user.id).await.has_role(name)
    }

    pub async fn is_admin(&self, user: &user::Model) -> bool {
        self.grants_or_empty(user.id).await.is_admin()
    }

    /// Exact membership of `name` in the user's permission set. Admins hold
    /// every permission.
    pub async fn has_permission(&self, user: &user::Model, name: &str) -> bool {
        let grants = self.grants_or_empty(user.id).await;
        grants.is_admin() || grants.has_permission(name)
    }

    pub async fn has_any_permission(&self, user: &user::Model, names: &[&str]) -> bool {
        let grants = self.grants_or_empty(user.id).await;
        grants.is_admin() || names.iter().any(|name| grants.has_permission(name))
    }

    pub async fn can_access_resource(
        &self,
        user: &user::Model,
        resource: &str,
        action: &str,
        instance: Option<&(dyn Owned + Sync)>,
    ) -> bool {
        let grants = self.grants_or_empty(user.id).await;
        let allowed = decide(&grants, user.id, resource, action, instance);
        if !allowed {
            counter!("rbac_denials_total", "resource" => resource.to_string()).increment(1);
            tracing::debug!(user_id = user.id, resource, action, "access denied");
        }
        allowed
    }
}
