//! Route guards.
//!
//! Handlers call these at the top of their body. A missing user is a 401, an
//! authenticated user without the grant is a 403.

use super::{Owned, PermissionName, PermissionResolver, PermissionScope};
use crate::error::{ApiError, forbidden, internal_error, unauthorized};
use crate::models::user;

/// Requires the user to hold at least one of `names` (case-insensitive).
/// Admins always pass.
pub async fn requires_role(
    resolver: &PermissionResolver,
    user: Option<&user::Model>,
    names: &[&str],
) -> Result<(), ApiError> {
    let user = user.ok_or_else(|| unauthorized(None))?;
    let grants = resolver.grants_or_empty(user.id).await;

    if grants.is_admin() || names.iter().any(|name| grants.has_role(name)) {
        Ok(())
    } else {
        tracing::info!(user_id = user.id, roles = ?names, "role check failed");
        Err(forbidden(Some("Required role missing")))
    }
}

/// Requires the permission `name` (`resource.action[.own|.any]`).
///
/// An explicit `.any` suffix demands exactly that permission. Otherwise the
/// check goes through [`PermissionResolver::can_access_resource`], so an
/// `own` grant passes only for records owned by the user when `instance` is
/// given.
pub async fn requires_permission(
    resolver: &PermissionResolver,
    user: Option<&user::Model>,
    name: &str,
    instance: Option<&(dyn Owned + Sync)>,
) -> Result<(), ApiError> {
    let user = user.ok_or_else(|| unauthorized(None))?;

    let permission = PermissionName::parse(name).map_err(|e| {
        tracing::error!(permission = name, error = %e, "guard configured with invalid permission");
        internal_error()
    })?;

    let allowed = match permission.scope {
        PermissionScope::Any => resolver.has_permission(user, name).await,
        PermissionScope::Own | PermissionScope::Unscoped => {
            resolver
                .can_access_resource(user, &permission.resource, &permission.action, instance)
                .await
        }
    };

    if allowed {
        Ok(())
    } else {
        Err(forbidden(Some(&format!("Missing permission {name}"))))
    }
}
