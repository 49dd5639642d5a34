//! RBAC seeding functionality
//!
//! Creates the permission catalog and the four default roles. Rows are
//! matched by name, so running the seeder again changes nothing.

use anyhow::Result;
use sea_orm::DatabaseConnection;
use std::collections::HashMap;
use std::sync::Arc;

use crate::repositories::{PermissionRepository, RoleRepository};

/// Role given to users who sign up.
pub const DEFAULT_USER_ROLE: &str = "Author";

/// One catalog entry: `(resource, action, scope, description)`.
type PermissionSeed = (&'static str, &'static str, &'static str, &'static str);

pub const PERMISSION_CATALOG: &[PermissionSeed] = &[
    ("post", "create", "", "Create posts"),
    ("post", "read", "any", "Read any post"),
    ("post", "edit", "own", "Edit own posts"),
    ("post", "edit", "any", "Edit any post"),
    ("post", "delete", "own", "Delete own posts"),
    ("post", "delete", "any", "Delete any post"),
    ("comment", "create", "", "Comment on posts"),
    ("comment", "read", "any", "Read any comment"),
    ("comment", "edit", "own", "Edit own comments"),
    ("comment", "edit", "any", "Edit any comment"),
    ("comment", "delete", "own", "Delete own comments"),
    ("comment", "delete", "any", "Delete any comment"),
    ("user", "read", "any", "View user profiles"),
    ("user", "edit", "own", "Edit own profile"),
    ("user", "edit", "any", "Edit any user"),
    ("user", "delete", "any", "Delete any user"),
    ("role", "manage", "any", "Manage roles and permissions"),
    ("admin", "access", "", "Access the admin area"),
];

/// Permissions a seeded role receives.
pub enum RoleGrant {
    /// Every permission in the catalog
    All,
    Only(&'static [&'static str]),
}

pub struct RoleSeed {
    pub name: &'static str,
    pub description: &'static str,
    pub grant: RoleGrant,
}

pub const DEFAULT_ROLES: &[RoleSeed] = &[
    RoleSeed {
        name: "Admin",
        description: "Full access to everything",
        grant: RoleGrant::All,
    },
    RoleSeed {
        name: "Moderator",
        description: "Moderates posts and comments",
        grant: RoleGrant::Only(&[
            "post.create",
            "post.read.any",
            "post.edit.any",
            "post.delete.any",
            "comment.create",
            "comment.read.any",
            "comment.edit.any",
            "comment.delete.any",
            "user.read.any",
        ]),
    },
    RoleSeed {
        name: "Author",
        description: "Writes posts and comments",
        grant: RoleGrant::Only(&[
            "post.create",
            "post.read.any",
            "post.edit.own",
            "post.delete.own",
            "comment.create",
            "comment.read.any",
            "comment.edit.own",
            "comment.delete.own",
            "user.read.any",
            "user.edit.own",
        ]),
    },
    RoleSeed {
        name: "Viewer",
        description: "Reads and comments",
        grant: RoleGrant::Only(&[
            "post.read.any",
            "comment.read.any",
            "comment.create",
            "user.edit.own",
        ]),
    },
];

/// Rows inserted by one seeding run.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SeedReport {
    pub permissions_created: usize,
    pub roles_created: usize,
    pub grants_created: usize,
}

/// Seeds the permission catalog and default roles.
pub async fn seed_rbac(db: &DatabaseConnection) -> Result<SeedReport> {
    let db = Arc::new(db.clone());
    let permissions = PermissionRepository::new(Arc::clone(&db));
    let roles = RoleRepository::new(db);
    let mut report = SeedReport::default();

    let mut by_name = HashMap::with_capacity(PERMISSION_CATALOG.len());
    for (resource, action, scope, description) in PERMISSION_CATALOG {
        let (permission, created) = permissions
            .find_or_create(resource, action, scope, Some(description))
            .await
            .inspect_err(|e| log::error!("Failed to seed permission {resource}.{action}: {e}"))?;
        if created {
            log::info!("Created permission: {}", permission.name);
            report.permissions_created += 1;
        }
        by_name.insert(permission.name.clone(), permission.id);
    }

    for seed in DEFAULT_ROLES {
        let (role, created) = roles.find_or_create(seed.name, Some(seed.description)).await?;
        if created {
            log::info!("Created role: {}", role.name);
            report.roles_created += 1;
        } else {
            log::info!("Role '{}' already exists, checking grants", role.name);
        }

        let permission_ids: Vec<i32> = match &seed.grant {
            RoleGrant::All => by_name.values().copied().collect(),
            RoleGrant::Only(names) => names
                .iter()
                .filter_map(|name| {
                    let id = by_name.get(*name).copied();
                    if id.is_none() {
                        log::warn!("Role '{}' references unknown permission '{}'", seed.name, name);
                    }
                    id
                })
                .collect(),
        };

        for permission_id in permission_ids {
            if roles.grant_permission(role.id, permission_id, None).await? {
                report.grants_created += 1;
            }
        }
    }

    log::info!(
        "RBAC seeding completed: {} permissions, {} roles, {} grants created",
        report.permissions_created,
        report.roles_created,
        report.grants_created
    );
    Ok(report)
}
