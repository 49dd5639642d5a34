//! Administrator bootstrap used by `bloggy setup`.

use anyhow::{Context, Result, anyhow};
use sea_orm::DatabaseConnection;
use std::sync::Arc;

use crate::auth::hash_password;
use crate::models::user;
use crate::repositories::{NewUser, RoleRepository, UserRepository};

/// Name of the seeded role holding every permission.
pub const ADMIN_ROLE_NAME: &str = "Admin";

/// Creates the admin user when no user with `email` exists and makes sure the
/// user holds the Admin role. An existing user keeps their password.
///
/// Requires [`super::seed_rbac`] to have run.
pub async fn seed_admin_user(
    db: &DatabaseConnection,
    email: &str,
    password: &str,
) -> Result<user::Model> {
    let db = Arc::new(db.clone());
    let users = UserRepository::new(Arc::clone(&db));
    let roles = RoleRepository::new(db);

    let admin_role = roles
        .find_by_name(ADMIN_ROLE_NAME)
        .await?
        .ok_or_else(|| anyhow!("role '{}' is missing; seed RBAC first", ADMIN_ROLE_NAME))?;

    let user = match users.find_by_email(email).await? {
        Some(existing) => {
            log::info!("Admin user '{}' already exists, skipping creation", existing.email);
            existing
        }
        None => {
            let password_hash = hash_password(password).context("failed to hash admin password")?;
            let created = users
                .create(NewUser {
                    email: email.to_string(),
                    first_name: "Admin".to_string(),
                    last_name: String::new(),
                    password_hash: Some(password_hash),
                })
                .await?;
            log::info!("Created admin user: {}", created.email);
            created
        }
    };

    if roles.assign_to_user(user.id, admin_role.id, None).await? {
        log::info!("Assigned role '{}' to {}", ADMIN_ROLE_NAME, user.email);
    }

    Ok(user)
}
