//! # Role-based access control
//!
//! Users hold roles; roles hold permissions named
//! `"{resource}.{action}[.{scope}]"` where the scope is `own` or `any`. A role
//! named `admin` (any case) passes every check.

pub mod cache;
pub mod guards;
pub mod permission_name;
pub mod resolver;

use thiserror::Error;

pub use cache::{PermissionCache, UserGrants};
pub use guards::{requires_permission, requires_role};
pub use permission_name::{
    PermissionName, PermissionNameError, PermissionScope, generate_permission_name,
    validate_permission_name,
};
pub use resolver::{Owned, PermissionResolver};

/// Role name that bypasses every permission check.
pub const ADMIN_ROLE: &str = "admin";

/// Errors raised while loading or mutating RBAC data.
#[derive(Debug, Error)]
pub enum RbacError {
    #[error("database error: {0}")]
    Database(#[from] sea_orm::DbErr),
    #[error(transparent)]
    InvalidName(#[from] PermissionNameError),
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: i32 },
}
