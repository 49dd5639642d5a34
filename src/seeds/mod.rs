//! Database seeding functionality
//!
//! Seeds the RBAC catalog (permissions and default roles) on every startup
//! and bootstraps the first administrator for the `setup` command. Every
//! seeder is idempotent.

pub mod admin;
pub mod rbac;

pub use admin::seed_admin_user;
pub use rbac::{DEFAULT_USER_ROLE, SeedReport, seed_rbac};
