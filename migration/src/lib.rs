//! Database migrations for Bloggy.
//!
//! This module contains all database migrations using SeaORM Migration.

pub use sea_orm_migration::prelude::*;

mod m2025_01_01_000001_create_users;
mod m2025_01_01_000002_create_rbac;
mod m2025_01_01_000003_create_posts_and_comments;
mod m2025_01_01_000004_create_oauth;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m2025_01_01_000001_create_users::Migration),
            Box::new(m2025_01_01_000002_create_rbac::Migration),
            Box::new(m2025_01_01_000003_create_posts_and_comments::Migration),
            Box::new(m2025_01_01_000004_create_oauth::Migration),
        ]
    }
}
