//! # Command line interface
//!
//! `bloggy` with no subcommand serves the API. The other commands run one
//! maintenance job against the configured database and exit.

use anyhow::{Context, Result, anyhow};
use clap::{Parser, Subcommand};
use migration::{Migrator, MigratorTrait};
use sea_orm::DatabaseConnection;
use std::sync::Arc;

use crate::config::{AppConfig, ConfigLoader};
use crate::crypto::TokenCipher;
use crate::db;
use crate::oauth::ProviderRegistry;
use crate::seeds::{seed_admin_user, seed_rbac};
use crate::server::run_server;
use crate::telemetry::init_tracing;
use crate::token_refresh::TokenMaintenance;

/// Bloggy - micro-blogging API with social sign-in
#[derive(Debug, Parser)]
#[command(name = "bloggy")]
#[command(about = "Bloggy - micro-blogging API with social sign-in")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand, PartialEq, Eq)]
pub enum Command {
    /// Migrate, seed RBAC data and start the HTTP server (default)
    Serve,
    /// Migrate, seed RBAC data and create the admin user from ADMIN_EMAIL/ADMIN_PASSWORD
    Setup,
    /// Refresh provider tokens that expire soon
    #[command(name = "oauth:refresh")]
    OAuthRefresh {
        /// Refresh tokens expiring within this many minutes
        #[arg(long, default_value_t = 10)]
        lead_minutes: i64,
    },
    /// Delete expired OAuth states and unrefreshable expired tokens
    #[command(name = "oauth:cleanup")]
    OAuthCleanup,
}

/// Loads configuration, initializes logging and dispatches `cli`.
pub async fn run(cli: Cli) -> Result<()> {
    let config = ConfigLoader::new()
        .load()
        .context("failed to load configuration")?;
    init_tracing(&config)?;
    tracing::info!(profile = %config.profile, "Configuration loaded");
    if let Ok(redacted) = config.redacted_json() {
        tracing::debug!(config = %redacted, "Effective configuration");
    }

    let db = prepare_database(&config).await?;

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => run_server(config, db)
            .await
            .map_err(|e| anyhow!("server error: {e}")),
        Command::Setup => setup(&config, &db).await,
        Command::OAuthRefresh { lead_minutes } => {
            let stats = maintenance(config, db)?
                .refresh_expiring(chrono::Duration::minutes(lead_minutes))
                .await?;
            println!(
                "Refreshed {} of {} expiring tokens ({} failed, {} skipped)",
                stats.refreshed, stats.due, stats.failed, stats.skipped
            );
            Ok(())
        }
        Command::OAuthCleanup => {
            let stats = maintenance(config, db)?.cleanup().await?;
            println!(
                "Removed {} expired OAuth states and {} expired tokens",
                stats.states_removed, stats.tokens_removed
            );
            Ok(())
        }
    }
}

/// Connects, applies pending migrations and seeds the RBAC catalog.
async fn prepare_database(config: &AppConfig) -> Result<DatabaseConnection> {
    let db = db::init_pool(config).await?;
    Migrator::up(&db, None)
        .await
        .context("failed to apply migrations")?;
    let report = seed_rbac(&db).await?;
    tracing::info!(
        permissions_created = report.permissions_created,
        roles_created = report.roles_created,
        grants_created = report.grants_created,
        "RBAC data seeded"
    );
    Ok(db)
}

async fn setup(config: &AppConfig, db: &DatabaseConnection) -> Result<()> {
    let (Some(email), Some(password)) = (
        config.admin_email.as_deref(),
        config.admin_password.as_deref(),
    ) else {
        println!("RBAC data seeded; set ADMIN_EMAIL and ADMIN_PASSWORD to create an admin user");
        return Ok(());
    };

    let admin = seed_admin_user(db, email, password).await?;
    println!("Admin user ready: {}", admin.email);
    Ok(())
}

fn maintenance(config: AppConfig, db: DatabaseConnection) -> Result<TokenMaintenance> {
    let cipher = TokenCipher::from_config(&config)?;
    let providers = ProviderRegistry::from_config(&config)?;
    Ok(TokenMaintenance::new(
        Arc::new(db),
        Arc::new(providers),
        cipher,
        config.token_refresh.clone(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_subcommand_serves() {
        let cli = Cli::try_parse_from(["bloggy"]).expect("parse");
        assert!(cli.command.is_none());
    }

    #[test]
    fn test_refresh_lead_minutes() {
        let cli = Cli::try_parse_from(["bloggy", "oauth:refresh", "--lead-minutes", "30"])
            .expect("parse");
        assert_eq!(
            cli.command,
            Some(Command::OAuthRefresh { lead_minutes: 30 })
        );

        let cli = Cli::try_parse_from(["bloggy", "oauth:refresh"]).expect("parse");
        assert_eq!(
            cli.command,
            Some(Command::OAuthRefresh { lead_minutes: 10 })
        );
    }

    #[test]
    fn test_cleanup_and_setup_commands() {
        let cli = Cli::try_parse_from(["bloggy", "oauth:cleanup"]).expect("parse");
        assert_eq!(cli.command, Some(Command::OAuthCleanup));
        let cli = Cli::try_parse_from(["bloggy", "setup"]).expect("parse");
        assert_eq!(cli.command, Some(Command::Setup));
    }

    #[test]
    fn test_unknown_command_is_rejected() {
        assert!(Cli::try_parse_from(["bloggy", "oauth:purge"]).is_err());
    }
}
