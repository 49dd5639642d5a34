//! Migration to create the OAuth tables.
//!
//! `oauth_accounts` links a user to a provider identity, `oauth_tokens` holds
//! the encrypted token material for an account, and `oauth_states` holds the
//! short-lived state/PKCE verifier pairs of in-flight authorization requests.

use sea_orm_migration::prelude::*;

use crate::m2025_01_01_000001_create_users::Users;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(OAuthAccounts::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(OAuthAccounts::Id)
                            .integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(OAuthAccounts::UserId).integer().not_null())
                    .col(ColumnDef::new(OAuthAccounts::Provider).string().not_null())
                    .col(
                        ColumnDef::new(OAuthAccounts::ProviderUserId)
                            .string()
                            .not_null(),
                    )
                    .col(ColumnDef::new(OAuthAccounts::Email).string().null())
                    .col(ColumnDef::new(OAuthAccounts::Name).string().null())
                    .col(ColumnDef::new(OAuthAccounts::Picture).text().null())
                    .col(ColumnDef::new(OAuthAccounts::ProfileData).json().null())
                    .col(
                        ColumnDef::new(OAuthAccounts::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(OAuthAccounts::LastLoginAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_oauth_accounts_user")
                            .from(OAuthAccounts::Table, OAuthAccounts::UserId)
                            .to(Users::Table, Users::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_oauth_accounts_provider_identity")
                    .table(OAuthAccounts::Table)
                    .col(OAuthAccounts::Provider)
                    .col(OAuthAccounts::ProviderUserId)
                    .unique()
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_oauth_accounts_user_provider")
                    .table(OAuthAccounts::Table)
                    .col(OAuthAccounts::UserId)
                    .col(OAuthAccounts::Provider)
                    .unique()
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(OAuthTokens::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(OAuthTokens::Id)
                            .integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(OAuthTokens::OauthAccountId)
                            .integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(OAuthTokens::AccessTokenEncrypted)
                            .text()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(OAuthTokens::RefreshTokenEncrypted)
                            .text()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(OAuthTokens::TokenType)
                            .string()
                            .not_null()
                            .default("Bearer"),
                    )
                    .col(ColumnDef::new(OAuthTokens::Scope).text().null())
                    .col(
                        ColumnDef::new(OAuthTokens::AccessTokenExpiresAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(OAuthTokens::RefreshTokenExpiresAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(OAuthTokens::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(OAuthTokens::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_oauth_tokens_account")
                            .from(OAuthTokens::Table, OAuthTokens::OauthAccountId)
                            .to(OAuthAccounts::Table, OAuthAccounts::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(OAuthStates::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(OAuthStates::Id)
                            .integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(OAuthStates::Provider).string().not_null())
                    .col(ColumnDef::new(OAuthStates::State).string().not_null())
                    .col(ColumnDef::new(OAuthStates::CodeVerifier).string().not_null())
                    .col(ColumnDef::new(OAuthStates::LinkUserId).integer().null())
                    .col(ColumnDef::new(OAuthStates::RedirectTo).string().null())
                    .col(
                        ColumnDef::new(OAuthStates::ExpiresAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(OAuthStates::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_oauth_states_state")
                    .table(OAuthStates::Table)
                    .col(OAuthStates::State)
                    .unique()
                    .to_owned(),
            )
            .await?;

        // Cleanup scans by expiry
        manager
            .create_index(
                Index::create()
                    .name("idx_oauth_states_expires_at")
                    .table(OAuthStates::Table)
                    .col(OAuthStates::ExpiresAt)
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(OAuthStates::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(OAuthTokens::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(OAuthAccounts::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum OAuthAccounts {
    #[sea_orm(iden = "oauth_accounts")]
    Table,
    Id,
    UserId,
    Provider,
    ProviderUserId,
    Email,
    Name,
    Picture,
    ProfileData,
    CreatedAt,
    LastLoginAt,
}

#[derive(DeriveIden)]
enum OAuthTokens {
    #[sea_orm(iden = "oauth_tokens")]
    Table,
    Id,
    OauthAccountId,
    AccessTokenEncrypted,
    RefreshTokenEncrypted,
    TokenType,
    Scope,
    AccessTokenExpiresAt,
    RefreshTokenExpiresAt,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum OAuthStates {
    #[sea_orm(iden = "oauth_states")]
    Table,
    Id,
    Provider,
    State,
    CodeVerifier,
    LinkUserId,
    RedirectTo,
    ExpiresAt,
    CreatedAt,
}
