//! # OAuth Token Model
//!
//! Token material for an OAuth account. Both tokens are stored only in their
//! encrypted form (see [`crate::crypto::TokenCipher`]).

use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "oauth_tokens")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,

    pub oauth_account_id: i32,

    #[sea_orm(column_type = "Text")]
    pub access_token_encrypted: String,

    #[sea_orm(column_type = "Text", nullable)]
    pub refresh_token_encrypted: Option<String>,

    pub token_type: String,

    #[sea_orm(column_type = "Text", nullable)]
    pub scope: Option<String>,

    pub access_token_expires_at: Option<DateTimeWithTimeZone>,

    pub refresh_token_expires_at: Option<DateTimeWithTimeZone>,

    pub created_at: DateTimeWithTimeZone,

    pub updated_at: DateTimeWithTimeZone,
}

impl Model {
    /// Whether the access token is past its expiry at `now`.
    pub fn is_access_token_expired(&self, now: DateTimeWithTimeZone) -> bool {
        self.access_token_expires_at
            .map(|expires_at| expires_at <= now)
            .unwrap_or(false)
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::oauth_account::Entity",
        from = "Column::OauthAccountId",
        to = "super::oauth_account::Column::Id",
        on_delete = "Cascade"
    )]
    OAuthAccount,
}

impl Related<super::oauth_account::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::OAuthAccount.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
