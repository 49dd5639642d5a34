//! # OAuth Account Model
//!
//! Links a user to an identity at an external OAuth provider. An identity
//! `(provider, provider_user_id)` belongs to at most one user, and a user has at
//! most one account per provider.

use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;
use serde_json::Value as JsonValue;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "oauth_accounts")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,

    pub user_id: i32,

    /// Provider name (e.g., "google", "github")
    pub provider: String,

    /// Stable user identifier issued by the provider
    pub provider_user_id: String,

    pub email: Option<String>,

    pub name: Option<String>,

    #[sea_orm(column_type = "Text", nullable)]
    pub picture: Option<String>,

    /// Raw profile payload as returned by the provider
    #[sea_orm(column_type = "Json", nullable)]
    pub profile_data: Option<JsonValue>,

    pub created_at: DateTimeWithTimeZone,

    pub last_login_at: Option<DateTimeWithTimeZone>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::user::Entity",
        from = "Column::UserId",
        to = "super::user::Column::Id",
        on_delete = "Cascade"
    )]
    User,
    #[sea_orm(has_many = "super::oauth_token::Entity")]
    OAuthToken,
}

impl Related<super::user::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::User.def()
    }
}

impl Related<super::oauth_token::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::OAuthToken.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
