//! # OAuth State Model
//!
//! This module contains the OAuth state entity for in-flight authorization
//! requests. A state row carries the PKCE verifier, is valid for ten minutes,
//! and is consumed by the first callback that presents it.

use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;

/// OAuth State entity for storing OAuth flow state tokens
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "oauth_states")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,

    /// Provider name (e.g., "github", "google")
    pub provider: String,

    /// State token generated for CSRF protection
    #[sea_orm(unique)]
    pub state: String,

    /// PKCE code verifier sent with the token exchange
    pub code_verifier: String,

    /// Set when the flow links a provider to an already signed-in user
    pub link_user_id: Option<i32>,

    /// Local path to return to after the callback
    pub redirect_to: Option<String>,

    /// Expiration timestamp
    pub expires_at: DateTimeWithTimeZone,

    /// When the state was created
    pub created_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
