//! # Data Models
//!
//! This module contains the SeaORM entities and shared response models used
//! throughout Bloggy.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

pub mod comment;
pub mod oauth_account;
pub mod oauth_state;
pub mod oauth_token;
pub mod permission;
pub mod post;
pub mod role;
pub mod role_permission;
pub mod user;
pub mod user_role;

pub use comment::Entity as Comment;
pub use oauth_account::Entity as OAuthAccount;
pub use oauth_state::Entity as OAuthState;
pub use oauth_token::Entity as OAuthToken;
pub use permission::Entity as Permission;
pub use post::Entity as Post;
pub use role::Entity as Role;
pub use role_permission::Entity as RolePermission;
pub use user::Entity as User;
pub use user_role::Entity as UserRole;

/// Basic service information response
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ServiceInfo {
    /// The name of the service
    pub service: String,
    /// The version of the service
    pub version: String,
}

impl Default for ServiceInfo {
    fn default() -> Self {
        Self {
            service: "bloggy".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}
