//! # Repository Layer
//!
//! Repositories encapsulate the SeaORM operations for each aggregate so
//! handlers, seeding and maintenance jobs share one data access path.

pub mod comment;
pub mod oauth_account;
pub mod oauth_state;
pub mod oauth_token;
pub mod permission;
pub mod post;
pub mod role;
pub mod user;

pub use comment::CommentRepository;
pub use oauth_account::{AccountProfile, OAuthAccountRepository, UnlinkError, can_unlink};
pub use oauth_state::OAuthStateRepository;
pub use oauth_token::{OAuthTokenRepository, StoredTokens};
pub use permission::PermissionRepository;
pub use post::PostRepository;
pub use role::RoleRepository;
pub use user::{NewUser, UserRepository};
