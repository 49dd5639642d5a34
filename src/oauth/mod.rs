//! # OAuth social login
//!
//! Provider implementations for Google, GitHub, Microsoft and Facebook behind
//! the [`OAuthProvider`] trait, plus the registry built from configuration.

pub mod facebook;
pub mod github;
pub mod google;
pub mod microsoft;
pub mod provider;
pub mod registry;

pub use provider::{
    OAuthClient, OAuthError, OAuthProvider, PkcePair, ProviderEndpoints, TokenSet, UserInfo,
    generate_pkce_pair, generate_state, pkce_challenge,
};
pub use registry::{ProviderRegistry, build_provider, default_endpoints};
