//! # Bloggy Library
//!
//! Micro-blogging API with password and social sign-in, role-based access
//! control and encrypted storage of provider tokens.

pub mod auth;
pub mod cli;
pub mod config;
pub mod crypto;
pub mod db;
pub mod error;
pub mod handlers;
pub mod models;
pub mod oauth;
pub mod rate_limit;
pub mod rbac;
pub mod repositories;
pub mod seeds;
pub mod server;
pub mod telemetry;
pub mod token_refresh;
pub use migration;
