//! Staging-service middleware.

pub mod auth;

pub use auth::InternalAuth;
