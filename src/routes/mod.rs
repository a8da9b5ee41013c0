//! HTTP routes for the staging service.
//!
//! - `health`: liveness and build metadata (public)
//! - `staging`: invitations, staged registrations and credential bindings

pub mod health;
pub mod staging;

pub use health::{build_info, health};
