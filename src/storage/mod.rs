//! Storage layer for the staging service.
//!
//! Uses ReDB for embedded key-value storage with ACID transactions.

pub mod redb;

pub use self::redb::{Collection, Storage};
