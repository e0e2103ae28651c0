//! Gallery storage crate - durable, deduplicated local image store.
//!
//! Provides a WAL-mode SQLite database with migrations and the
//! `LocalStore` that keeps exactly one record per image URL.

pub mod db;
pub mod migrations;
pub mod store;

pub use db::Database;
pub use store::{ImportSummary, LocalStore};
