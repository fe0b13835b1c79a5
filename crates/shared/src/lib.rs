#![cfg_attr(test, allow(clippy::unwrap_used))]

//! Shared infrastructure for the ProKit workspace
//!
//! Database pool construction, embedded migrations, and the role type
//! used by both the API layer and the billing entitlement rules.

pub mod db;
pub mod roles;

pub use db::{create_pool, run_migrations};
pub use roles::UserRole;
