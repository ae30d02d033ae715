//! Database module for SQLite operations.
//!
//! This module provides:
//! - Database initialization and schema bootstrap
//! - SQLite pragma configuration
//! - `Repository`, the SQLite implementation of the `store` traits

pub mod migrations;
pub mod repo;

pub use migrations::init_db;
pub use repo::Repository;
