//! # PDT Common Library
//!
//! Shared code for the PDT services including:
//! - Entity store (SQLite schema, models and queries)
//! - Migration dependency ordering
//! - Typed filter predicates used by the REST API
//! - Configuration loading
//! - Common error type

pub mod config;
pub mod db;
pub mod error;
pub mod filter;
pub mod sort;
pub mod store;

pub use error::{Error, Result};
pub use sort::sort_migrations;
