//! # FTR Common Library
//!
//! Shared code for the forestry traceability services:
//! - Error taxonomy
//! - Bootstrap configuration (TOML, environment, root folder)
//! - Database pool initialization, schema and row models
//! - Catalog enums (material kinds, collection states, plant origins)

pub mod config;
pub mod db;
pub mod error;
pub mod types;

pub use error::{Error, Result};
