//! # CNPJ Common Library
//!
//! Shared code for the CNPJ ingestion services including:
//! - Settings loading (environment + optional TOML file)
//! - Common error types
//! - Filesystem helpers

pub mod config;
pub mod error;
pub mod paths;

pub use config::Settings;
pub use error::{Error, Result};
pub use paths::ensure_dir;
