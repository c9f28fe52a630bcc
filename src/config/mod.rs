//! Configuration module for Harrow
//!
//! This module handles loading, parsing, and structurally validating the TOML
//! run configuration: a `[run]` table plus one `[[source]]` table per site.
//!
//! # Example
//!
//! ```no_run
//! use harrow::config::load_config;
//! use std::path::Path;
//!
//! let config = load_config(Path::new("harrow.toml")).unwrap();
//! for source in &config.sources {
//!     println!("{} uses the {} engine", source.id, source.engine.kind);
//! }
//! ```

mod parser;
mod types;
mod validation;

// Re-export types
pub use types::{
    BackoffMode, BrowserSettings, DedupeScope, DiscoveryConfig, EngineKind, EngineSettings,
    Entrypoint, HybridSettings, Paging, RunConfig, RunSettings, SourceConfig, StorageConfig,
    StorageFormat,
};

// Re-export parser and validation functions
pub use parser::{
    compute_config_hash, hash_config_str, load_config, load_config_with_hash, parse_config,
};
pub use validation::{validate, ValidationReport};
