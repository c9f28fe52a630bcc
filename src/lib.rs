//! Harrow: a resilient multi-source scraping framework
//!
//! This crate fetches listing and detail pages for declaratively configured
//! sources, discovers links, extracts structured items and persists run
//! artifacts. It copes with unreliable networks through retrying, rate limited
//! engines, escalates to a headless browser when plain HTTP is not enough, and
//! runs long scrapes as resumable, checkpointed phase sequences.

pub mod config;
pub mod extract;
pub mod fetch;
pub mod filter;
pub mod jobs;
pub mod orchestrator;
pub mod output;
pub mod pipeline;
pub mod state;
pub mod storage;
pub mod url;

use thiserror::Error;

/// Main error type for Harrow operations
#[derive(Debug, Error)]
pub enum HarrowError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Engine error: {0}")]
    Engine(#[from] fetch::EngineError),

    #[error("Pipeline error: {0}")]
    Pipeline(#[from] pipeline::PipelineError),

    #[error("Output error: {0}")]
    Output(#[from] output::OutputError),

    #[error("State error: {0}")]
    State(#[from] storage::StateError),

    #[error("Job error: {0}")]
    Job(#[from] jobs::JobError),

    #[error("URL error: {0}")]
    UrlError(#[from] UrlError),

    #[error("URL parse error: {0}")]
    UrlParse(#[from] ::url::ParseError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Configuration-specific errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation failed: {}", .0.join("; "))]
    Validation(Vec<String>),

    #[error("Unknown source id: {0}")]
    UnknownSource(String),
}

/// URL-specific errors
#[derive(Debug, Error)]
pub enum UrlError {
    #[error("Failed to parse URL: {0}")]
    Parse(String),

    #[error("Invalid URL scheme: {0}")]
    InvalidScheme(String),

    #[error("Missing domain in URL")]
    MissingDomain,

    #[error("Malformed URL: {0}")]
    Malformed(String),
}

/// Result type alias for Harrow operations
pub type Result<T> = std::result::Result<T, HarrowError>;

/// Result type alias for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Result type alias for URL operations
pub type UrlResult<T> = std::result::Result<T, UrlError>;

// Re-export commonly used types
pub use config::{RunConfig, SourceConfig};
pub use fetch::{Engine, EngineContext, FetchResult};
pub use orchestrator::Orchestrator;
pub use output::{RunReport, SourceReport};
pub use url::normalize_url;
