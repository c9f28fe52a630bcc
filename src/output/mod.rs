//! Run artifacts and reports
//!
//! This module handles:
//! - Writing per-source artifacts (raw page dumps, links, item files)
//! - Writing run and source metadata
//! - Building the run report and rendering it as JSON and markdown

mod markdown;
mod meta;
mod report;
mod writer;

pub use markdown::{format_markdown_report, write_markdown_report};
pub use meta::{write_json, RunMeta, SourceMeta};
pub use report::{diagnose, RunReport, RunTotals, SourceReport};
pub use writer::{write_items, write_jsonl, SourceArtifacts};

use thiserror::Error;

/// Errors that can occur during output operations
#[derive(Debug, Error)]
pub enum OutputError {
    #[error("Failed to write output: {0}")]
    Write(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

/// Result type for output operations
pub type OutputResult<T> = Result<T, OutputError>;
