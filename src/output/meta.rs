use crate::output::OutputResult;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Contents of `run_meta.json`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunMeta {
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub config_path: Option<String>,
    /// SHA-256 of the configuration file, for comparing runs
    pub config_hash: Option<String>,
    pub dry_run: bool,
    pub sources: Vec<String>,
    pub harrow_version: String,
}

impl RunMeta {
    pub fn new(run_id: impl Into<String>, started_at: DateTime<Utc>) -> Self {
        Self {
            run_id: run_id.into(),
            started_at,
            finished_at: None,
            config_path: None,
            config_hash: None,
            dry_run: false,
            sources: Vec::new(),
            harrow_version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// Contents of `<source_id>/source_meta.json`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceMeta {
    pub source_id: String,
    pub run_id: String,
    pub engine: String,
    pub discovery: String,
    pub format: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub ok: bool,
    pub error: Option<String>,
    /// The source configuration as it was used
    pub config: serde_json::Value,
}

/// Writes `value` as pretty JSON
pub fn write_json<T: Serialize>(path: &Path, value: &T) -> OutputResult<()> {
    let json = serde_json::to_vec_pretty(value)?;
    std::fs::write(path, json)?;
    Ok(())
}
