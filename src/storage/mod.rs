//! Storage module for persisting job state
//!
//! This module handles durable checkpoints of long-running jobs:
//! - The `StateStore` trait implemented by every backend
//! - A JSON file backend written through a temp file and atomic rename
//! - A SQLite backend saving each checkpoint in one transaction

mod json;
mod schema;
mod sqlite;

pub use json::JsonStateStore;
pub use sqlite::SqliteStateStore;

use crate::state::JobState;
use std::path::Path;
use thiserror::Error;

/// Errors that can occur during state persistence
#[derive(Debug, Error)]
pub enum StateError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Failed to replace state file: {0}")]
    Persist(String),

    #[error("State file belongs to job '{found}', expected '{expected}'")]
    JobMismatch { expected: String, found: String },

    #[error("Corrupt state: {0}")]
    Corrupt(String),
}

/// Result type for state operations
pub type StateResult<T> = Result<T, StateError>;

/// Durable storage for job checkpoints
///
/// A successful `save` must leave the previous checkpoint intact if the
/// process dies midway.
pub trait StateStore: Send {
    /// Loads the saved state of `job_id`, if any
    fn load(&self, job_id: &str) -> StateResult<Option<JobState>>;

    /// Replaces the saved state of `state.job_id`
    fn save(&mut self, state: &JobState) -> StateResult<()>;

    /// Every job held by the store
    fn list(&self) -> StateResult<Vec<JobState>>;

    /// Where the state lives, for log messages
    fn location(&self) -> String;
}

/// Opens the store backing a state file, chosen by extension
///
/// `.sqlite`, `.sqlite3` and `.db` open a SQLite store; anything else is
/// treated as a JSON state file.
pub fn open_state_store(path: &Path) -> StateResult<Box<dyn StateStore>> {
    let is_sqlite = path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| matches!(e, "sqlite" | "sqlite3" | "db"));

    if is_sqlite {
        Ok(Box::new(SqliteStateStore::open(path)?))
    } else {
        Ok(Box::new(JsonStateStore::new(path)))
    }
}
