//! Resumable job state
//!
//! A [`StateManager`] owns the [`JobState`] of one long-running job and
//! checkpoints it through a [`StateStore`]. What is on disk always reflects
//! the last fully completed unit of work.

use crate::storage::{StateResult, StateStore};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeSet;

/// Metadata key recording the error that failed a job
pub const LAST_ERROR_KEY: &str = "last_error";

/// Lifecycle status of a job
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    #[default]
    Running,
    Done,
    Failed,
}

impl JobStatus {
    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Done => "done",
            Self::Failed => "failed",
        }
    }

    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "running" => Some(Self::Running),
            "done" => Some(Self::Done),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

/// Persisted checkpoint of a job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobState {
    pub job_id: String,
    /// Phase in progress, or the last one run when the job is terminal
    pub phase: Option<String>,
    pub status: JobStatus,
    pub current_page: u64,
    pub processed: BTreeSet<String>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
    pub updated_at: DateTime<Utc>,
}

impl JobState {
    pub fn new(job_id: impl Into<String>) -> Self {
        Self {
            job_id: job_id.into(),
            phase: None,
            status: JobStatus::Running,
            current_page: 0,
            processed: BTreeSet::new(),
            metadata: Map::new(),
            updated_at: Utc::now(),
        }
    }
}

/// Owns a job's state and its backing store
pub struct StateManager {
    state: JobState,
    store: Box<dyn StateStore>,
}

impl StateManager {
    /// Loads the saved state of `job_id`, or starts a fresh one
    pub fn load(job_id: &str, store: Box<dyn StateStore>) -> StateResult<Self> {
        let state = match store.load(job_id)? {
            Some(state) => {
                tracing::info!(
                    "Resuming job {} at phase {} ({} processed) from {}",
                    job_id,
                    state.phase.as_deref().unwrap_or("-"),
                    state.processed.len(),
                    store.location()
                );
                state
            }
            None => {
                tracing::info!("Starting job {} with state at {}", job_id, store.location());
                JobState::new(job_id)
            }
        };
        Ok(Self { state, store })
    }

    pub fn state(&self) -> &JobState {
        &self.state
    }

    pub fn job_id(&self) -> &str {
        &self.state.job_id
    }

    pub fn phase(&self) -> Option<&str> {
        self.state.phase.as_deref()
    }

    pub fn status(&self) -> JobStatus {
        self.state.status
    }

    pub fn is_done(&self) -> bool {
        self.state.status == JobStatus::Done
    }

    /// Enters `phase`, resetting the intra-phase cursor when it changes
    pub fn set_phase(&mut self, phase: &str) {
        if self.state.phase.as_deref() != Some(phase) {
            self.state.phase = Some(phase.to_string());
            self.state.current_page = 0;
        }
        self.state.status = JobStatus::Running;
    }

    pub fn current_page(&self) -> u64 {
        self.state.current_page
    }

    pub fn set_current_page(&mut self, page: u64) {
        self.state.current_page = page;
    }

    pub fn is_processed(&self, url: &str) -> bool {
        self.state.processed.contains(url)
    }

    /// Records a URL as processed; returns false if it already was
    pub fn mark_processed(&mut self, url: impl Into<String>) -> bool {
        self.state.processed.insert(url.into())
    }

    pub fn processed_count(&self) -> usize {
        self.state.processed.len()
    }

    pub fn metadata(&self, key: &str) -> Option<&Value> {
        self.state.metadata.get(key)
    }

    pub fn set_metadata(&mut self, key: impl Into<String>, value: Value) {
        self.state.metadata.insert(key.into(), value);
    }

    /// Writes the current state through the store
    pub fn save(&mut self) -> StateResult<()> {
        self.state.updated_at = Utc::now();
        self.store.save(&self.state)
    }

    /// Marks the job done and saves
    pub fn mark_done(&mut self) -> StateResult<()> {
        self.state.status = JobStatus::Done;
        self.state.metadata.remove(LAST_ERROR_KEY);
        self.save()
    }

    /// Marks the job failed on its current phase and saves
    pub fn mark_failed(&mut self, error: &str) -> StateResult<()> {
        self.state.status = JobStatus::Failed;
        self.state
            .metadata
            .insert(LAST_ERROR_KEY.to_string(), Value::String(error.to_string()));
        self.save()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::JsonStateStore;
    use tempfile::TempDir;

    #[test]
    fn test_status_db_strings() {
        for status in [JobStatus::Running, JobStatus::Done, JobStatus::Failed] {
            assert_eq!(JobStatus::from_db_string(status.to_db_string()), Some(status));
        }
        assert_eq!(JobStatus::from_db_string("paused"), None);
    }

    #[test]
    fn test_fresh_job_then_resume() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("job.json");

        let mut manager =
            StateManager::load("job", Box::new(JsonStateStore::new(&path))).unwrap();
        assert_eq!(manager.phase(), None);
        manager.set_phase("listing");
        manager.set_current_page(4);
        assert!(manager.mark_processed("https://shop.test/item/1"));
        assert!(!manager.mark_processed("https://shop.test/item/1"));
        manager.save().unwrap();

        let resumed = StateManager::load("job", Box::new(JsonStateStore::new(&path))).unwrap();
        assert_eq!(resumed.phase(), Some("listing"));
        assert_eq!(resumed.current_page(), 4);
        assert!(resumed.is_processed("https://shop.test/item/1"));
    }

    #[test]
    fn test_set_phase_resets_cursor() {
        let dir = TempDir::new().unwrap();
        let mut manager = StateManager::load(
            "job",
            Box::new(JsonStateStore::new(dir.path().join("job.json"))),
        )
        .unwrap();
        manager.set_phase("listing");
        manager.set_current_page(9);
        manager.set_phase("listing");
        assert_eq!(manager.current_page(), 9);
        manager.set_phase("details");
        assert_eq!(manager.current_page(), 0);
    }

    #[test]
    fn test_failed_then_done() {
        let dir = TempDir::new().unwrap();
        let mut manager = StateManager::load(
            "job",
            Box::new(JsonStateStore::new(dir.path().join("job.json"))),
        )
        .unwrap();
        manager.mark_failed("network down").unwrap();
        assert_eq!(manager.status(), JobStatus::Failed);
        assert_eq!(manager.metadata(LAST_ERROR_KEY).unwrap(), "network down");

        manager.mark_done().unwrap();
        assert!(manager.is_done());
        assert!(manager.metadata(LAST_ERROR_KEY).is_none());
    }
}
