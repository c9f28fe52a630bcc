//! JSON file state store

use crate::state::JobState;
use crate::storage::{StateError, StateResult, StateStore};
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

/// Keeps the state of a single job in one JSON file
///
/// Saves go to a temp file in the same directory which is then renamed over
/// the target, so readers only ever see a complete checkpoint.
#[derive(Debug, Clone)]
pub struct JsonStateStore {
    path: PathBuf,
}

impl JsonStateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read(&self) -> StateResult<Option<JobState>> {
        match std::fs::read_to_string(&self.path) {
            Ok(content) => Ok(Some(serde_json::from_str(&content)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

impl StateStore for JsonStateStore {
    fn load(&self, job_id: &str) -> StateResult<Option<JobState>> {
        match self.read()? {
            Some(state) if state.job_id != job_id => Err(StateError::JobMismatch {
                expected: job_id.to_string(),
                found: state.job_id,
            }),
            other => Ok(other),
        }
    }

    fn save(&mut self, state: &JobState) -> StateResult<()> {
        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        std::fs::create_dir_all(&dir)?;

        let mut tmp = NamedTempFile::new_in(&dir)?;
        serde_json::to_writer_pretty(&mut tmp, state)?;
        tmp.write_all(b"\n")?;
        tmp.as_file().sync_all()?;
        tmp.persist(&self.path)
            .map_err(|e| StateError::Persist(e.error.to_string()))?;

        tracing::trace!("Saved state of job {} to {}", state.job_id, self.path.display());
        Ok(())
    }

    fn list(&self) -> StateResult<Vec<JobState>> {
        Ok(self.read()?.into_iter().collect())
    }

    fn location(&self) -> String {
        format!("json:{}", self.path.display())
    }
}
