//! SQLite state store
//!
//! Holds any number of jobs. Each save replaces a job's row and its
//! processed-URL set inside one transaction.

use crate::state::{JobState, JobStatus};
use crate::storage::schema::initialize_schema;
use crate::storage::{StateError, StateResult, StateStore};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::BTreeSet;
use std::path::Path;

/// SQLite job state backend
pub struct SqliteStateStore {
    conn: Connection,
    location: String,
}

impl SqliteStateStore {
    /// Opens (creating if needed) a state database
    pub fn open(path: &Path) -> StateResult<Self> {
        let conn = Connection::open(path)?;

        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA foreign_keys = ON;
        ",
        )?;

        initialize_schema(&conn)?;

        Ok(Self {
            conn,
            location: format!("sqlite:{}", path.display()),
        })
    }

    /// Creates an in-memory database (for testing)
    #[cfg(test)]
    pub fn open_in_memory() -> StateResult<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        initialize_schema(&conn)?;
        Ok(Self {
            conn,
            location: "sqlite::memory:".to_string(),
        })
    }

    fn read_job(&self, job_id: &str) -> StateResult<Option<JobState>> {
        let row = self
            .conn
            .query_row(
                "SELECT job_id, phase, status, current_page, metadata, updated_at
                 FROM job_state WHERE job_id = ?1",
                params![job_id],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, Option<String>>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, i64>(3)?,
                        row.get::<_, String>(4)?,
                        row.get::<_, String>(5)?,
                    ))
                },
            )
            .optional()?;

        let Some((job_id, phase, status, current_page, metadata, updated_at)) = row else {
            return Ok(None);
        };

        let status = JobStatus::from_db_string(&status)
            .ok_or_else(|| StateError::Corrupt(format!("unknown job status '{}'", status)))?;
        let updated_at = updated_at
            .parse::<DateTime<Utc>>()
            .map_err(|e| StateError::Corrupt(format!("bad timestamp '{}': {}", updated_at, e)))?;

        let mut stmt = self
            .conn
            .prepare("SELECT url FROM processed_urls WHERE job_id = ?1")?;
        let processed: BTreeSet<String> = stmt
            .query_map(params![job_id], |row| row.get::<_, String>(0))?
            .collect::<Result<_, _>>()?;

        Ok(Some(JobState {
            job_id,
            phase,
            status,
            current_page: u64::try_from(current_page).unwrap_or(0),
            processed,
            metadata: serde_json::from_str(&metadata)?,
            updated_at,
        }))
    }
}

impl StateStore for SqliteStateStore {
    fn load(&self, job_id: &str) -> StateResult<Option<JobState>> {
        self.read_job(job_id)
    }

    fn save(&mut self, state: &JobState) -> StateResult<()> {
        let metadata = serde_json::to_string(&state.metadata)?;
        let current_page = i64::try_from(state.current_page).unwrap_or(i64::MAX);

        let tx = self.conn.transaction()?;
        tx.execute(
            "INSERT INTO job_state (job_id, phase, status, current_page, metadata, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(job_id) DO UPDATE SET
                phase = excluded.phase,
                status = excluded.status,
                current_page = excluded.current_page,
                metadata = excluded.metadata,
                updated_at = excluded.updated_at",
            params![
                state.job_id,
                state.phase,
                state.status.to_db_string(),
                current_page,
                metadata,
                state.updated_at.to_rfc3339(),
            ],
        )?;
        tx.execute(
            "DELETE FROM processed_urls WHERE job_id = ?1",
            params![state.job_id],
        )?;
        {
            let mut stmt =
                tx.prepare("INSERT INTO processed_urls (job_id, url) VALUES (?1, ?2)")?;
            for url in &state.processed {
                stmt.execute(params![state.job_id, url])?;
            }
        }
        tx.commit()?;

        Ok(())
    }

    fn list(&self) -> StateResult<Vec<JobState>> {
        let mut stmt = self
            .conn
            .prepare("SELECT job_id FROM job_state ORDER BY updated_at DESC")?;
        let ids = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;

        let mut jobs = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(job) = self.read_job(&id)? {
                jobs.push(job);
            }
        }
        Ok(jobs)
    }

    fn location(&self) -> String {
        self.location.clone()
    }
}
