//! Database schema for the SQLite job state store

/// SQL schema for the job state database
pub const SCHEMA_SQL: &str = r#"
-- One row per job
CREATE TABLE IF NOT EXISTS job_state (
    job_id TEXT PRIMARY KEY,
    phase TEXT,
    status TEXT NOT NULL,
    current_page INTEGER NOT NULL DEFAULT 0,
    metadata TEXT NOT NULL DEFAULT '{}',
    updated_at TEXT NOT NULL
);

-- URLs a job has fully processed
CREATE TABLE IF NOT EXISTS processed_urls (
    job_id TEXT NOT NULL REFERENCES job_state(job_id),
    url TEXT NOT NULL,
    PRIMARY KEY (job_id, url)
);

CREATE INDEX IF NOT EXISTS idx_processed_job ON processed_urls(job_id);
"#;

/// Initializes the database schema
pub fn initialize_schema(conn: &rusqlite::Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(SCHEMA_SQL)?;
    Ok(())
}
