//! Per-source scraping flow
//!
//! A [`PipelineStage`] drives one source through
//! listing fetch -> link discovery -> detail fetch -> item extraction ->
//! quality filtering, and hands everything it produced back as a
//! [`PipelineOutput`] for the output layer to persist.

mod paging;
mod stage;
mod stats;

pub use paging::{expand_entrypoint, expand_entrypoints, page_url};
pub use stage::{LinkRecord, PipelineOutput, PipelineStage, ISSUES_FIELD};
pub use stats::{PipelineCounters, PipelineStats};

use thiserror::Error;

/// Errors that abort a source's pipeline
///
/// Individual fetch failures are not errors; they are counted and recorded.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("invalid discovery rule for source '{source_id}': {message}")]
    InvalidRule { source_id: String, message: String },

    #[error("source '{0}' has no entrypoint URLs")]
    NoEntrypoints(String),

    /// Carries what the run produced before giving up: raw listing dumps and counters
    #[error("all {attempted} listing fetches failed for source '{source_id}'")]
    AllListingsFailed {
        source_id: String,
        attempted: u64,
        last_error: Option<String>,
        output: Box<PipelineOutput>,
    },
}

impl PipelineError {
    /// Partial output of a run that started fetching before failing
    pub fn into_partial_output(self) -> Option<PipelineOutput> {
        match self {
            Self::AllListingsFailed { output, .. } => Some(*output),
            _ => None,
        }
    }
}
