//! Run-scoped decision helpers: deduplication and quality gating

mod dedupe;
mod quality;

pub use dedupe::{content_fingerprint, url_fingerprint, DedupeStore, Seen};
pub use quality::{QualityFilter, QualityIssue, QualityRules, QualityVerdict};
