use crate::pipeline::PipelineStats;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Share of parsed items that may be dropped before a hint is emitted
const HIGH_DROP_RATE: f64 = 0.5;

/// Outcome and statistics of one source
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SourceReport {
    pub source_id: String,
    pub ok: bool,
    pub engine: String,
    pub discovery: String,
    /// Error that ended the source early, if any
    pub error: Option<String>,
    pub pages_attempted: u64,
    pub pages_succeeded: u64,
    pub listing_pages_attempted: u64,
    pub listing_pages_succeeded: u64,
    pub detail_pages_attempted: u64,
    pub detail_pages_succeeded: u64,
    pub links_found: u64,
    pub links_new: u64,
    pub links_duplicate: u64,
    pub items_parsed: u64,
    pub items_valid: u64,
    pub items_dropped: u64,
    pub items_saved: u64,
    pub errors: Vec<String>,
    pub block_signals: BTreeMap<String, u64>,
    pub elapsed_ms: u64,
    pub diagnosis: Vec<String>,
}

impl SourceReport {
    /// Report for a source whose pipeline completed
    ///
    /// A completed source is ok when at least one listing page was fetched.
    pub fn from_stats(
        source_id: impl Into<String>,
        engine: impl Into<String>,
        discovery: impl Into<String>,
        stats: &PipelineStats,
        items_saved: u64,
    ) -> Self {
        let mut report = Self {
            source_id: source_id.into(),
            ok: stats.listing_pages_succeeded > 0,
            engine: engine.into(),
            discovery: discovery.into(),
            error: None,
            pages_attempted: stats.pages_attempted,
            pages_succeeded: stats.pages_succeeded,
            listing_pages_attempted: stats.listing_pages_attempted,
            listing_pages_succeeded: stats.listing_pages_succeeded,
            detail_pages_attempted: stats.detail_pages_attempted,
            detail_pages_succeeded: stats.detail_pages_succeeded,
            links_found: stats.links_found,
            links_new: stats.links_new,
            links_duplicate: stats.links_duplicate,
            items_parsed: stats.items_parsed,
            items_valid: stats.items_valid,
            items_dropped: stats.items_dropped,
            items_saved,
            errors: stats.errors.clone(),
            block_signals: stats.block_signals.clone(),
            elapsed_ms: stats.elapsed_ms,
            diagnosis: Vec::new(),
        };
        report.diagnosis = diagnose(&report);
        report
    }

    /// Report for a source that failed before producing statistics
    pub fn failed(
        source_id: impl Into<String>,
        engine: impl Into<String>,
        error: impl Into<String>,
    ) -> Self {
        let mut report = Self {
            source_id: source_id.into(),
            engine: engine.into(),
            error: Some(error.into()),
            ..Self::default()
        };
        report.diagnosis = diagnose(&report);
        report
    }

    pub fn success_rate(&self) -> f64 {
        if self.pages_attempted == 0 {
            return 0.0;
        }
        (self.pages_succeeded as f64 / self.pages_attempted as f64) * 100.0
    }
}

/// Human-readable hints explaining a poor source outcome
pub fn diagnose(report: &SourceReport) -> Vec<String> {
    let mut hints = Vec::new();

    if let Some(error) = &report.error {
        hints.push(format!("source failed: {}", error));
    }

    if report.listing_pages_succeeded > 0 && report.links_found == 0 {
        hints.push(format!(
            "no links found on {} listing page(s); check the discovery rule ({})",
            report.listing_pages_succeeded, report.discovery
        ));
    }

    if !report.block_signals.is_empty() {
        let seen: Vec<String> = report
            .block_signals
            .iter()
            .map(|(signal, count)| format!("{} x{}", signal, count))
            .collect();
        hints.push(format!(
            "block signals seen ({}); consider a browser or hybrid engine or a lower rps",
            seen.join(", ")
        ));
    }

    if report.detail_pages_attempted > 0 && report.detail_pages_succeeded == 0 {
        hints.push(format!(
            "all {} detail fetches failed",
            report.detail_pages_attempted
        ));
    }

    if report.items_parsed > 0 {
        let drop_rate = report.items_dropped as f64 / report.items_parsed as f64;
        if drop_rate > HIGH_DROP_RATE {
            hints.push(format!(
                "high drop rate: {} of {} items failed quality rules",
                report.items_dropped, report.items_parsed
            ));
        }
    }

    hints
}

/// Sums over all sources of a run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunTotals {
    pub pages_attempted: u64,
    pub pages_succeeded: u64,
    pub links_found: u64,
    pub items_parsed: u64,
    pub items_valid: u64,
    pub items_dropped: u64,
    pub items_saved: u64,
}

/// Report of a whole run, written once at the end
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub elapsed_ms: u64,
    pub config_hash: Option<String>,
    pub dry_run: bool,
    /// True when every source succeeded
    pub ok: bool,
    pub sources_total: usize,
    pub sources_ok: usize,
    pub sources_failed: usize,
    pub totals: RunTotals,
    pub sources: Vec<SourceReport>,
}

impl RunReport {
    pub fn new(run_id: impl Into<String>, started_at: DateTime<Utc>) -> Self {
        Self {
            run_id: run_id.into(),
            started_at,
            finished_at: None,
            elapsed_ms: 0,
            config_hash: None,
            dry_run: false,
            ok: true,
            sources_total: 0,
            sources_ok: 0,
            sources_failed: 0,
            totals: RunTotals::default(),
            sources: Vec::new(),
        }
    }

    /// Folds a source's outcome into the run
    pub fn add_source(&mut self, source: SourceReport) {
        self.sources_total += 1;
        if source.ok {
            self.sources_ok += 1;
        } else {
            self.sources_failed += 1;
        }
        self.ok = self.ok && source.ok;

        self.totals.pages_attempted += source.pages_attempted;
        self.totals.pages_succeeded += source.pages_succeeded;
        self.totals.links_found += source.links_found;
        self.totals.items_parsed += source.items_parsed;
        self.totals.items_valid += source.items_valid;
        self.totals.items_dropped += source.items_dropped;
        self.totals.items_saved += source.items_saved;

        self.sources.push(source);
    }

    pub fn finish(&mut self, finished_at: DateTime<Utc>) {
        self.elapsed_ms = u64::try_from((finished_at - self.started_at).num_milliseconds()).unwrap_or(0);
        self.finished_at = Some(finished_at);
    }

    pub fn source(&self, id: &str) -> Option<&SourceReport> {
        self.sources.iter().find(|s| s.source_id == id)
    }
}
