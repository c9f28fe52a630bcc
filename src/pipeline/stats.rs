use crate::fetch::BlockSignal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

/// Live counters updated by concurrent detail fetches
#[derive(Debug, Default)]
pub struct PipelineCounters {
    pub listing_attempted: AtomicU64,
    pub listing_succeeded: AtomicU64,
    pub detail_attempted: AtomicU64,
    pub detail_succeeded: AtomicU64,
    pub links_found: AtomicU64,
    pub links_new: AtomicU64,
    pub links_duplicate: AtomicU64,
    pub links_skipped: AtomicU64,
    pub items_parsed: AtomicU64,
    pub items_valid: AtomicU64,
    pub items_dropped: AtomicU64,
    blocks: Mutex<BTreeMap<BlockSignal, u64>>,
    errors: Mutex<Vec<String>>,
}

impl PipelineCounters {
    pub fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add(counter: &AtomicU64, n: u64) {
        counter.fetch_add(n, Ordering::Relaxed);
    }

    pub fn record_block(&self, signal: BlockSignal) {
        if let Ok(mut blocks) = self.blocks.lock() {
            *blocks.entry(signal).or_insert(0) += 1;
        }
    }

    pub fn record_error(&self, message: String) {
        if let Ok(mut errors) = self.errors.lock() {
            errors.push(message);
        }
    }

    /// Freezes the counters into a serializable snapshot
    pub fn snapshot(&self, elapsed_ms: u64) -> PipelineStats {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        let listing_attempted = load(&self.listing_attempted);
        let listing_succeeded = load(&self.listing_succeeded);
        let detail_attempted = load(&self.detail_attempted);
        let detail_succeeded = load(&self.detail_succeeded);

        PipelineStats {
            pages_attempted: listing_attempted + detail_attempted,
            pages_succeeded: listing_succeeded + detail_succeeded,
            listing_pages_attempted: listing_attempted,
            listing_pages_succeeded: listing_succeeded,
            detail_pages_attempted: detail_attempted,
            detail_pages_succeeded: detail_succeeded,
            links_found: load(&self.links_found),
            links_new: load(&self.links_new),
            links_duplicate: load(&self.links_duplicate),
            links_skipped: load(&self.links_skipped),
            items_parsed: load(&self.items_parsed),
            items_valid: load(&self.items_valid),
            items_dropped: load(&self.items_dropped),
            block_signals: self
                .blocks
                .lock()
                .map(|b| b.iter().map(|(k, v)| (k.as_str().to_string(), *v)).collect())
                .unwrap_or_default(),
            errors: self.errors.lock().map(|e| e.clone()).unwrap_or_default(),
            elapsed_ms,
        }
    }
}

/// Final statistics of one source's pipeline
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PipelineStats {
    pub pages_attempted: u64,
    pub pages_succeeded: u64,
    pub listing_pages_attempted: u64,
    pub listing_pages_succeeded: u64,
    pub detail_pages_attempted: u64,
    pub detail_pages_succeeded: u64,
    /// Unique links matched by discovery, summed over listing pages
    pub links_found: u64,
    pub links_new: u64,
    pub links_duplicate: u64,
    /// New links left out by the detail page cap
    pub links_skipped: u64,
    pub items_parsed: u64,
    pub items_valid: u64,
    pub items_dropped: u64,
    pub block_signals: BTreeMap<String, u64>,
    pub errors: Vec<String>,
    pub elapsed_ms: u64,
}
