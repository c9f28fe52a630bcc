use crate::url::normalize_url;
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::sync::Mutex;

/// Outcome of a check-and-mark
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Seen {
    New,
    Duplicate,
}

/// In-memory fingerprint set shared by concurrent pipelines
///
/// Lives for one run; nothing is persisted across runs.
#[derive(Debug, Default)]
pub struct DedupeStore {
    seen: Mutex<HashSet<String>>,
}

impl DedupeStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `fingerprint`, reporting whether it had been seen before
    ///
    /// Exactly one caller ever observes `Seen::New` for a given fingerprint.
    pub fn check_and_mark(&self, fingerprint: &str) -> Seen {
        let mut seen = match self.seen.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if seen.insert(fingerprint.to_string()) {
            Seen::New
        } else {
            Seen::Duplicate
        }
    }

    pub fn contains(&self, fingerprint: &str) -> bool {
        match self.seen.lock() {
            Ok(guard) => guard.contains(fingerprint),
            Err(poisoned) => poisoned.into_inner().contains(fingerprint),
        }
    }

    pub fn len(&self) -> usize {
        match self.seen.lock() {
            Ok(guard) => guard.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Fingerprint of a URL: its normalized form, or the raw string if unparseable
pub fn url_fingerprint(url: &str) -> String {
    normalize_url(url)
        .map(|u| u.to_string())
        .unwrap_or_else(|_| url.trim().to_string())
}

/// SHA-256 hex digest of page content
pub fn content_fingerprint(content: &str) -> String {
    hex::encode(Sha256::digest(content.as_bytes()))
}
