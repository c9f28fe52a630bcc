use crate::config::types::{DiscoveryConfig, RunConfig, SourceConfig};
use crate::ConfigError;
use regex::Regex;
use scraper::Selector;
use std::collections::HashSet;
use url::Url;

/// Regex patterns that match (nearly) every link on a page
const BROAD_REGEXES: &[&str] = &["", ".", ".*", ".+", "^.*$", "http", "https?://"];

/// CSS selectors that match (nearly) every link on a page
const BROAD_SELECTORS: &[&str] = &["*", "a", "a[href]", "[href]", "body a"];

/// Outcome of structural validation
///
/// Errors make the configuration unusable; warnings are reported but the run
/// proceeds.
#[derive(Debug, Clone, Default)]
pub struct ValidationReport {
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl ValidationReport {
    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }

    /// Converts into the warnings on success or a validation error
    pub fn into_result(self) -> Result<Vec<String>, ConfigError> {
        if self.errors.is_empty() {
            Ok(self.warnings)
        } else {
            Err(ConfigError::Validation(self.errors))
        }
    }

    fn error(&mut self, source: &str, message: impl AsRef<str>) {
        self.errors
            .push(format!("source '{}': {}", source, message.as_ref()));
    }

    fn warn(&mut self, source: &str, message: impl AsRef<str>) {
        self.warnings
            .push(format!("source '{}': {}", source, message.as_ref()));
    }
}

/// Validates the entire configuration
pub fn validate(config: &RunConfig) -> ValidationReport {
    let mut report = ValidationReport::default();

    if config.run.results_root.trim().is_empty() {
        report.errors.push("results-root cannot be empty".to_string());
    }

    if config.sources.is_empty() {
        report
            .errors
            .push("configuration must declare at least one [[source]]".to_string());
    }

    let mut seen_ids = HashSet::new();
    for (index, source) in config.sources.iter().enumerate() {
        let label = if source.id.is_empty() {
            format!("#{}", index)
        } else {
            source.id.clone()
        };

        if source.id.trim().is_empty() {
            report.error(&label, "missing required field 'id'");
        } else if !seen_ids.insert(source.id.as_str()) {
            report.error(&label, "duplicate source id");
        } else if !is_path_safe(&source.id) {
            report.error(
                &label,
                "id may only contain alphanumerics, '-', '_' and '.'",
            );
        }

        validate_source(&label, source, &mut report);
    }

    report
}

/// Validates a single source
fn validate_source(label: &str, source: &SourceConfig, report: &mut ValidationReport) {
    if let Err(e) = source.engine.engine_kind() {
        report.error(label, e);
    }

    if source.engine.timeout_secs == 0 {
        report.error(label, "engine timeout-secs must be >= 1");
    }

    if source.engine.burst == 0 {
        report.error(label, "engine burst must be >= 1");
    }

    if source.parallelism == 0 {
        report.error(label, "parallelism must be >= 1");
    }

    for status in &source.engine.retry_statuses {
        if !(100..=599).contains(status) {
            report.error(label, format!("retry status {} is not an HTTP status", status));
        }
    }

    validate_entrypoints(label, source, report);

    match &source.discovery {
        None => report.warn(
            label,
            "no discovery rule; every same-host link on listing pages will be followed",
        ),
        Some(discovery) => validate_discovery(label, discovery, report),
    }
}

fn validate_entrypoints(label: &str, source: &SourceConfig, report: &mut ValidationReport) {
    let mut with_url = 0;

    for entry in &source.entrypoints {
        let Some(raw) = entry.url.as_deref().filter(|u| !u.trim().is_empty()) else {
            continue;
        };
        with_url += 1;

        // The page placeholder is not a valid URL character sequence on its own
        let sample = raw.replace("{page}", "1");
        match Url::parse(&sample) {
            Ok(url) if url.scheme() == "http" || url.scheme() == "https" => {}
            Ok(url) => report.error(
                label,
                format!("entrypoint '{}' has unsupported scheme '{}'", raw, url.scheme()),
            ),
            Err(e) => report.error(label, format!("invalid entrypoint URL '{}': {}", raw, e)),
        }

        if let Some(paging) = &entry.paging {
            if paging.pages == 0 {
                report.error(label, format!("entrypoint '{}' paging.pages must be >= 1", raw));
            }
            if paging.step == 0 {
                report.error(label, format!("entrypoint '{}' paging.step must be >= 1", raw));
            }
        }
    }

    if with_url == 0 {
        report.error(label, "at least one entrypoint must have a url");
    }
}

fn validate_discovery(label: &str, discovery: &DiscoveryConfig, report: &mut ValidationReport) {
    match discovery.methods_set() {
        0 => report.warn(
            label,
            "discovery rule sets no method; every same-host link will be followed",
        ),
        1 => {}
        _ => report.error(label, "discovery must set exactly one of regex, css or xpath"),
    }

    if discovery.xpath.is_some() {
        report.error(label, "xpath discovery is not supported; use css or regex");
    }

    if let Some(pattern) = &discovery.regex {
        if let Err(e) = Regex::new(pattern) {
            report.error(label, format!("invalid discovery regex '{}': {}", pattern, e));
        } else if BROAD_REGEXES.contains(&pattern.trim()) {
            report.warn(label, format!("discovery regex '{}' matches nearly every link", pattern));
        }
    }

    if let Some(selector) = &discovery.css {
        if Selector::parse(selector).is_err() {
            report.error(label, format!("invalid discovery selector '{}'", selector));
        } else if BROAD_SELECTORS.contains(&selector.trim()) {
            report.warn(
                label,
                format!("discovery selector '{}' matches nearly every link", selector),
            );
        }
    }
}

/// Source ids become directory names
fn is_path_safe(id: &str) -> bool {
    id != "."
        && id != ".."
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.')
}
