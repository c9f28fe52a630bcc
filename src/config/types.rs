use crate::filter::QualityRules;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Top-level run configuration: run settings plus one entry per source
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RunConfig {
    #[serde(default)]
    pub run: RunSettings,

    #[serde(rename = "source", default)]
    pub sources: Vec<SourceConfig>,
}

impl RunConfig {
    /// Looks up a source by id
    pub fn source(&self, id: &str) -> Option<&SourceConfig> {
        self.sources.iter().find(|s| s.id == id)
    }
}

/// Settings that apply to the whole run
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RunSettings {
    /// Directory under which `<run_id>/<source_id>/` artifact trees are created
    #[serde(rename = "results-root", default = "default_results_root")]
    pub results_root: String,

    /// Whether the dedupe store is shared by all sources or rebuilt per source
    #[serde(rename = "dedupe-scope", default)]
    pub dedupe_scope: DedupeScope,
}

impl Default for RunSettings {
    fn default() -> Self {
        Self {
            results_root: default_results_root(),
            dedupe_scope: DedupeScope::default(),
        }
    }
}

fn default_results_root() -> String {
    "./results".to_string()
}

/// Lifetime of the fingerprint set used for deduplication
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DedupeScope {
    #[default]
    Run,
    Source,
}

/// Declarative description of one target site
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SourceConfig {
    #[serde(default)]
    pub id: String,

    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default)]
    pub engine: EngineSettings,

    #[serde(default)]
    pub entrypoints: Vec<Entrypoint>,

    #[serde(default)]
    pub discovery: Option<DiscoveryConfig>,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub quality: QualityRules,

    /// Maximum number of concurrent detail page fetches
    #[serde(default = "default_parallelism")]
    pub parallelism: usize,

    /// Upper bound on detail pages fetched for this source
    #[serde(rename = "max-detail-pages", default)]
    pub max_detail_pages: Option<usize>,
}

impl SourceConfig {
    /// Creates a source with defaults for everything but the id and seeds
    pub fn new(id: impl Into<String>, seeds: Vec<String>) -> Self {
        Self {
            id: id.into(),
            enabled: true,
            engine: EngineSettings::default(),
            entrypoints: seeds.into_iter().map(Entrypoint::from_url).collect(),
            discovery: None,
            storage: StorageConfig::default(),
            quality: QualityRules::default(),
            parallelism: default_parallelism(),
            max_detail_pages: None,
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_parallelism() -> usize {
    4
}

/// Engine kind selected by configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineKind {
    Http,
    Browser,
    Hybrid,
}

impl EngineKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Http => "http",
            Self::Browser => "browser",
            Self::Hybrid => "hybrid",
        }
    }
}

impl fmt::Display for EngineKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EngineKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "http" => Ok(Self::Http),
            "browser" => Ok(Self::Browser),
            "hybrid" => Ok(Self::Hybrid),
            other => Err(format!(
                "unknown engine type '{}' (expected http, browser or hybrid)",
                other
            )),
        }
    }
}

/// Backoff mode between retry attempts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BackoffMode {
    #[default]
    Exponential,
    Fixed,
    None,
}

/// Per-source engine tuning
///
/// The engine type is kept as a string so that an unknown value surfaces as a
/// validation error naming the source instead of a TOML parse failure.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EngineSettings {
    #[serde(rename = "type", default = "default_engine_type")]
    pub kind: String,

    #[serde(rename = "timeout-secs", default = "default_timeout_secs")]
    pub timeout_secs: u64,

    #[serde(rename = "verify-tls", default = "default_true")]
    pub verify_tls: bool,

    #[serde(rename = "user-agent", default)]
    pub user_agent: Option<String>,

    #[serde(default)]
    pub proxy: Option<String>,

    #[serde(default)]
    pub headers: BTreeMap<String, String>,

    #[serde(default)]
    pub cookies: BTreeMap<String, String>,

    /// Requests per second; absent or <= 0 disables the token bucket
    #[serde(default)]
    pub rps: Option<f64>,

    #[serde(default = "default_burst")]
    pub burst: u32,

    #[serde(rename = "min-delay-ms", default)]
    pub min_delay_ms: u64,

    #[serde(rename = "jitter-ms", default)]
    pub jitter_ms: u64,

    #[serde(rename = "max-retries", default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default)]
    pub backoff: BackoffMode,

    #[serde(rename = "backoff-base-ms", default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,

    #[serde(rename = "backoff-max-ms", default)]
    pub backoff_max_ms: Option<u64>,

    #[serde(rename = "retry-statuses", default = "default_retry_statuses")]
    pub retry_statuses: Vec<u16>,

    #[serde(default)]
    pub hybrid: HybridSettings,

    #[serde(default)]
    pub browser: BrowserSettings,
}

impl EngineSettings {
    /// Parses the configured engine type
    pub fn engine_kind(&self) -> Result<EngineKind, String> {
        self.kind.parse()
    }

    /// Settings for a given engine kind with every other field defaulted
    pub fn for_kind(kind: EngineKind) -> Self {
        Self {
            kind: kind.as_str().to_string(),
            ..Self::default()
        }
    }
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            kind: default_engine_type(),
            timeout_secs: default_timeout_secs(),
            verify_tls: true,
            user_agent: None,
            proxy: None,
            headers: BTreeMap::new(),
            cookies: BTreeMap::new(),
            rps: None,
            burst: default_burst(),
            min_delay_ms: 0,
            jitter_ms: 0,
            max_retries: default_max_retries(),
            backoff: BackoffMode::default(),
            backoff_base_ms: default_backoff_base_ms(),
            backoff_max_ms: None,
            retry_statuses: default_retry_statuses(),
            hybrid: HybridSettings::default(),
            browser: BrowserSettings::default(),
        }
    }
}

fn default_engine_type() -> String {
    "http".to_string()
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_burst() -> u32 {
    1
}

fn default_max_retries() -> u32 {
    2
}

fn default_backoff_base_ms() -> u64 {
    500
}

fn default_retry_statuses() -> Vec<u16> {
    vec![429, 500, 502, 503, 504]
}

/// Escalation thresholds for the hybrid engine
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct HybridSettings {
    /// HTTP responses with less text than this are re-fetched in the browser
    #[serde(rename = "min-text-len", default = "default_hybrid_min_text_len")]
    pub min_text_len: usize,

    #[serde(rename = "escalate-on-error", default = "default_true")]
    pub escalate_on_error: bool,

    #[serde(rename = "escalate-on-block", default = "default_true")]
    pub escalate_on_block: bool,
}

impl Default for HybridSettings {
    fn default() -> Self {
        Self {
            min_text_len: default_hybrid_min_text_len(),
            escalate_on_error: true,
            escalate_on_block: true,
        }
    }
}

fn default_hybrid_min_text_len() -> usize {
    500
}

/// Headless browser tuning
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BrowserSettings {
    #[serde(default = "default_true")]
    pub headless: bool,

    /// Explicit browser binary; auto-detected when absent
    #[serde(default)]
    pub executable: Option<String>,

    /// Skip images, fonts and media while rendering
    #[serde(rename = "block-resources", default)]
    pub block_resources: bool,

    /// Selector to wait for after navigation
    #[serde(rename = "wait-for", default)]
    pub wait_for: Option<String>,

    /// Directory receiving HTML and screenshot captures of failed fetches
    #[serde(rename = "capture-dir", default)]
    pub capture_dir: Option<String>,

    #[serde(rename = "viewport-width", default = "default_viewport_width")]
    pub viewport_width: u32,

    #[serde(rename = "viewport-height", default = "default_viewport_height")]
    pub viewport_height: u32,
}

impl Default for BrowserSettings {
    fn default() -> Self {
        Self {
            headless: true,
            executable: None,
            block_resources: false,
            wait_for: None,
            capture_dir: None,
            viewport_width: default_viewport_width(),
            viewport_height: default_viewport_height(),
        }
    }
}

fn default_viewport_width() -> u32 {
    1366
}

fn default_viewport_height() -> u32 {
    768
}

/// A seed URL, optionally paginated
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Entrypoint {
    #[serde(default)]
    pub url: Option<String>,

    #[serde(default)]
    pub paging: Option<Paging>,
}

impl Entrypoint {
    pub fn from_url(url: impl Into<String>) -> Self {
        Self {
            url: Some(url.into()),
            paging: None,
        }
    }
}

/// Pagination over an entrypoint
///
/// When the entrypoint URL contains `{page}` the placeholder is substituted;
/// otherwise the page number is set as the `param` query parameter.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Paging {
    #[serde(default = "default_page_start")]
    pub start: u32,

    #[serde(default = "default_pages")]
    pub pages: u32,

    #[serde(default = "default_page_step")]
    pub step: u32,

    #[serde(default = "default_page_param")]
    pub param: String,
}

fn default_page_start() -> u32 {
    1
}

fn default_pages() -> u32 {
    1
}

fn default_page_step() -> u32 {
    1
}

fn default_page_param() -> String {
    "page".to_string()
}

/// How candidate detail URLs are found on a listing page
///
/// Exactly one of the fields is expected to be set.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct DiscoveryConfig {
    /// Regex matched against resolved link URLs
    #[serde(default)]
    pub regex: Option<String>,

    /// CSS selector for elements carrying an `href`
    #[serde(default)]
    pub css: Option<String>,

    /// Accepted so that configs using it fail validation with a clear message
    #[serde(default)]
    pub xpath: Option<String>,

    /// Keep only links on the listing page's host
    #[serde(rename = "same-host", default)]
    pub same_host: bool,
}

impl DiscoveryConfig {
    pub fn regex(pattern: impl Into<String>) -> Self {
        Self {
            regex: Some(pattern.into()),
            ..Self::default()
        }
    }

    pub fn css(selector: impl Into<String>) -> Self {
        Self {
            css: Some(selector.into()),
            ..Self::default()
        }
    }

    /// Number of discovery methods that are set
    pub fn methods_set(&self) -> usize {
        [&self.regex, &self.css, &self.xpath]
            .iter()
            .filter(|m| m.is_some())
            .count()
    }
}

/// Item serialization format
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageFormat {
    #[default]
    Jsonl,
    Csv,
    Sqlite,
}

impl StorageFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Jsonl => "jsonl",
            Self::Csv => "csv",
            Self::Sqlite => "sqlite",
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct StorageConfig {
    #[serde(default)]
    pub format: StorageFormat,
}
