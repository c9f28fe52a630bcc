//! Value types describing one fetch request and its outcome

use crate::config::EngineSettings;
use crate::fetch::block::BlockSignal;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

/// Per-call overrides handed to an engine
///
/// Fields left as `None` (or empty maps) fall back to the engine's defaults.
#[derive(Debug, Clone, Default)]
pub struct EngineContext {
    pub timeout: Option<Duration>,
    pub verify_tls: Option<bool>,
    pub user_agent: Option<String>,
    pub proxy: Option<String>,
    pub headers: BTreeMap<String, String>,
    pub cookies: BTreeMap<String, String>,
}

impl EngineContext {
    /// Builds the default context described by a source's engine settings
    pub fn from_settings(settings: &EngineSettings) -> Self {
        Self {
            timeout: Some(Duration::from_secs(settings.timeout_secs.max(1))),
            verify_tls: Some(settings.verify_tls),
            user_agent: settings.user_agent.clone(),
            proxy: settings.proxy.clone(),
            headers: settings.headers.clone(),
            cookies: settings.cookies.clone(),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn with_cookie(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.cookies.insert(name.into(), value.into());
        self
    }

    /// Layers this context over `defaults`: set fields win, maps are merged
    pub fn merged_over(&self, defaults: &EngineContext) -> EngineContext {
        let mut headers = defaults.headers.clone();
        headers.extend(self.headers.clone());
        let mut cookies = defaults.cookies.clone();
        cookies.extend(self.cookies.clone());

        EngineContext {
            timeout: self.timeout.or(defaults.timeout),
            verify_tls: self.verify_tls.or(defaults.verify_tls),
            user_agent: self.user_agent.clone().or_else(|| defaults.user_agent.clone()),
            proxy: self.proxy.clone().or_else(|| defaults.proxy.clone()),
            headers,
            cookies,
        }
    }

    /// Renders the cookie map as a `Cookie` header value
    pub fn cookie_header(&self) -> Option<String> {
        if self.cookies.is_empty() {
            return None;
        }
        Some(
            self.cookies
                .iter()
                .map(|(k, v)| format!("{}={}", k, v))
                .collect::<Vec<_>>()
                .join("; "),
        )
    }
}

/// Classification of a failed fetch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FetchErrorKind {
    Timeout,
    Connect,
    Dns,
    Tls,
    Redirect,
    Body,
    Request,
    /// Non-2xx status
    Http,
    Browser,
    BrowserUnavailable,
    Unsupported,
    Closed,
}

impl FetchErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Timeout => "timeout",
            Self::Connect => "connect",
            Self::Dns => "dns",
            Self::Tls => "tls",
            Self::Redirect => "redirect",
            Self::Body => "body",
            Self::Request => "request",
            Self::Http => "http",
            Self::Browser => "browser",
            Self::BrowserUnavailable => "browser_unavailable",
            Self::Unsupported => "unsupported",
            Self::Closed => "closed",
        }
    }
}

impl fmt::Display for FetchErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Typed error carried inside a `FetchResult`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FetchError {
    pub kind: FetchErrorKind,
    pub message: String,
    pub retryable: bool,
}

impl FetchError {
    pub fn new(kind: FetchErrorKind, message: impl Into<String>, retryable: bool) -> Self {
        Self {
            kind,
            message: message.into(),
            retryable,
        }
    }
}

impl fmt::Display for FetchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

/// Outcome of a single attempt inside a fetch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttemptTrace {
    pub attempt: u32,
    pub engine: String,
    pub status: Option<u16>,
    pub error: Option<FetchErrorKind>,
    pub elapsed_ms: u64,
    pub retried: bool,
    pub backoff_ms: u64,
}

/// Result of fetching one URL, including every attempt made
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchResult {
    /// URL as requested
    pub url: String,
    /// URL after redirects
    pub final_url: String,
    pub ok: bool,
    pub status: Option<u16>,
    pub content_type: Option<String>,
    pub text: String,
    pub elapsed_ms: u64,
    /// Engine that produced the returned data
    pub engine: String,
    pub engine_trace: Vec<AttemptTrace>,
    pub headers: BTreeMap<String, String>,
    pub redirect_chain: Vec<String>,
    pub error: Option<FetchError>,
    pub block: Option<BlockSignal>,
    pub fetched_at: DateTime<Utc>,
}

impl FetchResult {
    /// An empty, unsuccessful result for `url`
    pub fn new(url: impl Into<String>, engine: impl Into<String>) -> Self {
        let url = url.into();
        Self {
            final_url: url.clone(),
            url,
            ok: false,
            status: None,
            content_type: None,
            text: String::new(),
            elapsed_ms: 0,
            engine: engine.into(),
            engine_trace: Vec::new(),
            headers: BTreeMap::new(),
            redirect_chain: Vec::new(),
            error: None,
            block: None,
            fetched_at: Utc::now(),
        }
    }

    /// A failed result with a single attempt recorded
    pub fn failure(url: impl Into<String>, engine: impl Into<String>, error: FetchError) -> Self {
        let mut result = Self::new(url, engine);
        result.engine_trace.push(AttemptTrace {
            attempt: 1,
            engine: result.engine.clone(),
            status: None,
            error: Some(error.kind),
            elapsed_ms: 0,
            retried: false,
            backoff_ms: 0,
        });
        result.error = Some(error);
        result
    }

    /// Number of attempts recorded in the trace
    pub fn attempts(&self) -> usize {
        self.engine_trace.len()
    }

    pub fn is_success_status(status: u16) -> bool {
        (200..300).contains(&status)
    }

    pub fn elapsed(&self) -> Duration {
        Duration::from_millis(self.elapsed_ms)
    }
}
