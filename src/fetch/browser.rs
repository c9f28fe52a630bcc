//! Headless browser engine driven over the DevTools protocol
//!
//! One browser process lives as long as the engine. Every fetch opens its own
//! page, which is always closed before the fetch returns.

use crate::config::{BrowserSettings, EngineSettings};
use crate::fetch::actions::{run_actions, BrowserAction};
use crate::fetch::block::classify_block;
use crate::fetch::http::DEFAULT_USER_AGENT;
use crate::fetch::rate_limit::RateLimiter;
use crate::fetch::result::{
    AttemptTrace, EngineContext, FetchError, FetchErrorKind, FetchResult,
};
use crate::fetch::retry::RetryPolicy;
use crate::fetch::traits::{Engine, EngineError};
use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::network::{
    EnableParams, EventResponseReceived, Headers, ResourceType, SetBlockedUrLsParams,
    SetExtraHttpHeadersParams,
};
use chromiumoxide::handler::viewport::Viewport;
use chromiumoxide::page::ScreenshotParams;
use chromiumoxide::Page;
use futures::StreamExt;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::{oneshot, Mutex, RwLock};
use tokio::task::JoinHandle;

const ENGINE_NAME: &str = "browser";

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
const WAIT_FOR_POLL: Duration = Duration::from_millis(200);
const RESPONSE_GRACE: Duration = Duration::from_millis(500);

/// URL patterns blocked when resource blocking is on
const BLOCKED_RESOURCES: &[&str] = &[
    "*.png", "*.jpg", "*.jpeg", "*.gif", "*.webp", "*.svg", "*.ico", "*.woff", "*.woff2",
    "*.ttf", "*.otf", "*.mp4", "*.webm", "*.mp3", "*.ogg",
];

/// Document response captured from network events
#[derive(Debug, Clone, Default)]
struct DocumentResponse {
    status: Option<u16>,
    headers: BTreeMap<String, String>,
    mime_type: Option<String>,
}

/// Aborts the response listener however rendering ends
struct ListenerGuard(JoinHandle<()>);

impl Drop for ListenerGuard {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Rendered page data of one successful attempt
struct Rendered {
    final_url: String,
    html: String,
    document: DocumentResponse,
}

/// Browser engine backed by a single Chromium process
pub struct BrowserEngine {
    browser: RwLock<Option<Browser>>,
    handler: Mutex<Option<JoinHandle<()>>>,
    settings: BrowserSettings,
    /// Proxy the browser process was started with; Chromium cannot switch per page
    launch_proxy: Option<String>,
    defaults: EngineContext,
    retry: RetryPolicy,
    limiter: RateLimiter,
    closed: AtomicBool,
}

impl BrowserEngine {
    /// Launches a browser for the given engine settings
    pub async fn launch(settings: &EngineSettings) -> Result<Self, EngineError> {
        let (browser, handler) = launch_browser(settings).await?;

        Ok(Self {
            browser: RwLock::new(Some(browser)),
            handler: Mutex::new(Some(handler)),
            settings: settings.browser.clone(),
            launch_proxy: settings.proxy.clone(),
            defaults: EngineContext::from_settings(settings),
            retry: RetryPolicy::from_settings(settings),
            limiter: RateLimiter::from_settings(settings),
            closed: AtomicBool::new(false),
        })
    }

    fn viewport(&self) -> (u32, u32) {
        (self.settings.viewport_width, self.settings.viewport_height)
    }

    async fn open_page(&self) -> Result<Page, FetchError> {
        let guard = self.browser.read().await;
        let browser = guard
            .as_ref()
            .ok_or_else(|| FetchError::new(FetchErrorKind::Closed, "browser is closed", false))?;
        browser
            .new_page("about:blank")
            .await
            .map_err(|e| browser_error(format!("failed to open page: {}", e)))
    }

    /// Runs one attempt; the page is closed on every path
    async fn attempt(
        &self,
        url: &str,
        ctx: &EngineContext,
        actions: &[BrowserAction],
        wait_for: Option<&str>,
    ) -> Result<Rendered, FetchError> {
        let page = self.open_page().await?;
        let timeout = ctx.timeout.unwrap_or(DEFAULT_TIMEOUT);

        let outcome = match tokio::time::timeout(
            timeout,
            self.render(&page, url, ctx, actions, wait_for, timeout),
        )
        .await
        {
            Ok(outcome) => outcome,
            Err(_) => Err(FetchError::new(
                FetchErrorKind::Timeout,
                format!("page did not finish within {:?}", timeout),
                true,
            )),
        };

        if outcome.is_err() {
            if let Some(dir) = &self.settings.capture_dir {
                capture_failure(&page, Path::new(dir), url).await;
            }
        }

        if let Err(e) = page.close().await {
            tracing::debug!("Failed to close page for {}: {}", url, e);
        }

        outcome
    }

    async fn render(
        &self,
        page: &Page,
        url: &str,
        ctx: &EngineContext,
        actions: &[BrowserAction],
        wait_for: Option<&str>,
        timeout: Duration,
    ) -> Result<Rendered, FetchError> {
        let user_agent = ctx.user_agent.as_deref().unwrap_or(DEFAULT_USER_AGENT);
        page.set_user_agent(user_agent)
            .await
            .map_err(|e| browser_error(format!("failed to set user agent: {}", e)))?;

        page.execute(EnableParams::default())
            .await
            .map_err(|e| browser_error(format!("failed to enable network events: {}", e)))?;

        if self.settings.block_resources {
            let blocked = BLOCKED_RESOURCES.iter().map(|p| p.to_string()).collect();
            if let Err(e) = page.execute(SetBlockedUrLsParams::new(blocked)).await {
                tracing::warn!("Resource blocking unavailable: {}", e);
            }
        }

        let (document_tx, document_rx) = oneshot::channel();
        let listener = match page.event_listener::<EventResponseReceived>().await {
            Ok(mut events) => Some(ListenerGuard(tokio::spawn(async move {
                while let Some(event) = events.next().await {
                    if event.r#type == ResourceType::Document {
                        let headers = serde_json::to_value(&event.response.headers)
                            .ok()
                            .and_then(|v| v.as_object().cloned())
                            .map(|map| {
                                map.into_iter()
                                    .map(|(k, v)| {
                                        let value = match v {
                                            serde_json::Value::String(s) => s,
                                            other => other.to_string(),
                                        };
                                        (k.to_ascii_lowercase(), value)
                                    })
                                    .collect()
                            })
                            .unwrap_or_default();
                        let _ = document_tx.send(DocumentResponse {
                            status: u16::try_from(event.response.status).ok(),
                            headers,
                            mime_type: Some(event.response.mime_type.clone()),
                        });
                        break;
                    }
                }
            }))),
            Err(e) => {
                tracing::debug!("No response events for {}: {}", url, e);
                None
            }
        };

        let mut extra: serde_json::Map<String, serde_json::Value> = ctx
            .headers
            .iter()
            .map(|(k, v)| (k.clone(), serde_json::Value::String(v.clone())))
            .collect();
        if let Some(cookie) = ctx.cookie_header() {
            extra.insert("Cookie".to_string(), serde_json::Value::String(cookie));
        }
        if !extra.is_empty() {
            page.execute(SetExtraHttpHeadersParams::new(Headers::new(
                serde_json::Value::Object(extra),
            )))
            .await
            .map_err(|e| browser_error(format!("failed to set headers: {}", e)))?;
        }

        page.goto(url).await.map_err(|e| {
            FetchError::new(
                FetchErrorKind::Browser,
                format!("navigation failed: {}", e),
                true,
            )
        })?;

        let selector = wait_for.or(self.settings.wait_for.as_deref());
        if let Some(selector) = selector {
            wait_for_selector(page, selector, timeout).await?;
        }

        run_actions(page, actions, self.viewport()).await?;

        let html = page
            .content()
            .await
            .map_err(|e| browser_error(format!("failed to read page content: {}", e)))?;
        let final_url = page
            .url()
            .await
            .ok()
            .flatten()
            .unwrap_or_else(|| url.to_string());

        let document = match tokio::time::timeout(RESPONSE_GRACE, document_rx).await {
            Ok(Ok(document)) => document,
            _ => DocumentResponse::default(),
        };
        drop(listener);

        Ok(Rendered {
            final_url,
            html,
            document,
        })
    }

    async fn fetch_with(
        &self,
        url: &str,
        ctx: &EngineContext,
        actions: &[BrowserAction],
        wait_for: Option<&str>,
    ) -> FetchResult {
        if self.closed.load(Ordering::SeqCst) {
            return FetchResult::failure(
                url,
                ENGINE_NAME,
                FetchError::new(FetchErrorKind::Closed, "engine is closed", false),
            );
        }

        let ctx = ctx.merged_over(&self.defaults);
        if let Some(error) = proxy_mismatch(self.launch_proxy.as_deref(), ctx.proxy.as_deref()) {
            return FetchResult::failure(url, ENGINE_NAME, error);
        }

        let started = Instant::now();
        let ctx = &ctx;
        let Attempts {
            outcome,
            trace,
            retryable,
        } = run_attempts(&self.retry, &self.limiter, url, move || {
            self.attempt(url, ctx, actions, wait_for)
        })
        .await;

        let mut result = FetchResult::new(url, ENGINE_NAME);
        result.engine_trace = trace;
        result.elapsed_ms = millis(started.elapsed());

        match outcome {
            Ok(rendered) => {
                let status = rendered.document.status;
                result.ok = status.map_or(true, FetchResult::is_success_status);
                result.block = classify_block(status, &rendered.html, &rendered.document.headers);
                if let (false, Some(code)) = (result.ok, status) {
                    result.error = Some(FetchError::new(
                        FetchErrorKind::Http,
                        format!("HTTP {}", code),
                        retryable,
                    ));
                }
                result.status = status;
                result.final_url = rendered.final_url;
                result.content_type = rendered.document.mime_type;
                result.headers = rendered.document.headers;
                result.text = rendered.html;
            }
            Err(e) => {
                tracing::debug!("Browser fetch of {} failed: {}", url, e);
                result.error = Some(e);
            }
        }

        result
    }
}

/// Last attempt of a retry loop plus the trace of every attempt
struct Attempts {
    outcome: Result<Rendered, FetchError>,
    trace: Vec<AttemptTrace>,
    retryable: bool,
}

/// Runs `attempt` until it succeeds, fails terminally or retries run out
async fn run_attempts<F, Fut>(
    retry: &RetryPolicy,
    limiter: &RateLimiter,
    url: &str,
    mut attempt_once: F,
) -> Attempts
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Rendered, FetchError>>,
{
    let mut trace = Vec::new();
    let mut attempt: u32 = 0;

    loop {
        attempt += 1;
        limiter.wait().await;

        let attempt_started = Instant::now();
        let outcome = attempt_once().await;

        let retryable = match &outcome {
            Ok(rendered) => rendered
                .document
                .status
                .is_some_and(|s| retry.should_retry_status(s)),
            Err(e) => retry.should_retry_error(e),
        };
        let will_retry = retryable && retry.has_attempts_left(attempt);
        let backoff = if will_retry {
            retry.compute_backoff(attempt)
        } else {
            Duration::ZERO
        };

        trace.push(AttemptTrace {
            attempt,
            engine: ENGINE_NAME.to_string(),
            status: outcome.as_ref().ok().and_then(|r| r.document.status),
            error: outcome.as_ref().err().map(|e| e.kind),
            elapsed_ms: millis(attempt_started.elapsed()),
            retried: will_retry,
            backoff_ms: millis(backoff),
        });

        if !will_retry {
            return Attempts {
                outcome,
                trace,
                retryable,
            };
        }

        tracing::warn!(
            "Browser fetch of {} failed (attempt {}), retrying in {:?}",
            url,
            attempt,
            backoff
        );
        tokio::time::sleep(backoff).await;
    }
}

#[async_trait]
impl Engine for BrowserEngine {
    fn name(&self) -> &str {
        ENGINE_NAME
    }

    async fn fetch(&self, url: &str, ctx: &EngineContext) -> FetchResult {
        self.fetch_with(url, ctx, &[], None).await
    }

    async fn fetch_rendered(
        &self,
        url: &str,
        ctx: &EngineContext,
        actions: &[BrowserAction],
        wait_for: Option<&str>,
    ) -> FetchResult {
        self.fetch_with(url, ctx, actions, wait_for).await
    }

    async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        if let Some(mut browser) = self.browser.write().await.take() {
            if let Err(e) = browser.close().await {
                tracing::debug!("Browser close failed: {}", e);
            }
            if let Err(e) = browser.wait().await {
                tracing::debug!("Browser process wait failed: {}", e);
            }
        }
        if let Some(handler) = self.handler.lock().await.take() {
            handler.abort();
        }
        tracing::debug!("Browser engine closed");
    }
}

/// Command-line switches carrying the engine's network settings into Chromium
fn launch_args(settings: &EngineSettings) -> Vec<String> {
    let mut args = Vec::new();
    if let Some(proxy) = settings.proxy.as_deref().filter(|p| !p.trim().is_empty()) {
        args.push(format!("--proxy-server={}", proxy.trim()));
    }
    if !settings.verify_tls {
        args.push("--ignore-certificate-errors".to_string());
    }
    args
}

async fn launch_browser(
    engine: &EngineSettings,
) -> Result<(Browser, JoinHandle<()>), EngineError> {
    let settings = &engine.browser;
    let mut builder = BrowserConfig::builder()
        .no_sandbox()
        .window_size(settings.viewport_width, settings.viewport_height)
        .viewport(Viewport {
            width: settings.viewport_width,
            height: settings.viewport_height,
            ..Viewport::default()
        });

    if !settings.headless {
        builder = builder.with_head();
    }

    for arg in launch_args(engine) {
        builder = builder.arg(arg);
    }

    if let Some(executable) = &settings.executable {
        let path = PathBuf::from(executable);
        if !path.exists() {
            return Err(EngineError::BrowserUnavailable {
                message: format!("no browser executable at {}", path.display()),
            });
        }
        builder = builder.chrome_executable(path);
    }

    // The builder fails when no Chrome/Chromium can be located
    let config = builder
        .build()
        .map_err(|message| EngineError::BrowserUnavailable { message })?;

    let (browser, mut handler) = Browser::launch(config).await.map_err(|e| {
        let message = e.to_string();
        let lower = message.to_lowercase();
        if lower.contains("not found") || lower.contains("executable") || lower.contains("no such file") {
            EngineError::BrowserUnavailable { message }
        } else {
            EngineError::Browser(message)
        }
    })?;

    let handle = tokio::spawn(async move {
        while let Some(event) = handler.next().await {
            if let Err(e) = event {
                tracing::trace!("Browser handler event error: {}", e);
            }
        }
    });

    Ok((browser, handle))
}

/// Launches and immediately closes a browser, reporting whether one is usable
pub async fn check_browser(settings: &EngineSettings) -> Result<(), EngineError> {
    let engine = BrowserEngine::launch(settings).await?;
    engine.close().await;
    Ok(())
}

async fn wait_for_selector(page: &Page, selector: &str, timeout: Duration) -> Result<(), FetchError> {
    let deadline = Instant::now() + timeout;
    loop {
        if page.find_element(selector).await.is_ok() {
            return Ok(());
        }
        if Instant::now() >= deadline {
            return Err(FetchError::new(
                FetchErrorKind::Timeout,
                format!("selector '{}' did not appear", selector),
                true,
            ));
        }
        tokio::time::sleep(WAIT_FOR_POLL).await;
    }
}

/// Saves the page HTML and a screenshot for post-mortem inspection
async fn capture_failure(page: &Page, dir: &Path, url: &str) {
    if let Err(e) = tokio::fs::create_dir_all(dir).await {
        tracing::warn!("Cannot create capture directory {}: {}", dir.display(), e);
        return;
    }

    let stem = capture_stem(url);

    if let Ok(html) = page.content().await {
        let path = dir.join(format!("{}.html", stem));
        if let Err(e) = tokio::fs::write(&path, html).await {
            tracing::warn!("Failed to write {}: {}", path.display(), e);
        }
    }

    match page
        .screenshot(ScreenshotParams::builder().full_page(true).build())
        .await
    {
        Ok(png) => {
            let path = dir.join(format!("{}.png", stem));
            if let Err(e) = tokio::fs::write(&path, png).await {
                tracing::warn!("Failed to write {}: {}", path.display(), e);
            }
        }
        Err(e) => tracing::debug!("Screenshot of {} failed: {}", url, e),
    }
}

/// File stem for capture artifacts: timestamp plus a short URL hash
fn capture_stem(url: &str) -> String {
    let digest = hex::encode(Sha256::digest(url.as_bytes()));
    format!(
        "{}-{}",
        chrono::Utc::now().format("%Y%m%dT%H%M%S%3f"),
        &digest[..12]
    )
}

/// The proxy is fixed at launch; a fetch asking for another one cannot be honored
fn proxy_mismatch(launched: Option<&str>, requested: Option<&str>) -> Option<FetchError> {
    (launched != requested).then(|| {
        FetchError::new(
            FetchErrorKind::Unsupported,
            format!(
                "browser was launched with proxy {:?}; per-call proxy {:?} is not supported",
                launched, requested
            ),
            false,
        )
    })
}

fn browser_error(message: String) -> FetchError {
    FetchError::new(FetchErrorKind::Browser, message, true)
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_missing_executable_is_unavailable() {
        let mut settings = EngineSettings::default();
        settings.browser.executable = Some("/nonexistent/chromium-for-tests".to_string());

        let err = BrowserEngine::launch(&settings).await.err().unwrap();
        assert!(matches!(err, EngineError::BrowserUnavailable { .. }));
        assert!(err.to_string().contains("engine.browser.executable"));
    }

    fn rendered(status: u16) -> Rendered {
        Rendered {
            final_url: "https://example.com/".to_string(),
            html: "<html><body>ok</body></html>".to_string(),
            document: DocumentResponse {
                status: Some(status),
                ..DocumentResponse::default()
            },
        }
    }

    fn quick_retries(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            mode: crate::config::BackoffMode::None,
            ..RetryPolicy::default()
        }
    }

    fn assert_send<T: Send>(_: &T) {}

    #[test]
    fn test_fetch_futures_are_send() {
        let settings = EngineSettings::for_kind(crate::config::EngineKind::Browser);
        assert_send(&BrowserEngine::launch(&settings));
        assert_send(&check_browser(&settings));
    }

    #[test]
    fn test_launch_args_carry_proxy_and_tls() {
        let mut settings = EngineSettings::default();
        assert!(launch_args(&settings).is_empty());

        settings.proxy = Some("http://127.0.0.1:3128".to_string());
        settings.verify_tls = false;
        assert_eq!(
            launch_args(&settings),
            vec![
                "--proxy-server=http://127.0.0.1:3128".to_string(),
                "--ignore-certificate-errors".to_string(),
            ]
        );
    }

    #[test]
    fn test_per_call_proxy_must_match_launch() {
        let proxy = Some("http://127.0.0.1:3128");
        assert!(proxy_mismatch(None, None).is_none());
        assert!(proxy_mismatch(proxy, proxy).is_none());

        let err = proxy_mismatch(None, proxy).unwrap();
        assert_eq!(err.kind, FetchErrorKind::Unsupported);
        assert!(!err.retryable);
        assert!(proxy_mismatch(proxy, None).is_some());
    }

    #[tokio::test]
    async fn test_listener_guard_aborts_task_on_drop() {
        let (tx, rx) = oneshot::channel::<()>();
        let guard = ListenerGuard(tokio::spawn(async move {
            let _tx = tx;
            std::future::pending::<()>().await;
        }));
        drop(guard);

        // The sender is dropped with the aborted task
        let closed = tokio::time::timeout(Duration::from_secs(2), rx).await;
        assert!(matches!(closed, Ok(Err(_))));
    }

    #[tokio::test]
    async fn test_attempts_retry_status_and_errors_into_one_trace() {
        let mut script = vec![
            Ok(rendered(200)),
            Err(browser_error("navigation failed: reset".to_string())),
            Ok(rendered(503)),
        ];
        let limiter = RateLimiter::unlimited();

        let attempts = run_attempts(&quick_retries(3), &limiter, "https://example.com/", || {
            let next = script.pop();
            async move { next.unwrap_or_else(|| Ok(rendered(200))) }
        })
        .await;

        assert_eq!(attempts.outcome.as_ref().ok().and_then(|r| r.document.status), Some(200));
        assert!(!attempts.retryable);
        let trace = &attempts.trace;
        assert_eq!(trace.len(), 3);
        assert_eq!(trace[0].status, Some(503));
        assert!(trace[0].retried);
        assert_eq!(trace[1].error, Some(FetchErrorKind::Browser));
        assert!(trace[1].retried);
        assert_eq!(trace[2].status, Some(200));
        assert!(!trace[2].retried);
        assert!(trace.iter().all(|t| t.engine == ENGINE_NAME));
    }

    #[tokio::test]
    async fn test_attempts_stop_on_terminal_error_and_exhaustion() {
        let limiter = RateLimiter::unlimited();

        let closed = run_attempts(&quick_retries(3), &limiter, "https://example.com/", || async {
            Err::<Rendered, _>(FetchError::new(FetchErrorKind::Closed, "closed", false))
        })
        .await;
        assert_eq!(closed.trace.len(), 1);
        assert!(closed.outcome.is_err());

        let exhausted = run_attempts(&quick_retries(2), &limiter, "https://example.com/", || async {
            Ok(rendered(503))
        })
        .await;
        assert_eq!(exhausted.trace.len(), 3);
        assert!(exhausted.retryable);
        assert!(!exhausted.trace[2].retried);
    }

    #[test]
    fn test_capture_stem_is_filesystem_safe() {
        let stem = capture_stem("https://example.com/a?b=c#d");
        assert!(stem
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-'));
    }
}
