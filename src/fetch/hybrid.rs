//! HTTP-first engine that escalates to a browser when needed

use crate::config::HybridSettings;
use crate::fetch::actions::BrowserAction;
use crate::fetch::result::{AttemptTrace, EngineContext, FetchError, FetchErrorKind, FetchResult};
use crate::fetch::traits::{Engine, EngineError};
use async_trait::async_trait;
use futures::future::BoxFuture;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::OnceCell;

const ENGINE_NAME: &str = "hybrid";

/// Lazily builds the browser engine on first escalation
pub type EngineLauncher =
    Box<dyn Fn() -> BoxFuture<'static, Result<Arc<dyn Engine>, EngineError>> + Send + Sync>;

/// Why an HTTP result was handed to the browser
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Escalation {
    Failed,
    Blocked,
    ThinContent,
}

pub struct HybridEngine {
    http: Arc<dyn Engine>,
    /// Outcome of the single launch; a failure is kept so it is never retried
    browser: OnceCell<Result<Arc<dyn Engine>, String>>,
    launcher: EngineLauncher,
    settings: HybridSettings,
    escalations: AtomicU64,
    closed: AtomicBool,
}

impl HybridEngine {
    pub fn new(http: Arc<dyn Engine>, launcher: EngineLauncher, settings: HybridSettings) -> Self {
        Self {
            http,
            browser: OnceCell::new(),
            launcher,
            settings,
            escalations: AtomicU64::new(0),
            closed: AtomicBool::new(false),
        }
    }

    /// Number of fetches that went to the browser
    pub fn escalations(&self) -> u64 {
        self.escalations.load(Ordering::Relaxed)
    }

    pub fn browser_started(&self) -> bool {
        matches!(self.browser.get(), Some(Ok(_)))
    }

    /// Decides whether an HTTP result needs the browser
    pub fn escalation_for(&self, result: &FetchResult) -> Option<Escalation> {
        if !result.ok {
            return self.settings.escalate_on_error.then_some(Escalation::Failed);
        }
        if result.block.is_some() && self.settings.escalate_on_block {
            return Some(Escalation::Blocked);
        }
        if result.text.len() < self.settings.min_text_len {
            return Some(Escalation::ThinContent);
        }
        None
    }

    /// Returns the browser, launching it once; a failed launch is not retried
    async fn browser(&self) -> Result<Arc<dyn Engine>, String> {
        self.browser
            .get_or_init(|| async {
                tracing::info!("Launching browser for hybrid escalation");
                (self.launcher)().await.map_err(|e| {
                    let message = e.to_string();
                    tracing::warn!("Browser escalation unavailable: {}", message);
                    message
                })
            })
            .await
            .clone()
    }
}

#[async_trait]
impl Engine for HybridEngine {
    fn name(&self) -> &str {
        ENGINE_NAME
    }

    async fn fetch(&self, url: &str, ctx: &EngineContext) -> FetchResult {
        if self.closed.load(Ordering::SeqCst) {
            return FetchResult::failure(
                url,
                ENGINE_NAME,
                FetchError::new(FetchErrorKind::Closed, "engine is closed", false),
            );
        }

        let http_result = self.http.fetch(url, ctx).await;
        let Some(reason) = self.escalation_for(&http_result) else {
            return http_result;
        };

        tracing::warn!("Escalating {} to browser ({:?})", url, reason);
        self.escalations.fetch_add(1, Ordering::Relaxed);

        let browser = match self.browser().await {
            Ok(browser) => browser,
            Err(message) => {
                let mut result = http_result;
                result.engine_trace.push(AttemptTrace {
                    attempt: 1,
                    engine: "browser".to_string(),
                    status: None,
                    error: Some(FetchErrorKind::BrowserUnavailable),
                    elapsed_ms: 0,
                    retried: false,
                    backoff_ms: 0,
                });
                if result.error.is_none() && !result.ok {
                    result.error = Some(FetchError::new(
                        FetchErrorKind::BrowserUnavailable,
                        message,
                        false,
                    ));
                }
                return result;
            }
        };

        let browser_result = browser.fetch(url, ctx).await;
        merge_traces(http_result, browser_result)
    }

    async fn fetch_rendered(
        &self,
        url: &str,
        ctx: &EngineContext,
        actions: &[BrowserAction],
        wait_for: Option<&str>,
    ) -> FetchResult {
        match self.browser().await {
            Ok(browser) => browser.fetch_rendered(url, ctx, actions, wait_for).await,
            Err(message) => FetchResult::failure(
                url,
                ENGINE_NAME,
                FetchError::new(FetchErrorKind::BrowserUnavailable, message, false),
            ),
        }
    }

    async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.http.close().await;
        if let Some(Ok(browser)) = self.browser.get() {
            browser.close().await;
        }
    }
}

/// Prepends the HTTP attempts to the browser result
fn merge_traces(http: FetchResult, mut browser: FetchResult) -> FetchResult {
    let mut trace = http.engine_trace;
    trace.append(&mut browser.engine_trace);
    browser.engine_trace = trace;
    browser.elapsed_ms = browser.elapsed_ms.saturating_add(http.elapsed_ms);
    browser
}
