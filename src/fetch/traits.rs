//! The engine capability shared by every fetch implementation

use crate::fetch::actions::BrowserAction;
use crate::fetch::result::{EngineContext, FetchError, FetchErrorKind, FetchResult};
use async_trait::async_trait;
use thiserror::Error;

/// Errors raised while building or tearing down an engine
///
/// Fetch failures are never reported through this type; they are data inside
/// a [`FetchResult`].
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("browser runtime unavailable: {message} (install Chrome/Chromium or set engine.browser.executable)")]
    BrowserUnavailable { message: String },

    #[error("browser error: {0}")]
    Browser(String),

    #[error("failed to build HTTP client: {0}")]
    Client(#[from] reqwest::Error),

    #[error("invalid engine configuration: {0}")]
    InvalidConfig(String),

    #[error("runtime error: {0}")]
    Runtime(String),
}

/// Fetches URLs and reports every outcome as a [`FetchResult`]
///
/// Implementations must be safe to share between concurrent fetches.
#[async_trait]
pub trait Engine: Send + Sync {
    /// Short engine name recorded in traces
    fn name(&self) -> &str;

    /// Fetches `url` with per-call overrides from `ctx`
    async fn fetch(&self, url: &str, ctx: &EngineContext) -> FetchResult;

    /// Fetches `url` in a rendering engine, running `actions` after load
    ///
    /// Engines without rendering support return an `unsupported` failure.
    async fn fetch_rendered(
        &self,
        url: &str,
        _ctx: &EngineContext,
        _actions: &[BrowserAction],
        _wait_for: Option<&str>,
    ) -> FetchResult {
        FetchResult::failure(
            url,
            self.name(),
            FetchError::new(
                FetchErrorKind::Unsupported,
                format!("{} engine cannot render pages", self.name()),
                false,
            ),
        )
    }

    /// Releases engine resources; calling it more than once is harmless
    async fn close(&self);
}
