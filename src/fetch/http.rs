//! Plain HTTP engine built on a pooled reqwest client
//!
//! This module handles all HTTP requests, including:
//! - Building and caching clients per proxy / TLS-verification pair
//! - Injecting per-request headers, cookies, user agent and timeout
//! - Manual redirect handling with loop detection
//! - Retry with backoff and rate limiting
//! - Error classification

use crate::config::EngineSettings;
use crate::fetch::block::classify_block;
use crate::fetch::rate_limit::RateLimiter;
use crate::fetch::result::{
    AttemptTrace, EngineContext, FetchError, FetchErrorKind, FetchResult,
};
use crate::fetch::retry::RetryPolicy;
use crate::fetch::traits::{Engine, EngineError};
use async_trait::async_trait;
use reqwest::header::{CONTENT_TYPE, COOKIE, LOCATION, USER_AGENT};
use reqwest::{redirect::Policy, Client, Proxy};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};
use url::Url;

const ENGINE_NAME: &str = "http";

/// Default user agent when neither settings nor context provide one
pub const DEFAULT_USER_AGENT: &str = concat!("harrow/", env!("CARGO_PKG_VERSION"));

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
const MAX_REDIRECTS: usize = 10;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct ClientKey {
    proxy: Option<String>,
    verify_tls: bool,
}

/// Response data of one successful round trip
struct RawResponse {
    final_url: String,
    status: u16,
    content_type: Option<String>,
    headers: BTreeMap<String, String>,
    text: String,
    redirect_chain: Vec<String>,
}

/// HTTP engine with connection pooling, retries and rate limiting
pub struct HttpEngine {
    defaults: EngineContext,
    retry: RetryPolicy,
    limiter: RateLimiter,
    clients: Mutex<HashMap<ClientKey, Client>>,
    closed: AtomicBool,
}

impl HttpEngine {
    pub fn new(defaults: EngineContext, retry: RetryPolicy, limiter: RateLimiter) -> Self {
        Self {
            defaults,
            retry,
            limiter,
            clients: Mutex::new(HashMap::new()),
            closed: AtomicBool::new(false),
        }
    }

    /// Builds an engine from a source's settings, validating the proxy eagerly
    pub fn from_settings(settings: &EngineSettings) -> Result<Self, EngineError> {
        let engine = Self::new(
            EngineContext::from_settings(settings),
            RetryPolicy::from_settings(settings),
            RateLimiter::from_settings(settings),
        );
        build_client(&ClientKey {
            proxy: settings.proxy.clone(),
            verify_tls: settings.verify_tls,
        })?;
        Ok(engine)
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    /// Gets (or builds and caches) the pooled client for a context
    fn client_for(&self, ctx: &EngineContext) -> Result<Client, FetchError> {
        let key = ClientKey {
            proxy: ctx.proxy.clone(),
            verify_tls: ctx.verify_tls.unwrap_or(true),
        };

        let mut clients = self
            .clients
            .lock()
            .map_err(|_| FetchError::new(FetchErrorKind::Request, "client pool poisoned", false))?;

        if let Some(client) = clients.get(&key) {
            return Ok(client.clone());
        }

        let client = build_client(&key)
            .map_err(|e| FetchError::new(FetchErrorKind::Request, e.to_string(), false))?;
        clients.insert(key, client.clone());
        Ok(client)
    }

    /// Performs one attempt, following redirects by hand
    async fn attempt(
        &self,
        client: &Client,
        url: &Url,
        ctx: &EngineContext,
    ) -> Result<RawResponse, FetchError> {
        let mut current = url.clone();
        let mut chain = Vec::new();
        let mut visited = HashSet::from([current.to_string()]);

        for _ in 0..=MAX_REDIRECTS {
            let mut request = client
                .get(current.clone())
                .timeout(ctx.timeout.unwrap_or(DEFAULT_TIMEOUT))
                .header(
                    USER_AGENT,
                    ctx.user_agent.as_deref().unwrap_or(DEFAULT_USER_AGENT),
                );
            for (name, value) in &ctx.headers {
                request = request.header(name.as_str(), value.as_str());
            }
            if let Some(cookie) = ctx.cookie_header() {
                request = request.header(COOKIE, cookie);
            }

            let response = request.send().await.map_err(classify_transport_error)?;
            let status = response.status();

            if status.is_redirection() {
                if let Some(location) = response
                    .headers()
                    .get(LOCATION)
                    .and_then(|v| v.to_str().ok())
                {
                    let next = current.join(location).map_err(|e| {
                        FetchError::new(
                            FetchErrorKind::Redirect,
                            format!("invalid redirect target '{}': {}", location, e),
                            false,
                        )
                    })?;
                    if !visited.insert(next.to_string()) {
                        return Err(FetchError::new(
                            FetchErrorKind::Redirect,
                            format!("redirect loop detected at {}", next),
                            false,
                        ));
                    }
                    tracing::trace!("Redirect {} -> {}", current, next);
                    chain.push(current.to_string());
                    current = next;
                    continue;
                }
            }

            let mut headers = BTreeMap::new();
            for (name, value) in response.headers() {
                let value = String::from_utf8_lossy(value.as_bytes()).to_string();
                headers
                    .entry(name.as_str().to_ascii_lowercase())
                    .and_modify(|existing: &mut String| {
                        existing.push_str(", ");
                        existing.push_str(&value);
                    })
                    .or_insert(value);
            }
            let content_type = response
                .headers()
                .get(CONTENT_TYPE)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string);

            // reqwest decodes using the declared charset, lossily
            let text = response.text().await.map_err(|e| {
                FetchError::new(FetchErrorKind::Body, format!("failed to read body: {}", e), true)
            })?;

            return Ok(RawResponse {
                final_url: current.to_string(),
                status: status.as_u16(),
                content_type,
                headers,
                text,
                redirect_chain: chain,
            });
        }

        Err(FetchError::new(
            FetchErrorKind::Redirect,
            format!("more than {} redirects from {}", MAX_REDIRECTS, url),
            false,
        ))
    }
}

#[async_trait]
impl Engine for HttpEngine {
    fn name(&self) -> &str {
        ENGINE_NAME
    }

    /// Fetches a URL with retry and backoff
    ///
    /// | Condition | Action |
    /// |-----------|--------|
    /// | 2xx | Return `ok=true` |
    /// | Status in retry set | Retry with backoff while attempts remain |
    /// | Other 4xx/5xx | Return `ok=false` with an `http` error |
    /// | Timeout / connect / DNS / TLS | Retry while attempts remain |
    /// | Redirect loop or > 10 hops | Return immediately |
    async fn fetch(&self, url: &str, ctx: &EngineContext) -> FetchResult {
        if self.closed.load(Ordering::SeqCst) {
            return FetchResult::failure(
                url,
                ENGINE_NAME,
                FetchError::new(FetchErrorKind::Closed, "engine is closed", false),
            );
        }

        let parsed = match Url::parse(url) {
            Ok(u) => u,
            Err(e) => {
                return FetchResult::failure(
                    url,
                    ENGINE_NAME,
                    FetchError::new(FetchErrorKind::Request, format!("invalid URL: {}", e), false),
                )
            }
        };

        let ctx = ctx.merged_over(&self.defaults);
        let client = match self.client_for(&ctx) {
            Ok(c) => c,
            Err(e) => return FetchResult::failure(url, ENGINE_NAME, e),
        };

        let started = Instant::now();
        let mut trace = Vec::new();
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;
            self.limiter.wait().await;

            let attempt_started = Instant::now();
            let outcome = self.attempt(&client, &parsed, &ctx).await;

            let retryable = match &outcome {
                Ok(raw) => self.retry.should_retry_status(raw.status),
                Err(e) => self.retry.should_retry_error(e),
            };
            let will_retry = retryable && self.retry.has_attempts_left(attempt);
            let backoff = if will_retry {
                self.retry.compute_backoff(attempt)
            } else {
                Duration::ZERO
            };

            trace.push(AttemptTrace {
                attempt,
                engine: ENGINE_NAME.to_string(),
                status: outcome.as_ref().ok().map(|r| r.status),
                error: outcome.as_ref().err().map(|e| e.kind),
                elapsed_ms: millis(attempt_started.elapsed()),
                retried: will_retry,
                backoff_ms: millis(backoff),
            });

            if will_retry {
                match &outcome {
                    Ok(raw) => tracing::warn!(
                        "HTTP {} from {} (attempt {}), retrying in {:?}",
                        raw.status,
                        url,
                        attempt,
                        backoff
                    ),
                    Err(e) => tracing::warn!(
                        "Fetch of {} failed (attempt {}): {}, retrying in {:?}",
                        url,
                        attempt,
                        e,
                        backoff
                    ),
                }
                tokio::time::sleep(backoff).await;
                continue;
            }

            let mut result = FetchResult::new(url, ENGINE_NAME);
            result.engine_trace = trace;
            result.elapsed_ms = millis(started.elapsed());

            match outcome {
                Ok(raw) => {
                    result.ok = FetchResult::is_success_status(raw.status);
                    result.block = classify_block(Some(raw.status), &raw.text, &raw.headers);
                    if !result.ok {
                        result.error = Some(FetchError::new(
                            FetchErrorKind::Http,
                            format!("HTTP {}", raw.status),
                            retryable,
                        ));
                    }
                    result.final_url = raw.final_url;
                    result.status = Some(raw.status);
                    result.content_type = raw.content_type;
                    result.headers = raw.headers;
                    result.text = raw.text;
                    result.redirect_chain = raw.redirect_chain;
                }
                Err(e) => {
                    tracing::debug!("Fetch of {} failed: {}", url, e);
                    result.error = Some(e);
                }
            }

            return result;
        }
    }

    async fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            if let Ok(mut clients) = self.clients.lock() {
                clients.clear();
            }
        }
    }
}

fn build_client(key: &ClientKey) -> Result<Client, reqwest::Error> {
    let mut builder = Client::builder()
        .connect_timeout(Duration::from_secs(10))
        .redirect(Policy::none()) // Handle redirects manually
        .danger_accept_invalid_certs(!key.verify_tls)
        .gzip(true)
        .brotli(true);

    if let Some(proxy) = &key.proxy {
        builder = builder.proxy(Proxy::all(proxy.as_str())?);
    }

    builder.build()
}

/// Maps a reqwest transport error to a typed fetch error
fn classify_transport_error(error: reqwest::Error) -> FetchError {
    let detail = error_chain(&error);
    let lower = detail.to_lowercase();

    if error.is_builder() {
        return FetchError::new(FetchErrorKind::Request, detail, false);
    }
    if error.is_timeout() {
        return FetchError::new(FetchErrorKind::Timeout, detail, true);
    }
    if lower.contains("dns") || lower.contains("resolve") || lower.contains("lookup") {
        return FetchError::new(FetchErrorKind::Dns, detail, true);
    }
    if lower.contains("certificate") || lower.contains("tls") || lower.contains("handshake") {
        return FetchError::new(FetchErrorKind::Tls, detail, true);
    }
    if error.is_connect() {
        return FetchError::new(FetchErrorKind::Connect, detail, true);
    }
    if error.is_body() || error.is_decode() {
        return FetchError::new(FetchErrorKind::Body, detail, true);
    }

    FetchError::new(FetchErrorKind::Connect, detail, true)
}

/// Joins an error with all of its sources
fn error_chain(error: &(dyn std::error::Error + 'static)) -> String {
    let mut message = error.to_string();
    let mut source = error.source();
    while let Some(inner) = source {
        message.push_str(": ");
        message.push_str(&inner.to_string());
        source = inner.source();
    }
    message
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
