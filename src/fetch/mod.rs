//! Fetch engines and the resilience primitives they share
//!
//! Every engine implements [`Engine`] and reports each outcome, failures
//! included, as a [`FetchResult`] carrying a per-attempt trace:
//!
//! - [`HttpEngine`]: pooled reqwest clients with manual redirects
//! - [`BrowserEngine`]: a long-lived Chromium process, one page per fetch
//! - [`HybridEngine`]: HTTP first, browser on failure, block or thin content
//! - [`BlockingEngine`]: a synchronous facade over any of the above
//!
//! Engines pace themselves with a [`RateLimiter`] and retry according to a
//! [`RetryPolicy`].

pub mod actions;
pub mod block;
pub mod blocking;
pub mod browser;
pub mod factory;
pub mod http;
pub mod hybrid;
pub mod rate_limit;
pub mod result;
pub mod retry;
pub mod traits;

pub use actions::BrowserAction;
pub use block::{classify_block, BlockSignal};
pub use blocking::BlockingEngine;
pub use browser::{check_browser, BrowserEngine};
pub use factory::{build_engine, DefaultEngineFactory, EngineFactory};
pub use http::HttpEngine;
pub use hybrid::{EngineLauncher, HybridEngine};
pub use rate_limit::RateLimiter;
pub use result::{AttemptTrace, EngineContext, FetchError, FetchErrorKind, FetchResult};
pub use retry::RetryPolicy;
pub use traits::{Engine, EngineError};
