//! Blocking facade over an async engine
//!
//! `BlockingEngine` owns a dedicated multi-threaded runtime. Engine
//! background tasks (such as a browser's event handler) live on that runtime
//! and keep running between calls. When called from code that is already
//! inside a tokio runtime, the work is moved to a scoped worker thread
//! instead of nesting `block_on`.

use crate::fetch::actions::BrowserAction;
use crate::fetch::result::{EngineContext, FetchError, FetchErrorKind, FetchResult};
use crate::fetch::traits::{Engine, EngineError};
use std::future::Future;
use std::sync::Arc;
use tokio::runtime::{Builder, Handle, Runtime};

const WORKER_THREADS: usize = 2;

pub struct BlockingEngine {
    engine: Arc<dyn Engine>,
    runtime: Option<Runtime>,
}

impl BlockingEngine {
    /// Builds the engine on the facade's own runtime
    pub fn launch<F, Fut>(build: F) -> Result<Self, EngineError>
    where
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = Result<Arc<dyn Engine>, EngineError>> + Send,
    {
        let runtime = Builder::new_multi_thread()
            .worker_threads(WORKER_THREADS)
            .thread_name("harrow-blocking")
            .enable_all()
            .build()
            .map_err(|e| EngineError::Runtime(e.to_string()))?;

        let engine = run_on(&runtime, build())??;
        Ok(Self {
            engine,
            runtime: Some(runtime),
        })
    }

    /// Wraps an engine that does not need its own background tasks
    pub fn wrap(engine: Arc<dyn Engine>) -> Result<Self, EngineError> {
        Self::launch(move || async move { Ok(engine) })
    }

    pub fn engine(&self) -> &Arc<dyn Engine> {
        &self.engine
    }

    pub fn fetch_blocking(&self, url: &str, ctx: &EngineContext) -> FetchResult {
        let engine = Arc::clone(&self.engine);
        self.block_on(async move { engine.fetch(url, ctx).await })
            .unwrap_or_else(|e| closed_result(url, self.engine.name(), e))
    }

    pub fn fetch_rendered_blocking(
        &self,
        url: &str,
        ctx: &EngineContext,
        actions: &[BrowserAction],
        wait_for: Option<&str>,
    ) -> FetchResult {
        let engine = Arc::clone(&self.engine);
        self.block_on(async move { engine.fetch_rendered(url, ctx, actions, wait_for).await })
            .unwrap_or_else(|e| closed_result(url, self.engine.name(), e))
    }

    pub fn close_blocking(&self) {
        let engine = Arc::clone(&self.engine);
        if let Err(e) = self.block_on(async move { engine.close().await }) {
            tracing::debug!("Blocking close skipped: {}", e);
        }
    }

    fn block_on<F>(&self, future: F) -> Result<F::Output, EngineError>
    where
        F: Future + Send,
        F::Output: Send,
    {
        let runtime = self
            .runtime
            .as_ref()
            .ok_or_else(|| EngineError::Runtime("runtime already shut down".to_string()))?;
        run_on(runtime, future)
    }
}

fn run_on<F>(runtime: &Runtime, future: F) -> Result<F::Output, EngineError>
where
    F: Future + Send,
    F::Output: Send,
{
    if Handle::try_current().is_err() {
        return Ok(runtime.block_on(future));
    }

    // Nested block_on panics, so drive the future from a scoped thread
    std::thread::scope(|scope| match scope.spawn(|| runtime.block_on(future)).join() {
        Ok(output) => Ok(output),
        Err(panic) => std::panic::resume_unwind(panic),
    })
}

fn closed_result(url: &str, engine: &str, error: EngineError) -> FetchResult {
    FetchResult::failure(
        url,
        engine,
        FetchError::new(FetchErrorKind::Closed, error.to_string(), false),
    )
}

impl Drop for BlockingEngine {
    fn drop(&mut self) {
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_background();
        }
    }
}
