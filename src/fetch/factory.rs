//! Builds the engine a source asks for

use crate::config::{EngineKind, EngineSettings, SourceConfig};
use crate::fetch::browser::BrowserEngine;
use crate::fetch::http::HttpEngine;
use crate::fetch::hybrid::{EngineLauncher, HybridEngine};
use crate::fetch::traits::{Engine, EngineError};
use async_trait::async_trait;
use std::sync::Arc;

/// Creates one engine per source
///
/// The orchestrator goes through this trait so tests can inject engines.
#[async_trait]
pub trait EngineFactory: Send + Sync {
    async fn build(&self, source: &SourceConfig) -> Result<Arc<dyn Engine>, EngineError>;
}

/// Factory backed by the real HTTP, browser and hybrid engines
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultEngineFactory;

#[async_trait]
impl EngineFactory for DefaultEngineFactory {
    async fn build(&self, source: &SourceConfig) -> Result<Arc<dyn Engine>, EngineError> {
        build_engine(&source.engine).await
    }
}

/// Builds an engine from settings
pub async fn build_engine(settings: &EngineSettings) -> Result<Arc<dyn Engine>, EngineError> {
    let kind = settings
        .engine_kind()
        .map_err(EngineError::InvalidConfig)?;

    tracing::debug!("Building {} engine", kind);

    match kind {
        EngineKind::Http => Ok(Arc::new(HttpEngine::from_settings(settings)?)),
        EngineKind::Browser => Ok(Arc::new(BrowserEngine::launch(settings).await?)),
        EngineKind::Hybrid => {
            let http: Arc<dyn Engine> = Arc::new(HttpEngine::from_settings(settings)?);
            Ok(Arc::new(HybridEngine::new(
                http,
                browser_launcher(settings.clone()),
                settings.hybrid.clone(),
            )))
        }
    }
}

fn browser_launcher(settings: EngineSettings) -> EngineLauncher {
    let settings = Arc::new(settings);
    Box::new(move || {
        let settings = Arc::clone(&settings);
        Box::pin(async move {
            let engine = BrowserEngine::launch(&settings).await?;
            Ok(Arc::new(engine) as Arc<dyn Engine>)
        })
    })
}
