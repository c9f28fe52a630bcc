use crate::config::EngineSettings;
use crate::fetch::{build_engine, Engine, EngineError, EngineLauncher};
use std::sync::Arc;

/// Holds the engine of a job and replaces it on demand
///
/// Long jobs recycle their engine periodically so that a browser process
/// does not accumulate state or leak memory over thousands of pages.
pub struct EngineSlot {
    launcher: EngineLauncher,
    current: Option<Arc<dyn Engine>>,
    launches: u64,
}

impl EngineSlot {
    pub fn new(launcher: EngineLauncher) -> Self {
        Self {
            launcher,
            current: None,
            launches: 0,
        }
    }

    /// A slot building engines from settings
    pub fn from_settings(settings: EngineSettings) -> Self {
        let settings = Arc::new(settings);
        Self::new(Box::new(move || {
            let settings = Arc::clone(&settings);
            Box::pin(async move { build_engine(&settings).await })
        }))
    }

    /// Returns the live engine, building one if the slot is empty
    pub async fn get(&mut self) -> Result<Arc<dyn Engine>, EngineError> {
        if let Some(engine) = &self.current {
            return Ok(Arc::clone(engine));
        }
        let engine = (self.launcher)().await?;
        self.launches += 1;
        tracing::debug!("Engine slot launched {} (#{})", engine.name(), self.launches);
        self.current = Some(Arc::clone(&engine));
        Ok(engine)
    }

    /// Closes the live engine; the next `get` builds a fresh one
    pub async fn recycle(&mut self) {
        if let Some(engine) = self.current.take() {
            tracing::debug!("Recycling {} engine", engine.name());
            engine.close().await;
        }
    }

    pub async fn close(&mut self) {
        self.recycle().await;
    }

    /// Number of engines built so far
    pub fn launches(&self) -> u64 {
        self.launches
    }

    pub fn is_live(&self) -> bool {
        self.current.is_some()
    }
}
