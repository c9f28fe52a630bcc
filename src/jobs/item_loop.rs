use crate::fetch::Engine;
use crate::jobs::{JobError, PhaseContext};
use crate::state::StateManager;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;

/// Counters of one item loop pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemLoopStats {
    pub processed: u64,
    pub skipped: u64,
    pub failed: u64,
    pub checkpoints: u64,
    pub recycles: u64,
}

/// Processes a list of URLs with periodic checkpoints and engine recycling
///
/// URLs already recorded as processed are skipped, so a resumed loop picks
/// up after the last checkpoint. Failed URLs are not marked processed.
#[derive(Debug, Clone, Copy)]
pub struct ItemLoop {
    checkpoint_every: u64,
    recycle_every: Option<u64>,
}

impl ItemLoop {
    /// `checkpoint_every` of zero is treated as one
    pub fn new(checkpoint_every: u64) -> Self {
        Self {
            checkpoint_every: checkpoint_every.max(1),
            recycle_every: None,
        }
    }

    pub fn recycle_every(mut self, items: u64) -> Self {
        self.recycle_every = (items > 0).then_some(items);
        self
    }

    pub async fn run<F, Fut>(
        &self,
        ctx: &mut PhaseContext,
        urls: &[String],
        handle: F,
    ) -> Result<ItemLoopStats, JobError>
    where
        F: FnMut(Arc<dyn Engine>, String) -> Fut + Send,
        Fut: Future<Output = Result<(), String>> + Send,
    {
        self.run_tracked(ctx, urls, handle, |_| Ok(())).await
    }

    /// Like [`run`](Self::run), calling `track` after every handled item
    ///
    /// `track` records the item's side effects in state, so any later save
    /// (a checkpoint or a failure) persists them together with the processed
    /// set.
    pub async fn run_tracked<F, Fut, T>(
        &self,
        ctx: &mut PhaseContext,
        urls: &[String],
        mut handle: F,
        mut track: T,
    ) -> Result<ItemLoopStats, JobError>
    where
        F: FnMut(Arc<dyn Engine>, String) -> Fut + Send,
        Fut: Future<Output = Result<(), String>> + Send,
        T: FnMut(&mut StateManager) -> Result<(), JobError> + Send,
    {
        let mut stats = ItemLoopStats::default();
        let mut since_checkpoint = 0u64;
        let mut since_recycle = 0u64;

        for url in urls {
            if ctx.state.is_processed(url) {
                stats.skipped += 1;
                continue;
            }

            let engine = ctx.engine().await?;
            match handle(engine, url.clone()).await {
                Ok(()) => {
                    ctx.state.mark_processed(url.clone());
                    stats.processed += 1;
                }
                Err(e) => {
                    tracing::warn!("Item {} failed: {}", url, e);
                    stats.failed += 1;
                }
            }
            track(&mut ctx.state)?;

            since_checkpoint += 1;
            if since_checkpoint >= self.checkpoint_every {
                ctx.state.save()?;
                stats.checkpoints += 1;
                since_checkpoint = 0;
            }

            since_recycle += 1;
            if self.recycle_every.is_some_and(|every| since_recycle >= every) {
                ctx.engine.recycle().await;
                stats.recycles += 1;
                since_recycle = 0;
            }
        }

        if since_checkpoint > 0 {
            ctx.state.save()?;
            stats.checkpoints += 1;
        }

        Ok(stats)
    }
}
