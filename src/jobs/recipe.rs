use crate::config::SourceConfig;
use crate::extract::{DefaultItemExtractor, DiscoveryRule, Item, ItemExtractor, LinkExtractor};
use crate::fetch::{Engine, EngineContext};
use crate::filter::QualityFilter;
use crate::jobs::{ItemLoop, JobError, Phase, PhaseContext, PhaseResult, PhaseRunner};
use crate::output::{write_json, OutputResult};
use crate::pipeline::{expand_entrypoints, PipelineError};
use crate::state::StateManager;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use std::collections::HashSet;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use url::Url;

/// Metadata key holding the discovered detail URLs
pub const LINKS_KEY: &str = "links";

/// Metadata key holding the byte length of `items.jsonl` as of the saved state
pub const ITEMS_OFFSET_KEY: &str = "items_offset";

/// Knobs of the item loop used by the detail phase
#[derive(Debug, Clone, Copy)]
pub struct RecipeOptions {
    pub checkpoint_every: u64,
    /// Zero keeps one engine for the whole phase
    pub recycle_every: u64,
}

impl Default for RecipeOptions {
    fn default() -> Self {
        Self {
            checkpoint_every: 25,
            recycle_every: 0,
        }
    }
}

/// Builds the `discover -> detail -> summary` job for one source
///
/// Items are appended to `<out_dir>/items.jsonl` as they are scraped and the
/// final counters go to `<out_dir>/summary.json`.
pub fn source_recipe(
    source: SourceConfig,
    out_dir: impl Into<PathBuf>,
    options: RecipeOptions,
) -> Result<PhaseRunner, PipelineError> {
    let out_dir = out_dir.into();
    let rule = DiscoveryRule::compile(source.discovery.as_ref()).map_err(|message| {
        PipelineError::InvalidRule {
            source_id: source.id.clone(),
            message,
        }
    })?;

    Ok(PhaseRunner::new()
        .phase(DiscoverPhase {
            ctx: EngineContext::default(),
            source: source.clone(),
            rule,
        })
        .phase(DetailPhase {
            quality: QualityFilter::new(source.quality.clone()),
            items_path: out_dir.join("items.jsonl"),
            options,
        })
        .phase(SummaryPhase {
            source_id: source.id,
            out_dir,
        }))
}

fn stored_links(state: &StateManager) -> Vec<String> {
    state
        .metadata(LINKS_KEY)
        .and_then(Value::as_array)
        .map(|links| {
            links
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

/// Walks the listing pages and records detail links
///
/// The current page counter is the checkpoint. It only moves over an unbroken
/// run of successful pages, and any failed page fails the phase, so a rerun
/// starts again at the first page that has not been read.
pub struct DiscoverPhase {
    source: SourceConfig,
    rule: DiscoveryRule,
    ctx: EngineContext,
}

#[async_trait]
impl Phase for DiscoverPhase {
    fn name(&self) -> &str {
        "discover"
    }

    async fn run(&self, ctx: &mut PhaseContext) -> PhaseResult {
        let listing = expand_entrypoints(&self.source);
        if listing.is_empty() {
            return PhaseResult::failed(format!("source {} has no entrypoints", self.source.id));
        }

        let engine = match ctx.engine().await {
            Ok(engine) => engine,
            Err(e) => return PhaseResult::failed(e.to_string()),
        };

        let mut links = stored_links(&ctx.state);
        let mut seen: HashSet<String> = links.iter().cloned().collect();
        let start = usize::try_from(ctx.state.current_page()).unwrap_or(usize::MAX);
        let mut cursor = start;
        let mut walked = 0u64;
        let mut failed = 0u64;

        for (index, listing_url) in listing.iter().enumerate().skip(start) {
            walked += 1;
            let fetch = engine.fetch(listing_url, &self.ctx).await;

            if fetch.ok {
                let base = Url::parse(&fetch.final_url).or_else(|_| Url::parse(listing_url));
                if let Ok(base) = base {
                    for url in self.rule.extract_links(&fetch.text, &base) {
                        if seen.insert(url.clone()) {
                            links.push(url);
                        }
                    }
                }

                if index == cursor {
                    cursor = index + 1;
                }
                ctx.state.set_metadata(LINKS_KEY, Value::from(links.clone()));
                ctx.state.set_current_page(cursor as u64);
                if let Err(e) = ctx.state.save() {
                    return PhaseResult::failed(e.to_string());
                }
            } else {
                failed += 1;
                tracing::warn!(
                    "Listing {} failed: {}",
                    listing_url,
                    fetch
                        .error
                        .as_ref()
                        .map(ToString::to_string)
                        .unwrap_or_else(|| format!("status {:?}", fetch.status))
                );
            }
        }

        if failed > 0 {
            return PhaseResult::failed(format!(
                "{} of {} listing page(s) failed; resume restarts at page {}",
                failed,
                walked,
                cursor + 1
            ));
        }

        tracing::info!("Discovered {} link(s) for {}", links.len(), self.source.id);
        PhaseResult::ok()
            .with_count("listing_pages", walked)
            .with_count("links", links.len() as u64)
    }
}

/// Fetches every discovered link and appends accepted items
pub struct DetailPhase {
    quality: QualityFilter,
    items_path: PathBuf,
    options: RecipeOptions,
}

#[async_trait]
impl Phase for DetailPhase {
    fn name(&self) -> &str {
        "detail"
    }

    async fn run(&self, ctx: &mut PhaseContext) -> PhaseResult {
        let links = stored_links(&ctx.state);
        if let Some(parent) = self.items_path.parent() {
            if let Err(e) = std::fs::create_dir_all(parent) {
                return PhaseResult::failed(e.to_string());
            }
        }

        if let Err(e) = truncate_to_committed(&self.items_path, &ctx.state) {
            return PhaseResult::failed(e.to_string());
        }

        let quality = Arc::new(self.quality.clone());
        let saved = Arc::new(AtomicU64::new(0));
        let dropped = Arc::new(AtomicU64::new(0));
        let items_path = self.items_path.clone();

        let handle = |engine: Arc<dyn Engine>, url: String| {
            let quality = Arc::clone(&quality);
            let saved = Arc::clone(&saved);
            let dropped = Arc::clone(&dropped);
            let items_path = items_path.clone();
            async move {
                let fetch = engine.fetch(&url, &EngineContext::default()).await;
                if !fetch.ok {
                    return Err(fetch
                        .error
                        .map(|e| e.to_string())
                        .unwrap_or_else(|| format!("status {:?}", fetch.status)));
                }

                let page_url = Url::parse(&fetch.final_url)
                    .or_else(|_| Url::parse(&url))
                    .map_err(|e| e.to_string())?;
                let item = DefaultItemExtractor.extract_item(&fetch.text, &page_url);

                if quality.evaluate(&item, Some(&fetch.text)).keep {
                    append_item(&items_path, &item).map_err(|e| e.to_string())?;
                    saved.fetch_add(1, Ordering::Relaxed);
                } else {
                    dropped.fetch_add(1, Ordering::Relaxed);
                }
                Ok(())
            }
        };

        // Items on disk past this offset belong to URLs not yet saved as processed
        let track = |state: &mut StateManager| -> Result<(), JobError> {
            let len = file_len(&self.items_path)?;
            state.set_metadata(ITEMS_OFFSET_KEY, Value::from(len));
            Ok(())
        };

        let stats = ItemLoop::new(self.options.checkpoint_every)
            .recycle_every(self.options.recycle_every)
            .run_tracked(ctx, &links, handle, track)
            .await;

        match stats {
            Ok(stats) => PhaseResult::ok()
                .with_count("processed", stats.processed)
                .with_count("skipped", stats.skipped)
                .with_count("failed", stats.failed)
                .with_count("saved", saved.load(Ordering::Relaxed))
                .with_count("dropped", dropped.load(Ordering::Relaxed)),
            Err(e) => PhaseResult::failed(e.to_string()),
        }
    }
}

fn file_len(path: &Path) -> OutputResult<u64> {
    match std::fs::metadata(path) {
        Ok(meta) => Ok(meta.len()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(0),
        Err(e) => Err(e.into()),
    }
}

/// Drops items appended after the last saved state
///
/// Their URLs were never recorded as processed, so the resumed loop fetches
/// them again.
fn truncate_to_committed(path: &Path, state: &StateManager) -> OutputResult<()> {
    let committed = state
        .metadata(ITEMS_OFFSET_KEY)
        .and_then(Value::as_u64)
        .unwrap_or(0);

    let len = file_len(path)?;
    if len > committed {
        tracing::warn!(
            "Discarding {} uncommitted byte(s) from {}",
            len - committed,
            path.display()
        );
        std::fs::OpenOptions::new()
            .write(true)
            .open(path)?
            .set_len(committed)?;
    }
    Ok(())
}

fn append_item(path: &Path, item: &Item) -> OutputResult<()> {
    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)?;
    let line = serde_json::to_string(item)?;
    writeln!(file, "{}", line)?;
    Ok(())
}

#[derive(Debug, Serialize)]
struct JobSummary {
    job_id: String,
    source_id: String,
    links: usize,
    processed: usize,
    finished_at: DateTime<Utc>,
}

/// Writes `summary.json` next to the items file
pub struct SummaryPhase {
    source_id: String,
    out_dir: PathBuf,
}

#[async_trait]
impl Phase for SummaryPhase {
    fn name(&self) -> &str {
        "summary"
    }

    async fn run(&self, ctx: &mut PhaseContext) -> PhaseResult {
        let summary = JobSummary {
            job_id: ctx.state.job_id().to_string(),
            source_id: self.source_id.clone(),
            links: stored_links(&ctx.state).len(),
            processed: ctx.state.processed_count(),
            finished_at: Utc::now(),
        };

        let written = std::fs::create_dir_all(&self.out_dir)
            .map_err(Into::into)
            .and_then(|()| write_json(&self.out_dir.join("summary.json"), &summary));

        match written {
            Ok(()) => PhaseResult::ok().with_count("processed", summary.processed as u64),
            Err(e) => PhaseResult::failed(e.to_string()),
        }
    }
}
