use crate::config::SourceConfig;
use crate::extract::{DefaultItemExtractor, DiscoveryRule, Item, ItemExtractor, LinkExtractor};
use crate::fetch::{Engine, EngineContext, FetchResult};
use crate::filter::{url_fingerprint, DedupeStore, QualityFilter, Seen};
use crate::pipeline::paging::expand_entrypoints;
use crate::pipeline::stats::{PipelineCounters, PipelineStats};
use crate::pipeline::PipelineError;
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::Instant;
use url::Url;

/// Field added to dropped items listing their quality issues
pub const ISSUES_FIELD: &str = "_quality_issues";

/// One link discovered on a listing page
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinkRecord {
    pub url: String,
    pub listing_url: String,
    pub fingerprint: String,
    /// False when the fingerprint had already been seen this run
    pub new: bool,
}

/// Everything one pipeline run produced
#[derive(Debug, Clone, Default)]
pub struct PipelineOutput {
    pub raw_listing: Vec<FetchResult>,
    pub raw_detail: Vec<FetchResult>,
    pub links: Vec<LinkRecord>,
    pub items: Vec<Item>,
    pub valid: Vec<Item>,
    pub dropped: Vec<Item>,
    pub stats: PipelineStats,
    pub discovery: String,
}

/// Result of one detail fetch
struct Detail {
    fetch: FetchResult,
    item: Option<Item>,
    kept: bool,
}

/// Runs one source end to end
pub struct PipelineStage {
    source: SourceConfig,
    engine: Arc<dyn Engine>,
    dedupe: Arc<DedupeStore>,
    links: Arc<dyn LinkExtractor>,
    items: Arc<dyn ItemExtractor>,
    quality: QualityFilter,
    discovery: String,
    ctx: EngineContext,
}

impl PipelineStage {
    /// Creates a stage using the source's discovery rule and the default
    /// item extractor
    pub fn new(
        source: SourceConfig,
        engine: Arc<dyn Engine>,
        dedupe: Arc<DedupeStore>,
    ) -> Result<Self, PipelineError> {
        let rule = DiscoveryRule::compile(source.discovery.as_ref()).map_err(|message| {
            PipelineError::InvalidRule {
                source_id: source.id.clone(),
                message,
            }
        })?;

        Ok(Self {
            quality: QualityFilter::new(source.quality.clone()),
            discovery: rule.describe(),
            links: Arc::new(rule),
            items: Arc::new(DefaultItemExtractor),
            source,
            engine,
            dedupe,
            ctx: EngineContext::default(),
        })
    }

    pub fn with_link_extractor(mut self, extractor: Arc<dyn LinkExtractor>) -> Self {
        self.links = extractor;
        self.discovery = "custom".to_string();
        self
    }

    pub fn with_item_extractor(mut self, extractor: Arc<dyn ItemExtractor>) -> Self {
        self.items = extractor;
        self
    }

    /// Per-call engine overrides applied to every fetch
    pub fn with_context(mut self, ctx: EngineContext) -> Self {
        self.ctx = ctx;
        self
    }

    pub fn source(&self) -> &SourceConfig {
        &self.source
    }

    /// Runs the pipeline
    pub async fn run(&self) -> Result<PipelineOutput, PipelineError> {
        let started = Instant::now();
        let counters = PipelineCounters::default();
        let source_id = self.source.id.as_str();

        let listing_urls = expand_entrypoints(&self.source);
        if listing_urls.is_empty() {
            return Err(PipelineError::NoEntrypoints(source_id.to_string()));
        }

        tracing::info!(
            "Source {}: {} listing page(s), discovery {}",
            source_id,
            listing_urls.len(),
            self.discovery
        );

        let mut output = PipelineOutput {
            discovery: self.discovery.clone(),
            ..PipelineOutput::default()
        };
        let mut detail_urls = Vec::new();
        let mut last_error = None;
        let cap = self.source.max_detail_pages;

        for listing_url in &listing_urls {
            PipelineCounters::incr(&counters.listing_attempted);
            let fetch = self.engine.fetch(listing_url, &self.ctx).await;

            if let Some(signal) = fetch.block {
                counters.record_block(signal);
            }

            if !fetch.ok {
                let message = describe_failure(listing_url, &fetch);
                tracing::warn!("Source {}: listing {}", source_id, message);
                counters.record_error(format!("listing {}", message));
                last_error = Some(message);
                output.raw_listing.push(fetch);
                continue;
            }
            PipelineCounters::incr(&counters.listing_succeeded);

            let base = Url::parse(&fetch.final_url).or_else(|_| Url::parse(listing_url));
            let found = match base {
                Ok(base) => self.links.extract_links(&fetch.text, &base),
                Err(_) => Vec::new(),
            };
            PipelineCounters::add(&counters.links_found, found.len() as u64);
            tracing::debug!("Listing {} yielded {} link(s)", listing_url, found.len());

            for url in found {
                let fingerprint = url_fingerprint(&url);
                // Links past the cap are not marked so a later source may still fetch them
                let capped = cap.is_some_and(|cap| detail_urls.len() >= cap);
                let new = if capped {
                    !self.dedupe.contains(&fingerprint)
                } else {
                    self.dedupe.check_and_mark(&fingerprint) == Seen::New
                };
                if new {
                    PipelineCounters::incr(&counters.links_new);
                    if capped {
                        PipelineCounters::incr(&counters.links_skipped);
                    } else {
                        detail_urls.push(url.clone());
                    }
                } else {
                    PipelineCounters::incr(&counters.links_duplicate);
                }
                output.links.push(LinkRecord {
                    url,
                    listing_url: listing_url.clone(),
                    fingerprint,
                    new,
                });
            }

            output.raw_listing.push(fetch);
        }

        if counters.listing_succeeded.load(std::sync::atomic::Ordering::Relaxed) == 0 {
            output.stats = counters.snapshot(elapsed_ms(started));
            return Err(PipelineError::AllListingsFailed {
                source_id: source_id.to_string(),
                attempted: listing_urls.len() as u64,
                last_error,
                output: Box::new(output),
            });
        }

        let parallelism = self.source.parallelism.max(1);
        tracing::info!(
            "Source {}: fetching {} detail page(s), parallelism {}",
            source_id,
            detail_urls.len(),
            parallelism
        );

        let details: Vec<Detail> = stream::iter(detail_urls)
            .map(|url| self.fetch_detail(url, &counters))
            .buffer_unordered(parallelism)
            .collect()
            .await;

        for detail in details {
            if let Some(item) = detail.item {
                if detail.kept {
                    output.valid.push(item.clone());
                } else {
                    output.dropped.push(item.clone());
                }
                output.items.push(item);
            }
            output.raw_detail.push(detail.fetch);
        }

        output.stats = counters.snapshot(elapsed_ms(started));
        tracing::info!(
            "Source {}: {} item(s), {} valid, {} dropped",
            source_id,
            output.stats.items_parsed,
            output.stats.items_valid,
            output.stats.items_dropped
        );

        Ok(output)
    }

    async fn fetch_detail(&self, url: String, counters: &PipelineCounters) -> Detail {
        PipelineCounters::incr(&counters.detail_attempted);
        let fetch = self.engine.fetch(&url, &self.ctx).await;

        if let Some(signal) = fetch.block {
            counters.record_block(signal);
        }

        if !fetch.ok {
            let message = describe_failure(&url, &fetch);
            tracing::debug!("Detail {}", message);
            counters.record_error(format!("detail {}", message));
            return Detail {
                fetch,
                item: None,
                kept: false,
            };
        }
        PipelineCounters::incr(&counters.detail_succeeded);

        let page_url = Url::parse(&fetch.final_url).or_else(|_| Url::parse(&url));
        let Ok(page_url) = page_url else {
            counters.record_error(format!("detail {}: unparseable final URL", url));
            return Detail {
                fetch,
                item: None,
                kept: false,
            };
        };

        let mut item = self.items.extract_item(&fetch.text, &page_url);
        PipelineCounters::incr(&counters.items_parsed);

        let verdict = self.quality.evaluate(&item, Some(&fetch.text));
        if verdict.keep {
            PipelineCounters::incr(&counters.items_valid);
        } else {
            PipelineCounters::incr(&counters.items_dropped);
            tracing::debug!("Dropped {}: {} issue(s)", url, verdict.issues.len());
            item.insert(
                ISSUES_FIELD.to_string(),
                serde_json::to_value(&verdict.issues).unwrap_or(Value::Null),
            );
        }

        Detail {
            fetch,
            item: Some(item),
            kept: verdict.keep,
        }
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}

fn describe_failure(url: &str, fetch: &FetchResult) -> String {
    match &fetch.error {
        Some(error) => format!("{} failed: {}", url, error),
        None => format!("{} failed with status {:?}", url, fetch.status),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DiscoveryConfig;
    use crate::fetch::{FetchError, FetchErrorKind};
    use async_trait::async_trait;
    use std::collections::HashMap;

    /// Serves canned pages keyed by URL
    struct MapEngine {
        pages: HashMap<String, String>,
    }

    #[async_trait]
    impl Engine for MapEngine {
        fn name(&self) -> &str {
            "map"
        }

        async fn fetch(&self, url: &str, _ctx: &EngineContext) -> FetchResult {
            match self.pages.get(url) {
                Some(body) => {
                    let mut result = FetchResult::new(url, "map");
                    result.ok = true;
                    result.status = Some(200);
                    result.text = body.clone();
                    result
                }
                None => FetchResult::failure(
                    url,
                    "map",
                    FetchError::new(FetchErrorKind::Http, "HTTP 404", false),
                ),
            }
        }

        async fn close(&self) {}
    }

    fn detail(title: &str) -> String {
        format!(
            "<html><body><h1>{}</h1><p>{}</p></body></html>",
            title,
            "A detailed description of this product. ".repeat(5)
        )
    }

    fn engine(pages: &[(&str, String)]) -> Arc<dyn Engine> {
        Arc::new(MapEngine {
            pages: pages
                .iter()
                .map(|(k, v)| (k.to_string(), v.clone()))
                .collect(),
        })
    }

    fn source(max: Option<usize>) -> SourceConfig {
        let mut source = SourceConfig::new("shop", vec!["https://shop.test/list".to_string()]);
        source.discovery = Some(DiscoveryConfig::regex(r"/item/\d+"));
        source.max_detail_pages = max;
        source
    }

    const LISTING: &str = r#"<html><body>
        <a href="/item/1">One</a><a href="/item/2">Two</a><a href="/item/2">Two again</a>
        <a href="/item/3">Three</a><a href="/about">About</a></body></html>"#;

    #[tokio::test]
    async fn test_run_collects_items() {
        let engine = engine(&[
            ("https://shop.test/list", LISTING.to_string()),
            ("https://shop.test/item/1", detail("One")),
            ("https://shop.test/item/2", detail("Two")),
        ]);
        let stage = PipelineStage::new(source(None), engine, Arc::new(DedupeStore::new())).unwrap();
        let output = stage.run().await.unwrap();

        assert_eq!(output.stats.links_found, 3);
        assert_eq!(output.stats.detail_pages_attempted, 3);
        assert_eq!(output.stats.detail_pages_succeeded, 2);
        assert_eq!(output.stats.items_valid, 2);
        assert_eq!(output.valid.len(), 2);
        assert_eq!(output.raw_detail.len(), 3);
        assert_eq!(output.stats.errors.len(), 1);
    }

    #[tokio::test]
    async fn test_detail_cap_and_shared_dedupe() {
        let engine = engine(&[("https://shop.test/list", LISTING.to_string())]);
        let dedupe = Arc::new(DedupeStore::new());
        dedupe.check_and_mark(&url_fingerprint("https://shop.test/item/1"));

        let stage = PipelineStage::new(source(Some(1)), engine, dedupe).unwrap();
        let output = stage.run().await.unwrap();

        assert_eq!(output.stats.links_duplicate, 1);
        assert_eq!(output.stats.links_new, 2);
        assert_eq!(output.stats.links_skipped, 1);
        assert_eq!(output.stats.detail_pages_attempted, 1);
        assert!(output.links.iter().any(|l| !l.new));
    }

    #[tokio::test]
    async fn test_capped_links_stay_available_to_later_sources() {
        let dedupe = Arc::new(DedupeStore::new());

        let first = engine(&[("https://shop.test/list", LISTING.to_string())]);
        let stage = PipelineStage::new(source(Some(1)), first, Arc::clone(&dedupe)).unwrap();
        let output = stage.run().await.unwrap();
        assert_eq!(output.stats.detail_pages_attempted, 1);
        assert!(dedupe.contains(&url_fingerprint("https://shop.test/item/1")));
        assert!(!dedupe.contains(&url_fingerprint("https://shop.test/item/3")));

        let second = engine(&[("https://shop.test/list", LISTING.to_string())]);
        let stage = PipelineStage::new(source(None), second, Arc::clone(&dedupe)).unwrap();
        let output = stage.run().await.unwrap();
        assert_eq!(output.stats.links_duplicate, 1);
        assert_eq!(output.stats.detail_pages_attempted, 2);
    }

    #[tokio::test]
    async fn test_all_listings_failed() {
        let stage = PipelineStage::new(source(None), engine(&[]), Arc::new(DedupeStore::new()))
            .unwrap();
        let err = stage.run().await.unwrap_err();
        assert!(matches!(err, PipelineError::AllListingsFailed { attempted: 1, .. }));

        let partial = err.into_partial_output().unwrap();
        assert_eq!(partial.raw_listing.len(), 1);
        assert_eq!(partial.stats.listing_pages_attempted, 1);
        assert_eq!(partial.stats.errors.len(), 1);
        assert!(partial.links.is_empty());
    }

    #[test]
    fn test_invalid_rule_rejected() {
        let mut source = source(None);
        source.discovery = Some(DiscoveryConfig::regex("(unclosed"));
        let result = PipelineStage::new(source, engine(&[]), Arc::new(DedupeStore::new()));
        assert!(matches!(result, Err(PipelineError::InvalidRule { .. })));
    }

    #[tokio::test]
    async fn test_dropped_items_carry_issues() {
        let mut source = source(None);
        source.quality.min_text_len = 10_000;
        let engine = engine(&[
            ("https://shop.test/list", LISTING.to_string()),
            ("https://shop.test/item/1", detail("One")),
        ]);
        let stage = PipelineStage::new(source, engine, Arc::new(DedupeStore::new())).unwrap();
        let output = stage.run().await.unwrap();

        assert_eq!(output.stats.items_dropped, 1);
        assert!(output.dropped[0].contains_key(ISSUES_FIELD));
    }
}
