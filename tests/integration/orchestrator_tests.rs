//! Integration tests for the run orchestrator
//!
//! These tests run multi-source configurations against wiremock servers and
//! check failure isolation, shared deduplication and the artifact layout.

use async_trait::async_trait;
use harrow::config::{
    BackoffMode, DedupeScope, DiscoveryConfig, EngineKind, EngineSettings, RunConfig, RunSettings,
    SourceConfig, StorageFormat,
};
use harrow::fetch::{Engine, EngineError, EngineFactory, HttpEngine};
use harrow::Orchestrator;
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const LISTING: &str = r#"<html><body>
    <a href="/item/1">One</a>
    <a href="/item/2">Two</a>
    <a href="/blog">Blog</a>
</body></html>"#;

fn detail_page(title: &str) -> String {
    format!(
        "<html><body><h1>{title}</h1>\
         <p>A detail page with a long enough description to count as real content.</p>\
         </body></html>"
    )
}

async fn serve(server: &MockServer, route: &str, status: u16, body: &str) {
    Mock::given(method("GET"))
        .and(path(route))
        .respond_with(ResponseTemplate::new(status).set_body_string(body))
        .mount(server)
        .await;
}

/// A shop with one listing page and two detail pages
async fn shop() -> MockServer {
    let server = MockServer::start().await;
    serve(&server, "/list", 200, LISTING).await;
    serve(&server, "/item/1", 200, &detail_page("Item One")).await;
    serve(&server, "/item/2", 200, &detail_page("Item Two")).await;
    serve(&server, "/missing", 404, "gone").await;
    server
}

fn fast_engine() -> EngineSettings {
    let mut settings = EngineSettings::for_kind(EngineKind::Http);
    settings.max_retries = 0;
    settings.backoff = BackoffMode::None;
    settings.timeout_secs = 5;
    settings
}

fn source(id: &str, listing_url: String) -> SourceConfig {
    let mut source = SourceConfig::new(id, vec![listing_url]);
    source.engine = fast_engine();
    source.discovery = Some(DiscoveryConfig::regex(r"/item/\d+$"));
    source
}

fn run_config(root: &Path, sources: Vec<SourceConfig>) -> RunConfig {
    RunConfig {
        run: RunSettings {
            results_root: root.display().to_string(),
            ..RunSettings::default()
        },
        sources,
    }
}

/// Builds HTTP engines, but panics or fails for chosen sources
struct RiggedFactory;

#[async_trait]
impl EngineFactory for RiggedFactory {
    async fn build(&self, source: &SourceConfig) -> Result<Arc<dyn Engine>, EngineError> {
        match source.id.as_str() {
            "explode" => panic!("factory exploded"),
            "nobrowser" => Err(EngineError::BrowserUnavailable {
                message: "chrome not found".to_string(),
            }),
            _ => Ok(Arc::new(HttpEngine::from_settings(&source.engine)?)),
        }
    }
}

#[tokio::test]
async fn test_failing_source_does_not_abort_run() {
    let server = shop().await;
    let dir = TempDir::new().unwrap();

    let config = run_config(
        dir.path(),
        vec![
            source("good", format!("{}/list", server.uri())),
            source("bad", format!("{}/missing", server.uri())),
        ],
    );

    let report = Orchestrator::new(config).run().await.unwrap();

    assert_eq!(report.sources_total, 2);
    assert_eq!(report.sources_ok, 1);
    assert_eq!(report.sources_failed, 1);
    assert!(!report.ok);

    let good = report.source("good").unwrap();
    assert!(good.ok);
    assert_eq!(good.links_found, 2);
    assert_eq!(good.items_valid, 2);
    assert_eq!(good.items_saved, 2);
    assert_eq!(good.pages_succeeded, 3);

    let bad = report.source("bad").unwrap();
    assert!(!bad.ok);
    assert!(bad.error.is_some());
    assert!(!bad.diagnosis.is_empty());

    assert_eq!(report.totals.items_saved, 2);
}

#[tokio::test]
async fn test_failed_source_keeps_counts_and_listing_dump() {
    let server = shop().await;
    let dir = TempDir::new().unwrap();

    let config = run_config(dir.path(), vec![source("bad", format!("{}/missing", server.uri()))]);
    let report = Orchestrator::new(config).run().await.unwrap();

    let bad = report.source("bad").unwrap();
    assert!(!bad.ok);
    assert_eq!(bad.pages_attempted, 1);
    assert_eq!(bad.listing_pages_attempted, 1);
    assert_eq!(bad.listing_pages_succeeded, 0);
    assert_eq!(bad.errors.len(), 1);
    assert!(bad.error.as_deref().unwrap().contains("listing fetches failed"));

    let source_dir = dir.path().join(&report.run_id).join("bad");
    let raw = std::fs::read_to_string(source_dir.join("raw_listing.jsonl")).unwrap();
    assert_eq!(raw.lines().count(), 1);
    assert!(raw.contains("/missing"));
    for file in ["links.jsonl", "raw_detail.jsonl", "items.jsonl", "source_meta.json"] {
        assert!(source_dir.join(file).exists(), "missing {}", file);
    }
}

#[tokio::test]
async fn test_artifact_layout() {
    let server = shop().await;
    let dir = TempDir::new().unwrap();

    let config = run_config(dir.path(), vec![source("good", format!("{}/list", server.uri()))]);
    let report = Orchestrator::new(config)
        .with_config_hash("cafe")
        .run()
        .await
        .unwrap();

    let run_dir = dir.path().join(&report.run_id);
    for file in ["run_meta.json", "report.json", "report.md"] {
        assert!(run_dir.join(file).exists(), "missing {}", file);
    }

    let source_dir = run_dir.join("good");
    for file in [
        "raw_listing.jsonl",
        "raw_detail.jsonl",
        "links.jsonl",
        "items.jsonl",
        "items_valid.jsonl",
        "items_dropped.jsonl",
        "source_meta.json",
    ] {
        assert!(source_dir.join(file).exists(), "missing {}", file);
    }

    let valid = std::fs::read_to_string(source_dir.join("items_valid.jsonl")).unwrap();
    assert_eq!(valid.lines().count(), 2);
    let links = std::fs::read_to_string(source_dir.join("links.jsonl")).unwrap();
    assert_eq!(links.lines().count(), 2);

    let saved: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(run_dir.join("report.json")).unwrap())
            .unwrap();
    assert_eq!(saved["run_id"], report.run_id.as_str());
    assert_eq!(saved["config_hash"], "cafe");

    let markdown = std::fs::read_to_string(run_dir.join("report.md")).unwrap();
    assert!(markdown.contains("good"));
}

#[tokio::test]
async fn test_panicking_source_is_isolated() {
    let server = shop().await;
    let dir = TempDir::new().unwrap();

    let config = run_config(
        dir.path(),
        vec![
            source("explode", format!("{}/list", server.uri())),
            source("nobrowser", format!("{}/list", server.uri())),
            source("good", format!("{}/list", server.uri())),
        ],
    );

    let report = Orchestrator::new(config)
        .with_engine_factory(Arc::new(RiggedFactory))
        .run()
        .await
        .unwrap();

    assert_eq!(report.sources_total, 3);
    assert_eq!(report.sources_ok, 1);

    let explode = report.source("explode").unwrap();
    assert!(!explode.ok);
    assert!(explode.error.as_deref().unwrap().contains("panicked"));

    let nobrowser = report.source("nobrowser").unwrap();
    assert!(!nobrowser.ok);
    assert!(nobrowser.error.as_deref().unwrap().contains("chrome not found"));

    assert!(report.source("good").unwrap().ok);
    assert!(dir.path().join(&report.run_id).join("report.json").exists());
}

#[tokio::test]
async fn test_run_scoped_dedupe_is_shared_between_sources() {
    let server = shop().await;
    let dir = TempDir::new().unwrap();

    let config = run_config(
        dir.path(),
        vec![
            source("first", format!("{}/list", server.uri())),
            source("second", format!("{}/list", server.uri())),
        ],
    );

    let report = Orchestrator::new(config).run().await.unwrap();

    let first = report.source("first").unwrap();
    let second = report.source("second").unwrap();
    assert_eq!(first.links_new, 2);
    assert_eq!(second.links_new, 0);
    assert_eq!(second.links_duplicate, 2);
    assert_eq!(second.detail_pages_attempted, 0);
    // A source whose links were all seen is still a successful source
    assert!(second.ok);
}

#[tokio::test]
async fn test_source_scoped_dedupe_refetches() {
    let server = shop().await;
    let dir = TempDir::new().unwrap();

    let mut config = run_config(
        dir.path(),
        vec![
            source("first", format!("{}/list", server.uri())),
            source("second", format!("{}/list", server.uri())),
        ],
    );
    config.run.dedupe_scope = DedupeScope::Source;

    let report = Orchestrator::new(config).run().await.unwrap();

    assert_eq!(report.source("first").unwrap().links_new, 2);
    assert_eq!(report.source("second").unwrap().links_new, 2);
    assert_eq!(report.totals.items_saved, 4);
}

#[tokio::test]
async fn test_source_filter_and_csv_output() {
    let server = shop().await;
    let dir = TempDir::new().unwrap();

    let mut csv = source("csv", format!("{}/list", server.uri()));
    csv.storage.format = StorageFormat::Csv;
    let config = run_config(
        dir.path(),
        vec![csv, source("skipped", format!("{}/list", server.uri()))],
    );

    let report = Orchestrator::new(config)
        .source_filter(vec!["csv".to_string()])
        .run()
        .await
        .unwrap();

    assert_eq!(report.sources_total, 1);
    assert!(report.source("skipped").is_none());

    let source_dir = dir.path().join(&report.run_id).join("csv");
    let items = std::fs::read_to_string(source_dir.join("items_valid.csv")).unwrap();
    let mut lines = items.lines();
    assert!(lines.next().unwrap().starts_with("url,"));
    assert_eq!(lines.count(), 2);
    assert!(!dir.path().join(&report.run_id).join("skipped").exists());
}
