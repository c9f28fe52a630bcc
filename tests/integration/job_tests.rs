//! Integration tests for resumable jobs
//!
//! These tests run phased jobs against wiremock servers, interrupt them and
//! check that a restarted job resumes from its checkpoint.

use async_trait::async_trait;
use harrow::config::{BackoffMode, DiscoveryConfig, EngineKind, EngineSettings, SourceConfig};
use harrow::fetch::EngineContext;
use harrow::jobs::{
    source_recipe, EngineSlot, ItemLoop, Phase, PhaseContext, PhaseResult, PhaseRunner,
    RecipeOptions,
};
use harrow::state::{JobStatus, StateManager};
use harrow::storage::open_state_store;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn detail_page(title: &str) -> String {
    format!(
        "<html><body><h1>{title}</h1>\
         <p>Long form description of the product, comfortably above any thin page threshold.</p>\
         </body></html>"
    )
}

fn fast_engine() -> EngineSettings {
    let mut settings = EngineSettings::for_kind(EngineKind::Http);
    settings.max_retries = 0;
    settings.backoff = BackoffMode::None;
    settings.timeout_secs = 5;
    settings
}

fn context(job_id: &str, state_path: &Path) -> PhaseContext {
    let store = open_state_store(state_path).unwrap();
    let state = StateManager::load(job_id, store).unwrap();
    PhaseContext::new(
        EngineSlot::from_settings(fast_engine()),
        state,
        serde_json::Value::Null,
    )
}

#[tokio::test]
async fn test_recipe_resumes_after_failed_discovery() {
    let server = MockServer::start().await;

    // The listing is down for the first request only
    Mock::given(method("GET"))
        .and(path("/list"))
        .respond_with(ResponseTemplate::new(500))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/list"))
        .respond_with(ResponseTemplate::new(200).set_body_string(
            r#"<a href="/item/1">One</a><a href="/item/2">Two</a>"#,
        ))
        .mount(&server)
        .await;
    for id in 1..=2 {
        Mock::given(method("GET"))
            .and(path(format!("/item/{}", id)))
            .respond_with(ResponseTemplate::new(200).set_body_string(detail_page(&format!("Item {}", id))))
            .expect(1)
            .mount(&server)
            .await;
    }

    let dir = TempDir::new().unwrap();
    let state_path = dir.path().join("state.json");
    let out = dir.path().join("out");

    let mut source = SourceConfig::new("shop", vec![format!("{}/list", server.uri())]);
    source.engine = fast_engine();
    source.discovery = Some(DiscoveryConfig::regex(r"/item/\d+$"));

    // First attempt fails in discovery
    let runner = source_recipe(source.clone(), out.clone(), RecipeOptions::default()).unwrap();
    let mut ctx = context("shop", &state_path);
    let outcome = runner.run(&mut ctx).await.unwrap();
    assert_eq!(outcome.failed_phase.as_deref(), Some("discover"));
    assert_eq!(outcome.status, JobStatus::Failed);
    drop(ctx);

    // The restart picks up at discovery and completes
    let mut ctx = context("shop", &state_path);
    assert_eq!(ctx.state.phase(), Some("discover"));
    let outcome = runner.run(&mut ctx).await.unwrap();
    assert!(outcome.is_done());
    assert_eq!(outcome.phases_run, vec!["discover", "detail", "summary"]);
    drop(ctx);

    let items = std::fs::read_to_string(out.join("items.jsonl")).unwrap();
    assert_eq!(items.lines().count(), 2);
    let summary: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(out.join("summary.json")).unwrap()).unwrap();
    assert_eq!(summary["processed"], 2);

    // A finished job is left alone
    let mut ctx = context("shop", &state_path);
    let outcome = runner.run(&mut ctx).await.unwrap();
    assert!(outcome.is_done());
    assert!(outcome.phases_run.is_empty());

    let jobs = open_state_store(&state_path).unwrap().list().unwrap();
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].status, JobStatus::Done);
}

/// Counts its runs and always succeeds
struct Prepare {
    runs: Arc<AtomicUsize>,
}

#[async_trait]
impl Phase for Prepare {
    fn name(&self) -> &str {
        "prepare"
    }

    async fn run(&self, _ctx: &mut PhaseContext) -> PhaseResult {
        self.runs.fetch_add(1, Ordering::SeqCst);
        PhaseResult::ok()
    }
}

/// Fetches every URL; when `crash_after` is set it stops early and fails
struct Harvest {
    urls: Vec<String>,
    crash_after: Option<usize>,
}

#[async_trait]
impl Phase for Harvest {
    fn name(&self) -> &str {
        "harvest"
    }

    async fn run(&self, ctx: &mut PhaseContext) -> PhaseResult {
        let urls = match self.crash_after {
            Some(n) => &self.urls[..n],
            None => &self.urls[..],
        };

        let stats = ItemLoop::new(1)
            .recycle_every(2)
            .run(ctx, urls, |engine, url| async move {
                let result = engine.fetch(&url, &EngineContext::default()).await;
                if result.ok {
                    Ok(())
                } else {
                    Err(format!("status {:?}", result.status))
                }
            })
            .await;

        match stats {
            Ok(_) if self.crash_after.is_some() => PhaseResult::failed("simulated crash"),
            Ok(stats) => PhaseResult::ok()
                .with_count("processed", stats.processed)
                .with_count("skipped", stats.skipped)
                .with_count("recycles", stats.recycles),
            Err(e) => PhaseResult::failed(e.to_string()),
        }
    }
}

#[tokio::test]
async fn test_item_loop_resumes_mid_phase() {
    let server = MockServer::start().await;

    // Each page must be fetched exactly once across both runs
    for id in 1..=4 {
        Mock::given(method("GET"))
            .and(path(format!("/item/{}", id)))
            .respond_with(ResponseTemplate::new(200).set_body_string(detail_page("Item")))
            .expect(1)
            .mount(&server)
            .await;
    }

    let urls: Vec<String> = (1..=4)
        .map(|id| format!("{}/item/{}", server.uri(), id))
        .collect();

    let dir = TempDir::new().unwrap();
    let state_path = dir.path().join("state.sqlite");
    let prepare_runs = Arc::new(AtomicUsize::new(0));

    let crashing = PhaseRunner::new()
        .phase(Prepare {
            runs: Arc::clone(&prepare_runs),
        })
        .phase(Harvest {
            urls: urls.clone(),
            crash_after: Some(2),
        });
    let mut ctx = context("harvest-job", &state_path);
    let outcome = crashing.run(&mut ctx).await.unwrap();
    assert_eq!(outcome.failed_phase.as_deref(), Some("harvest"));
    assert_eq!(ctx.state.processed_count(), 2);
    drop(ctx);

    let resumed = PhaseRunner::new()
        .phase(Prepare {
            runs: Arc::clone(&prepare_runs),
        })
        .phase(Harvest {
            urls,
            crash_after: None,
        });
    let mut ctx = context("harvest-job", &state_path);
    let outcome = resumed.run(&mut ctx).await.unwrap();

    assert!(outcome.is_done());
    assert_eq!(outcome.phases_run, vec!["harvest"]);
    assert_eq!(prepare_runs.load(Ordering::SeqCst), 1);

    let harvest = &outcome.results[0].1;
    assert_eq!(harvest.counts["skipped"], 2);
    assert_eq!(harvest.counts["processed"], 2);
    assert_eq!(harvest.counts["recycles"], 1);
    assert_eq!(ctx.state.processed_count(), 4);
}

#[tokio::test]
async fn test_offline_context_fails_without_network() {
    let dir = TempDir::new().unwrap();
    let state_path = dir.path().join("state.json");

    let runner = PhaseRunner::new().phase(Harvest {
        urls: vec!["http://127.0.0.1:9/never".to_string()],
        crash_after: None,
    });

    let mut ctx = context("offline", &state_path);
    ctx.online = false;
    let outcome = runner.run(&mut ctx).await.unwrap();

    assert_eq!(outcome.status, JobStatus::Failed);
    assert!(outcome.results[0].1.error.as_deref().unwrap().contains("offline"));
    assert_eq!(ctx.engine.launches(), 0);
}
