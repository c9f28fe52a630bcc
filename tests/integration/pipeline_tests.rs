//! Integration tests for the pipeline stage
//!
//! These tests use wiremock to serve listing and detail pages and run a
//! source end to end through the real HTTP engine.

use harrow::config::{
    BackoffMode, DiscoveryConfig, EngineKind, EngineSettings, Entrypoint, Paging, SourceConfig,
};
use harrow::extract::Item;
use harrow::fetch::{Engine, HttpEngine};
use harrow::filter::{DedupeStore, QualityRules};
use harrow::pipeline::{PipelineError, PipelineStage, ISSUES_FIELD};
use std::sync::Arc;
use url::Url;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn engine() -> Arc<dyn Engine> {
    let mut settings = EngineSettings::for_kind(EngineKind::Http);
    settings.max_retries = 0;
    settings.backoff = BackoffMode::None;
    settings.timeout_secs = 5;
    Arc::new(HttpEngine::from_settings(&settings).unwrap())
}

fn detail_page(title: &str) -> String {
    format!(
        "<html><head><title>{title}</title></head><body><h1>{title}</h1>\
         <p>This product page has a generous description, enough text to pass any thin content check.</p>\
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

fn source(server: &MockServer, listing: &str) -> SourceConfig {
    let mut source = SourceConfig::new("shop", vec![format!("{}{}", server.uri(), listing)]);
    source.discovery = Some(DiscoveryConfig::regex(r"/item/\d+$"));
    source.parallelism = 2;
    source
}

#[tokio::test]
async fn test_end_to_end_listing_to_items() {
    let server = MockServer::start().await;

    serve(
        &server,
        "/list",
        200,
        r#"<html><body>
            <a href="/item/1">One</a>
            <a href="/item/2">Two</a>
            <a href="/item/3">Three</a>
            <a href="/about">About us</a>
            <a href="/contact">Contact</a>
        </body></html>"#,
    )
    .await;
    serve(&server, "/item/1", 200, &detail_page("Item One")).await;
    serve(&server, "/item/2", 200, &detail_page("Item Two")).await;
    serve(&server, "/item/3", 500, "boom").await;

    let stage =
        PipelineStage::new(source(&server, "/list"), engine(), Arc::new(DedupeStore::new()))
            .unwrap();
    let output = stage.run().await.unwrap();

    assert_eq!(output.stats.links_found, 3);
    assert_eq!(output.stats.links_new, 3);
    assert_eq!(output.stats.detail_pages_attempted, 3);
    assert_eq!(output.stats.detail_pages_succeeded, 2);
    assert_eq!(output.stats.pages_attempted, 4);
    assert_eq!(output.stats.pages_succeeded, 3);
    assert_eq!(output.stats.items_parsed, 2);
    assert_eq!(output.stats.items_valid, 2);
    assert_eq!(output.stats.items_dropped, 0);
    assert_eq!(output.stats.errors.len(), 1);

    assert_eq!(output.raw_listing.len(), 1);
    assert_eq!(output.raw_detail.len(), 3);
    assert_eq!(output.links.len(), 3);

    // Detail order is not guaranteed
    let mut titles: Vec<&str> = output
        .valid
        .iter()
        .filter_map(|item| item.get("title").and_then(|t| t.as_str()))
        .collect();
    titles.sort();
    assert_eq!(titles, vec!["Item One", "Item Two"]);
}

#[tokio::test]
async fn test_paging_and_cross_page_duplicates() {
    let server = MockServer::start().await;

    serve(
        &server,
        "/list/1",
        200,
        r#"<a href="/item/1">One</a><a href="/item/2">Two</a>"#,
    )
    .await;
    serve(
        &server,
        "/list/2",
        200,
        r#"<a href="/item/2">Two again</a><a href="/item/3">Three</a>"#,
    )
    .await;
    for id in 1..=3 {
        let body = detail_page(&format!("Item {}", id));
        serve(&server, &format!("/item/{}", id), 200, &body).await;
    }

    let mut source = source(&server, "/unused");
    source.entrypoints = vec![Entrypoint {
        url: Some(format!("{}/list/{{page}}", server.uri())),
        paging: Some(Paging {
            start: 1,
            pages: 2,
            step: 1,
            param: "page".to_string(),
        }),
    }];

    let stage = PipelineStage::new(source, engine(), Arc::new(DedupeStore::new())).unwrap();
    let output = stage.run().await.unwrap();

    assert_eq!(output.stats.listing_pages_succeeded, 2);
    assert_eq!(output.stats.links_found, 4);
    assert_eq!(output.stats.links_new, 3);
    assert_eq!(output.stats.links_duplicate, 1);
    assert_eq!(output.stats.detail_pages_attempted, 3);
    assert_eq!(output.items.len(), 3);
}

#[tokio::test]
async fn test_shared_dedupe_store_spans_stages() {
    let server = MockServer::start().await;

    serve(&server, "/list", 200, r#"<a href="/item/1">One</a>"#).await;
    serve(&server, "/item/1", 200, &detail_page("Item One")).await;

    let dedupe = Arc::new(DedupeStore::new());

    let first = PipelineStage::new(source(&server, "/list"), engine(), Arc::clone(&dedupe))
        .unwrap()
        .run()
        .await
        .unwrap();
    let second = PipelineStage::new(source(&server, "/list"), engine(), Arc::clone(&dedupe))
        .unwrap()
        .run()
        .await
        .unwrap();

    assert_eq!(first.stats.detail_pages_attempted, 1);
    assert_eq!(second.stats.links_duplicate, 1);
    assert_eq!(second.stats.detail_pages_attempted, 0);
    assert!(second.links.iter().all(|link| !link.new));
}

#[tokio::test]
async fn test_quality_rules_drop_items() {
    let server = MockServer::start().await;

    serve(
        &server,
        "/list",
        200,
        r#"<a href="/item/1">One</a><a href="/item/2">Two</a>"#,
    )
    .await;
    serve(&server, "/item/1", 200, &detail_page("Item One")).await;
    serve(
        &server,
        "/item/2",
        200,
        r#"<html><body><div class="g-recaptcha"></div><p>Please verify you are human before continuing to the product page.</p></body></html>"#,
    )
    .await;

    let mut source = source(&server, "/list");
    source.quality = QualityRules {
        required_fields: vec!["title".to_string()],
        ..QualityRules::default()
    };

    let output = PipelineStage::new(source, engine(), Arc::new(DedupeStore::new()))
        .unwrap()
        .run()
        .await
        .unwrap();

    assert_eq!(output.stats.items_valid, 1);
    assert_eq!(output.stats.items_dropped, 1);
    assert_eq!(output.items.len(), 2);

    let dropped: &Item = &output.dropped[0];
    let issues = dropped[ISSUES_FIELD].as_array().unwrap();
    let codes: Vec<&str> = issues
        .iter()
        .filter_map(|issue| issue["code"].as_str())
        .collect();
    assert!(codes.contains(&"missing_field"));
    assert!(codes.contains(&"blocked"));
}

#[tokio::test]
async fn test_custom_link_extractor() {
    let server = MockServer::start().await;

    serve(&server, "/list", 200, r#"<div data-sku="7"></div>"#).await;
    serve(&server, "/item/7", 200, &detail_page("Item Seven")).await;

    let extractor = |html: &str, base: &Url| -> Vec<String> {
        html.split("data-sku=\"")
            .skip(1)
            .filter_map(|rest| rest.split('"').next())
            .filter_map(|sku| base.join(&format!("/item/{}", sku)).ok())
            .map(|url| url.to_string())
            .collect()
    };

    let output = PipelineStage::new(source(&server, "/list"), engine(), Arc::new(DedupeStore::new()))
        .unwrap()
        .with_link_extractor(Arc::new(extractor))
        .run()
        .await
        .unwrap();

    assert_eq!(output.discovery, "custom");
    assert_eq!(output.stats.items_valid, 1);
}

#[tokio::test]
async fn test_every_listing_failing_is_an_error() {
    let server = MockServer::start().await;

    serve(&server, "/list", 404, "gone").await;

    let result = PipelineStage::new(source(&server, "/list"), engine(), Arc::new(DedupeStore::new()))
        .unwrap()
        .run()
        .await;

    match result {
        Err(PipelineError::AllListingsFailed {
            source_id,
            attempted,
            last_error,
            ..
        }) => {
            assert_eq!(source_id, "shop");
            assert_eq!(attempted, 1);
            assert!(last_error.is_some());
        }
        other => panic!("expected AllListingsFailed, got {:?}", other.map(|o| o.stats)),
    }
}

#[test]
fn test_bad_discovery_rule_is_rejected() {
    let mut source = SourceConfig::new("bad", vec!["https://shop.test/".to_string()]);
    source.discovery = Some(DiscoveryConfig::regex("(unclosed"));

    let result = PipelineStage::new(source, engine(), Arc::new(DedupeStore::new()));
    assert!(matches!(result, Err(PipelineError::InvalidRule { .. })));
}
