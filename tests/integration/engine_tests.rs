//! Integration tests for the fetch engines
//!
//! These tests run the HTTP engine against wiremock servers and check the
//! retry, redirect and blocking-facade behavior end to end.

use harrow::config::{BackoffMode, EngineKind, EngineSettings, HybridSettings};
use harrow::fetch::{
    BlockingEngine, Engine, EngineContext, EngineError, EngineLauncher, FetchErrorKind,
    HttpEngine, HybridEngine,
};
use std::sync::Arc;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const PAGE: &str = "<html><body><h1>Catalogue</h1><p>Plenty of readable text so the page is not mistaken for an empty shell.</p></body></html>";

/// HTTP settings with fast fixed backoff
fn fast_settings(max_retries: u32) -> EngineSettings {
    let mut settings = EngineSettings::for_kind(EngineKind::Http);
    settings.max_retries = max_retries;
    settings.backoff = BackoffMode::Fixed;
    settings.backoff_base_ms = 10;
    settings.timeout_secs = 5;
    settings
}

#[tokio::test]
async fn test_retries_until_success_and_traces_every_attempt() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/flaky"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(2)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/flaky"))
        .respond_with(ResponseTemplate::new(200).set_body_string(PAGE))
        .mount(&server)
        .await;

    let engine = HttpEngine::from_settings(&fast_settings(2)).unwrap();
    let result = engine
        .fetch(&format!("{}/flaky", server.uri()), &EngineContext::default())
        .await;

    assert!(result.ok);
    assert_eq!(result.status, Some(200));
    assert!(result.text.contains("Catalogue"));
    assert_eq!(result.engine_trace.len(), 3);
    assert_eq!(result.engine_trace[0].status, Some(503));
    assert!(result.engine_trace[0].retried);
    assert!(result.engine_trace[1].retried);
    assert!(!result.engine_trace[2].retried);
    assert_eq!(result.engine_trace[2].attempt, 3);
}

#[tokio::test]
async fn test_retries_are_bounded() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/down"))
        .respond_with(ResponseTemplate::new(500))
        .expect(2)
        .mount(&server)
        .await;

    let engine = HttpEngine::from_settings(&fast_settings(1)).unwrap();
    let result = engine
        .fetch(&format!("{}/down", server.uri()), &EngineContext::default())
        .await;

    assert!(!result.ok);
    assert_eq!(result.status, Some(500));
    assert_eq!(result.engine_trace.len(), 2);
    assert_eq!(
        result.error.as_ref().map(|e| e.kind),
        Some(FetchErrorKind::Http)
    );
}

#[tokio::test]
async fn test_client_errors_are_results_not_retries() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/missing"))
        .respond_with(ResponseTemplate::new(404).set_body_string("not here"))
        .expect(1)
        .mount(&server)
        .await;

    let engine = HttpEngine::from_settings(&fast_settings(3)).unwrap();
    let result = engine
        .fetch(&format!("{}/missing", server.uri()), &EngineContext::default())
        .await;

    assert!(!result.ok);
    assert_eq!(result.status, Some(404));
    assert_eq!(result.text, "not here");
    assert_eq!(result.engine_trace.len(), 1);
    let error = result.error.unwrap();
    assert_eq!(error.kind, FetchErrorKind::Http);
    assert!(!error.retryable);
}

#[tokio::test]
async fn test_redirect_chain_is_recorded() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/old"))
        .respond_with(ResponseTemplate::new(301).insert_header("Location", "/middle"))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/middle"))
        .respond_with(ResponseTemplate::new(302).insert_header("Location", "/new"))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/new"))
        .respond_with(ResponseTemplate::new(200).set_body_string(PAGE))
        .mount(&server)
        .await;

    let engine = HttpEngine::from_settings(&fast_settings(0)).unwrap();
    let url = format!("{}/old", server.uri());
    let result = engine.fetch(&url, &EngineContext::default()).await;

    assert!(result.ok);
    assert_eq!(result.url, url);
    assert_eq!(result.final_url, format!("{}/new", server.uri()));
    assert_eq!(
        result.redirect_chain,
        vec![url.clone(), format!("{}/middle", server.uri())]
    );
}

#[tokio::test]
async fn test_redirect_loop_is_an_error() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/a"))
        .respond_with(ResponseTemplate::new(302).insert_header("Location", "/b"))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/b"))
        .respond_with(ResponseTemplate::new(302).insert_header("Location", "/a"))
        .mount(&server)
        .await;

    let engine = HttpEngine::from_settings(&fast_settings(2)).unwrap();
    let result = engine
        .fetch(&format!("{}/a", server.uri()), &EngineContext::default())
        .await;

    assert!(!result.ok);
    assert_eq!(
        result.error.as_ref().map(|e| e.kind),
        Some(FetchErrorKind::Redirect)
    );
    assert_eq!(result.engine_trace.len(), 1);
}

#[tokio::test]
async fn test_headers_and_cookies_reach_the_server() {
    use wiremock::matchers::header;

    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/private"))
        .and(header("x-api-key", "secret"))
        .and(header("cookie", "session=abc"))
        .respond_with(ResponseTemplate::new(200).set_body_string(PAGE))
        .mount(&server)
        .await;

    let mut settings = fast_settings(0);
    settings
        .headers
        .insert("x-api-key".to_string(), "secret".to_string());
    let engine = HttpEngine::from_settings(&settings).unwrap();

    let ctx = EngineContext::default().with_cookie("session", "abc");
    let result = engine
        .fetch(&format!("{}/private", server.uri()), &ctx)
        .await;

    assert!(result.ok, "error: {:?}", result.error);
}

#[tokio::test]
async fn test_rate_limited_response_is_flagged() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/busy"))
        .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "1"))
        .mount(&server)
        .await;

    let engine = HttpEngine::from_settings(&fast_settings(0)).unwrap();
    let result = engine
        .fetch(&format!("{}/busy", server.uri()), &EngineContext::default())
        .await;

    assert!(!result.ok);
    assert_eq!(
        result.block.map(|b| b.as_str()),
        Some("rate_limited")
    );
    assert_eq!(result.headers.get("retry-after").map(String::as_str), Some("1"));
}

#[tokio::test]
async fn test_hybrid_falls_back_when_browser_cannot_start() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/thin"))
        .respond_with(ResponseTemplate::new(200).set_body_string(PAGE))
        .mount(&server)
        .await;

    let http: Arc<dyn Engine> = Arc::new(HttpEngine::from_settings(&fast_settings(0)).unwrap());
    let launcher: EngineLauncher = Box::new(|| {
        Box::pin(async {
            Err(EngineError::BrowserUnavailable {
                message: "no chrome here".to_string(),
            })
        })
    });
    let hybrid = HybridEngine::new(
        http,
        launcher,
        HybridSettings {
            min_text_len: 10_000,
            ..HybridSettings::default()
        },
    );

    let url = format!("{}/thin", server.uri());
    let first = hybrid.fetch(&url, &EngineContext::default()).await;
    let second = hybrid.fetch(&url, &EngineContext::default()).await;

    // The HTTP data is still returned, with the failed escalation traced
    assert!(first.ok);
    assert!(first.text.contains("Catalogue"));
    assert_eq!(first.engine_trace.len(), 2);
    assert_eq!(
        first.engine_trace[1].error,
        Some(FetchErrorKind::BrowserUnavailable)
    );
    assert!(second.ok);
    assert_eq!(hybrid.escalations(), 2);
    assert!(!hybrid.browser_started());
}

#[test]
fn test_blocking_facade_from_plain_thread() {
    let runtime = tokio::runtime::Runtime::new().unwrap();
    let server = runtime.block_on(async {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/page"))
            .respond_with(ResponseTemplate::new(200).set_body_string(PAGE))
            .mount(&server)
            .await;
        server
    });

    let engine = BlockingEngine::launch(|| async {
        HttpEngine::from_settings(&fast_settings(0)).map(|e| Arc::new(e) as Arc<dyn Engine>)
    })
    .unwrap();

    let result = engine.fetch_blocking(&format!("{}/page", server.uri()), &EngineContext::default());
    assert!(result.ok);
    assert_eq!(result.status, Some(200));

    engine.close_blocking();
    let closed = engine.fetch_blocking(&format!("{}/page", server.uri()), &EngineContext::default());
    assert_eq!(
        closed.error.map(|e| e.kind),
        Some(FetchErrorKind::Closed)
    );

    drop(engine);
    runtime.block_on(async move { drop(server) });
}

#[tokio::test]
async fn test_blocking_facade_inside_runtime() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/page"))
        .respond_with(ResponseTemplate::new(200).set_body_string(PAGE))
        .mount(&server)
        .await;

    let http: Arc<dyn Engine> = Arc::new(HttpEngine::from_settings(&fast_settings(0)).unwrap());
    let engine = BlockingEngine::wrap(http).unwrap();

    let result = engine.fetch_blocking(&format!("{}/page", server.uri()), &EngineContext::default());
    assert!(result.ok);
    assert!(result.text.contains("Catalogue"));
}
