//! Integration tests for fetching and probing
//!
//! These tests use wiremock to stand in for fediverse servers.

use fedi_crawler::config::FetchConfig;
use fedi_crawler::crawler::{
    build_http_client, ApiProbe, CrawlError, CrawlFailure, RetryingFetcher, TargetCrawler,
};
use fedi_crawler::{Category, CrawlTarget};
use reqwest::Client;
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

fn fast_fetcher(max_retries: u32) -> RetryingFetcher {
    RetryingFetcher::new(Client::new(), max_retries, Duration::from_millis(10))
}

/// `host:port` of the mock server, as a crawl target base URL
fn host_of(server: &MockServer) -> String {
    server.address().to_string()
}

#[tokio::test]
async fn test_failing_url_is_tried_max_retries_plus_one_times() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/v3/site"))
        .respond_with(ResponseTemplate::new(500))
        .expect(4)
        .mount(&server)
        .await;

    let url = format!("{}/api/v3/site", server.uri());
    let started = Instant::now();
    let error = fast_fetcher(3).fetch(&url).await.unwrap_err();

    // Waits of 1, 2 and 3 backoff units
    assert!(started.elapsed() >= Duration::from_millis(60));
    assert_eq!(error.attempts, 4);
    assert_eq!(error.url, url);
    assert!(error
        .to_string()
        .starts_with(&format!("Failed to get url {} after 4 attempts:", url)));
    assert!(error.message.contains("500"));
}

/// Answers 500 and remembers when each request arrived
#[derive(Clone, Default)]
struct ArrivalLog {
    arrivals: Arc<Mutex<Vec<Instant>>>,
}

impl Respond for ArrivalLog {
    fn respond(&self, _request: &Request) -> ResponseTemplate {
        self.arrivals.lock().unwrap().push(Instant::now());
        ResponseTemplate::new(500)
    }
}

#[tokio::test]
async fn test_waits_grow_linearly_between_attempts() {
    let server = MockServer::start().await;
    let log = ArrivalLog::default();

    Mock::given(method("GET"))
        .respond_with(log.clone())
        .expect(4)
        .mount(&server)
        .await;

    let unit = Duration::from_millis(40);
    let fetcher = RetryingFetcher::new(Client::new(), 3, unit);
    fetcher.fetch(&server.uri()).await.unwrap_err();

    let arrivals = log.arrivals.lock().unwrap().clone();
    assert_eq!(arrivals.len(), 4);
    for (k, pair) in arrivals.windows(2).enumerate() {
        let gap = pair[1] - pair[0];
        assert!(
            gap >= unit * (k as u32 + 1),
            "wait before attempt {} was {:?}",
            k + 2,
            gap
        );
    }
}

#[tokio::test]
async fn test_timeout_keeps_original_error_message() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/slow"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(500)))
        .mount(&server)
        .await;

    let client = Client::builder()
        .timeout(Duration::from_millis(50))
        .build()
        .unwrap();
    let fetcher = RetryingFetcher::new(client, 0, Duration::from_millis(10));

    let url = format!("{}/slow", server.uri());
    let error = fetcher.fetch(&url).await.unwrap_err();
    assert!(error.message.starts_with("request timed out: "));
    assert!(error.message.len() > "request timed out: ".len());
    assert!(error.to_string().contains(&url));
}

#[tokio::test]
async fn test_success_on_first_attempt_does_not_retry() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/v3/site"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"site_view": {}})))
        .expect(1)
        .mount(&server)
        .await;

    let url = format!("{}/api/v3/site", server.uri());
    let response = fast_fetcher(3).fetch(&url).await.unwrap();
    assert_eq!(response.status(), 200);
}

#[tokio::test]
async fn test_recovers_after_transient_failures() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/v3/site"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(2)
        .expect(2)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/api/v3/site"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"site_view": {"ok": true}})))
        .expect(1)
        .mount(&server)
        .await;

    let url = format!("{}/api/v3/site", server.uri());
    let body: Value = fast_fetcher(3).fetch_json(&url).await.unwrap();
    assert_eq!(body["site_view"]["ok"], true);
}

#[tokio::test]
async fn test_zero_retries_makes_one_attempt() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&server)
        .await;

    let error = fast_fetcher(0)
        .fetch(&format!("{}/missing", server.uri()))
        .await
        .unwrap_err();
    assert_eq!(error.attempts, 1);
}

#[tokio::test]
async fn test_identification_headers_are_sent() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(header("user-agent", "TestCrawler/2.0"))
        .and(header("x-lemmy-siteurl", "https://directory.example"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let config = FetchConfig {
        crawler_name: "TestCrawler".to_string(),
        crawler_version: "2.0".to_string(),
        attribution_url: "https://directory.example".to_string(),
        ..FetchConfig::default()
    };
    let client = build_http_client(&config).unwrap();
    let fetcher = RetryingFetcher::new(client, 0, Duration::from_millis(10));

    fetcher.fetch(&server.uri()).await.unwrap();
}

#[tokio::test]
async fn test_invalid_json_is_a_crawl_error() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>not json</html>"))
        .mount(&server)
        .await;

    let result: Result<Value, CrawlFailure> = fast_fetcher(0).fetch_json(&server.uri()).await;
    assert!(matches!(
        result,
        Err(CrawlFailure::Crawl(CrawlError::InvalidBody { .. }))
    ));
}

#[tokio::test]
async fn test_probe_instance() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/v3/site"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"site_view": {"site": {"name": "Lemmy"}}})),
        )
        .mount(&server)
        .await;

    let target = CrawlTarget::instance(&host_of(&server)).unwrap();
    let payload = ApiProbe::new("http")
        .crawl(&target, &fast_fetcher(0))
        .await
        .unwrap();
    assert_eq!(payload["site_view"]["site"]["name"], "Lemmy");
}

#[tokio::test]
async fn test_probe_community_passes_name() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/v3/community"))
        .and(query_param("name", "rust"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"community_view": {}})))
        .expect(1)
        .mount(&server)
        .await;

    let target = CrawlTarget::community(&host_of(&server), "rust").unwrap();
    ApiProbe::new("http")
        .crawl(&target, &fast_fetcher(0))
        .await
        .unwrap();
}

#[tokio::test]
async fn test_probe_rejects_unexpected_payload() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/v3/site"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"error": "not lemmy"})))
        .mount(&server)
        .await;

    let target = CrawlTarget::instance(&host_of(&server)).unwrap();
    let failure = ApiProbe::new("http")
        .crawl(&target, &fast_fetcher(0))
        .await
        .unwrap_err();

    assert!(matches!(
        failure,
        CrawlFailure::Crawl(CrawlError::UnexpectedPayload { ref field, .. }) if field == "site_view"
    ));
}

#[tokio::test]
async fn test_probe_follows_nodeinfo_link() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/.well-known/nodeinfo"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "links": [{
                "rel": "http://nodeinfo.diaspora.software/ns/schema/2.0",
                "href": format!("{}/nodeinfo/2.0", server.uri()),
            }]
        })))
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/nodeinfo/2.0"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "software": {"name": "mastodon", "version": "4.2.0"}
        })))
        .expect(1)
        .mount(&server)
        .await;

    let target = CrawlTarget::new(Category::FediverseNode, &host_of(&server), None).unwrap();
    let payload = ApiProbe::new("http")
        .crawl(&target, &fast_fetcher(0))
        .await
        .unwrap();
    assert_eq!(payload["software"]["name"], "mastodon");
}

#[tokio::test]
async fn test_probe_unreachable_host_is_a_fetch_failure() {
    let server = MockServer::start().await;
    let host = host_of(&server);
    drop(server);

    let target = CrawlTarget::instance(&host).unwrap();
    let failure = ApiProbe::new("http")
        .crawl(&target, &fast_fetcher(1))
        .await
        .unwrap_err();

    match failure {
        CrawlFailure::Fetch(e) => assert_eq!(e.attempts, 2),
        other => panic!("expected a fetch failure, got {:?}", other),
    }
}
