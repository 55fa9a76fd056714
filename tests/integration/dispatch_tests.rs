//! Integration tests for the crawl dispatcher
//!
//! These tests use wiremock servers as crawl targets and a SQLite store in a
//! temporary directory, and drive scans and jobs end-to-end.

use chrono::{Duration as ChronoDuration, Utc};
use fedi_crawler::config::Config;
use fedi_crawler::crawler::{ApiProbe, CrawlFailure, Dispatcher};
use fedi_crawler::output::MemorySink;
use fedi_crawler::policy::{ErrorTracker, TimingPolicy};
use fedi_crawler::queue::{JobOrigin, Submission};
use fedi_crawler::state::{ErrorClass, ErrorRecord, JobState};
use fedi_crawler::storage::{SqliteConnector, Store, StoreConnector};
use fedi_crawler::{Category, CrawlTarget, CrawlerError};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::watch;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Creates a fast test configuration with its store and output in `dir`
fn create_test_config(dir: &TempDir, seeds: Vec<String>) -> Config {
    let mut config = Config::default();
    config.store.path = dir.path().join("crawler.db").display().to_string();
    config.store.reconnect_delay_ms = 10;
    config.output.path = dir.path().join("results.jsonl").display().to_string();
    config.fetch.scheme = "http".to_string();
    config.fetch.max_retries = 3;
    config.fetch.backoff_unit_ms = 1;
    config.fetch.request_timeout_secs = 5;
    config.worker.poll_interval_ms = 10;
    config.seeds = seeds;
    config
}

fn connector(config: &Config) -> Arc<SqliteConnector> {
    Arc::new(SqliteConnector::new(&config.store.path))
}

fn create_dispatcher(config: &Config, sink: &Arc<MemorySink>) -> Dispatcher {
    Dispatcher::new(
        config,
        connector(config),
        Arc::new(ApiProbe::new("http")),
        sink.clone(),
    )
    .expect("Failed to create dispatcher")
}

fn open_store(config: &Config) -> Box<dyn Store> {
    connector(config).connect().expect("Failed to open store")
}

async fn mount_site(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/api/v3/site"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"site_view": {"site": {"name": "Test Lemmy"}}})),
        )
        .mount(server)
        .await;
}

async fn mount_failure(server: &MockServer) {
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(500))
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_end_to_end_success() {
    let server = MockServer::start().await;
    mount_site(&server).await;
    let host = server.address().to_string();

    let dir = TempDir::new().unwrap();
    let config = create_test_config(&dir, vec![host.clone()]);
    let sink = Arc::new(MemorySink::new());
    let dispatcher = create_dispatcher(&config, &sink);

    let report = dispatcher.scan(Category::Instance, Utc::now()).await.unwrap();
    assert_eq!(report.candidates, 1);
    assert_eq!(report.submitted, 1);

    let outcomes = dispatcher.drain(Category::Instance).await.unwrap();
    assert_eq!(outcomes.len(), 1);
    assert_eq!(outcomes[0].state(), JobState::Succeeded);

    let records = sink.records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].base_url, host);
    assert_eq!(records[0].data["site_view"]["site"]["name"], "Test Lemmy");

    let target = CrawlTarget::instance(&host).unwrap();
    let store = open_store(&config);
    let freshness = store.get_freshness(&target).unwrap().unwrap();
    let finished_ms = outcomes[0].finished_at.timestamp_millis();
    assert_eq!(freshness.last_crawl_at.timestamp_millis(), finished_ms);
    assert_eq!(
        freshness.last_success_at.map(|t| t.timestamp_millis()),
        Some(finished_ms)
    );
    assert!(!freshness.pending_deletion);
    assert!(store
        .get_error(Category::Instance, &host, Utc::now())
        .unwrap()
        .is_none());
    assert_eq!(store.active_jobs(Category::Instance).unwrap(), 0);

    // Just crawled: nothing to do
    let report = dispatcher.scan(Category::Instance, Utc::now()).await.unwrap();
    assert_eq!(report.fresh, 1);
    assert_eq!(report.submitted, 0);
}

#[tokio::test]
async fn test_aged_target_is_resubmitted_but_skipped_when_too_recent() {
    let server = MockServer::start().await;
    mount_site(&server).await;
    let host = server.address().to_string();

    let dir = TempDir::new().unwrap();
    let config = create_test_config(&dir, vec![host]);
    let sink = Arc::new(MemorySink::new());
    let dispatcher = create_dispatcher(&config, &sink);

    dispatcher.scan(Category::Instance, Utc::now()).await.unwrap();
    dispatcher.drain(Category::Instance).await.unwrap();

    // A scan that believes nine hours have passed submits again, but the job
    // sees the real last crawl and skips it
    let later = Utc::now() + ChronoDuration::hours(9);
    let report = dispatcher.scan(Category::Instance, later).await.unwrap();
    assert_eq!(report.submitted, 1);

    let outcomes = dispatcher.drain(Category::Instance).await.unwrap();
    assert_eq!(outcomes.len(), 1);
    assert_eq!(outcomes[0].state(), JobState::TooRecent);
    assert_eq!(sink.records().len(), 1);
}

#[tokio::test]
async fn test_end_to_end_failure_is_suppressed_until_expiry() {
    let server = MockServer::start().await;
    mount_failure(&server).await;
    let host = server.address().to_string();

    let dir = TempDir::new().unwrap();
    let config = create_test_config(&dir, vec![host.clone()]);
    let sink = Arc::new(MemorySink::new());
    let dispatcher = create_dispatcher(&config, &sink);

    dispatcher.scan(Category::Instance, Utc::now()).await.unwrap();
    let outcomes = dispatcher.drain(Category::Instance).await.unwrap();
    assert_eq!(outcomes.len(), 1);
    assert_eq!(outcomes[0].state(), JobState::Failed);
    match outcomes[0].result.failure() {
        Some(CrawlFailure::Fetch(e)) => assert_eq!(e.attempts, 4),
        other => panic!("expected a fetch failure, got {:?}", other),
    }
    assert!(sink.records().is_empty());

    let t0 = outcomes[0].finished_at;
    let store = open_store(&config);
    let tracker = ErrorTracker::new(Arc::new(TimingPolicy::from_config(&config.timing)));

    let record = tracker
        .last_error(store.as_ref(), Category::Instance, &host, t0)
        .unwrap()
        .unwrap();
    assert_eq!(record.classification, ErrorClass::Fetch);
    assert!(record.message.starts_with("Failed to get url"));

    assert!(tracker
        .is_recently_failed(store.as_ref(), Category::Instance, &host, t0 + ChronoDuration::hours(1))
        .unwrap());
    let expired = t0 + ChronoDuration::hours(8) + ChronoDuration::seconds(1);
    assert!(!tracker
        .is_recently_failed(store.as_ref(), Category::Instance, &host, expired)
        .unwrap());

    // The failed crawl still counts as a crawl
    let freshness = store
        .get_freshness(&CrawlTarget::instance(&host).unwrap())
        .unwrap()
        .unwrap();
    assert!(freshness.last_success_at.is_none());

    let report = dispatcher
        .scan(Category::Instance, t0 + ChronoDuration::hours(1))
        .await
        .unwrap();
    assert_eq!(report.submitted, 0);

    let report = dispatcher.scan(Category::Instance, expired).await.unwrap();
    assert_eq!(report.submitted, 1);
}

#[tokio::test]
async fn test_active_error_suppresses_aged_target() {
    let dir = TempDir::new().unwrap();
    let config = create_test_config(&dir, vec![]);
    let sink = Arc::new(MemorySink::new());
    let dispatcher = create_dispatcher(&config, &sink);

    let now = Utc::now();
    let target = CrawlTarget::instance("flaky.example").unwrap();
    let mut store = open_store(&config);
    store
        .record_crawl(&target, now - ChronoDuration::hours(9), true)
        .unwrap();
    store
        .upsert_error(
            Category::Instance,
            "flaky.example",
            &ErrorRecord {
                message: "connection reset".to_string(),
                classification: ErrorClass::Fetch,
                occurred_at: now - ChronoDuration::hours(1),
                expires_at: now + ChronoDuration::hours(7),
            },
        )
        .unwrap();

    let report = dispatcher.scan(Category::Instance, now).await.unwrap();
    assert_eq!(report.suppressed, 1);
    assert_eq!(report.submitted, 0);
    assert_eq!(store.active_jobs(Category::Instance).unwrap(), 0);
}

fn quiet_community(server: &MockServer, config: &Config) -> CrawlTarget {
    let target = CrawlTarget::community(&server.address().to_string(), "rust").unwrap();
    let last_success = Utc::now() - ChronoDuration::hours(14);
    open_store(config)
        .record_crawl(&target, last_success, true)
        .unwrap();
    target
}

#[tokio::test]
async fn test_deletion_check_removes_target_after_failed_confirmation() {
    let server = MockServer::start().await;
    mount_failure(&server).await;

    let dir = TempDir::new().unwrap();
    let config = create_test_config(&dir, vec![]);
    let sink = Arc::new(MemorySink::new());
    let dispatcher = create_dispatcher(&config, &sink);
    let target = quiet_community(&server, &config);

    let report = dispatcher.scan(Category::Community, Utc::now()).await.unwrap();
    assert_eq!(report.deletion_checks, 1);
    assert_eq!(report.submitted, 0);

    let store = open_store(&config);
    assert!(store.get_freshness(&target).unwrap().unwrap().pending_deletion);

    // Marked and queued: a second scan does not add another check
    let report = dispatcher.scan(Category::Community, Utc::now()).await.unwrap();
    assert_eq!(report.deletion_checks, 0);
    assert_eq!(report.duplicates, 1);

    let outcomes = dispatcher.drain(Category::Community).await.unwrap();
    assert_eq!(outcomes.len(), 1);
    assert_eq!(outcomes[0].job.origin, JobOrigin::DeletionCheck);
    assert_eq!(outcomes[0].state(), JobState::Failed);

    assert!(store.get_freshness(&target).unwrap().is_none());
    assert!(store.list_targets(Category::Community).unwrap().is_empty());
}

#[tokio::test]
async fn test_deletion_check_success_keeps_target() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v3/community"))
        .and(query_param("name", "rust"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"community_view": {}})))
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let config = create_test_config(&dir, vec![]);
    let sink = Arc::new(MemorySink::new());
    let dispatcher = create_dispatcher(&config, &sink);
    let target = quiet_community(&server, &config);
    let before = Utc::now();

    dispatcher.scan(Category::Community, before).await.unwrap();
    let outcomes = dispatcher.drain(Category::Community).await.unwrap();
    assert_eq!(outcomes[0].state(), JobState::Succeeded);

    let freshness = open_store(&config).get_freshness(&target).unwrap().unwrap();
    assert!(!freshness.pending_deletion);
    assert!(freshness.last_success_at.unwrap() >= before - ChronoDuration::seconds(1));
    assert_eq!(sink.records().len(), 1);
    assert_eq!(sink.records()[0].sub_key.as_deref(), Some("rust"));
}

#[tokio::test]
async fn test_target_that_never_succeeded_is_not_a_deletion_candidate() {
    let dir = TempDir::new().unwrap();
    let config = create_test_config(&dir, vec![]);
    let sink = Arc::new(MemorySink::new());
    let dispatcher = create_dispatcher(&config, &sink);

    let target = CrawlTarget::community("gone.example", "rust").unwrap();
    open_store(&config)
        .record_crawl(&target, Utc::now() - ChronoDuration::hours(20), false)
        .unwrap();

    let report = dispatcher.scan(Category::Community, Utc::now()).await.unwrap();
    assert_eq!(report.deletion_checks, 0);
    assert_eq!(report.submitted, 1);
}

#[tokio::test]
async fn test_manual_run_of_queued_target_is_refused() {
    let server = MockServer::start().await;
    mount_site(&server).await;
    let host = server.address().to_string();

    let dir = TempDir::new().unwrap();
    let config = create_test_config(&dir, vec![]);
    let sink = Arc::new(MemorySink::new());
    let dispatcher = create_dispatcher(&config, &sink);
    let target = CrawlTarget::instance(&host).unwrap();

    let submission = dispatcher
        .submit(target.clone(), JobOrigin::Scheduled)
        .await
        .unwrap();
    assert!(matches!(submission, Submission::Queued(_)));

    let error = dispatcher.run_manual(target.clone()).await.unwrap_err();
    match error {
        CrawlerError::AlreadyScheduled { category, id } => {
            assert_eq!(category, Category::Instance);
            assert_eq!(id.as_str(), host);
        }
        other => panic!("expected AlreadyScheduled, got {:?}", other),
    }

    dispatcher.drain(Category::Instance).await.unwrap();

    // Manual runs ignore how recently the target was crawled
    let payload = dispatcher.run_manual(target).await.unwrap();
    assert_eq!(payload["site_view"]["site"]["name"], "Test Lemmy");
    assert_eq!(sink.records().len(), 2);
}

#[tokio::test]
async fn test_manual_failure_is_reported_and_recorded() {
    let server = MockServer::start().await;
    mount_failure(&server).await;
    let host = server.address().to_string();

    let dir = TempDir::new().unwrap();
    let config = create_test_config(&dir, vec![]);
    let sink = Arc::new(MemorySink::new());
    let dispatcher = create_dispatcher(&config, &sink);

    let error = dispatcher
        .run_manual(CrawlTarget::instance(&host).unwrap())
        .await
        .unwrap_err();
    match error {
        CrawlerError::CrawlFailed {
            source: CrawlFailure::Fetch(e),
            ..
        } => assert_eq!(e.attempts, 4),
        other => panic!("expected a fetch failure, got {:?}", other),
    }

    let store = open_store(&config);
    assert!(store
        .get_error(Category::Instance, &host, Utc::now())
        .unwrap()
        .is_some());
    assert_eq!(store.active_jobs(Category::Instance).unwrap(), 0);
}

#[tokio::test]
async fn test_timed_out_job_records_timeout_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"site_view": {}}))
                .set_delay(Duration::from_secs(3)),
        )
        .mount(&server)
        .await;
    let host = server.address().to_string();

    let dir = TempDir::new().unwrap();
    let mut config = create_test_config(&dir, vec![host.clone()]);
    config.timing.instance.timeout_secs = 1;
    let sink = Arc::new(MemorySink::new());
    let dispatcher = create_dispatcher(&config, &sink);

    dispatcher.scan(Category::Instance, Utc::now()).await.unwrap();
    let outcomes = dispatcher.drain(Category::Instance).await.unwrap();
    assert_eq!(outcomes.len(), 1);
    assert_eq!(outcomes[0].state(), JobState::TimedOut);

    let store = open_store(&config);
    let record = store
        .get_error(Category::Instance, &host, Utc::now())
        .unwrap()
        .unwrap();
    assert_eq!(record.classification, ErrorClass::Timeout);
    assert_eq!(store.active_jobs(Category::Instance).unwrap(), 0);
    assert!(sink.records().is_empty());
}

#[tokio::test]
async fn test_scheduler_scans_and_leaves_marker() {
    let dir = TempDir::new().unwrap();
    let config = create_test_config(&dir, vec!["lemmy.ml".to_string()]);
    let sink = Arc::new(MemorySink::new());
    let dispatcher = create_dispatcher(&config, &sink);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let stop = async {
        tokio::time::sleep(Duration::from_millis(200)).await;
        shutdown_tx.send(true).unwrap();
    };
    let (result, ()) = tokio::join!(
        dispatcher.run_scheduler(Duration::from_secs(3600), shutdown_rx),
        stop
    );
    result.unwrap();

    let store = open_store(&config);
    assert!(store
        .get("scan.last.instance", Utc::now())
        .unwrap()
        .is_some());
    assert_eq!(store.active_jobs(Category::Instance).unwrap(), 1);
}
