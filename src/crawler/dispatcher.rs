//! Crawl dispatcher - scan, submit and run crawl jobs
//!
//! This module ties the pieces together:
//! - Scanning known targets and submitting the ones that are due
//! - Confirming quiet targets before they are removed
//! - Running category workers and the periodic scheduler
//! - Manual crawls that report their failure to the operator

use crate::config::Config;
use crate::crawler::failure::CrawlFailure;
use crate::crawler::fetcher::RetryingFetcher;
use crate::crawler::probe::{ApiProbe, TargetCrawler};
use crate::output::{JsonLinesSink, ResultSink};
use crate::policy::{Eligibility, ErrorTracker, TimingPolicy};
use crate::queue::{
    CrawlJob, CrawlResult, JobFailure, JobHandler, JobOrigin, JobOutcome, JobQueue, QueueOptions,
    Submission,
};
use crate::storage::{
    connect_with_retry, ReconnectPolicy, SqliteConnector, Store, StoreConnector, StoreResult,
};
use crate::target::{Category, CrawlTarget, JobId};
use crate::{ConfigError, CrawlerError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinSet;

/// Counts of one scan
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanReport {
    pub category: Option<Category>,
    pub candidates: usize,
    pub submitted: usize,
    /// Already queued or running
    pub duplicates: usize,
    pub fresh: usize,
    pub suppressed: usize,
    /// Confirmation crawls submitted for quiet targets
    pub deletion_checks: usize,
}

impl ScanReport {
    fn for_category(category: Category) -> Self {
        Self {
            category: Some(category),
            ..Default::default()
        }
    }

    /// Adds the counts of `other`
    pub fn merge(&mut self, other: &ScanReport) {
        self.candidates += other.candidates;
        self.submitted += other.submitted;
        self.duplicates += other.duplicates;
        self.fresh += other.fresh;
        self.suppressed += other.suppressed;
        self.deletion_checks += other.deletion_checks;
    }
}

/// Executes crawl jobs and settles their outcome in the store
pub struct CrawlHandler {
    policy: Arc<TimingPolicy>,
    tracker: ErrorTracker,
    fetcher: RetryingFetcher,
    crawler: Arc<dyn TargetCrawler>,
    sink: Arc<dyn ResultSink>,
}

impl CrawlHandler {
    fn settle(&self, outcome: &JobOutcome, store: &mut dyn Store) -> StoreResult<()> {
        let job = &outcome.job;
        let target = &job.target;
        let category = target.category();

        match &outcome.result {
            CrawlResult::Success(payload) => {
                store.record_crawl(target, outcome.finished_at, true)?;
                store.set_pending_deletion(target, false)?;
                self.tracker.clear(store, category, target.base_url())?;

                if let Err(e) = self.sink.accept(target, payload) {
                    tracing::error!(crawl_target = %target, "Failed to write result: {}", e);
                }
            }
            CrawlResult::TooRecent(_) => {}
            CrawlResult::Failed(failure) => {
                self.tracker.record_error(
                    store,
                    category,
                    target.base_url(),
                    failure,
                    outcome.finished_at,
                )?;

                if job.origin == JobOrigin::DeletionCheck {
                    store.remove_target(target)?;
                    tracing::info!(crawl_target = %target, "Removed target after failed confirmation crawl");
                } else {
                    store.record_crawl(target, outcome.finished_at, false)?;
                }
            }
        }
        Ok(())
    }
}

#[async_trait]
impl JobHandler for CrawlHandler {
    async fn run(&self, job: &CrawlJob, store: &mut dyn Store) -> CrawlResult {
        // Another worker may have crawled the target since the scan
        if !job.origin.is_forced() {
            match store.get_freshness(&job.target) {
                Ok(freshness) => {
                    let category = job.target.category();
                    if let Some(age) =
                        self.policy
                            .is_too_recent(category, freshness.as_ref(), Utc::now())
                    {
                        return CrawlResult::TooRecent(age);
                    }
                }
                Err(e) => {
                    tracing::warn!(job_id = %job.id, "Failed to read freshness, crawling anyway: {}", e);
                }
            }
        }

        match self.crawler.crawl(&job.target, &self.fetcher).await {
            Ok(payload) => CrawlResult::Success(payload),
            Err(failure) => CrawlResult::Failed(failure),
        }
    }

    fn finished(&self, outcome: &JobOutcome, store: &mut dyn Store) {
        if let Err(e) = self.settle(outcome, store) {
            tracing::error!(
                job_id = %outcome.job.id,
                category = %outcome.job.target.category(),
                "Failed to record job outcome: {}",
                e
            );
        }
    }
}

/// Owns one queue per category and everything their jobs need
pub struct Dispatcher {
    connector: Arc<dyn StoreConnector>,
    reconnect: ReconnectPolicy,
    policy: Arc<TimingPolicy>,
    handler: Arc<CrawlHandler>,
    queues: HashMap<Category, JobQueue>,
    seeds: Vec<CrawlTarget>,
}

impl Dispatcher {
    /// Creates a dispatcher
    ///
    /// # Arguments
    ///
    /// * `config` - Validated crawler configuration
    /// * `connector` - Source of store handles
    /// * `crawler` - Performs the actual crawl of a target
    /// * `sink` - Receives successful crawl payloads
    ///
    /// # Returns
    ///
    /// * `Ok(Dispatcher)` - Ready to scan and run jobs
    /// * `Err(CrawlerError)` - A seed is invalid or the HTTP client failed to build
    pub fn new(
        config: &Config,
        connector: Arc<dyn StoreConnector>,
        crawler: Arc<dyn TargetCrawler>,
        sink: Arc<dyn ResultSink>,
    ) -> Result<Self, CrawlerError> {
        let policy = Arc::new(TimingPolicy::from_config(&config.timing));
        let reconnect = ReconnectPolicy {
            attempts: config.store.reconnect_attempts,
            delay: Duration::from_millis(config.store.reconnect_delay_ms),
        };
        let options = QueueOptions {
            poll_interval: Duration::from_millis(config.worker.poll_interval_ms),
            reconnect,
        };

        let seeds = config
            .seeds
            .iter()
            .map(|seed| {
                CrawlTarget::instance(seed)
                    .map_err(|e| ConfigError::InvalidSeed(format!("{}: {}", seed, e)))
            })
            .collect::<Result<Vec<_>, _>>()?;

        let queues = Category::ALL
            .iter()
            .map(|&category| {
                let timeout = policy.timing(category).timeout;
                let queue = JobQueue::new(category, timeout, Arc::clone(&connector), options);
                (category, queue)
            })
            .collect();

        let handler = Arc::new(CrawlHandler {
            policy: Arc::clone(&policy),
            tracker: ErrorTracker::new(Arc::clone(&policy)),
            fetcher: RetryingFetcher::from_config(&config.fetch)?,
            crawler,
            sink,
        });

        Ok(Self {
            connector,
            reconnect,
            policy,
            handler,
            queues,
            seeds,
        })
    }

    /// Creates a dispatcher with the SQLite store, API probe and JSON-lines
    /// output named in `config`
    pub fn from_config(config: &Config) -> Result<Self, CrawlerError> {
        let connector = Arc::new(SqliteConnector::new(&config.store.path));
        let crawler = Arc::new(ApiProbe::new(config.fetch.scheme.clone()));
        let sink = Arc::new(JsonLinesSink::open(&config.output.path)?);
        Self::new(config, connector, crawler, sink)
    }

    pub fn queue(&self, category: Category) -> &JobQueue {
        // Every category is inserted at construction
        &self.queues[&category]
    }

    pub fn policy(&self) -> &TimingPolicy {
        &self.policy
    }

    /// Opens a store handle with the configured reconnect policy
    pub async fn connect(&self) -> StoreResult<Box<dyn Store>> {
        connect_with_retry(self.connector.as_ref(), self.reconnect).await
    }

    /// Submits a job for `target` with the given origin
    ///
    /// Intended for discovery: targets found by other means enter the
    /// rotation once their first job has run.
    pub async fn submit(&self, target: CrawlTarget, origin: JobOrigin) -> StoreResult<Submission> {
        self.queue(target.category()).submit(target, origin).await
    }

    /// Evaluates every known target of `category` and submits the due ones
    pub async fn scan(&self, category: Category, now: DateTime<Utc>) -> Result<ScanReport, CrawlerError> {
        let mut store = self.connect().await?;
        let queue = self.queue(category);
        let mut report = ScanReport::for_category(category);

        let mut seen: HashSet<JobId> = HashSet::new();
        let seeds = match category {
            Category::Instance => self.seeds.clone(),
            _ => Vec::new(),
        };
        let candidates: Vec<CrawlTarget> = seeds
            .into_iter()
            .chain(store.list_targets(category)?)
            .filter(|target| seen.insert(target.job_id()))
            .collect();
        report.candidates = candidates.len();

        for target in candidates {
            let freshness = store.get_freshness(&target)?;
            let error = store.get_error(category, target.base_url(), now)?;

            let origin = match self
                .policy
                .evaluate(category, freshness.as_ref(), error.as_ref(), now)
            {
                Eligibility::Fresh => {
                    report.fresh += 1;
                    continue;
                }
                Eligibility::Suppressed => {
                    report.suppressed += 1;
                    continue;
                }
                Eligibility::Due => JobOrigin::Scheduled,
                Eligibility::DeletionCandidate => {
                    tracing::info!(crawl_target = %target, "No success within the delete threshold, confirming");
                    store.set_pending_deletion(&target, true)?;
                    JobOrigin::DeletionCheck
                }
                Eligibility::PendingDeletion => JobOrigin::DeletionCheck,
            };

            if queue.submit_detached(target, origin).await? {
                if origin == JobOrigin::DeletionCheck {
                    report.deletion_checks += 1;
                } else {
                    report.submitted += 1;
                }
            } else {
                report.duplicates += 1;
            }
        }

        tracing::info!(
            %category,
            candidates = report.candidates,
            submitted = report.submitted,
            duplicates = report.duplicates,
            fresh = report.fresh,
            suppressed = report.suppressed,
            deletion_checks = report.deletion_checks,
            "Scan complete"
        );
        Ok(report)
    }

    /// Scans every category
    pub async fn scan_all(&self, now: DateTime<Utc>) -> Result<ScanReport, CrawlerError> {
        let mut total = ScanReport::default();
        for &category in Category::ALL.iter() {
            total.merge(&self.scan(category, now).await?);
        }
        Ok(total)
    }

    /// Crawls `target` immediately, bypassing timing and error suppression
    ///
    /// The job still goes through its queue, so a target that is already
    /// queued or running is refused rather than crawled twice.
    ///
    /// # Returns
    ///
    /// * `Ok(Value)` - The crawl payload, also routed to the sink
    /// * `Err(CrawlerError::AlreadyScheduled)` - A job for the target exists
    /// * `Err(CrawlerError::CrawlFailed)` - The crawl failed; the error is also recorded
    pub async fn run_manual(&self, target: CrawlTarget) -> Result<Value, CrawlerError> {
        let category = target.category();
        let queue = self.queue(category);

        let handle = match queue.submit(target.clone(), JobOrigin::Manual).await? {
            Submission::Queued(handle) => handle,
            Submission::Duplicate(id) => {
                return Err(CrawlerError::AlreadyScheduled { category, id });
            }
        };

        let id = handle.id().clone();
        let outcome = match queue.run_job(&id, self.handler.as_ref()).await? {
            Some(outcome) => outcome,
            // A worker claimed it first
            None => return Err(CrawlerError::AlreadyScheduled { category, id }),
        };

        match outcome.result {
            CrawlResult::Success(payload) => Ok(payload),
            CrawlResult::TooRecent(age) => Err(CrawlerError::TooRecent {
                target: target.to_string(),
                age_secs: age.num_seconds(),
            }),
            CrawlResult::Failed(failure) => Err(manual_failure(&target, failure)),
        }
    }

    /// Runs `concurrency` workers on one category until shutdown
    pub async fn run_workers(
        &self,
        category: Category,
        concurrency: u32,
        shutdown: watch::Receiver<bool>,
    ) -> Result<(), CrawlerError> {
        tracing::info!(%category, concurrency, "Starting workers");

        let reporter = tokio::spawn(report_failures(
            category,
            self.queue(category).subscribe_failures(),
        ));

        let mut workers = JoinSet::new();
        for _ in 0..concurrency.max(1) {
            let queue = self.queue(category).clone();
            let handler = Arc::clone(&self.handler);
            let shutdown = shutdown.clone();
            workers.spawn(async move { queue.run_worker(handler.as_ref(), shutdown).await });
        }

        let mut first_error = None;
        while let Some(joined) = workers.join_next().await {
            match joined {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    tracing::error!(%category, "Worker stopped: {}", e);
                    first_error.get_or_insert(e);
                }
                Err(e) => tracing::error!(%category, "Worker task aborted: {}", e),
            }
        }

        reporter.abort();

        match first_error {
            Some(e) => Err(e.into()),
            None => Ok(()),
        }
    }

    /// Scans every category each `interval` until shutdown
    ///
    /// A `scan.last.<category>` store key lives for one interval, so several
    /// scheduler processes sharing a store scan each category about once per
    /// interval between them.
    pub async fn run_scheduler(
        &self,
        interval: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<(), CrawlerError> {
        tracing::info!("Scheduler started, scanning every {:?}", interval);

        loop {
            if *shutdown.borrow() {
                break;
            }

            for &category in Category::ALL.iter() {
                match self.scheduled_scan(category, interval).await {
                    Ok(()) => {}
                    Err(e @ CrawlerError::Store(_)) => return Err(e),
                    Err(e) => tracing::error!(%category, "Scan failed: {}", e),
                }
            }

            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        tracing::info!("Scheduler stopped");
        Ok(())
    }

    async fn scheduled_scan(&self, category: Category, interval: Duration) -> Result<(), CrawlerError> {
        let key = format!("scan.last.{}", category);
        let now = Utc::now();

        {
            let mut store = self.connect().await?;
            if store.get(&key, now)?.is_some() {
                tracing::debug!(%category, "Scanned recently by another scheduler, skipping");
                return Ok(());
            }
            store.set(&key, &now.to_rfc3339(), Some(interval), now)?;
        }

        self.scan(category, now).await?;
        Ok(())
    }

    /// Runs queued jobs of `category` until the queue is empty
    pub async fn drain(&self, category: Category) -> Result<Vec<JobOutcome>, CrawlerError> {
        Ok(self.queue(category).drain(self.handler.as_ref()).await?)
    }
}

/// Logs failed and timed-out jobs of one queue until the queue goes away
///
/// Returns how many failures were reported.
async fn report_failures(category: Category, mut failures: broadcast::Receiver<JobFailure>) -> usize {
    let mut reported = 0;
    loop {
        match failures.recv().await {
            Ok(event) => {
                reported += 1;
                tracing::warn!(
                    %category,
                    job_id = %event.job_id,
                    crawl_target = %event.target,
                    class = %event.failure.classification(),
                    "Crawl failed: {}",
                    event.failure
                );
            }
            Err(broadcast::error::RecvError::Lagged(missed)) => {
                tracing::warn!(%category, missed, "Failure reporter fell behind");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
    reported
}

fn manual_failure(target: &CrawlTarget, failure: CrawlFailure) -> CrawlerError {
    CrawlerError::CrawlFailed {
        target: target.to_string(),
        source: failure,
    }
}
