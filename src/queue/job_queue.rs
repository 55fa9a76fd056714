//! Deduplicating, timeout-bounded job queue for one crawl category
//!
//! Queue state lives in the shared store, so any number of worker processes
//! can pull from the same category. A job id occupies its dedup slot from
//! submission until its outcome has been handled; terminal jobs are removed.

use crate::crawler::CrawlFailure;
use crate::queue::job::{CrawlJob, CrawlResult, JobFailure, JobHandler, JobOrigin, JobOutcome};
use crate::storage::{
    connect_with_retry, ReconnectPolicy, StoreConnector, StoreError, StoreHandle, StoreResult,
};
use crate::target::{Category, CrawlTarget, JobId};
use chrono::Utc;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::{broadcast, oneshot, watch};

/// Capacity of the failure event channel; slow subscribers lose the oldest events
const FAILURE_CHANNEL_CAPACITY: usize = 256;

/// Polling and reconnect behaviour of a queue
#[derive(Debug, Clone, Copy)]
pub struct QueueOptions {
    /// Sleep between polls of an empty queue
    pub poll_interval: Duration,
    pub reconnect: ReconnectPolicy,
}

impl Default for QueueOptions {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            reconnect: ReconnectPolicy::default(),
        }
    }
}

/// Result of a submission
#[derive(Debug)]
pub enum Submission {
    Queued(JobHandle),
    /// A job with the same id is already queued or running
    Duplicate(JobId),
}

impl Submission {
    pub fn is_queued(&self) -> bool {
        matches!(self, Self::Queued(_))
    }

    pub fn job_id(&self) -> &JobId {
        match self {
            Self::Queued(handle) => handle.id(),
            Self::Duplicate(id) => id,
        }
    }
}

/// Result channel of one submitted job
///
/// Resolves when the job finishes in this process. If another worker process
/// runs the job, the outcome is only visible through the store.
#[derive(Debug)]
pub struct JobHandle {
    id: JobId,
    rx: oneshot::Receiver<JobOutcome>,
}

impl JobHandle {
    pub fn id(&self) -> &JobId {
        &self.id
    }

    pub async fn outcome(self) -> Option<JobOutcome> {
        self.rx.await.ok()
    }
}

struct QueueInner {
    category: Category,
    timeout: Duration,
    connector: Arc<dyn StoreConnector>,
    options: QueueOptions,
    waiters: Mutex<Waiters>,
    failures: broadcast::Sender<JobFailure>,
}

/// Job queue of one category; cheap to clone
#[derive(Clone)]
pub struct JobQueue {
    inner: Arc<QueueInner>,
}

impl JobQueue {
    /// Creates a queue
    ///
    /// # Arguments
    ///
    /// * `category` - Category of every job in this queue
    /// * `timeout` - Wall-time budget given to each job
    /// * `connector` - Source of per-job store handles
    /// * `options` - Polling and reconnect behaviour
    pub fn new(
        category: Category,
        timeout: Duration,
        connector: Arc<dyn StoreConnector>,
        options: QueueOptions,
    ) -> Self {
        let (failures, _) = broadcast::channel(FAILURE_CHANNEL_CAPACITY);
        Self {
            inner: Arc::new(QueueInner {
                category,
                timeout,
                connector,
                options,
                waiters: Mutex::new(HashMap::new()),
                failures,
            }),
        }
    }

    pub fn category(&self) -> Category {
        self.inner.category
    }

    pub fn timeout(&self) -> Duration {
        self.inner.timeout
    }

    /// Subscribes to failed and timed-out jobs processed by this queue instance
    pub fn subscribe_failures(&self) -> broadcast::Receiver<JobFailure> {
        self.inner.failures.subscribe()
    }

    async fn connect(&self) -> StoreResult<StoreHandle> {
        connect_with_retry(self.inner.connector.as_ref(), self.inner.options.reconnect).await
    }

    /// Queues a job for `target` unless one is already queued or running
    ///
    /// A duplicate is expected from periodic scans and is not an error. The
    /// returned handle only resolves if this process runs the job; a handle
    /// for a job that another process picks up should be dropped; its waiter
    /// is swept on the next submission.
    pub async fn submit(&self, target: CrawlTarget, origin: JobOrigin) -> StoreResult<Submission> {
        let (tx, rx) = oneshot::channel();
        let result = self.enqueue(target, origin, Some(tx)).await;

        match result {
            Ok((id, true)) => Ok(Submission::Queued(JobHandle { id, rx })),
            Ok((id, false)) => {
                drop(rx);
                self.prune_waiters(&id);
                Ok(Submission::Duplicate(id))
            }
            Err((id, e)) => {
                drop(rx);
                self.prune_waiters(&id);
                Err(e)
            }
        }
    }

    /// Queues a job without a result channel
    ///
    /// Used by scans, whose jobs usually finish in another worker process.
    /// Returns whether the job was queued.
    pub async fn submit_detached(&self, target: CrawlTarget, origin: JobOrigin) -> StoreResult<bool> {
        self.enqueue(target, origin, None)
            .await
            .map(|(_, queued)| queued)
            .map_err(|(_, e)| e)
    }

    async fn enqueue(
        &self,
        target: CrawlTarget,
        origin: JobOrigin,
        waiter: Option<oneshot::Sender<JobOutcome>>,
    ) -> Result<(JobId, bool), (JobId, StoreError)> {
        debug_assert_eq!(target.category(), self.inner.category);

        let now = Utc::now();
        let job = CrawlJob::new(target, origin, self.inner.timeout, now);
        let mut store = self.connect().await.map_err(|e| (job.id.clone(), e))?;

        // Register before the slot is visible to workers so a fast worker
        // cannot finish the job ahead of us.
        if let Some(tx) = waiter {
            let mut waiters = self.lock_waiters();
            sweep_closed(&mut waiters);
            waiters.entry(job.id.clone()).or_default().push(tx);
        }

        let queued = store
            .try_enqueue(&job, now)
            .map_err(|e| (job.id.clone(), e))?;

        if queued {
            tracing::debug!(
                job_id = %job.id,
                category = %self.inner.category,
                %origin,
                "Job queued"
            );
        } else {
            tracing::debug!(
                job_id = %job.id,
                category = %self.inner.category,
                "Job already queued or running, skipping"
            );
        }
        Ok((job.id, queued))
    }

    /// Claims and executes the oldest queued job
    ///
    /// # Returns
    ///
    /// * `Ok(Some(JobOutcome))` - A job was executed
    /// * `Ok(None)` - The queue is empty
    /// * `Err(StoreError)` - The store could not be reached
    pub async fn process_next<H>(&self, handler: &H) -> StoreResult<Option<JobOutcome>>
    where
        H: JobHandler + ?Sized,
    {
        let mut store = self.connect().await?;
        let Some(job) = store.claim_next(self.inner.category, Utc::now())? else {
            return Ok(None);
        };
        Ok(Some(self.execute(job, store, handler).await))
    }

    /// Claims and executes one specific queued job
    ///
    /// Returns `Ok(None)` if the job is not queued, e.g. because another
    /// worker already claimed it.
    pub async fn run_job<H>(&self, id: &JobId, handler: &H) -> StoreResult<Option<JobOutcome>>
    where
        H: JobHandler + ?Sized,
    {
        let mut store = self.connect().await?;
        let Some(job) = store.claim(self.inner.category, id, Utc::now())? else {
            return Ok(None);
        };
        Ok(Some(self.execute(job, store, handler).await))
    }

    /// Processes jobs until the queue is empty
    pub async fn drain<H>(&self, handler: &H) -> StoreResult<Vec<JobOutcome>>
    where
        H: JobHandler + ?Sized,
    {
        let mut outcomes = Vec::new();
        while let Some(outcome) = self.process_next(handler).await? {
            outcomes.push(outcome);
        }
        Ok(outcomes)
    }

    /// Runs jobs until `shutdown` turns true or its sender is dropped
    ///
    /// Job failures never end the loop; only a store that stays unreachable
    /// does.
    pub async fn run_worker<H>(
        &self,
        handler: &H,
        mut shutdown: watch::Receiver<bool>,
    ) -> StoreResult<()>
    where
        H: JobHandler + ?Sized,
    {
        tracing::info!(category = %self.inner.category, "Worker started");

        loop {
            if *shutdown.borrow() {
                break;
            }

            if self.process_next(handler).await?.is_some() {
                continue;
            }

            tokio::select! {
                _ = tokio::time::sleep(self.inner.options.poll_interval) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        tracing::info!(category = %self.inner.category, "Worker stopped");
        Ok(())
    }

    /// Runs a claimed job and settles its outcome
    ///
    /// The store handle lives exactly as long as the job and is dropped on
    /// every path.
    async fn execute<H>(&self, job: CrawlJob, mut store: StoreHandle, handler: &H) -> JobOutcome
    where
        H: JobHandler + ?Sized,
    {
        tracing::debug!(job_id = %job.id, origin = %job.origin, "Running job");

        let result = match tokio::time::timeout(job.timeout, handler.run(&job, &mut *store)).await {
            Ok(result) => result,
            Err(_) => CrawlResult::Failed(CrawlFailure::TimeoutExceeded {
                timeout: job.timeout,
            }),
        };

        let outcome = JobOutcome {
            job,
            result,
            finished_at: Utc::now(),
        };
        log_outcome(&outcome);

        // An overrun job whose slot was reclaimed must not write over the
        // state of the claim that replaced it, nor resolve its waiters.
        let owned = match store.holds_slot(&outcome.job) {
            Ok(owned) => owned,
            Err(e) => {
                tracing::error!(job_id = %outcome.job.id, "Failed to check job slot: {}", e);
                true
            }
        };

        let waiters = if owned {
            handler.finished(&outcome, &mut *store);
            // Take waiters before freeing the slot: anyone registering after
            // the release belongs to the next job with this id.
            self.lock_waiters().remove(&outcome.job.id)
        } else {
            tracing::warn!(
                job_id = %outcome.job.id,
                "Job slot was taken over by a newer submission, discarding outcome"
            );
            None
        };

        if let Err(e) = store.release(&outcome.job) {
            tracing::error!(
                job_id = %outcome.job.id,
                "Failed to release job slot: {}",
                e
            );
        }
        drop(store);

        if let Some(failure) = outcome.result.failure() {
            // No subscribers is fine
            let _ = self.inner.failures.send(JobFailure {
                job_id: outcome.job.id.clone(),
                target: outcome.job.target.clone(),
                failure: failure.clone(),
            });
        }

        for tx in waiters.into_iter().flatten() {
            let _ = tx.send(outcome.clone());
        }

        outcome
    }

    fn lock_waiters(&self) -> MutexGuard<'_, Waiters> {
        self.inner
            .waiters
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Drops waiters whose handle was discarded
    fn prune_waiters(&self, id: &JobId) {
        let mut waiters = self.lock_waiters();
        if let Some(list) = waiters.get_mut(id) {
            list.retain(|tx| !tx.is_closed());
            if list.is_empty() {
                waiters.remove(id);
            }
        }
    }
}

type Waiters = HashMap<JobId, Vec<oneshot::Sender<JobOutcome>>>;

/// Drops waiters whose handle was discarded, across all job ids
fn sweep_closed(waiters: &mut Waiters) {
    waiters.retain(|_, list| {
        list.retain(|tx| !tx.is_closed());
        !list.is_empty()
    });
}

/// Failures are only logged at debug level here; operators see them through
/// the failure subscription.
fn log_outcome(outcome: &JobOutcome) {
    let job = &outcome.job;
    match &outcome.result {
        CrawlResult::Success(_) => {
            tracing::info!(job_id = %job.id, category = %job.target.category(), "Job succeeded");
        }
        CrawlResult::TooRecent(age) => {
            tracing::info!(
                job_id = %job.id,
                category = %job.target.category(),
                "Skipped, crawled {}m ago",
                age.num_minutes()
            );
        }
        CrawlResult::Failed(failure) => {
            tracing::debug!(
                job_id = %job.id,
                category = %job.target.category(),
                state = %outcome.state(),
                "Job ended: {}",
                failure
            );
        }
    }
}
