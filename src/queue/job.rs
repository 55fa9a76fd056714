//! Crawl job types

use crate::crawler::CrawlFailure;
use crate::state::JobState;
use crate::storage::Store;
use crate::target::{CrawlTarget, JobId};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::fmt;
use std::time::Duration;

/// Why a job was submitted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobOrigin {
    /// Periodic scan of aged targets
    Scheduled,
    /// Operator request; bypasses timing and error suppression
    Manual,
    /// Last crawl before a quiet target is removed
    DeletionCheck,
}

impl JobOrigin {
    /// Whether the job skips the too-recent check at execution time
    pub fn is_forced(&self) -> bool {
        !matches!(self, Self::Scheduled)
    }

    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::Scheduled => "scheduled",
            Self::Manual => "manual",
            Self::DeletionCheck => "deletion_check",
        }
    }

    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "scheduled" => Some(Self::Scheduled),
            "manual" => Some(Self::Manual),
            "deletion_check" => Some(Self::DeletionCheck),
            _ => None,
        }
    }
}

impl fmt::Display for JobOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.to_db_string())
    }
}

/// A unit of scheduled work
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrawlJob {
    /// Dedup key, derived from the target
    pub id: JobId,
    pub target: CrawlTarget,
    pub origin: JobOrigin,
    pub enqueued_at: DateTime<Utc>,
    /// Upper bound on the job's wall time once running
    pub timeout: Duration,
    /// Set when a worker claims the job; identifies that claim of the slot
    pub started_at: Option<DateTime<Utc>>,
}

impl CrawlJob {
    pub fn new(
        target: CrawlTarget,
        origin: JobOrigin,
        timeout: Duration,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: target.job_id(),
            target,
            origin,
            enqueued_at: now,
            timeout,
            started_at: None,
        }
    }
}

/// Outcome of one job execution
#[derive(Debug, Clone)]
pub enum CrawlResult {
    /// Payload for the output sink
    Success(Value),
    /// Skipped; the target was crawled this long ago
    TooRecent(chrono::Duration),
    Failed(CrawlFailure),
}

impl CrawlResult {
    /// Terminal job state this result leads to
    pub fn state(&self) -> JobState {
        match self {
            Self::Success(_) => JobState::Succeeded,
            Self::TooRecent(_) => JobState::TooRecent,
            Self::Failed(CrawlFailure::TimeoutExceeded { .. }) => JobState::TimedOut,
            Self::Failed(_) => JobState::Failed,
        }
    }

    pub fn failure(&self) -> Option<&CrawlFailure> {
        match self {
            Self::Failed(failure) => Some(failure),
            _ => None,
        }
    }
}

/// A finished job with its result
#[derive(Debug, Clone)]
pub struct JobOutcome {
    pub job: CrawlJob,
    pub result: CrawlResult,
    pub finished_at: DateTime<Utc>,
}

impl JobOutcome {
    pub fn state(&self) -> JobState {
        self.result.state()
    }
}

/// Failure event published by a queue
#[derive(Debug, Clone)]
pub struct JobFailure {
    pub job_id: JobId,
    pub target: CrawlTarget,
    pub failure: CrawlFailure,
}

/// Executes dequeued jobs
///
/// `run` does the work and may be cut short by the job timeout. `finished`
/// is called for every outcome, timeouts included, with the same store handle
/// while the job still holds its dedup slot. It is skipped when the slot was
/// reclaimed as abandoned and claimed by a newer submission.
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn run(&self, job: &CrawlJob, store: &mut dyn Store) -> CrawlResult;

    fn finished(&self, outcome: &JobOutcome, store: &mut dyn Store);
}
