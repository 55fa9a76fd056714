//! Storage traits and error types
//!
//! This module defines the trait interface for the shared store and the
//! connector that hands out one store handle per job.

use crate::queue::CrawlJob;
use crate::state::{ErrorRecord, FreshnessRecord};
use crate::target::{Category, CrawlTarget, JobId};
use chrono::{DateTime, Utc};
use std::time::Duration;
use thiserror::Error;

/// Errors that can occur during storage operations
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Failed to connect to store at {path}: {source}")]
    Connect {
        path: String,
        source: rusqlite::Error,
    },

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Duration of {0:?} does not fit the store's millisecond columns")]
    DurationOutOfRange(Duration),

    #[error("Corrupt row in {table}: {message}")]
    Corrupt { table: &'static str, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for storage operations
pub type StoreResult<T> = Result<T, StoreError>;

/// A single open handle to the shared store
///
/// Handles are not shared between concurrent jobs. Each single-key write is
/// atomic at the store level; the crawler does no locking of its own on top.
pub trait Store: Send {
    // ===== Key/Value =====

    /// Reads a value, ignoring entries whose TTL has passed at `now`
    fn get(&self, key: &str, now: DateTime<Utc>) -> StoreResult<Option<String>>;

    /// Writes a value, optionally expiring `ttl` after `now`
    fn set(
        &mut self,
        key: &str,
        value: &str,
        ttl: Option<Duration>,
        now: DateTime<Utc>,
    ) -> StoreResult<()>;

    // ===== Error Records =====

    /// Inserts or replaces the error record of `(category, base_url)`
    fn upsert_error(
        &mut self,
        category: Category,
        base_url: &str,
        record: &ErrorRecord,
    ) -> StoreResult<()>;

    /// Gets the error record if it has not expired at `now`
    fn get_error(
        &self,
        category: Category,
        base_url: &str,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<ErrorRecord>>;

    fn clear_error(&mut self, category: Category, base_url: &str) -> StoreResult<()>;

    /// Counts unexpired error records of a category
    fn count_errors(&self, category: Category, now: DateTime<Utc>) -> StoreResult<u64>;

    // ===== Freshness =====

    fn get_freshness(&self, target: &CrawlTarget) -> StoreResult<Option<FreshnessRecord>>;

    /// Records a completed crawl
    ///
    /// `last_crawl_at` never moves backwards; `last_success_at` is only
    /// touched when `succeeded` is true.
    fn record_crawl(
        &mut self,
        target: &CrawlTarget,
        crawled_at: DateTime<Utc>,
        succeeded: bool,
    ) -> StoreResult<()>;

    fn set_pending_deletion(&mut self, target: &CrawlTarget, pending: bool) -> StoreResult<()>;

    /// Lists every target of a category with a freshness record
    fn list_targets(&self, category: Category) -> StoreResult<Vec<CrawlTarget>>;

    /// Deletes all state kept for a target
    fn remove_target(&mut self, target: &CrawlTarget) -> StoreResult<()>;

    // ===== Job Slots =====

    /// Reserves the dedup slot of a job and queues it
    ///
    /// Returns false if a job with the same id is already queued or running.
    /// A running job whose timeout has elapsed at `now` is considered abandoned
    /// and its slot is taken over.
    fn try_enqueue(&mut self, job: &CrawlJob, now: DateTime<Utc>) -> StoreResult<bool>;

    /// Atomically moves the oldest queued job of a category to running
    fn claim_next(&mut self, category: Category, now: DateTime<Utc>)
        -> StoreResult<Option<CrawlJob>>;

    /// Atomically moves a specific queued job to running
    fn claim(
        &mut self,
        category: Category,
        id: &JobId,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<CrawlJob>>;

    /// Whether the claim behind `job` still holds its dedup slot
    ///
    /// False once the slot was reclaimed as abandoned, or for a job that was
    /// never claimed.
    fn holds_slot(&self, job: &CrawlJob) -> StoreResult<bool>;

    /// Frees the dedup slot of a finished job
    ///
    /// Only the running row of this claim is removed. A row under the same id
    /// that was queued or claimed after the slot was reclaimed belongs to a
    /// later submission and is left alone. Returns whether a row was removed.
    fn release(&mut self, job: &CrawlJob) -> StoreResult<bool>;

    /// Counts jobs holding a slot (queued or running)
    fn active_jobs(&self, category: Category) -> StoreResult<u64>;
}

/// Opens store handles
///
/// Every job acquires its own handle at start; dropping the handle closes it.
pub trait StoreConnector: Send + Sync {
    fn connect(&self) -> StoreResult<Box<dyn Store>>;
}
