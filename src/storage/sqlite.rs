//! SQLite storage implementation
//!
//! This module provides a SQLite-based implementation of the Store trait.
//! Several worker processes open the same database file; write paths run in
//! `IMMEDIATE` transactions so claims and slot reservations are atomic.

use crate::queue::{CrawlJob, JobOrigin};
use crate::state::{ErrorClass, ErrorRecord, FreshnessRecord, JobState};
use crate::storage::schema::initialize_schema;
use crate::storage::traits::{Store, StoreConnector, StoreError, StoreResult};
use crate::target::{Category, CrawlTarget, JobId};
use chrono::{DateTime, TimeZone, Utc};
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// How long a statement waits on a locked database before failing
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Raw `jobs` row: id, base_url, sub_key, origin, enqueued_at, timeout_ms, started_at
type JobRow = (String, String, String, String, i64, i64, Option<i64>);

/// SQLite store backend
pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    /// Opens (and if needed creates) the database at `path`
    ///
    /// # Returns
    ///
    /// * `Ok(SqliteStore)` - Successfully opened/created database
    /// * `Err(StoreError)` - Failed to open database
    pub fn open(path: &Path) -> StoreResult<Self> {
        let conn = Connection::open(path).map_err(|source| StoreError::Connect {
            path: path.display().to_string(),
            source,
        })?;

        conn.busy_timeout(BUSY_TIMEOUT)?;
        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA temp_store = MEMORY;
        ",
        )?;

        initialize_schema(&conn)?;

        Ok(Self { conn })
    }

    /// Creates an in-memory database (for testing)
    #[cfg(test)]
    pub fn open_in_memory() -> StoreResult<Self> {
        let conn = Connection::open_in_memory()?;
        initialize_schema(&conn)?;
        Ok(Self { conn })
    }
}

/// Opens a fresh [`SqliteStore`] per call
#[derive(Debug, Clone)]
pub struct SqliteConnector {
    path: PathBuf,
}

impl SqliteConnector {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl StoreConnector for SqliteConnector {
    fn connect(&self) -> StoreResult<Box<dyn Store>> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        Ok(Box::new(SqliteStore::open(&self.path)?))
    }
}

fn to_millis(at: DateTime<Utc>) -> i64 {
    at.timestamp_millis()
}

fn duration_millis(duration: Duration) -> StoreResult<i64> {
    i64::try_from(duration.as_millis()).map_err(|_| StoreError::DurationOutOfRange(duration))
}

/// `at + duration` in epoch milliseconds
fn millis_after(at: DateTime<Utc>, duration: Duration) -> StoreResult<i64> {
    to_millis(at)
        .checked_add(duration_millis(duration)?)
        .ok_or(StoreError::DurationOutOfRange(duration))
}

fn from_millis(table: &'static str, ms: i64) -> StoreResult<DateTime<Utc>> {
    Utc.timestamp_millis_opt(ms)
        .single()
        .ok_or_else(|| StoreError::Corrupt {
            table,
            message: format!("timestamp out of range: {}", ms),
        })
}

fn sub_key_column(target: &CrawlTarget) -> &str {
    target.sub_key().unwrap_or("")
}

fn target_from_columns(
    table: &'static str,
    category: Category,
    base_url: &str,
    sub_key: &str,
) -> StoreResult<CrawlTarget> {
    let sub_key = if sub_key.is_empty() {
        None
    } else {
        Some(sub_key)
    };
    CrawlTarget::new(category, base_url, sub_key).map_err(|e| StoreError::Corrupt {
        table,
        message: e.to_string(),
    })
}

fn job_from_row(category: Category, row: JobRow) -> StoreResult<CrawlJob> {
    let (id, base_url, sub_key, origin, enqueued_at, timeout_ms, started_at) = row;
    let target = target_from_columns("jobs", category, &base_url, &sub_key)?;
    let origin = JobOrigin::from_db_string(&origin).ok_or_else(|| StoreError::Corrupt {
        table: "jobs",
        message: format!("unknown origin '{}'", origin),
    })?;

    Ok(CrawlJob {
        id: JobId::from_raw(id),
        target,
        origin,
        enqueued_at: from_millis("jobs", enqueued_at)?,
        timeout: Duration::from_millis(u64::try_from(timeout_ms).map_err(|_| {
            StoreError::Corrupt {
                table: "jobs",
                message: format!("negative timeout: {}", timeout_ms),
            }
        })?),
        started_at: started_at
            .map(|ms| from_millis("jobs", ms))
            .transpose()?,
    })
}

fn read_job_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<JobRow> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
        row.get(6)?,
    ))
}

impl Store for SqliteStore {
    // ===== Key/Value =====

    fn get(&self, key: &str, now: DateTime<Utc>) -> StoreResult<Option<String>> {
        let value = self
            .conn
            .query_row(
                "SELECT value FROM kv WHERE key = ?1 AND (expires_at IS NULL OR expires_at > ?2)",
                params![key, to_millis(now)],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }

    fn set(
        &mut self,
        key: &str,
        value: &str,
        ttl: Option<Duration>,
        now: DateTime<Utc>,
    ) -> StoreResult<()> {
        let expires_at = ttl.map(|ttl| millis_after(now, ttl)).transpose()?;
        self.conn.execute(
            "INSERT INTO kv (key, value, expires_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, expires_at = excluded.expires_at",
            params![key, value, expires_at],
        )?;
        Ok(())
    }

    // ===== Error Records =====

    fn upsert_error(
        &mut self,
        category: Category,
        base_url: &str,
        record: &ErrorRecord,
    ) -> StoreResult<()> {
        self.conn.execute(
            "INSERT INTO errors (category, base_url, message, classification, occurred_at, expires_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(category, base_url) DO UPDATE SET
                message = excluded.message,
                classification = excluded.classification,
                occurred_at = excluded.occurred_at,
                expires_at = excluded.expires_at",
            params![
                category.as_str(),
                base_url,
                record.message,
                record.classification.to_db_string(),
                to_millis(record.occurred_at),
                to_millis(record.expires_at),
            ],
        )?;
        Ok(())
    }

    fn get_error(
        &self,
        category: Category,
        base_url: &str,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<ErrorRecord>> {
        let row: Option<(String, String, i64, i64)> = self
            .conn
            .query_row(
                "SELECT message, classification, occurred_at, expires_at FROM errors
                 WHERE category = ?1 AND base_url = ?2 AND expires_at > ?3",
                params![category.as_str(), base_url, to_millis(now)],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
            )
            .optional()?;

        let Some((message, classification, occurred_at, expires_at)) = row else {
            return Ok(None);
        };

        let classification =
            ErrorClass::from_db_string(&classification).ok_or_else(|| StoreError::Corrupt {
                table: "errors",
                message: format!("unknown classification '{}'", classification),
            })?;

        Ok(Some(ErrorRecord {
            message,
            classification,
            occurred_at: from_millis("errors", occurred_at)?,
            expires_at: from_millis("errors", expires_at)?,
        }))
    }

    fn clear_error(&mut self, category: Category, base_url: &str) -> StoreResult<()> {
        self.conn.execute(
            "DELETE FROM errors WHERE category = ?1 AND base_url = ?2",
            params![category.as_str(), base_url],
        )?;
        Ok(())
    }

    fn count_errors(&self, category: Category, now: DateTime<Utc>) -> StoreResult<u64> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM errors WHERE category = ?1 AND expires_at > ?2",
            params![category.as_str(), to_millis(now)],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    // ===== Freshness =====

    fn get_freshness(&self, target: &CrawlTarget) -> StoreResult<Option<FreshnessRecord>> {
        let row: Option<(i64, Option<i64>, bool)> = self
            .conn
            .query_row(
                "SELECT last_crawl_at, last_success_at, pending_deletion FROM freshness
                 WHERE category = ?1 AND base_url = ?2 AND sub_key = ?3",
                params![
                    target.category().as_str(),
                    target.base_url(),
                    sub_key_column(target)
                ],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .optional()?;

        let Some((last_crawl_at, last_success_at, pending_deletion)) = row else {
            return Ok(None);
        };

        Ok(Some(FreshnessRecord {
            last_crawl_at: from_millis("freshness", last_crawl_at)?,
            last_success_at: last_success_at
                .map(|ms| from_millis("freshness", ms))
                .transpose()?,
            pending_deletion,
        }))
    }

    fn record_crawl(
        &mut self,
        target: &CrawlTarget,
        crawled_at: DateTime<Utc>,
        succeeded: bool,
    ) -> StoreResult<()> {
        let crawled_at = to_millis(crawled_at);
        let success_at = succeeded.then_some(crawled_at);

        self.conn.execute(
            "INSERT INTO freshness (category, base_url, sub_key, last_crawl_at, last_success_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(category, base_url, sub_key) DO UPDATE SET
                last_crawl_at = MAX(last_crawl_at, excluded.last_crawl_at),
                last_success_at = CASE
                    WHEN excluded.last_success_at IS NULL THEN last_success_at
                    ELSE MAX(COALESCE(last_success_at, 0), excluded.last_success_at)
                END",
            params![
                target.category().as_str(),
                target.base_url(),
                sub_key_column(target),
                crawled_at,
                success_at,
            ],
        )?;
        Ok(())
    }

    fn set_pending_deletion(&mut self, target: &CrawlTarget, pending: bool) -> StoreResult<()> {
        self.conn.execute(
            "UPDATE freshness SET pending_deletion = ?4
             WHERE category = ?1 AND base_url = ?2 AND sub_key = ?3",
            params![
                target.category().as_str(),
                target.base_url(),
                sub_key_column(target),
                pending,
            ],
        )?;
        Ok(())
    }

    fn list_targets(&self, category: Category) -> StoreResult<Vec<CrawlTarget>> {
        let mut stmt = self.conn.prepare(
            "SELECT base_url, sub_key FROM freshness WHERE category = ?1 ORDER BY base_url, sub_key",
        )?;

        let rows = stmt
            .query_map(params![category.as_str()], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        rows.iter()
            .map(|(base_url, sub_key)| {
                target_from_columns("freshness", category, base_url, sub_key)
            })
            .collect()
    }

    fn remove_target(&mut self, target: &CrawlTarget) -> StoreResult<()> {
        let tx = self.conn.transaction()?;
        tx.execute(
            "DELETE FROM freshness WHERE category = ?1 AND base_url = ?2 AND sub_key = ?3",
            params![
                target.category().as_str(),
                target.base_url(),
                sub_key_column(target)
            ],
        )?;
        // Errors are keyed by base URL only; sub-keyed targets share them
        if target.sub_key().is_none() {
            tx.execute(
                "DELETE FROM errors WHERE category = ?1 AND base_url = ?2",
                params![target.category().as_str(), target.base_url()],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    // ===== Job Slots =====

    fn try_enqueue(&mut self, job: &CrawlJob, now: DateTime<Utc>) -> StoreResult<bool> {
        let category = job.target.category().as_str();
        let timeout_ms = duration_millis(job.timeout)?;
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;

        let reclaimed = tx.execute(
            "DELETE FROM jobs WHERE category = ?1 AND id = ?2 AND state = ?3
             AND started_at IS NOT NULL AND started_at + timeout_ms <= ?4",
            params![
                category,
                job.id.as_str(),
                JobState::Running.to_db_string(),
                to_millis(now)
            ],
        )?;
        if reclaimed > 0 {
            tracing::warn!(job_id = %job.id, category, "Reclaimed abandoned job slot");
        }

        let inserted = tx.execute(
            "INSERT OR IGNORE INTO jobs
             (category, id, base_url, sub_key, origin, state, enqueued_at, timeout_ms)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                category,
                job.id.as_str(),
                job.target.base_url(),
                sub_key_column(&job.target),
                job.origin.to_db_string(),
                JobState::Queued.to_db_string(),
                to_millis(job.enqueued_at),
                timeout_ms,
            ],
        )?;

        tx.commit()?;
        Ok(inserted == 1)
    }

    fn claim_next(
        &mut self,
        category: Category,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<CrawlJob>> {
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;

        let row = tx
            .query_row(
                "UPDATE jobs SET state = ?2, started_at = ?4
                 WHERE category = ?1 AND id = (
                    SELECT id FROM jobs WHERE category = ?1 AND state = ?3
                    ORDER BY enqueued_at, id LIMIT 1
                 )
                 RETURNING id, base_url, sub_key, origin, enqueued_at, timeout_ms, started_at",
                params![
                    category.as_str(),
                    JobState::Running.to_db_string(),
                    JobState::Queued.to_db_string(),
                    to_millis(now)
                ],
                read_job_row,
            )
            .optional()?;

        tx.commit()?;
        row.map(|row| job_from_row(category, row)).transpose()
    }

    fn claim(
        &mut self,
        category: Category,
        id: &JobId,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<CrawlJob>> {
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;

        let row = tx
            .query_row(
                "UPDATE jobs SET state = ?3, started_at = ?5
                 WHERE category = ?1 AND id = ?2 AND state = ?4
                 RETURNING id, base_url, sub_key, origin, enqueued_at, timeout_ms, started_at",
                params![
                    category.as_str(),
                    id.as_str(),
                    JobState::Running.to_db_string(),
                    JobState::Queued.to_db_string(),
                    to_millis(now)
                ],
                read_job_row,
            )
            .optional()?;

        tx.commit()?;
        row.map(|row| job_from_row(category, row)).transpose()
    }

    fn holds_slot(&self, job: &CrawlJob) -> StoreResult<bool> {
        let Some(started_at) = job.started_at else {
            return Ok(false);
        };
        let held: Option<i64> = self
            .conn
            .query_row(
                "SELECT 1 FROM jobs
                 WHERE category = ?1 AND id = ?2 AND state = ?3 AND started_at = ?4",
                params![
                    job.target.category().as_str(),
                    job.id.as_str(),
                    JobState::Running.to_db_string(),
                    to_millis(started_at)
                ],
                |row| row.get(0),
            )
            .optional()?;
        Ok(held.is_some())
    }

    fn release(&mut self, job: &CrawlJob) -> StoreResult<bool> {
        let Some(started_at) = job.started_at else {
            return Ok(false);
        };
        let removed = self.conn.execute(
            "DELETE FROM jobs
             WHERE category = ?1 AND id = ?2 AND state = ?3 AND started_at = ?4",
            params![
                job.target.category().as_str(),
                job.id.as_str(),
                JobState::Running.to_db_string(),
                to_millis(started_at)
            ],
        )?;
        Ok(removed > 0)
    }

    fn active_jobs(&self, category: Category) -> StoreResult<u64> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM jobs WHERE category = ?1",
            params![category.as_str()],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }
}
