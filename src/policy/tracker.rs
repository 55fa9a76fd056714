//! Error tracking with per-category expiry

use crate::crawler::CrawlFailure;
use crate::policy::TimingPolicy;
use crate::state::ErrorRecord;
use crate::storage::{Store, StoreResult};
use crate::target::Category;
use chrono::{DateTime, Utc};
use std::sync::Arc;

/// Records classified failures so repeated fast failures back off naturally
///
/// Re-recording a failure replaces the previous record and restarts its TTL;
/// no failure count is kept.
#[derive(Debug, Clone)]
pub struct ErrorTracker {
    policy: Arc<TimingPolicy>,
}

impl ErrorTracker {
    pub fn new(policy: Arc<TimingPolicy>) -> Self {
        Self { policy }
    }

    /// Persists `failure` against `(category, base_url)` with the category TTL
    pub fn record_error(
        &self,
        store: &mut dyn Store,
        category: Category,
        base_url: &str,
        failure: &CrawlFailure,
        now: DateTime<Utc>,
    ) -> StoreResult<ErrorRecord> {
        let record = ErrorRecord {
            message: failure.to_string(),
            classification: failure.classification(),
            occurred_at: now,
            expires_at: now + self.policy.timing(category).error_ttl,
        };

        store.upsert_error(category, base_url, &record)?;
        tracing::debug!(
            %category,
            base_url,
            classification = %record.classification,
            "Recorded error until {}",
            record.expires_at
        );
        Ok(record)
    }

    /// Returns the unexpired error record, if any
    pub fn last_error(
        &self,
        store: &dyn Store,
        category: Category,
        base_url: &str,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<ErrorRecord>> {
        store.get_error(category, base_url, now)
    }

    pub fn is_recently_failed(
        &self,
        store: &dyn Store,
        category: Category,
        base_url: &str,
        now: DateTime<Utc>,
    ) -> StoreResult<bool> {
        let record = self.last_error(store, category, base_url, now)?;
        Ok(self
            .policy
            .is_suppressed_by_recent_error(record.as_ref(), now))
    }

    pub fn clear(
        &self,
        store: &mut dyn Store,
        category: Category,
        base_url: &str,
    ) -> StoreResult<()> {
        store.clear_error(category, base_url)
    }
}
