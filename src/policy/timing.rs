//! Crawl timing policy
//!
//! Freshness and error suppression are evaluated independently and a target is
//! only scheduled when it is aged *and* not suppressed. Error TTLs never exceed
//! the aged threshold, so an error delays a rescan but never blocks it.

use crate::config::{CategoryTimingConfig, TimingConfig, MAX_THRESHOLD_HOURS};
use crate::state::{ErrorRecord, FreshnessRecord};
use crate::target::Category;
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;

/// Thresholds of one category
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CategoryTiming {
    /// Upper bound on one job's wall time
    pub timeout: std::time::Duration,
    /// Time since last crawl before the target is due
    pub aged: Duration,
    /// Time since last success before the target is confirmed and removed
    pub delete: Option<Duration>,
    /// Lifetime of an error record
    pub error_ttl: Duration,
    /// Scheduled jobs for targets crawled more recently than this are skipped
    pub min_interval: Duration,
}

impl From<&CategoryTimingConfig> for CategoryTiming {
    fn from(config: &CategoryTimingConfig) -> Self {
        Self {
            timeout: std::time::Duration::from_secs(config.timeout_secs),
            aged: hours(config.aged_hours),
            delete: config.delete_hours.map(hours),
            error_ttl: hours(config.error_ttl_hours),
            min_interval: hours(config.min_interval_hours),
        }
    }
}

/// Converts configured hours, clamped to the longest threshold validation accepts
fn hours(value: u64) -> Duration {
    let clamped = u32::try_from(value).map_or(MAX_THRESHOLD_HOURS, |h| h.min(MAX_THRESHOLD_HOURS));
    Duration::hours(i64::from(clamped))
}

/// Outcome of evaluating one target during a scan
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Eligibility {
    /// Aged and not suppressed: schedule a normal crawl
    Due,
    /// Crawled within the aged threshold
    Fresh,
    /// An unexpired error record exists
    Suppressed,
    /// No success for the delete threshold: schedule one confirmation crawl
    DeletionCandidate,
    /// Already marked, confirmation crawl not yet resolved
    PendingDeletion,
}

/// Per-category timing decisions
#[derive(Debug, Clone)]
pub struct TimingPolicy {
    categories: HashMap<Category, CategoryTiming>,
}

impl TimingPolicy {
    /// Builds a policy from explicit per-category timings
    ///
    /// Categories missing from `timings` fall back to the defaults.
    pub fn new(timings: impl IntoIterator<Item = (Category, CategoryTiming)>) -> Self {
        let mut policy = Self::from_config(&TimingConfig::default());
        policy.categories.extend(timings);
        policy
    }

    pub fn from_config(config: &TimingConfig) -> Self {
        let categories = Category::ALL
            .iter()
            .map(|&category| (category, config.for_category(category).into()))
            .collect();
        Self { categories }
    }

    pub fn timing(&self, category: Category) -> &CategoryTiming {
        // Every category is inserted at construction
        &self.categories[&category]
    }

    /// True when the target was never crawled or its last crawl is at least
    /// `aged` old.
    pub fn should_recrawl(
        &self,
        category: Category,
        freshness: Option<&FreshnessRecord>,
        now: DateTime<Utc>,
    ) -> bool {
        match freshness {
            None => true,
            Some(record) => now - record.last_crawl_at >= self.timing(category).aged,
        }
    }

    /// True when the category has a delete threshold and the last success is
    /// at least that old
    ///
    /// Targets that never succeeded are not candidates: nothing was ever
    /// published for them.
    pub fn should_mark_for_deletion(
        &self,
        category: Category,
        freshness: Option<&FreshnessRecord>,
        now: DateTime<Utc>,
    ) -> bool {
        let Some(threshold) = self.timing(category).delete else {
            return false;
        };

        freshness
            .and_then(|record| record.last_success_at)
            .map(|last_success| now - last_success >= threshold)
            .unwrap_or(false)
    }

    /// True while an unexpired error record exists
    pub fn is_suppressed_by_recent_error(
        &self,
        error: Option<&ErrorRecord>,
        now: DateTime<Utc>,
    ) -> bool {
        error.map(|record| record.is_active(now)).unwrap_or(false)
    }

    /// Age of the last crawl when it falls inside the minimum interval
    pub fn is_too_recent(
        &self,
        category: Category,
        freshness: Option<&FreshnessRecord>,
        now: DateTime<Utc>,
    ) -> Option<Duration> {
        let age = now - freshness?.last_crawl_at;
        (age < self.timing(category).min_interval).then_some(age)
    }

    /// Combines the rules for a scan
    ///
    /// Deletion is checked first and ignores error suppression: a target that
    /// keeps failing is exactly the one that needs its confirmation crawl.
    pub fn evaluate(
        &self,
        category: Category,
        freshness: Option<&FreshnessRecord>,
        error: Option<&ErrorRecord>,
        now: DateTime<Utc>,
    ) -> Eligibility {
        if freshness.map(|r| r.pending_deletion).unwrap_or(false) {
            return Eligibility::PendingDeletion;
        }

        if self.should_mark_for_deletion(category, freshness, now) {
            return Eligibility::DeletionCandidate;
        }

        if !self.should_recrawl(category, freshness, now) {
            return Eligibility::Fresh;
        }

        if self.is_suppressed_by_recent_error(error, now) {
            return Eligibility::Suppressed;
        }

        Eligibility::Due
    }
}

impl Default for TimingPolicy {
    fn default() -> Self {
        Self::from_config(&TimingConfig::default())
    }
}
