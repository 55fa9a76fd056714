//! Statistics read back from the shared store
//!
//! This module provides the per-category overview printed by `task stats`.

use crate::policy::{Eligibility, TimingPolicy};
use crate::storage::{Store, StoreResult};
use crate::target::Category;
use chrono::{DateTime, Utc};

/// Overview of one category
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CategoryStatistics {
    pub targets: u64,
    /// Known targets without any successful crawl
    pub never_succeeded: u64,
    pub due: u64,
    pub fresh: u64,
    pub suppressed: u64,
    pub deletion_candidates: u64,
    pub pending_deletion: u64,
    /// Unexpired error records
    pub active_errors: u64,
    /// Jobs holding a dedup slot
    pub active_jobs: u64,
}

impl CategoryStatistics {
    fn count(&mut self, eligibility: Eligibility) {
        match eligibility {
            Eligibility::Due => self.due += 1,
            Eligibility::Fresh => self.fresh += 1,
            Eligibility::Suppressed => self.suppressed += 1,
            Eligibility::DeletionCandidate => self.deletion_candidates += 1,
            Eligibility::PendingDeletion => self.pending_deletion += 1,
        }
    }
}

/// Crawl statistics summary
#[derive(Debug, Clone)]
pub struct CrawlStatistics {
    pub generated_at: DateTime<Utc>,
    pub categories: Vec<(Category, CategoryStatistics)>,
}

impl CrawlStatistics {
    pub fn total_targets(&self) -> u64 {
        self.categories.iter().map(|(_, stats)| stats.targets).sum()
    }
}

/// Loads statistics for every category
///
/// Each known target is evaluated with `policy` as a scan at `now` would.
pub fn load_statistics(
    store: &dyn Store,
    policy: &TimingPolicy,
    now: DateTime<Utc>,
) -> StoreResult<CrawlStatistics> {
    let mut categories = Vec::with_capacity(Category::ALL.len());

    for &category in Category::ALL.iter() {
        let mut stats = CategoryStatistics {
            active_errors: store.count_errors(category, now)?,
            active_jobs: store.active_jobs(category)?,
            ..Default::default()
        };

        for target in store.list_targets(category)? {
            let freshness = store.get_freshness(&target)?;
            let error = store.get_error(category, target.base_url(), now)?;

            stats.targets += 1;
            if freshness.as_ref().and_then(|r| r.last_success_at).is_none() {
                stats.never_succeeded += 1;
            }
            stats.count(policy.evaluate(category, freshness.as_ref(), error.as_ref(), now));
        }

        categories.push((category, stats));
    }

    Ok(CrawlStatistics {
        generated_at: now,
        categories,
    })
}

/// Prints statistics to stdout in a formatted manner
pub fn print_statistics(stats: &CrawlStatistics) {
    println!("=== Crawl Statistics ({}) ===\n", stats.generated_at.to_rfc3339());
    println!("Known targets: {}\n", stats.total_targets());

    for (category, s) in &stats.categories {
        println!("{}:", category);
        println!("  Targets: {} ({} never succeeded)", s.targets, s.never_succeeded);
        println!(
            "  Due: {}  Fresh: {}  Suppressed: {}",
            s.due, s.fresh, s.suppressed
        );
        if s.deletion_candidates > 0 || s.pending_deletion > 0 {
            println!(
                "  Deletion candidates: {}  Pending deletion: {}",
                s.deletion_candidates, s.pending_deletion
            );
        }
        println!("  Active errors: {}", s.active_errors);
        println!("  Queued or running jobs: {}", s.active_jobs);
        println!();
    }
}
