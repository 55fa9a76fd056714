//! Storage module for the shared crawl store
//!
//! This module handles all persistent state shared between worker processes:
//! - Freshness records driving recrawl and deletion decisions
//! - Error records with their expiry
//! - Dedup slots of queued and running jobs
//! - A small key/value area with optional TTL

mod schema;
mod sqlite;
mod traits;

pub use sqlite::{SqliteConnector, SqliteStore};
pub use traits::{Store, StoreConnector, StoreError, StoreResult};

use std::time::Duration;

/// A store handle owned by one job; dropping it closes the connection
pub type StoreHandle = Box<dyn Store>;

/// Throttling applied when the store cannot be opened
#[derive(Debug, Clone, Copy)]
pub struct ReconnectPolicy {
    pub attempts: u32,
    pub delay: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            attempts: 5,
            delay: Duration::from_millis(500),
        }
    }
}

/// Opens a store handle, waiting `policy.delay` between failed attempts
///
/// Store connectivity is the one failure a worker cannot work around, so the
/// last error is returned to the caller once the attempts are spent.
pub async fn connect_with_retry(
    connector: &dyn StoreConnector,
    policy: ReconnectPolicy,
) -> StoreResult<StoreHandle> {
    let attempts = policy.attempts.max(1);
    let mut attempt = 1;

    loop {
        match connector.connect() {
            Ok(store) => return Ok(store),
            Err(e) if attempt < attempts => {
                tracing::warn!(
                    attempt,
                    attempts,
                    "Failed to open store: {}, retrying in {:?}",
                    e,
                    policy.delay
                );
                tokio::time::sleep(policy.delay).await;
                attempt += 1;
            }
            Err(e) => {
                tracing::error!("Giving up on store after {} attempts: {}", attempts, e);
                return Err(e);
            }
        }
    }
}
