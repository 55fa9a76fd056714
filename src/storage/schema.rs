//! Database schema definitions
//!
//! Timestamps are stored as milliseconds since the Unix epoch so that TTL and
//! timeout checks are plain integer comparisons inside SQLite.

/// SQL schema for the database
pub const SCHEMA_SQL: &str = r#"
-- Generic key/value entries with optional expiry
CREATE TABLE IF NOT EXISTS kv (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL,
    expires_at INTEGER
);

-- Per-target crawl freshness
CREATE TABLE IF NOT EXISTS freshness (
    category TEXT NOT NULL,
    base_url TEXT NOT NULL,
    sub_key TEXT NOT NULL DEFAULT '',
    last_crawl_at INTEGER NOT NULL,
    last_success_at INTEGER,
    pending_deletion INTEGER NOT NULL DEFAULT 0,
    PRIMARY KEY (category, base_url, sub_key)
);

-- Latest classified failure per (category, base_url)
CREATE TABLE IF NOT EXISTS errors (
    category TEXT NOT NULL,
    base_url TEXT NOT NULL,
    message TEXT NOT NULL,
    classification TEXT NOT NULL,
    occurred_at INTEGER NOT NULL,
    expires_at INTEGER NOT NULL,
    PRIMARY KEY (category, base_url)
);

CREATE INDEX IF NOT EXISTS idx_errors_expiry ON errors(category, expires_at);

-- Dedup slots of queued and running jobs
CREATE TABLE IF NOT EXISTS jobs (
    category TEXT NOT NULL,
    id TEXT NOT NULL,
    base_url TEXT NOT NULL,
    sub_key TEXT NOT NULL DEFAULT '',
    origin TEXT NOT NULL,
    state TEXT NOT NULL,
    enqueued_at INTEGER NOT NULL,
    started_at INTEGER,
    timeout_ms INTEGER NOT NULL,
    PRIMARY KEY (category, id)
);

CREATE INDEX IF NOT EXISTS idx_jobs_claim ON jobs(category, state, enqueued_at);
"#;

/// Initializes the database schema
pub fn initialize_schema(conn: &rusqlite::Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(SCHEMA_SQL)?;
    Ok(())
}
