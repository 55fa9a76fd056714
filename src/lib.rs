//! fedi-crawler: crawl orchestration for a federated server directory
//!
//! This crate schedules and runs per-target crawl jobs against fediverse servers
//! (instances, communities, federated nodes, magazines). It keeps a persistent
//! notion of freshness between crawl cycles, suppresses retries of recently
//! failed targets, and guarantees at most one in-flight job per target.

pub mod config;
pub mod crawler;
pub mod output;
pub mod policy;
pub mod queue;
pub mod state;
pub mod storage;
pub mod target;

use thiserror::Error;

/// Main error type for crawler operations
#[derive(Debug, Error)]
pub enum CrawlerError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Store error: {0}")]
    Store(#[from] storage::StoreError),

    #[error("Invalid target: {0}")]
    Target(#[from] TargetError),

    #[error("Output error: {0}")]
    Output(#[from] output::OutputError),

    #[error("HTTP client error: {0}")]
    HttpClient(#[from] reqwest::Error),

    #[error("Job {id} is already scheduled in the {category} queue")]
    AlreadyScheduled {
        category: target::Category,
        id: target::JobId,
    },

    #[error("Crawl of {target} failed: {source}")]
    CrawlFailed {
        target: String,
        source: crawler::CrawlFailure,
    },

    #[error("Crawl of {target} skipped, last crawled {age_secs}s ago")]
    TooRecent { target: String, age_secs: i64 },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration-specific errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid seed target: {0}")]
    InvalidSeed(String),
}

/// Errors raised while building a crawl target
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TargetError {
    #[error("Base URL is empty")]
    Empty,

    #[error("Failed to parse base URL '{0}'")]
    Parse(String),

    #[error("Base URL '{0}' must not contain a path")]
    UnexpectedPath(String),

    #[error("A {0} target requires a sub key")]
    MissingSubKey(target::Category),

    #[error("Unknown category: {0}")]
    UnknownCategory(String),
}

/// Result type alias for crawler operations
pub type Result<T> = std::result::Result<T, CrawlerError>;

/// Result type alias for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

// Re-export commonly used types
pub use config::Config;
pub use crawler::{CrawlFailure, Dispatcher, RetryingFetcher};
pub use queue::{CrawlJob, CrawlResult, JobOrigin, JobQueue};
pub use state::{ErrorRecord, FreshnessRecord, JobState};
pub use target::{Category, CrawlTarget, JobId};
