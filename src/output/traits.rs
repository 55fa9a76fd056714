//! Output sink trait and types
//!
//! A sink receives the payload of every successful crawl. Sinks are shared
//! between worker tasks, so implementations must be thread-safe.

use crate::target::CrawlTarget;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Errors that can occur during output operations
#[derive(Debug, Error)]
pub enum OutputError {
    #[error("Failed to write output: {0}")]
    Write(String),

    #[error("Failed to serialize output: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for output operations
pub type OutputResult<T> = Result<T, OutputError>;

/// One successful crawl as written by a sink
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputRecord {
    pub category: String,
    pub base_url: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub sub_key: Option<String>,
    pub crawled_at: DateTime<Utc>,
    pub data: Value,
}

impl OutputRecord {
    pub fn new(target: &CrawlTarget, payload: &Value, crawled_at: DateTime<Utc>) -> Self {
        Self {
            category: target.category().as_str().to_string(),
            base_url: target.base_url().to_string(),
            sub_key: target.sub_key().map(str::to_string),
            crawled_at,
            data: payload.clone(),
        }
    }
}

/// Destination of crawl results
pub trait ResultSink: Send + Sync {
    /// Accepts the payload of a successful crawl of `target`
    fn accept(&self, target: &CrawlTarget, payload: &Value) -> OutputResult<()>;
}
