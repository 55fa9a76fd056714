//! Classified crawl failures
//!
//! Every failed job carries exactly one [`CrawlFailure`]. Its [`ErrorClass`]
//! is what gets persisted in the error record.

use crate::crawler::fetcher::FetchError;
use crate::state::ErrorClass;
use std::time::Duration;
use thiserror::Error;

/// A reachable target answered with something we could not interpret
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CrawlError {
    #[error("Response from {url} is not valid JSON: {message}")]
    InvalidBody { url: String, message: String },

    #[error("Unexpected payload from {url}: missing '{field}'")]
    UnexpectedPayload { url: String, field: String },

    #[error("{0}")]
    Other(String),
}

/// Why a crawl job failed
#[derive(Debug, Clone, Error)]
pub enum CrawlFailure {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Crawl(#[from] CrawlError),

    #[error("Job exceeded its timeout of {timeout:?}")]
    TimeoutExceeded { timeout: Duration },
}

impl CrawlFailure {
    pub fn classification(&self) -> ErrorClass {
        match self {
            Self::Fetch(_) => ErrorClass::Fetch,
            Self::Crawl(_) => ErrorClass::Crawl,
            Self::TimeoutExceeded { .. } => ErrorClass::Timeout,
        }
    }
}
