//! Crawler module for per-target crawl jobs
//!
//! This module contains the crawling logic, including:
//! - HTTP fetching with bounded retries and linear backoff
//! - Classified crawl failures
//! - The reference API probe for each target category
//! - Scan and job dispatch across the category queues

mod dispatcher;
mod failure;
mod fetcher;
mod probe;

pub use dispatcher::{CrawlHandler, Dispatcher, ScanReport};
pub use failure::{CrawlError, CrawlFailure};
pub use fetcher::{build_http_client, FetchError, RetryingFetcher};
pub use probe::{ApiProbe, TargetCrawler};
