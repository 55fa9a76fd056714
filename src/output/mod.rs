//! Output module for crawl results and statistics
//!
//! This module handles:
//! - Routing successful crawl payloads to a result sink
//! - Reading per-category statistics back from the store

mod jsonl;
mod memory;
pub mod stats;
mod traits;

pub use jsonl::JsonLinesSink;
pub use memory::MemorySink;
pub use stats::{load_statistics, print_statistics, CategoryStatistics, CrawlStatistics};
pub use traits::{OutputError, OutputRecord, OutputResult, ResultSink};
