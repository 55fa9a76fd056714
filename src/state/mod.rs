//! State module for tracking crawl progress
//!
//! This module provides the state that survives between crawl cycles and the
//! lifecycle of individual jobs.
//!
//! # Components
//!
//! - `JobState`: Lifecycle of a queued crawl job (queued, running, succeeded, ...)
//! - `FreshnessRecord`: When a target was last crawled and last crawled successfully
//! - `ErrorRecord`: A classified failure with an expiry time

mod freshness;
mod job_state;

// Re-export main types
pub use freshness::{ErrorClass, ErrorRecord, FreshnessRecord};
pub use job_state::JobState;
