//! Scheduling policy
//!
//! - `TimingPolicy`: pure decisions over freshness and error records
//! - `ErrorTracker`: records classified failures with a per-category TTL

mod timing;
mod tracker;

pub use timing::{CategoryTiming, Eligibility, TimingPolicy};
pub use tracker::ErrorTracker;
