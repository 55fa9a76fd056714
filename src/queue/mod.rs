//! Job queues
//!
//! One [`JobQueue`] per crawl category. Jobs are deduplicated by [`JobId`],
//! bounded by the category timeout, and executed by a [`JobHandler`].
//!
//! [`JobId`]: crate::target::JobId

mod job;
mod job_queue;

pub use job::{CrawlJob, CrawlResult, JobFailure, JobHandler, JobOrigin, JobOutcome};
pub use job_queue::{JobHandle, JobQueue, QueueOptions, Submission};
