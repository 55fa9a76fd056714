/// Job state definitions for tracking queue progress
///
/// A job moves `Queued -> Running` and then to exactly one terminal state.
use std::fmt;

/// Represents the current state of a crawl job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobState {
    // ===== Active States =====
    /// Job is waiting for a worker
    Queued,

    /// Job has been claimed by a worker
    Running,

    // ===== Terminal States =====
    /// Target was crawled and the payload handed to the output sink
    Succeeded,

    /// Target was crawled too recently; nothing was fetched or persisted
    TooRecent,

    /// Fetch or crawl failed
    Failed,

    /// Job exceeded its category timeout
    TimedOut,
}

impl JobState {
    /// Converts the job state to a database string representation
    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::TooRecent => "too_recent",
            Self::Failed => "failed",
            Self::TimedOut => "timed_out",
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_db_string())
    }
}
