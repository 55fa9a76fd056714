use chrono::{DateTime, Utc};
use std::fmt;

/// When a target was last crawled, persisted between crawl cycles
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FreshnessRecord {
    /// Completion time of the last crawl, successful or not
    pub last_crawl_at: DateTime<Utc>,

    /// Completion time of the last successful crawl
    pub last_success_at: Option<DateTime<Utc>>,

    /// Set when the target went quiet and awaits its confirmation crawl
    pub pending_deletion: bool,
}

impl FreshnessRecord {
    /// Record for a target that was just crawled successfully
    pub fn succeeded_at(at: DateTime<Utc>) -> Self {
        Self {
            last_crawl_at: at,
            last_success_at: Some(at),
            pending_deletion: false,
        }
    }
}

/// Classification attached to an error record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorClass {
    /// Transport failure after the retry budget was spent
    Fetch,
    /// Target answered, but with something we couldn't interpret
    Crawl,
    /// Job ran past its category timeout
    Timeout,
}

impl ErrorClass {
    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::Fetch => "fetch",
            Self::Crawl => "crawl",
            Self::Timeout => "timeout",
        }
    }

    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "fetch" => Some(Self::Fetch),
            "crawl" => Some(Self::Crawl),
            "timeout" => Some(Self::Timeout),
            _ => None,
        }
    }
}

impl fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.to_db_string())
    }
}

/// A classified crawl failure with the time it stops suppressing re-crawls
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorRecord {
    pub message: String,
    pub classification: ErrorClass,
    pub occurred_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl ErrorRecord {
    /// Returns true while the record still suppresses scheduling
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at
    }
}
