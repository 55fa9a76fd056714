use crate::target::Category;
use serde::Deserialize;

/// Main configuration structure for the crawler
///
/// Every section is optional; missing values fall back to the production
/// defaults below.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub fetch: FetchConfig,
    #[serde(default)]
    pub worker: WorkerConfig,
    #[serde(default)]
    pub output: OutputConfig,
    #[serde(default)]
    pub timing: TimingConfig,
    /// Base URLs of instances used to bootstrap crawling
    #[serde(default = "default_seeds")]
    pub seeds: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            store: StoreConfig::default(),
            fetch: FetchConfig::default(),
            worker: WorkerConfig::default(),
            output: OutputConfig::default(),
            timing: TimingConfig::default(),
            seeds: default_seeds(),
        }
    }
}

/// Shared store location and reconnect throttling
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct StoreConfig {
    /// Path to the SQLite database file shared by all workers
    pub path: String,

    /// Delay between attempts to open the store (milliseconds)
    pub reconnect_delay_ms: u64,

    /// Number of attempts before a store failure is treated as fatal
    pub reconnect_attempts: u32,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: ".data/crawler.db".to_string(),
            reconnect_delay_ms: 500,
            reconnect_attempts: 5,
        }
    }
}

/// HTTP fetch behaviour
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct FetchConfig {
    /// Retries after the first attempt
    pub max_retries: u32,

    /// Per-attempt request timeout (seconds)
    pub request_timeout_secs: u64,

    /// Linear backoff step: attempt k waits (k + 1) units (milliseconds)
    pub backoff_unit_ms: u64,

    /// Scheme used to reach targets
    pub scheme: String,

    pub crawler_name: String,
    pub crawler_version: String,

    /// Sent in the `X-Lemmy-SiteUrl` header so operators can identify us
    pub attribution_url: String,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            request_timeout_secs: 60,
            backoff_unit_ms: 1000,
            scheme: "https".to_string(),
            crawler_name: "fedi-crawler".to_string(),
            crawler_version: env!("CARGO_PKG_VERSION").to_string(),
            attribution_url: "https://lemmyverse.net".to_string(),
        }
    }
}

/// Worker pool sizing and polling
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct WorkerConfig {
    /// Concurrent jobs per worker process and category
    pub concurrency: u32,

    /// Sleep between queue polls when the queue is empty (milliseconds)
    pub poll_interval_ms: u64,

    /// Interval of the periodic aged-target scan (seconds)
    pub scan_interval_secs: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            concurrency: 4,
            poll_interval_ms: 1000,
            scan_interval_secs: 15 * 60,
        }
    }
}

/// Output sink configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct OutputConfig {
    /// Path of the JSON-lines file receiving successful crawl results
    pub path: String,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            path: ".data/results.jsonl".to_string(),
        }
    }
}

/// Timing thresholds of one crawl category
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub struct CategoryTimingConfig {
    /// Upper bound on a single job's wall time (seconds)
    pub timeout_secs: u64,

    /// Time since last crawl before a target is due again
    pub aged_hours: u64,

    /// Time since last success before a target is confirmed and removed
    #[serde(default)]
    pub delete_hours: Option<u64>,

    /// Lifetime of an error record
    #[serde(default = "default_error_ttl_hours")]
    pub error_ttl_hours: u64,

    /// A scheduled job for a target crawled more recently than this is skipped
    #[serde(default = "default_min_interval_hours")]
    pub min_interval_hours: u64,
}

impl CategoryTimingConfig {
    fn with(timeout_secs: u64, aged_hours: u64, delete_hours: Option<u64>) -> Self {
        Self {
            timeout_secs,
            aged_hours,
            delete_hours,
            error_ttl_hours: default_error_ttl_hours(),
            min_interval_hours: default_min_interval_hours(),
        }
    }
}

/// Per-category timing, keyed by the category names used on the CLI
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case", default)]
pub struct TimingConfig {
    pub instance: CategoryTimingConfig,
    pub community: CategoryTimingConfig,
    pub fediverse: CategoryTimingConfig,
    pub magazine: CategoryTimingConfig,
}

impl TimingConfig {
    pub fn for_category(&self, category: Category) -> &CategoryTimingConfig {
        match category {
            Category::Instance => &self.instance,
            Category::Community => &self.community,
            Category::FediverseNode => &self.fediverse,
            Category::Magazine => &self.magazine,
        }
    }
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            instance: CategoryTimingConfig::with(30 * 60, 8, None),
            community: CategoryTimingConfig::with(120 * 60, 8, Some(13)),
            fediverse: CategoryTimingConfig::with(30 * 60, 48, None),
            magazine: CategoryTimingConfig::with(60 * 60, 8, None),
        }
    }
}

fn default_error_ttl_hours() -> u64 {
    8
}

fn default_min_interval_hours() -> u64 {
    6
}

fn default_seeds() -> Vec<String> {
    [
        "lemmy.ml",
        "lemmy.world",
        "beehaw.org",
        "lemmygrad.ml",
        "lemmynsfw.com",
        "programming.dev",
        "sh.itjust.works",
        "sopuli.xyz",
        "feddit.de",
        "lemmy.ca",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}
