use crate::config::types::{
    CategoryTimingConfig, Config, FetchConfig, StoreConfig, WorkerConfig,
};
use crate::target::{normalize_base_url, Category};
use crate::ConfigError;

/// Longest aged, delete, error TTL or min interval threshold (one year)
pub const MAX_THRESHOLD_HOURS: u32 = 24 * 365;

/// Longest wall time a single job may be given (one day)
pub const MAX_JOB_TIMEOUT_SECS: u64 = 24 * 60 * 60;

/// Validates the entire configuration
pub fn validate(config: &Config) -> Result<(), ConfigError> {
    validate_store_config(&config.store)?;
    validate_fetch_config(&config.fetch)?;
    validate_worker_config(&config.worker)?;

    if config.output.path.is_empty() {
        return Err(ConfigError::Validation(
            "output path cannot be empty".to_string(),
        ));
    }

    for category in Category::ALL {
        validate_category_timing(
            category,
            config.timing.for_category(category),
            &config.fetch,
        )?;
    }

    validate_seeds(&config.seeds)?;
    Ok(())
}

fn validate_store_config(config: &StoreConfig) -> Result<(), ConfigError> {
    if config.path.is_empty() {
        return Err(ConfigError::Validation(
            "store path cannot be empty".to_string(),
        ));
    }

    if config.reconnect_attempts < 1 {
        return Err(ConfigError::Validation(
            "reconnect_attempts must be >= 1".to_string(),
        ));
    }

    Ok(())
}

/// Validates fetch configuration
fn validate_fetch_config(config: &FetchConfig) -> Result<(), ConfigError> {
    if config.max_retries > 10 {
        return Err(ConfigError::Validation(format!(
            "max_retries must be <= 10, got {}",
            config.max_retries
        )));
    }

    if config.request_timeout_secs == 0 {
        return Err(ConfigError::Validation(
            "request_timeout_secs must be > 0".to_string(),
        ));
    }

    if config.scheme != "https" && config.scheme != "http" {
        return Err(ConfigError::Validation(format!(
            "scheme must be http or https, got '{}'",
            config.scheme
        )));
    }

    // Goes into the User-Agent header verbatim
    if config.crawler_name.is_empty()
        || !config
            .crawler_name
            .chars()
            .all(|c| c.is_alphanumeric() || c == '-')
    {
        return Err(ConfigError::Validation(format!(
            "crawler_name must be non-empty and contain only alphanumeric characters and hyphens, got '{}'",
            config.crawler_name
        )));
    }

    url::Url::parse(&config.attribution_url).map_err(|e| {
        ConfigError::Validation(format!("Invalid attribution_url: {}", e))
    })?;

    Ok(())
}

fn validate_worker_config(config: &WorkerConfig) -> Result<(), ConfigError> {
    if config.concurrency < 1 || config.concurrency > 64 {
        return Err(ConfigError::Validation(format!(
            "concurrency must be between 1 and 64, got {}",
            config.concurrency
        )));
    }

    if config.poll_interval_ms < 10 {
        return Err(ConfigError::Validation(format!(
            "poll_interval_ms must be >= 10ms, got {}ms",
            config.poll_interval_ms
        )));
    }

    if config.scan_interval_secs == 0 {
        return Err(ConfigError::Validation(
            "scan_interval_secs must be > 0".to_string(),
        ));
    }

    Ok(())
}

/// Validates timing of one category
///
/// A single fetch attempt must fit inside the job timeout, otherwise one hung
/// request could outlive the job that issued it. The error TTL may not exceed
/// the aged threshold, so an error expires no later than the next rescan is due.
fn validate_category_timing(
    category: Category,
    timing: &CategoryTimingConfig,
    fetch: &FetchConfig,
) -> Result<(), ConfigError> {
    if timing.timeout_secs > MAX_JOB_TIMEOUT_SECS {
        return Err(ConfigError::Validation(format!(
            "{} timeout ({}s) cannot exceed {}s",
            category, timing.timeout_secs, MAX_JOB_TIMEOUT_SECS
        )));
    }

    let thresholds = [
        ("aged_hours", Some(timing.aged_hours)),
        ("delete_hours", timing.delete_hours),
        ("error_ttl_hours", Some(timing.error_ttl_hours)),
        ("min_interval_hours", Some(timing.min_interval_hours)),
    ];
    for (name, hours) in thresholds {
        if let Some(hours) = hours.filter(|&h| h > u64::from(MAX_THRESHOLD_HOURS)) {
            return Err(ConfigError::Validation(format!(
                "{} {} ({}) cannot exceed {}",
                category, name, hours, MAX_THRESHOLD_HOURS
            )));
        }
    }

    if timing.timeout_secs <= fetch.request_timeout_secs {
        return Err(ConfigError::Validation(format!(
            "{} timeout ({}s) must exceed the request timeout ({}s)",
            category, timing.timeout_secs, fetch.request_timeout_secs
        )));
    }

    if timing.aged_hours == 0 {
        return Err(ConfigError::Validation(format!(
            "{} aged_hours must be > 0",
            category
        )));
    }

    if timing.error_ttl_hours == 0 || timing.error_ttl_hours > timing.aged_hours {
        return Err(ConfigError::Validation(format!(
            "{} error_ttl_hours must be between 1 and aged_hours ({}), got {}",
            category, timing.aged_hours, timing.error_ttl_hours
        )));
    }

    if timing.min_interval_hours > timing.aged_hours {
        return Err(ConfigError::Validation(format!(
            "{} min_interval_hours ({}) cannot exceed aged_hours ({})",
            category, timing.min_interval_hours, timing.aged_hours
        )));
    }

    if timing.delete_hours == Some(0) {
        return Err(ConfigError::Validation(format!(
            "{} delete_hours must be > 0 when set",
            category
        )));
    }

    Ok(())
}

/// Validates seed base URLs
fn validate_seeds(seeds: &[String]) -> Result<(), ConfigError> {
    if seeds.is_empty() {
        return Err(ConfigError::Validation(
            "at least one seed is required".to_string(),
        ));
    }

    for seed in seeds {
        normalize_base_url(seed)
            .map_err(|e| ConfigError::InvalidSeed(format!("'{}': {}", seed, e)))?;
    }

    Ok(())
}
