//! HTTP fetcher implementation
//!
//! This module handles all HTTP requests made by crawl jobs:
//! - Building HTTP clients with the crawler's identification headers
//! - GET requests with a fixed per-attempt timeout
//! - Bounded retries with linear backoff

use crate::config::FetchConfig;
use crate::crawler::failure::{CrawlError, CrawlFailure};
use reqwest::header::{HeaderMap, HeaderValue};
use reqwest::{Client, Response};
use serde::de::DeserializeOwned;
use std::time::Duration;
use thiserror::Error;

/// Transport failure after the retry budget was exhausted
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("Failed to get url {url} after {attempts} attempts: {message}")]
pub struct FetchError {
    pub url: String,
    /// Total attempts made, including the first
    pub attempts: u32,
    /// Message of the last underlying error
    pub message: String,
}

/// Builds an HTTP client with the crawler's identification headers
///
/// # Arguments
///
/// * `config` - The fetch configuration
///
/// # Returns
///
/// * `Ok(Client)` - Successfully built HTTP client
/// * `Err(reqwest::Error)` - Failed to build client
pub fn build_http_client(config: &FetchConfig) -> Result<Client, reqwest::Error> {
    let user_agent = format!("{}/{}", config.crawler_name, config.crawler_version);

    let mut headers = HeaderMap::new();
    if let Ok(value) = HeaderValue::from_str(&config.attribution_url) {
        headers.insert("X-Lemmy-SiteUrl", value);
    }

    Client::builder()
        .user_agent(user_agent)
        .default_headers(headers)
        .timeout(Duration::from_secs(config.request_timeout_secs))
        .connect_timeout(Duration::from_secs(config.request_timeout_secs.min(10)))
        .gzip(true)
        .brotli(true)
        .build()
}

/// HTTP GET with bounded retries and linear backoff
///
/// Attempt `k` (0-indexed) that fails is followed by a wait of
/// `(k + 1) * backoff_unit`, so the worst case adds
/// `max_retries * (max_retries + 1) / 2` units of waiting. Non-2xx responses
/// and per-attempt timeouts count as failed attempts.
#[derive(Debug, Clone)]
pub struct RetryingFetcher {
    client: Client,
    max_retries: u32,
    backoff_unit: Duration,
}

impl RetryingFetcher {
    pub fn new(client: Client, max_retries: u32, backoff_unit: Duration) -> Self {
        Self {
            client,
            max_retries,
            backoff_unit,
        }
    }

    /// Builds a fetcher and its client from configuration
    pub fn from_config(config: &FetchConfig) -> Result<Self, reqwest::Error> {
        Ok(Self::new(
            build_http_client(config)?,
            config.max_retries,
            Duration::from_millis(config.backoff_unit_ms),
        ))
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Wait after failed attempt `attempt` (0-indexed)
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        self.backoff_unit * (attempt + 1)
    }

    /// Fetches a URL, retrying failed attempts
    ///
    /// # Returns
    ///
    /// * `Ok(Response)` - A 2xx response
    /// * `Err(FetchError)` - Every attempt failed
    pub async fn fetch(&self, url: &str) -> Result<Response, FetchError> {
        let mut attempt = 0;

        loop {
            let result = self
                .client
                .get(url)
                .send()
                .await
                .and_then(Response::error_for_status);

            match result {
                Ok(response) => return Ok(response),
                Err(e) if attempt < self.max_retries => {
                    let wait = self.backoff_delay(attempt);
                    tracing::debug!(
                        url,
                        attempt = attempt + 1,
                        "Retrying after error: {}, waiting {:?}",
                        e,
                        wait
                    );
                    tokio::time::sleep(wait).await;
                    attempt += 1;
                }
                Err(e) => {
                    return Err(FetchError {
                        url: url.to_string(),
                        attempts: attempt + 1,
                        message: describe_error(&e),
                    });
                }
            }
        }
    }

    /// Fetches a URL and decodes its body as JSON
    pub async fn fetch_json<T: DeserializeOwned>(&self, url: &str) -> Result<T, CrawlFailure> {
        let response = self.fetch(url).await?;
        response.json::<T>().await.map_err(|e| {
            CrawlError::InvalidBody {
                url: url.to_string(),
                message: e.to_string(),
            }
            .into()
        })
    }
}

/// Describes a request error for operators, keeping the original message and
/// its causes
fn describe_error(error: &reqwest::Error) -> String {
    let mut message = error.to_string();
    let mut source = std::error::Error::source(error);
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }

    if error.is_timeout() {
        format!("request timed out: {}", message)
    } else if error.is_connect() {
        format!("connection failed: {}", message)
    } else {
        message
    }
}
