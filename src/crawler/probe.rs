//! Reference target crawler
//!
//! One JSON API probe per target. The payload is passed through to the
//! result sink untouched once the expected top-level field is present.

use crate::crawler::failure::{CrawlError, CrawlFailure};
use crate::crawler::fetcher::RetryingFetcher;
use crate::target::{Category, CrawlTarget};
use async_trait::async_trait;
use serde_json::Value;
use url::Url;

/// Crawls one target
#[async_trait]
pub trait TargetCrawler: Send + Sync {
    async fn crawl(
        &self,
        target: &CrawlTarget,
        fetcher: &RetryingFetcher,
    ) -> Result<Value, CrawlFailure>;
}

/// Probes the public JSON API of each category
///
/// | category  | endpoint                         | required field   |
/// |-----------|----------------------------------|------------------|
/// | instance  | `/api/v3/site`                   | `site_view`      |
/// | community | `/api/v3/community?name=<sub>`   | `community_view` |
/// | fediverse | `/.well-known/nodeinfo` → link   | `software`       |
/// | magazine  | `/api/magazine/name/<sub>`       | `magazineId`     |
#[derive(Debug, Clone)]
pub struct ApiProbe {
    scheme: String,
}

impl ApiProbe {
    pub fn new(scheme: impl Into<String>) -> Self {
        Self {
            scheme: scheme.into(),
        }
    }

    /// URL of the first request made for `target`
    pub fn endpoint(&self, target: &CrawlTarget) -> Result<Url, CrawlFailure> {
        let base = format!("{}://{}", self.scheme, target.base_url());
        let mut url = Url::parse(&base)
            .map_err(|e| CrawlError::Other(format!("Invalid base URL {}: {}", base, e)))?;

        let sub_key = target.sub_key().unwrap_or_default();
        match target.category() {
            Category::Instance => url.set_path("/api/v3/site"),
            Category::Community => {
                url.set_path("/api/v3/community");
                url.query_pairs_mut().append_pair("name", sub_key);
            }
            Category::FediverseNode => url.set_path("/.well-known/nodeinfo"),
            Category::Magazine => {
                url.set_path("/api/magazine/name/");
                url.path_segments_mut()
                    .map_err(|_| CrawlError::Other(format!("Cannot extend path of {}", base)))?
                    .pop_if_empty()
                    .push(sub_key);
            }
        }
        Ok(url)
    }

    async fn nodeinfo(&self, discovery: &Url, fetcher: &RetryingFetcher) -> Result<Value, CrawlFailure> {
        let links: Value = fetcher.fetch_json(discovery.as_str()).await?;
        let href = links
            .get("links")
            .and_then(Value::as_array)
            .and_then(|links| links.iter().find_map(|link| link.get("href")?.as_str()))
            .ok_or_else(|| CrawlError::UnexpectedPayload {
                url: discovery.to_string(),
                field: "links[].href".to_string(),
            })?;

        fetcher.fetch_json(href).await
    }
}

#[async_trait]
impl TargetCrawler for ApiProbe {
    async fn crawl(
        &self,
        target: &CrawlTarget,
        fetcher: &RetryingFetcher,
    ) -> Result<Value, CrawlFailure> {
        let url = self.endpoint(target)?;

        let (payload, field): (Value, &str) = match target.category() {
            Category::Instance => (fetcher.fetch_json(url.as_str()).await?, "site_view"),
            Category::Community => (fetcher.fetch_json(url.as_str()).await?, "community_view"),
            Category::FediverseNode => (self.nodeinfo(&url, fetcher).await?, "software"),
            Category::Magazine => (fetcher.fetch_json(url.as_str()).await?, "magazineId"),
        };

        if payload.get(field).is_none() {
            return Err(CrawlError::UnexpectedPayload {
                url: url.to_string(),
                field: field.to_string(),
            }
            .into());
        }
        Ok(payload)
    }
}
