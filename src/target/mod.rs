//! Crawl target identity
//!
//! A [`CrawlTarget`] names one crawlable entity: an instance, a community on an
//! instance, a generic fediverse node or a magazine. The [`JobId`] derived from
//! a target is the deduplication key used by the job queues.

mod normalize;

pub use normalize::normalize_base_url;

use crate::TargetError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Crawl categories, each with its own queue and timing configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    /// A Lemmy instance (site metadata)
    Instance,
    /// A single community hosted on an instance
    Community,
    /// Any federated server, used to identify software that isn't Lemmy
    #[serde(rename = "fediverse")]
    FediverseNode,
    /// An mbin/kbin magazine
    Magazine,
}

impl Category {
    /// All categories, in scan order
    pub const ALL: [Category; 4] = [
        Category::Instance,
        Category::Community,
        Category::FediverseNode,
        Category::Magazine,
    ];

    /// Stable name used in the store, the config file and the CLI
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Instance => "instance",
            Self::Community => "community",
            Self::FediverseNode => "fediverse",
            Self::Magazine => "magazine",
        }
    }

    /// Whether targets in this category are addressed by a sub key
    pub fn requires_sub_key(&self) -> bool {
        matches!(self, Self::Community | Self::Magazine)
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = TargetError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "instance" | "i" => Ok(Self::Instance),
            "community" | "c" => Ok(Self::Community),
            "fediverse" | "f" => Ok(Self::FediverseNode),
            "magazine" | "m" => Ok(Self::Magazine),
            other => Err(TargetError::UnknownCategory(other.to_string())),
        }
    }
}

/// One crawlable entity. Immutable once constructed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CrawlTarget {
    category: Category,
    base_url: String,
    sub_key: Option<String>,
}

impl CrawlTarget {
    /// Builds a target, normalizing the base URL
    ///
    /// # Arguments
    ///
    /// * `category` - The crawl category
    /// * `base_url` - Host of the server, with or without scheme
    /// * `sub_key` - Community or magazine name, required for those categories
    ///
    /// # Examples
    ///
    /// ```
    /// use fedi_crawler::target::{Category, CrawlTarget};
    ///
    /// let target = CrawlTarget::new(Category::Community, " https://Lemmy.ML/ ", Some("rust")).unwrap();
    /// assert_eq!(target.base_url(), "lemmy.ml");
    /// assert_eq!(target.job_id().as_str(), "lemmy.ml/rust");
    /// ```
    pub fn new(
        category: Category,
        base_url: &str,
        sub_key: Option<&str>,
    ) -> Result<Self, TargetError> {
        let base_url = normalize_base_url(base_url)?;
        let sub_key = sub_key
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string);

        if category.requires_sub_key() && sub_key.is_none() {
            return Err(TargetError::MissingSubKey(category));
        }

        Ok(Self {
            category,
            base_url,
            sub_key,
        })
    }

    /// Shorthand for an instance target
    pub fn instance(base_url: &str) -> Result<Self, TargetError> {
        Self::new(Category::Instance, base_url, None)
    }

    /// Shorthand for a community target
    pub fn community(base_url: &str, name: &str) -> Result<Self, TargetError> {
        Self::new(Category::Community, base_url, Some(name))
    }

    pub fn category(&self) -> Category {
        self.category
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn sub_key(&self) -> Option<&str> {
        self.sub_key.as_deref()
    }

    /// Deterministic deduplication key for this target
    pub fn job_id(&self) -> JobId {
        JobId::for_target(&self.base_url, self.sub_key.as_deref())
    }
}

impl fmt::Display for CrawlTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.category, self.job_id())
    }
}

/// Deduplication key of a crawl job
///
/// Formed as `base_url` or `base_url/sub_key`. Host names cannot contain `/`,
/// so two different targets never map to the same id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct JobId(String);

impl JobId {
    fn for_target(base_url: &str, sub_key: Option<&str>) -> Self {
        match sub_key {
            Some(sub) => Self(format!("{}/{}", base_url, sub)),
            None => Self(base_url.to_string()),
        }
    }

    /// Rebuilds an id read back from the store
    pub fn from_raw(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
