//! Fetching collector metrics over HTTP

use std::time::Duration;

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;

use super::exposition::{self, Sample};
use crate::Error;

/// Default deadline for one scrape
pub const DEFAULT_SCRAPE_TIMEOUT: Duration = Duration::from_secs(10);

/// Source of collector metrics
#[cfg_attr(test, automock)]
#[async_trait]
pub trait MetricsScraper: Send + Sync {
    /// Scrape `url` and return all samples
    async fn scrape(&self, url: &str) -> crate::Result<Vec<Sample>>;
}

/// Scraper backed by a shared `reqwest` client
pub struct HttpScraper {
    client: reqwest::Client,
}

impl HttpScraper {
    /// Create a scraper whose requests are bounded by `timeout`
    pub fn new(timeout: Duration) -> crate::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::internal(format!("failed to build metrics client: {e}")))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl MetricsScraper for HttpScraper {
    async fn scrape(&self, url: &str) -> crate::Result<Vec<Sample>> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| scrape_error(url, e))?
            .error_for_status()
            .map_err(|e| scrape_error(url, e))?;
        let body = response.text().await.map_err(|e| scrape_error(url, e))?;
        exposition::parse(&body)
    }
}

fn scrape_error(url: &str, err: reqwest::Error) -> Error {
    if err.is_timeout() {
        Error::timeout(format!("scraping {url}"))
    } else {
        Error::deployment(format!("scraping {url} failed: {err}"))
    }
}
