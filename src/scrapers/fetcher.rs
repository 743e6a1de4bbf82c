//! Stateless HTTP fetch of the filter page.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use thiserror::Error;
use tracing::{debug, warn};
use url::Url;

use crate::models::AppliedFilters;

pub const USER_AGENT: &str = "admission-crawler/0.3 (admission statistics collector)";

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("Invalid base URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
    #[error("Failed to build HTTP client: {0}")]
    Client(#[from] reqwest::Error),
}

/// Fetches the filter page for a partial filter assignment.
///
/// Transport failures are not errors here: they come back as an empty page,
/// which callers treat as "no options" / "no rows".
#[async_trait]
pub trait PageFetcher: Send + Sync {
    async fn fetch_page(&self, filters: &AppliedFilters) -> String;
}

/// `PageFetcher` backed by reqwest.
#[derive(Clone)]
pub struct HttpPageFetcher {
    client: Client,
    base_url: Url,
}

impl HttpPageFetcher {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, FetchError> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .gzip(true)
            .brotli(true)
            .cookie_store(true)
            .build()?;

        Ok(Self {
            client,
            base_url: Url::parse(base_url)?,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Build the request URL for a filter assignment.
    pub fn url_for(&self, filters: &AppliedFilters) -> Url {
        filter_url(&self.base_url, filters)
    }
}

/// `base` with the filter assignment appended as query parameters.
pub fn filter_url(base: &Url, filters: &AppliedFilters) -> Url {
    let mut url = base.clone();
    if !filters.is_empty() {
        let mut pairs = url.query_pairs_mut();
        for (name, value) in filters.to_params() {
            pairs.append_pair(name, &value);
        }
    }
    url
}

#[async_trait]
impl PageFetcher for HttpPageFetcher {
    async fn fetch_page(&self, filters: &AppliedFilters) -> String {
        let url = self.url_for(filters);
        debug!("Fetching {}", url);

        let response = match self.client.get(url.clone()).send().await {
            Ok(response) => response,
            Err(e) => {
                warn!("Request to {} failed: {}", url, e);
                return String::new();
            }
        };

        let status = response.status();
        if !status.is_success() {
            warn!("HTTP {} fetching {}", status, url);
            return String::new();
        }

        match response.text().await {
            Ok(body) => body,
            Err(e) => {
                warn!("Failed to read body of {}: {}", url, e);
                String::new()
            }
        }
    }
}
