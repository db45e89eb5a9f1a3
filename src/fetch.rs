//! Document fetcher.
//!
//! Downloads raw response bodies. Callers persist the bytes themselves;
//! there are no retries and redirects follow reqwest's defaults.

use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use crate::config::Settings;
use crate::error::{PipelineError, Result};

/// Anything that can turn a URL into bytes.
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Fetch the raw body of `url`.
    async fn fetch(&self, url: &str) -> Result<Vec<u8>>;
}

/// reqwest-backed fetcher.
#[derive(Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    /// Create a fetcher with the given timeout and user agent.
    pub fn new(timeout: Duration, user_agent: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(user_agent)
            .build()
            .map_err(|e| PipelineError::Config(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self { client })
    }

    /// Create a fetcher from application settings.
    pub fn from_settings(settings: &Settings) -> Result<Self> {
        Self::new(
            Duration::from_secs(settings.request_timeout),
            &settings.user_agent,
        )
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>> {
        debug!("GET {}", url);

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| PipelineError::network(url, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(PipelineError::network(url, format!("HTTP {}", status)));
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| PipelineError::network(url, e))?;

        debug!("Fetched {} bytes from {}", body.len(), url);
        Ok(body.to_vec())
    }
}
