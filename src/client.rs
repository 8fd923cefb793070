//! HTTP client for fetching hourly telemetry documents.

use reqwest::{
    header::{HeaderMap, HeaderValue, ACCEPT, CACHE_CONTROL},
    Client, StatusCode,
};
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;

/// Public snapshot host. Documents live at `<base>/00.json` .. `<base>/23.json`.
pub const DEFAULT_BASE_URL: &str = "https://a.windbornesystems.com/treasure";

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("Server returned error status: {status}")]
    ServerError { status: StatusCode },
    #[error("Invalid JSON body: {0}")]
    InvalidBody(#[from] serde_json::Error),
}

/// Configuration for the telemetry client.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Directory URL holding the hourly documents
    pub base_url: String,
    /// Request timeout
    pub timeout: Duration,
    pub user_agent: String,
}

impl ClientConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            timeout: Duration::from_secs(10),
            user_agent: format!("{}/{}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION")),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self::new(DEFAULT_BASE_URL)
    }
}

/// Client for one telemetry host (upstream or a caching proxy in front of it).
pub struct TelemetryClient {
    client: Client,
    config: ClientConfig,
}

impl TelemetryClient {
    /// Create a new telemetry client.
    pub fn new(config: ClientConfig) -> Result<Self, ClientError> {
        let mut headers = HeaderMap::new();

        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-cache"));

        let client = Client::builder()
            .default_headers(headers)
            .user_agent(config.user_agent.clone())
            .timeout(config.timeout)
            .gzip(true)
            .brotli(true)
            .deflate(true)
            .build()?;

        Ok(Self { client, config })
    }

    pub fn base_url(&self) -> &str {
        &self.config.base_url
    }

    /// URL of the document for `hour`, zero-padded to two digits.
    pub fn hour_url(&self, hour: usize) -> String {
        format!("{}/{:02}.json", self.config.base_url.trim_end_matches('/'), hour)
    }

    /// Fetch and decode the document for `hour`.
    ///
    /// The body is read in full before decoding so a corrupted payload shows
    /// up as `InvalidBody` rather than as a transport error.
    pub async fn fetch_hour(&self, hour: usize) -> Result<Value, ClientError> {
        let url = self.hour_url(hour);

        tracing::debug!("Fetching: {}", url);

        let response = self.client.get(&url).send().await?;

        match response.status() {
            status if status.is_success() => {
                let bytes = response.bytes().await?;
                Ok(serde_json::from_slice(&bytes)?)
            }
            status => Err(ClientError::ServerError { status }),
        }
    }
}
