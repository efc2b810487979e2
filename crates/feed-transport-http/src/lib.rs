//! HTTP upload transport for the ingestion platform.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use feed_replay::{Batch, Sink, SinkError};
use reqwest::header::AUTHORIZATION;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info};

const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 30_000;

/// Connection settings for the ingestion platform.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlatformConfig {
    /// Base URL of the platform backend, e.g. `https://feeds.example.com`.
    pub backend_url: String,
    /// API key sent with every upload.
    pub api_key: String,
    /// Per-request timeout applied by the HTTP client.
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

const fn default_request_timeout_ms() -> u64 {
    DEFAULT_REQUEST_TIMEOUT_MS
}

impl PlatformConfig {
    pub fn new(backend_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            backend_url: backend_url.into(),
            api_key: api_key.into(),
            request_timeout_ms: DEFAULT_REQUEST_TIMEOUT_MS,
        }
    }

    pub fn validate(&self) -> Result<(), TransportError> {
        let url = self.backend_url.trim();
        if url.is_empty() {
            return Err(TransportError::Configuration(
                "backend_url must be set".into(),
            ));
        }
        if !url.starts_with("http://") && !url.starts_with("https://") {
            return Err(TransportError::Configuration(format!(
                "backend_url must use http or https, got `{url}`"
            )));
        }
        if self.api_key.trim().is_empty() {
            return Err(TransportError::Configuration("api_key must be set".into()));
        }
        if self.request_timeout_ms == 0 {
            return Err(TransportError::Configuration(
                "request_timeout_ms must be greater than zero".into(),
            ));
        }
        Ok(())
    }
}

impl fmt::Debug for PlatformConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PlatformConfig")
            .field("backend_url", &self.backend_url)
            .field("api_key", &"<redacted>")
            .field("request_timeout_ms", &self.request_timeout_ms)
            .finish()
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("client error: {0}")]
    Client(String),
}

/// Owned connection handle to the platform. Create it once, share it with
/// sinks through an `Arc`, and release it with [`PlatformClient::close`].
pub struct PlatformClient {
    base_url: String,
    api_key: String,
    http: reqwest::Client,
}

impl PlatformClient {
    pub fn connect(config: &PlatformConfig) -> Result<Self, TransportError> {
        config.validate()?;
        let http = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.request_timeout_ms))
            .build()
            .map_err(|err| TransportError::Client(err.to_string()))?;
        let base_url = config.backend_url.trim().trim_end_matches('/').to_string();
        info!(backend = %base_url, "connected to ingestion platform");
        Ok(Self {
            base_url,
            api_key: config.api_key.clone(),
            http,
        })
    }

    #[must_use]
    pub fn upload_url(&self, dataset: &str) -> String {
        format!("{}/api/dataset/{dataset}/upload", self.base_url)
    }

    /// POST `rows` to the dataset's upload endpoint and wait for the answer.
    pub async fn upload_rows(&self, dataset: &str, rows: &[Value]) -> Result<(), SinkError> {
        let response = self
            .http
            .post(self.upload_url(dataset))
            .header(AUTHORIZATION, format!("apiKey {}", self.api_key))
            .json(rows)
            .send()
            .await
            .map_err(|err| SinkError::Transport(err.to_string()))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(SinkError::Status { status, body });
        }
        Ok(())
    }

    /// Release the handle; pooled connections are dropped with it.
    pub fn close(self) {
        debug!(backend = %self.base_url, "released platform client");
    }
}

impl fmt::Debug for PlatformClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PlatformClient")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

/// Sink uploading each batch as a JSON array of row objects.
#[derive(Debug, Clone)]
pub struct HttpSink {
    client: Arc<PlatformClient>,
}

impl HttpSink {
    pub fn new(client: Arc<PlatformClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Sink for HttpSink {
    async fn upload(&self, destination: &str, batch: &Batch) -> Result<(), SinkError> {
        let rows = batch.to_rows()?;
        self.client.upload_rows(destination, &rows).await?;
        debug!(
            destination,
            step = batch.step(),
            rows = rows.len(),
            "uploaded batch"
        );
        Ok(())
    }
}
