//! JSON-over-HTTP ingestion transport.

use std::time::Duration;

use async_trait::async_trait;
use discovery_core::Entity;
use reqwest::Url;
use serde::Serialize;

use crate::client::{IngestClient, IngestError, IngestResponse};

/// Header carrying the upstream API key.
pub const API_KEY_HEADER: &str = "diode-api-key";

/// Upper bound on one delivery, connect through response body.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Configuration for the HTTP ingestion client.
#[derive(Debug, Clone)]
pub struct IngestConfig {
    pub target: String,
    pub api_key: String,
    pub app_name: String,
    pub app_version: String,
    pub timeout: Duration,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            target: "http://localhost:8080/ingest".to_string(),
            api_key: String::new(),
            app_name: "network-discovery".to_string(),
            app_version: "0.0.0".to_string(),
            timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }
}

#[derive(Serialize)]
struct IngestRequest<'a> {
    producer_app_name: &'a str,
    producer_app_version: &'a str,
    entities: &'a [Entity],
}

/// Thread-safe HTTP ingestion client.
///
/// Clone is cheap (the underlying connection pool is shared).
#[derive(Debug, Clone)]
pub struct HttpIngestClient {
    http: reqwest::Client,
    target: Url,
    api_key: String,
    app_name: String,
    app_version: String,
}

impl HttpIngestClient {
    /// Build a client for the configured target. No connection is made
    /// until the first batch is sent.
    pub fn new(config: &IngestConfig) -> Result<Self, IngestError> {
        let target = Url::parse(&config.target).map_err(|e| IngestError::InvalidTarget {
            target: config.target.clone(),
            reason: e.to_string(),
        })?;
        if !matches!(target.scheme(), "http" | "https") {
            return Err(IngestError::InvalidTarget {
                target: config.target.clone(),
                reason: format!("unsupported scheme '{}'", target.scheme()),
            });
        }

        let http = reqwest::Client::builder()
            .user_agent(format!("{}/{}", config.app_name, config.app_version))
            .timeout(config.timeout)
            .build()?;

        tracing::info!(target = %target, "Ingestion client configured");
        Ok(Self {
            http,
            target,
            api_key: config.api_key.clone(),
            app_name: config.app_name.clone(),
            app_version: config.app_version.clone(),
        })
    }

    pub fn target(&self) -> &Url {
        &self.target
    }
}

#[async_trait]
impl IngestClient for HttpIngestClient {
    async fn ingest(&self, entities: Vec<Entity>) -> Result<IngestResponse, IngestError> {
        let body = IngestRequest {
            producer_app_name: &self.app_name,
            producer_app_version: &self.app_version,
            entities: &entities,
        };

        let resp = self
            .http
            .post(self.target.clone())
            .header(API_KEY_HEADER, &self.api_key)
            .json(&body)
            .send()
            .await?;

        let status = resp.status();
        let text = resp.text().await?;
        if !status.is_success() {
            return Err(IngestError::Status {
                status: status.as_u16(),
                body: text,
            });
        }

        tracing::debug!(entities = entities.len(), status = status.as_u16(), "Batch delivered");

        if text.trim().is_empty() {
            return Ok(IngestResponse::default());
        }
        Ok(serde_json::from_str(&text)?)
    }
}
