//! The ingestion capability shared by every transport.

use async_trait::async_trait;
use discovery_core::Entity;
use serde::{Deserialize, Serialize};

/// Errors from ingestion operations.
///
/// Any of these means the batch as a whole was not delivered. Per-item
/// rejections come back inside an [`IngestResponse`] instead.
#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error("Invalid ingestion target '{target}': {reason}")]
    InvalidTarget { target: String, reason: String },

    #[error("Ingestion transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Ingestion endpoint returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Malformed ingestion response: {0}")]
    Decode(#[from] serde_json::Error),
}

/// What the upstream said about a delivered batch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestResponse {
    /// Per-item rejections. Empty means the whole batch was accepted.
    #[serde(default)]
    pub errors: Vec<String>,
}

impl IngestResponse {
    pub fn is_accepted(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Delivers entity batches upstream.
///
/// Implementations are shared by every policy run, so they must be safe to
/// call concurrently.
#[async_trait]
pub trait IngestClient: Send + Sync {
    /// Deliver one batch. A returned `Err` is a total failure; an `Ok`
    /// response may still carry per-item errors.
    async fn ingest(&self, entities: Vec<Entity>) -> Result<IngestResponse, IngestError>;
}
