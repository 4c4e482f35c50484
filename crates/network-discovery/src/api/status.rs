//! Service status and capability handlers.

use std::time::Instant;

use axum::{extract::State, Json};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::api::AppState;

/// Process start time and version, captured once.
#[derive(Debug)]
pub struct StatusInfo {
    start_time: DateTime<Utc>,
    started: Instant,
    version: String,
}

impl StatusInfo {
    pub fn new(version: &str) -> Self {
        Self {
            start_time: Utc::now(),
            started: Instant::now(),
            version: version.to_string(),
        }
    }

    pub fn snapshot(&self) -> Status {
        Status {
            start_time: self.start_time,
            up_time_seconds: self.started.elapsed().as_secs_f64().round() as u64,
            version: self.version.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Status {
    pub start_time: DateTime<Utc>,
    pub up_time_seconds: u64,
    pub version: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Capabilities {
    pub capabilities: Vec<String>,
}

/// GET /api/v1/status
pub async fn get_status(State(state): State<AppState>) -> Json<Status> {
    Json(state.status.snapshot())
}

/// GET /api/v1/capabilities
pub async fn get_capabilities(State(state): State<AppState>) -> Json<Capabilities> {
    let capabilities = state
        .manager
        .capabilities()
        .into_iter()
        .map(String::from)
        .collect();
    Json(Capabilities { capabilities })
}
