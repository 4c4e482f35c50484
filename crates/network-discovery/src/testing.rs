//! In-crate fakes for the probe and ingestion capabilities.

use std::net::IpAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use discovery_core::{Entity, Scope};
use discovery_ingest::{IngestClient, IngestError, IngestResponse};

use crate::error::{DiscoveryError, Result};
use crate::policy::RunnerSettings;
use crate::scanner::{ProbeReport, Prober};

/// Prober returning a fixed report after an optional delay.
#[derive(Debug, Default)]
pub struct FakeProber {
    pub hosts: Vec<IpAddr>,
    pub warnings: Vec<String>,
    pub fail: bool,
    pub delay: Duration,
    pub calls: AtomicUsize,
    pub in_flight: AtomicUsize,
    pub max_in_flight: AtomicUsize,
}

impl FakeProber {
    pub fn with_hosts(hosts: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            hosts: hosts.iter().map(|h| h.parse().unwrap()).collect(),
            ..Default::default()
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Prober for FakeProber {
    async fn probe(&self, _scope: &Scope) -> Result<ProbeReport> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if self.fail {
            return Err(DiscoveryError::NmapFailed {
                code: 1,
                stderr: "Failed to open device eth9".to_string(),
            });
        }
        Ok(ProbeReport {
            hosts: self.hosts.clone(),
            warnings: self.warnings.clone(),
        })
    }
}

/// How [`RecordingClient`] answers.
#[derive(Debug, Clone, Default)]
pub enum Reply {
    #[default]
    Accept,
    Reject(Vec<String>),
    Fail,
}

/// Ingestion client that records every batch it receives.
#[derive(Debug, Default)]
pub struct RecordingClient {
    pub reply: Reply,
    pub batches: Mutex<Vec<Vec<Entity>>>,
}

impl RecordingClient {
    pub fn replying(reply: Reply) -> Arc<Self> {
        Arc::new(Self {
            reply,
            batches: Mutex::default(),
        })
    }

    pub fn batches(&self) -> Vec<Vec<Entity>> {
        self.batches.lock().unwrap().clone()
    }
}

#[async_trait]
impl IngestClient for RecordingClient {
    async fn ingest(
        &self,
        entities: Vec<Entity>,
    ) -> std::result::Result<IngestResponse, IngestError> {
        self.batches.lock().unwrap().push(entities);
        match &self.reply {
            Reply::Accept => Ok(IngestResponse::default()),
            Reply::Reject(errors) => Ok(IngestResponse {
                errors: errors.clone(),
            }),
            Reply::Fail => Err(IngestError::Status {
                status: 503,
                body: "upstream unavailable".to_string(),
            }),
        }
    }
}

/// Settings with short delays so one-shot policies fire promptly in tests.
pub fn quick_settings() -> RunnerSettings {
    RunnerSettings {
        start_delay: Duration::from_millis(20),
        shutdown_grace: Duration::from_secs(1),
        ..RunnerSettings::default()
    }
}
