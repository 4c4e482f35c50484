//! Error types for the network-discovery crate.

use std::time::Duration;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum DiscoveryError {
    #[error("{policy} : no targets found in the policy")]
    NoTargets { policy: String },

    #[error("policy '{policy}' already exists")]
    AlreadyExists { policy: String },

    #[error("no policies found in the request")]
    NoPoliciesFound,

    #[error("{0}")]
    Malformed(String),

    #[error("{policy} : invalid schedule '{schedule}': {reason}")]
    InvalidSchedule {
        policy: String,
        schedule: String,
        reason: String,
    },

    #[error("Scheduler for job '{job}' failed to shut down: {reason}")]
    Shutdown { job: String, reason: String },

    #[error("{cause}; rollback failed: {rollback}")]
    Rollback {
        cause: Box<DiscoveryError>,
        rollback: Box<DiscoveryError>,
    },

    #[error("Nmap not found at path: {path}")]
    NmapNotFound { path: String },

    #[error("Nmap exited with code {code}: {stderr}")]
    NmapFailed { code: i32, stderr: String },

    #[error("Failed to parse nmap XML output: {0}")]
    XmlParse(String),

    #[error("Probe exceeded its deadline of {0:?}")]
    ProbeTimeout(Duration),

    #[error("Config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<config::ConfigError> for DiscoveryError {
    fn from(e: config::ConfigError) -> Self {
        DiscoveryError::Config(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, DiscoveryError>;
