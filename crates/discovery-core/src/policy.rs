//! Policy documents.
//!
//! A policy is the declarative description of what to scan, on what
//! schedule, and how to label what was found. Its name is not part of the
//! document: callers key policies by name in the enclosing map.

use serde::{Deserialize, Serialize};

// ── Policy ────────────────────────────────────────────────────────

/// A network discovery policy.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Policy {
    #[serde(default)]
    pub config: PolicyConfig,
    #[serde(default)]
    pub scope: Scope,
}

/// Scheduling and labelling for a policy.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyConfig {
    /// Cron expression. Absent means run once, shortly after creation.
    #[serde(default)]
    pub schedule: Option<String>,

    /// Metadata copied onto every discovered entity.
    #[serde(default)]
    pub defaults: Defaults,

    /// Maximum duration of a single run, in minutes. Zero means the default.
    #[serde(default)]
    pub timeout: u64,
}

/// Free-form metadata attached to discovered entities.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Defaults {
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub comments: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
}

impl Defaults {
    /// Description, if set to something non-empty.
    pub fn description(&self) -> Option<&str> {
        non_empty(self.description.as_deref())
    }

    /// Comments, if set to something non-empty.
    pub fn comments(&self) -> Option<&str> {
        non_empty(self.comments.as_deref())
    }

    pub fn tags(&self) -> &[String] {
        &self.tags
    }
}

/// What a policy scans.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Scope {
    /// CIDR blocks, addresses or hostnames, in the order given.
    #[serde(default)]
    pub targets: Vec<String>,

    /// Ports to probe. Empty means a plain host sweep.
    #[serde(default)]
    pub ports: Vec<u16>,
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.is_empty())
}
