//! Entity types produced by discovery runs.
//!
//! Entities are ephemeral: a run builds them from scan results, hands the
//! batch to the ingestion client and drops them.

use std::net::IpAddr;

use ipnet::IpNet;
use serde::{Deserialize, Serialize};

use crate::policy::Defaults;

// ── Entities ──────────────────────────────────────────────────────

/// A discovered IP address, rendered as a single-host network.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IpAddress {
    pub address: IpNet,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comments: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
}

impl IpAddress {
    /// Build an exact-match entry (`/32` or `/128`) for a host address.
    pub fn host(addr: IpAddr) -> Self {
        Self {
            address: IpNet::from(addr),
            description: None,
            comments: None,
            tags: Vec::new(),
        }
    }

    /// Copy non-empty policy defaults onto this entry.
    pub fn with_defaults(mut self, defaults: &Defaults) -> Self {
        self.description = defaults.description().map(String::from);
        self.comments = defaults.comments().map(String::from);
        self.tags = defaults.tags().to_vec();
        self
    }
}

/// Enum wrapper for everything a run can hand to the ingestion client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "entity_type", rename_all = "snake_case")]
pub enum Entity {
    IpAddress(IpAddress),
}

impl From<IpAddress> for Entity {
    fn from(ip: IpAddress) -> Self {
        Entity::IpAddress(ip)
    }
}
