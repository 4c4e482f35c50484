//! Nmap XML output deserialization.
//!
//! Nmap's `-oX -` flag writes structured XML to stdout. Only what host
//! discovery needs is modelled here: host state, addresses and names.

use std::net::IpAddr;

use serde::Deserialize;

use crate::error::{DiscoveryError, Result};

/// Root element: `<nmaprun>`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename = "nmaprun")]
pub struct NmapRun {
    #[serde(rename = "@args")]
    pub args: Option<String>,
    #[serde(rename = "host", default)]
    pub hosts: Vec<NmapHost>,
    pub runstats: Option<RunStats>,
}

/// A single host from scan results.
#[derive(Debug, Clone, Deserialize)]
pub struct NmapHost {
    pub status: Option<HostStatus>,
    #[serde(rename = "address", default)]
    pub addresses: Vec<Address>,
    pub hostnames: Option<Hostnames>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HostStatus {
    #[serde(rename = "@state")]
    pub state: String,
    #[serde(rename = "@reason")]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Address {
    #[serde(rename = "@addr")]
    pub addr: String,
    #[serde(rename = "@addrtype")]
    pub addr_type: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Hostnames {
    #[serde(rename = "hostname", default)]
    pub hostnames: Vec<Hostname>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Hostname {
    #[serde(rename = "@name")]
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RunStats {
    pub finished: Option<Finished>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Finished {
    #[serde(rename = "@elapsed")]
    pub elapsed: Option<String>,
    #[serde(rename = "@errormsg")]
    pub error_msg: Option<String>,
}

impl NmapHost {
    /// The first IP address nmap reported for the host (MAC entries skipped).
    pub fn ip(&self) -> Option<IpAddr> {
        self.addresses
            .iter()
            .filter(|a| a.addr_type == "ipv4" || a.addr_type == "ipv6")
            .find_map(|a| a.addr.parse().ok())
    }

    /// Extract the first hostname, if present.
    pub fn hostname(&self) -> Option<&str> {
        self.hostnames
            .as_ref()
            .and_then(|hn| hn.hostnames.first())
            .map(|h| h.name.as_str())
    }

    /// Check if the host is up.
    pub fn is_up(&self) -> bool {
        self.status.as_ref().is_some_and(|s| s.state == "up")
    }
}

impl NmapRun {
    /// Addresses of every host reported up, in scan order.
    pub fn up_hosts(&self) -> Vec<IpAddr> {
        self.hosts
            .iter()
            .filter(|h| h.is_up())
            .filter_map(NmapHost::ip)
            .collect()
    }

    /// Error message nmap attached to the run, if it finished abnormally.
    pub fn error_msg(&self) -> Option<&str> {
        self.runstats
            .as_ref()
            .and_then(|r| r.finished.as_ref())
            .and_then(|f| f.error_msg.as_deref())
            .filter(|m| !m.is_empty())
    }
}

/// Parse nmap XML bytes into a structured `NmapRun`.
pub fn parse_nmap_xml(xml: &[u8]) -> Result<NmapRun> {
    quick_xml::de::from_reader(xml).map_err(|e| DiscoveryError::XmlParse(format!("{e}")))
}
