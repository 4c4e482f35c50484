//! Probe engines.
//!
//! [`Prober`] is the capability a policy run needs: scan a scope, report
//! responsive hosts. [`NmapProber`] executes nmap as a child process via
//! `tokio::process::Command` and parses its XML output.

use std::net::IpAddr;
use std::time::Instant;

use async_trait::async_trait;
use discovery_core::Scope;
use tokio::process::Command;

use crate::error::{DiscoveryError, Result};
use crate::nmap_xml;

/// Outcome of a successful probe.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProbeReport {
    /// Responsive hosts, in the order the engine reported them.
    pub hosts: Vec<IpAddr>,
    /// Non-fatal diagnostics emitted during the scan.
    pub warnings: Vec<String>,
}

/// Performs host discovery over a target scope.
///
/// Dropping the returned future must abandon the scan; runs rely on this to
/// enforce their deadline.
#[async_trait]
pub trait Prober: Send + Sync {
    async fn probe(&self, scope: &Scope) -> Result<ProbeReport>;
}

/// Wrapper around the nmap binary.
#[derive(Debug, Clone)]
pub struct NmapProber {
    nmap_path: String,
}

impl NmapProber {
    pub fn new(nmap_path: &str) -> Self {
        Self {
            nmap_path: nmap_path.to_string(),
        }
    }

    /// Verify nmap is installed and accessible.
    pub async fn verify_installation(&self) -> Result<String> {
        let output = Command::new(&self.nmap_path)
            .arg("--version")
            .output()
            .await
            .map_err(|_| DiscoveryError::NmapNotFound {
                path: self.nmap_path.clone(),
            })?;

        String::from_utf8(output.stdout).map_err(|e| DiscoveryError::XmlParse(e.to_string()))
    }
}

/// Command-line arguments for scanning `scope`.
///
/// A scope without ports is a ping sweep (`-sn`); with ports it becomes a
/// TCP connect scan over exactly those ports, which needs no raw sockets.
pub fn nmap_args(scope: &Scope) -> Vec<String> {
    let mut args: Vec<String> = if scope.ports.is_empty() {
        vec!["-sn".to_string()]
    } else {
        let ports: Vec<String> = scope.ports.iter().map(u16::to_string).collect();
        vec!["-sT".to_string(), "-p".to_string(), ports.join(",")]
    };
    args.extend(["-oX", "-", "--noninteractive"].map(String::from));
    args.extend(scope.targets.iter().cloned());
    args
}

/// Non-empty stderr lines, which nmap uses for warnings.
fn stderr_warnings(stderr: &[u8]) -> Vec<String> {
    String::from_utf8_lossy(stderr)
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(String::from)
        .collect()
}

#[async_trait]
impl Prober for NmapProber {
    async fn probe(&self, scope: &Scope) -> Result<ProbeReport> {
        let start = Instant::now();
        let args = nmap_args(scope);

        tracing::debug!(targets = ?scope.targets, ports = ?scope.ports, "Starting nmap scan");

        let output = Command::new(&self.nmap_path)
            .args(&args)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| DiscoveryError::NmapNotFound {
                path: format!("{}: {e}", self.nmap_path),
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            return Err(DiscoveryError::NmapFailed {
                code: output.status.code().unwrap_or(-1),
                stderr,
            });
        }

        let nmap_run = nmap_xml::parse_nmap_xml(&output.stdout)?;
        let mut warnings = stderr_warnings(&output.stderr);
        if let Some(msg) = nmap_run.error_msg() {
            warnings.push(msg.to_string());
        }
        let hosts = nmap_run.up_hosts();

        tracing::debug!(
            hosts_up = hosts.len(),
            duration_ms = start.elapsed().as_millis(),
            "Nmap scan complete"
        );

        Ok(ProbeReport { hosts, warnings })
    }
}
