//! Configuration for the network-discovery daemon.
//!
//! Loaded from a YAML file given on the command line, with
//! `DISCOVERY__`-prefixed environment variables layered on top
//! (e.g. `DISCOVERY__NETWORK_DISCOVERY__CONFIG__PORT=9000`).
//! String values written as `${VAR}` are replaced by the variable's value.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use discovery_core::Policy;
use serde::Deserialize;
use serde_yaml::Value;

use crate::error::{DiscoveryError, Result};

/// Root of the configuration file.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub diode: Diode,
    #[serde(default)]
    pub network_discovery: Network,
}

/// `diode:` section.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Diode {
    #[serde(default)]
    pub config: DiodeConfig,
}

/// Upstream ingestion endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct DiodeConfig {
    #[serde(default)]
    pub target: String,
    #[serde(default)]
    pub api_key: String,
    /// Limit on a single batch delivery.
    #[serde(default = "default_ingest_timeout")]
    pub timeout_secs: u64,
}

impl DiodeConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for DiodeConfig {
    fn default() -> Self {
        Self {
            target: String::new(),
            api_key: String::new(),
            timeout_secs: default_ingest_timeout(),
        }
    }
}

/// `network_discovery:` section. Boot-time policies under
/// `network_discovery.policies` are read separately by [`load`].
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Network {
    #[serde(default)]
    pub config: StartupConfig,
}

/// Daemon settings.
#[derive(Debug, Clone, Deserialize)]
pub struct StartupConfig {
    /// Address the control plane binds to.
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// DEBUG, INFO, WARN or ERROR.
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// TEXT or JSON.
    #[serde(default = "default_log_format")]
    pub log_format: String,

    /// Path to the nmap binary.
    #[serde(default = "default_nmap_path")]
    pub nmap_path: String,

    /// How long stopping a policy waits for an in-flight run.
    #[serde(default = "default_shutdown_grace")]
    pub shutdown_grace_secs: u64,
}

impl StartupConfig {
    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8073
}

fn default_log_level() -> String {
    "INFO".to_string()
}

fn default_log_format() -> String {
    "TEXT".to_string()
}

fn default_nmap_path() -> String {
    "nmap".to_string()
}

fn default_shutdown_grace() -> u64 {
    10
}

fn default_ingest_timeout() -> u64 {
    30
}

impl Default for StartupConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            log_level: default_log_level(),
            log_format: default_log_format(),
            nmap_path: default_nmap_path(),
            shutdown_grace_secs: default_shutdown_grace(),
        }
    }
}

/// A loaded configuration file.
#[derive(Debug, Clone, Default)]
pub struct Loaded {
    pub config: Config,
    /// Policies to start at boot, keyed by name.
    pub policies: BTreeMap<String, Policy>,
}

/// Read and resolve the configuration file at `path`.
pub fn load(path: &Path) -> Result<Loaded> {
    if !path.exists() {
        return Err(DiscoveryError::Config(format!(
            "configuration file '{}' does not exist",
            path.display()
        )));
    }
    let raw = std::fs::read_to_string(path)?;
    load_str(&raw, &|name| std::env::var(name).ok())
}

/// Resolve a configuration document, looking `${VAR}` references up with
/// `lookup`.
pub fn load_str(raw: &str, lookup: &dyn Fn(&str) -> Option<String>) -> Result<Loaded> {
    let doc: Value = serde_yaml::from_str(raw)
        .map_err(|e| DiscoveryError::Config(format!("error parsing configuration file: {e}")))?;
    let doc = resolve_env_vars(doc, lookup);

    let policies = match doc.get("network_discovery").and_then(|n| n.get("policies")) {
        Some(Value::Null) | None => BTreeMap::new(),
        Some(section) => serde_yaml::from_value(section.clone()).map_err(|e| {
            DiscoveryError::Config(format!("error parsing boot policies: {e}"))
        })?,
    };

    // `config` cannot read policies (names are case-sensitive); it only
    // sees the fixed-key sections.
    let mut settings = doc;
    if let Some(Value::Mapping(network)) = settings.get_mut("network_discovery") {
        network.remove("policies");
    }
    let resolved = serde_yaml::to_string(&settings)
        .map_err(|e| DiscoveryError::Config(e.to_string()))?;

    let cfg = config::Config::builder()
        .add_source(config::File::from_str(&resolved, config::FileFormat::Yaml))
        .add_source(
            config::Environment::with_prefix("DISCOVERY")
                .separator("__")
                .try_parsing(true),
        )
        .build()?;
    let config = cfg.try_deserialize::<Config>()?;

    Ok(Loaded { config, policies })
}

/// Replace every string of the exact form `${VAR}` with the value `lookup`
/// returns for `VAR`. Unknown variables are left as written.
pub fn resolve_env_vars(value: Value, lookup: &dyn Fn(&str) -> Option<String>) -> Value {
    match value {
        Value::Mapping(map) => Value::Mapping(
            map.into_iter()
                .map(|(k, v)| (k, resolve_env_vars(v, lookup)))
                .collect(),
        ),
        Value::Sequence(seq) => Value::Sequence(
            seq.into_iter()
                .map(|v| resolve_env_vars(v, lookup))
                .collect(),
        ),
        Value::String(s) => {
            let resolved = s
                .strip_prefix("${")
                .and_then(|rest| rest.strip_suffix('}'))
                .and_then(lookup);
            Value::String(resolved.unwrap_or(s))
        }
        other => other,
    }
}
