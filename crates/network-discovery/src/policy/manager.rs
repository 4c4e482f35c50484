//! Policy manager: the registry of running policies.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use discovery_core::Policy;
use discovery_ingest::IngestClient;
use serde::Deserialize;
use tokio::sync::Mutex;

use crate::config::resolve_env_vars;
use crate::error::{DiscoveryError, Result};
use crate::policy::runner::{PolicyRunner, RunnerSettings};
use crate::scanner::Prober;

/// Scan options this service understands.
pub const CAPABILITIES: &[&str] = &["targets", "ports"];

/// Body of a create-policies request.
#[derive(Debug, Deserialize)]
struct PolicyRequest {
    #[serde(default)]
    policies: Option<BTreeMap<String, Policy>>,
}

type Registry = HashMap<String, PolicyRunner>;

/// Owns every started runner, keyed by policy name.
///
/// A name is registered exactly while its runner is started and not yet
/// stopped. All registry operations serialize on one lock.
pub struct PolicyManager {
    policies: Mutex<Registry>,
    prober: Arc<dyn Prober>,
    client: Arc<dyn IngestClient>,
    settings: RunnerSettings,
}

impl PolicyManager {
    pub fn new(
        prober: Arc<dyn Prober>,
        client: Arc<dyn IngestClient>,
        settings: RunnerSettings,
    ) -> Self {
        Self {
            policies: Mutex::new(HashMap::new()),
            prober,
            client,
            settings,
        }
    }

    /// Parse a create-policies document.
    ///
    /// `${VAR}` strings are resolved from the process environment first.
    pub fn parse_policies(raw: &[u8]) -> Result<BTreeMap<String, Policy>> {
        Self::parse_policies_with(raw, &|name| std::env::var(name).ok())
    }

    fn parse_policies_with(
        raw: &[u8],
        lookup: &dyn Fn(&str) -> Option<String>,
    ) -> Result<BTreeMap<String, Policy>> {
        let doc: serde_yaml::Value =
            serde_yaml::from_slice(raw).map_err(|e| DiscoveryError::Malformed(e.to_string()))?;
        if doc.is_null() {
            return Err(DiscoveryError::NoPoliciesFound);
        }

        let request: PolicyRequest = serde_yaml::from_value(resolve_env_vars(doc, lookup))
            .map_err(|e| DiscoveryError::Malformed(e.to_string()))?;

        match request.policies {
            Some(policies) if !policies.is_empty() => Ok(policies),
            _ => Err(DiscoveryError::NoPoliciesFound),
        }
    }

    pub fn capabilities(&self) -> Vec<&'static str> {
        CAPABILITIES.to_vec()
    }

    pub async fn has_policy(&self, name: &str) -> bool {
        self.policies.lock().await.contains_key(name)
    }

    /// Names of every registered policy, sorted.
    pub async fn policy_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.policies.lock().await.keys().cloned().collect();
        names.sort();
        names
    }

    /// Start `policy` under `name`. A policy without targets is rejected
    /// even when the name is already running; otherwise starting a running
    /// name leaves the existing runner untouched.
    pub async fn start_policy(&self, name: &str, policy: Policy) -> Result<()> {
        let mut registry = self.policies.lock().await;
        self.start_locked(&mut registry, name, policy)
    }

    fn start_locked(&self, registry: &mut Registry, name: &str, policy: Policy) -> Result<()> {
        if policy.scope.targets.is_empty() {
            return Err(DiscoveryError::NoTargets {
                policy: name.to_string(),
            });
        }
        if registry.contains_key(name) {
            tracing::debug!(policy = %name, "Policy already running");
            return Ok(());
        }

        let mut runner = PolicyRunner::new(
            name,
            policy,
            self.prober.clone(),
            self.client.clone(),
            &self.settings,
        )?;
        runner.start();
        registry.insert(name.to_string(), runner);

        tracing::info!(policy = %name, "Policy started");
        Ok(())
    }

    /// Start every policy in `policies` or none of them.
    ///
    /// A name that is already registered fails the whole request with
    /// [`DiscoveryError::AlreadyExists`]. On any failure the policies this
    /// call started are stopped again before the error is returned.
    pub async fn start_policies(
        &self,
        policies: impl IntoIterator<Item = (String, Policy)>,
    ) -> Result<Vec<String>> {
        let mut registry = self.policies.lock().await;
        let mut started = Vec::new();

        for (name, policy) in policies {
            let attempt = if registry.contains_key(&name) {
                Err(DiscoveryError::AlreadyExists {
                    policy: name.clone(),
                })
            } else {
                self.start_locked(&mut registry, &name, policy)
            };

            if let Err(cause) = attempt {
                tracing::warn!(
                    policy = %name,
                    error = %cause,
                    rolled_back = ?started,
                    "Policy start failed, rolling back request"
                );
                return match Self::stop_each(&mut registry, &started).await {
                    Ok(()) => Err(cause),
                    Err(rollback) => Err(DiscoveryError::Rollback {
                        cause: Box::new(cause),
                        rollback: Box::new(rollback),
                    }),
                };
            }
            started.push(name);
        }

        Ok(started)
    }

    /// Stop and unregister `name`. Returns whether `name` was registered;
    /// unknown names are a no-op.
    ///
    /// The entry is removed even when the stop fails; the error is still
    /// returned.
    pub async fn stop_policy(&self, name: &str) -> Result<bool> {
        let mut registry = self.policies.lock().await;
        Self::stop_locked(&mut registry, name).await
    }

    /// Stop every registered policy.
    ///
    /// Every runner is stopped and removed; the first failure is returned.
    pub async fn stop_all(&self) -> Result<()> {
        let mut registry = self.policies.lock().await;
        let mut names: Vec<String> = registry.keys().cloned().collect();
        names.sort();
        Self::stop_each(&mut registry, &names).await
    }

    async fn stop_each(registry: &mut Registry, names: &[String]) -> Result<()> {
        let mut first_err = None;
        for name in names {
            if let Err(e) = Self::stop_locked(registry, name).await {
                first_err.get_or_insert(e);
            }
        }
        first_err.map_or(Ok(()), Err)
    }

    async fn stop_locked(registry: &mut Registry, name: &str) -> Result<bool> {
        let Some(mut runner) = registry.remove(name) else {
            return Ok(false);
        };

        match runner.stop().await {
            Ok(()) => {
                tracing::info!(policy = %name, "Policy stopped");
                Ok(true)
            }
            Err(e) => {
                tracing::error!(policy = %name, error = %e, "Error stopping policy");
                Err(e)
            }
        }
    }
}
