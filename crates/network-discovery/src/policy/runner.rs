//! Policy runner: one policy bound to one scheduled job.

use std::net::IpAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use discovery_core::{Defaults, Entity, IpAddress, Policy, Scope};
use discovery_ingest::IngestClient;
use tokio::time::Instant;
use tracing::Instrument;
use uuid::Uuid;

use crate::error::{DiscoveryError, Result};
use crate::scanner::Prober;
use crate::scheduler::{Scheduler, Trigger};

/// Per-run limit when a policy sets no timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(2 * 60);

/// Delay before a policy without a schedule runs, so the request that
/// created it can be answered first.
pub const ONE_SHOT_DELAY: Duration = Duration::from_secs(1);

/// Tunables shared by every runner a manager creates.
#[derive(Debug, Clone)]
pub struct RunnerSettings {
    pub default_timeout: Duration,
    pub start_delay: Duration,
    pub shutdown_grace: Duration,
}

impl Default for RunnerSettings {
    fn default() -> Self {
        Self {
            default_timeout: DEFAULT_TIMEOUT,
            start_delay: ONE_SHOT_DELAY,
            shutdown_grace: Duration::from_secs(10),
        }
    }
}

/// Observable runner state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunnerState {
    Created,
    Idle,
    Running,
    Stopped,
}

/// How a single run ended. Only ever logged; never reported to callers of
/// the control plane.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    ProbeFailed(String),
    IngestFailed(String),
    Rejected(Vec<String>),
    Ingested { entities: usize },
}

impl RunOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, RunOutcome::Ingested { .. })
    }
}

/// Correlation and deadline for one run.
#[derive(Debug, Clone)]
pub struct RunContext {
    pub policy: Arc<str>,
    pub run_id: Uuid,
    pub deadline: Instant,
}

/// Map discovered hosts to ingestible entities, labelled with `defaults`.
pub fn to_entities(hosts: &[IpAddr], defaults: &Defaults) -> Vec<Entity> {
    hosts
        .iter()
        .map(|ip| IpAddress::host(*ip).with_defaults(defaults).into())
        .collect()
}

/// The work a trigger performs. Shared between the runner and its
/// scheduler task.
struct PolicyJob {
    policy: Arc<str>,
    scope: Scope,
    defaults: Defaults,
    timeout: Duration,
    prober: Arc<dyn Prober>,
    client: Arc<dyn IngestClient>,
    running: AtomicBool,
}

/// Clears the running flag even if the run is aborted mid-flight.
struct InFlight<'a>(&'a AtomicBool);

impl<'a> InFlight<'a> {
    fn enter(flag: &'a AtomicBool) -> Self {
        flag.store(true, Ordering::SeqCst);
        Self(flag)
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl PolicyJob {
    fn context(&self) -> RunContext {
        RunContext {
            policy: self.policy.clone(),
            run_id: Uuid::new_v4(),
            deadline: Instant::now() + self.timeout,
        }
    }

    async fn run(&self, ctx: &RunContext) -> RunOutcome {
        let _in_flight = InFlight::enter(&self.running);
        let policy = &ctx.policy;
        let run_id = ctx.run_id;

        tracing::info!(policy = %policy, run_id = %run_id, targets = ?self.scope.targets, "Policy run started");

        let budget = ctx.deadline.saturating_duration_since(Instant::now());
        let report = match tokio::time::timeout(budget, self.prober.probe(&self.scope)).await {
            Ok(Ok(report)) => report,
            Ok(Err(e)) => {
                tracing::error!(policy = %policy, run_id = %run_id, error = %e, "Error running scanner");
                return RunOutcome::ProbeFailed(e.to_string());
            }
            Err(_) => {
                let e = DiscoveryError::ProbeTimeout(self.timeout);
                tracing::error!(policy = %policy, run_id = %run_id, error = %e, "Error running scanner");
                return RunOutcome::ProbeFailed(e.to_string());
            }
        };

        if !report.warnings.is_empty() {
            tracing::warn!(
                policy = %policy,
                run_id = %run_id,
                warnings = ?report.warnings,
                "Run finished with warnings"
            );
        }

        let entities = to_entities(&report.hosts, &self.defaults);
        let count = entities.len();

        match self.client.ingest(entities).await {
            Err(e) => {
                tracing::error!(policy = %policy, run_id = %run_id, error = %e, "Error ingesting entities");
                RunOutcome::IngestFailed(e.to_string())
            }
            Ok(resp) if !resp.is_accepted() => {
                tracing::error!(
                    policy = %policy,
                    run_id = %run_id,
                    errors = ?resp.errors,
                    "Error ingesting entities"
                );
                RunOutcome::Rejected(resp.errors)
            }
            Ok(_) => {
                tracing::info!(policy = %policy, run_id = %run_id, entities = count, "Entities ingested successfully");
                RunOutcome::Ingested { entities: count }
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lifecycle {
    Created,
    Armed,
    Stopped,
}

/// Runs one policy on its schedule.
///
/// `Created → Armed (start) → Stopped (stop)`. While armed the runner is
/// idle or running a scan; a stopped runner is never restarted.
pub struct PolicyRunner {
    job: Arc<PolicyJob>,
    scheduler: Scheduler,
    lifecycle: Lifecycle,
}

impl std::fmt::Debug for PolicyRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PolicyRunner")
            .field("policy", &self.job.policy)
            .field("timeout", &self.job.timeout)
            .field("state", &self.state())
            .finish()
    }
}

impl PolicyRunner {
    /// Bind `policy` to a scheduled job. Nothing fires until
    /// [`PolicyRunner::start`].
    pub fn new(
        name: &str,
        policy: Policy,
        prober: Arc<dyn Prober>,
        client: Arc<dyn IngestClient>,
        settings: &RunnerSettings,
    ) -> Result<Self> {
        let trigger = match policy.config.schedule.as_deref() {
            Some(expr) => Trigger::cron(expr).map_err(|e| DiscoveryError::InvalidSchedule {
                policy: name.to_string(),
                schedule: expr.to_string(),
                reason: e.to_string(),
            })?,
            None => Trigger::once_after(settings.start_delay),
        };

        let timeout = match policy.config.timeout {
            0 => settings.default_timeout,
            minutes => Duration::from_secs(minutes.saturating_mul(60)),
        };

        let job = Arc::new(PolicyJob {
            policy: Arc::from(name),
            scope: policy.scope,
            defaults: policy.config.defaults,
            timeout,
            prober,
            client,
            running: AtomicBool::new(false),
        });

        Ok(Self {
            job,
            scheduler: Scheduler::new(name, trigger, settings.shutdown_grace),
            lifecycle: Lifecycle::Created,
        })
    }

    /// Effective per-run timeout.
    pub fn timeout(&self) -> Duration {
        self.job.timeout
    }

    pub fn state(&self) -> RunnerState {
        match self.lifecycle {
            Lifecycle::Created => RunnerState::Created,
            Lifecycle::Stopped => RunnerState::Stopped,
            Lifecycle::Armed if self.job.running.load(Ordering::SeqCst) => RunnerState::Running,
            Lifecycle::Armed => RunnerState::Idle,
        }
    }

    /// Arm the scheduler. Returns immediately; runs happen on a background
    /// task.
    pub fn start(&mut self) {
        if self.lifecycle != Lifecycle::Created {
            tracing::warn!(policy = %self.job.policy, state = ?self.state(), "Runner already started");
            return;
        }

        let job = self.job.clone();
        self.scheduler.start(move || {
            let job = job.clone();
            async move {
                let ctx = job.context();
                let span = tracing::info_span!("policy_run", policy = %ctx.policy, run_id = %ctx.run_id);
                job.run(&ctx).instrument(span).await;
            }
        });
        self.lifecycle = Lifecycle::Armed;
        tracing::debug!(policy = %self.job.policy, timeout_secs = self.job.timeout.as_secs(), "Runner armed");
    }

    /// Cancel future triggers and wait for the scheduler to wind down.
    /// Calling it again is a no-op.
    pub async fn stop(&mut self) -> Result<()> {
        if self.lifecycle == Lifecycle::Stopped {
            return Ok(());
        }
        self.lifecycle = Lifecycle::Stopped;
        self.scheduler.shutdown().await?;
        tracing::debug!(policy = %self.job.policy, "Runner stopped");
        Ok(())
    }
}
