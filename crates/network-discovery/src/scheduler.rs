//! Job scheduling engine.
//!
//! Each [`Scheduler`] drives one job on its own tokio task. Invocations of
//! a job never overlap: the next trigger is computed only after the current
//! invocation returns. A trigger that came due while the job was still
//! running is deferred and fires as soon as the job is free; several missed
//! triggers coalesce into one deferred invocation.

use std::future::Future;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::{DiscoveryError, Result};

/// Upper bound when counting missed cron triggers after an overrun.
const MAX_COUNTED_MISSES: usize = 1024;

/// When a job fires.
#[derive(Debug, Clone)]
pub enum Trigger {
    /// Recurring, on a cron schedule (UTC).
    Cron(Box<cron::Schedule>),
    /// Exactly once, at the given instant.
    Once(Instant),
}

/// What the driver does after an invocation returns.
#[derive(Debug, PartialEq, Eq)]
enum Next {
    Wait(Duration),
    Deferred { missed: u64 },
    Done,
}

struct Fired {
    at: Instant,
    wall: DateTime<Utc>,
}

impl Trigger {
    /// Parse a cron expression. Standard five-field expressions are
    /// accepted and fire at second zero; six- and seven-field expressions
    /// (with seconds, optional year) are used as written.
    pub fn cron(expr: &str) -> std::result::Result<Self, cron::error::Error> {
        let expr = expr.trim();
        let normalized = if expr.split_whitespace().count() == 5 {
            format!("0 {expr}")
        } else {
            expr.to_string()
        };
        let schedule = cron::Schedule::from_str(&normalized)?;
        Ok(Trigger::Cron(Box::new(schedule)))
    }

    /// Fire once, `delay` from now.
    pub fn once_after(delay: Duration) -> Self {
        Trigger::Once(Instant::now() + delay)
    }

    fn first_delay(&self) -> Option<Duration> {
        match self {
            Trigger::Cron(schedule) => {
                let now = Utc::now();
                schedule.after(&now).next().map(|t| until(now, t))
            }
            Trigger::Once(at) => Some(at.saturating_duration_since(Instant::now())),
        }
    }

    fn after_run(&self, fired: &Fired) -> Next {
        match self {
            Trigger::Once(_) => Next::Done,
            Trigger::Cron(schedule) => {
                let now = Utc::now();
                let missed = schedule
                    .after(&fired.wall)
                    .take(MAX_COUNTED_MISSES)
                    .take_while(|t| *t <= now)
                    .count();
                if missed > 0 {
                    return Next::Deferred {
                        missed: missed as u64,
                    };
                }
                match schedule.after(&now).next() {
                    Some(t) => Next::Wait(until(now, t)),
                    None => Next::Done,
                }
            }
        }
    }
}

fn until(now: DateTime<Utc>, then: DateTime<Utc>) -> Duration {
    (then - now).to_std().unwrap_or(Duration::ZERO)
}

/// A single job bound to its trigger.
///
/// Created idle; [`Scheduler::start`] arms it and [`Scheduler::shutdown`]
/// tears it down. A scheduler that has been shut down cannot be restarted.
#[derive(Debug)]
pub struct Scheduler {
    job: String,
    trigger: Option<Trigger>,
    grace: Duration,
    token: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

impl Scheduler {
    /// `grace` bounds how long [`Scheduler::shutdown`] waits for an
    /// in-flight invocation before aborting it.
    pub fn new(job: impl Into<String>, trigger: Trigger, grace: Duration) -> Self {
        Self {
            job: job.into(),
            trigger: Some(trigger),
            grace,
            token: CancellationToken::new(),
            handle: None,
        }
    }

    /// Arm the job on a background task. `task` is called once per trigger.
    ///
    /// Returns `false` if the scheduler was already started or shut down.
    pub fn start<F, Fut>(&mut self, task: F) -> bool
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let Some(trigger) = self.trigger.take() else {
            return false;
        };
        let handle = tokio::spawn(drive(
            self.job.clone(),
            trigger,
            self.token.clone(),
            task,
        ));
        self.handle = Some(handle);
        true
    }

    /// Whether the background task exists and has not exited.
    pub fn is_armed(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Cancel pending and future triggers and wait for the background task.
    ///
    /// An invocation already running gets `grace` to finish and is aborted
    /// after that. Fails only if the background task panicked.
    pub async fn shutdown(&mut self) -> Result<()> {
        self.token.cancel();
        self.trigger = None;
        let Some(mut handle) = self.handle.take() else {
            return Ok(());
        };

        match tokio::time::timeout(self.grace, &mut handle).await {
            Ok(joined) => joined.map_err(|e| self.shutdown_error(e)),
            Err(_) => {
                tracing::warn!(
                    job = %self.job,
                    grace_ms = self.grace.as_millis(),
                    "In-flight run outlived the shutdown grace period, aborting it"
                );
                handle.abort();
                match handle.await {
                    Err(e) if !e.is_cancelled() => Err(self.shutdown_error(e)),
                    _ => Ok(()),
                }
            }
        }
    }

    fn shutdown_error(&self, e: tokio::task::JoinError) -> DiscoveryError {
        DiscoveryError::Shutdown {
            job: self.job.clone(),
            reason: e.to_string(),
        }
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

/// Trigger loop for one job.
async fn drive<F, Fut>(job: String, trigger: Trigger, token: CancellationToken, mut task: F)
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let Some(mut delay) = trigger.first_delay() else {
        tracing::warn!(job = %job, "Schedule has no upcoming fire time");
        return;
    };

    loop {
        tokio::select! {
            biased;
            _ = token.cancelled() => {
                tracing::debug!(job = %job, "Job cancelled");
                return;
            }
            _ = tokio::time::sleep(delay) => {}
        }

        let fired = Fired {
            at: Instant::now(),
            wall: Utc::now(),
        };
        task().await;

        match trigger.after_run(&fired) {
            Next::Wait(d) => delay = d,
            Next::Deferred { missed } => {
                tracing::warn!(
                    job = %job,
                    missed,
                    "Run overlapped its next trigger, firing the deferred trigger now"
                );
                delay = Duration::ZERO;
            }
            Next::Done => {
                tracing::debug!(job = %job, "Job has no further triggers");
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Arc;

    fn counting_task(
        runs: &Arc<AtomicUsize>,
    ) -> impl FnMut() -> std::pin::Pin<Box<dyn Future<Output = ()> + Send>> + Send + 'static {
        let runs = runs.clone();
        move || {
            let runs = runs.clone();
            Box::pin(async move {
                runs.fetch_add(1, Ordering::SeqCst);
            })
        }
    }

    #[test]
    fn test_cron_accepts_five_and_six_fields() {
        assert!(Trigger::cron("0 0 * * *").is_ok());
        assert!(Trigger::cron("*/10 * * * * *").is_ok());
        assert!(Trigger::cron("  */5 * * * *  ").is_ok());
    }

    #[test]
    fn test_cron_rejects_garbage() {
        assert!(Trigger::cron("not a schedule").is_err());
        assert!(Trigger::cron("61 * * * *").is_err());
        assert!(Trigger::cron("").is_err());
    }

    #[test]
    fn test_cron_first_delay_within_a_minute() {
        let trigger = Trigger::cron("* * * * *").unwrap();
        let delay = trigger.first_delay().unwrap();
        assert!(delay <= Duration::from_secs(60));
    }

    #[test]
    fn test_cron_after_run_defers_missed_triggers() {
        let trigger = Trigger::cron("* * * * * *").unwrap();

        // Fired five seconds ago: the triggers since then were missed.
        let overran = Fired {
            at: Instant::now(),
            wall: Utc::now() - chrono::Duration::seconds(5),
        };
        match trigger.after_run(&overran) {
            Next::Deferred { missed } => assert!((4..=6).contains(&missed), "missed {missed}"),
            other => panic!("expected a deferred trigger, got {other:?}"),
        }

        // Fired just now: wait for the next second.
        let on_time = Fired {
            at: Instant::now(),
            wall: Utc::now(),
        };
        match trigger.after_run(&on_time) {
            Next::Wait(delay) => assert!(delay <= Duration::from_secs(1)),
            Next::Deferred { missed } => assert_eq!(missed, 1),
            Next::Done => panic!("cron schedule ended"),
        }
    }

    #[test]
    fn test_once_after_run_is_done() {
        let trigger = Trigger::once_after(Duration::ZERO);
        let fired = Fired {
            at: Instant::now(),
            wall: Utc::now(),
        };
        assert_eq!(trigger.after_run(&fired), Next::Done);
    }

    #[tokio::test(start_paused = true)]
    async fn test_once_fires_exactly_once() {
        let runs = Arc::new(AtomicUsize::new(0));
        let mut sched = Scheduler::new(
            "once",
            Trigger::once_after(Duration::from_secs(1)),
            Duration::from_secs(5),
        );
        assert!(sched.start(counting_task(&runs)));

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert!(!sched.is_armed());

        sched.shutdown().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_before_first_trigger() {
        let runs = Arc::new(AtomicUsize::new(0));
        let mut sched = Scheduler::new(
            "later",
            Trigger::once_after(Duration::from_secs(10)),
            Duration::from_secs(5),
        );
        sched.start(counting_task(&runs));
        assert!(sched.is_armed());

        tokio::time::sleep(Duration::from_secs(1)).await;
        sched.shutdown().await.unwrap();
        tokio::time::sleep(Duration::from_secs(30)).await;

        assert_eq!(runs.load(Ordering::SeqCst), 0);
        assert!(!sched.is_armed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_overrunning_job_never_overlaps() {
        let in_flight = Arc::new(AtomicUsize::new(0));
        let max_in_flight = Arc::new(AtomicUsize::new(0));
        let runs = Arc::new(AtomicUsize::new(0));

        let mut sched = Scheduler::new(
            "slow",
            Trigger::cron("* * * * * *").unwrap(),
            Duration::from_secs(5),
        );
        let (f, m, r) = (in_flight.clone(), max_in_flight.clone(), runs.clone());
        sched.start(move || {
            let (f, m, r) = (f.clone(), m.clone(), r.clone());
            async move {
                let now = f.fetch_add(1, Ordering::SeqCst) + 1;
                m.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(2500)).await;
                f.fetch_sub(1, Ordering::SeqCst);
                r.fetch_add(1, Ordering::SeqCst);
            }
        });

        tokio::time::sleep(Duration::from_secs(10)).await;
        sched.shutdown().await.unwrap();

        // Every-second schedule, each run taking two and a half seconds.
        assert_eq!(max_in_flight.load(Ordering::SeqCst), 1);
        assert!(runs.load(Ordering::SeqCst) >= 2);
        assert_eq!(in_flight.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_aborts_run_after_grace() {
        let finished = Arc::new(AtomicBool::new(false));
        let mut sched = Scheduler::new(
            "hung",
            Trigger::once_after(Duration::ZERO),
            Duration::from_secs(1),
        );
        let done = finished.clone();
        sched.start(move || {
            let done = done.clone();
            async move {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                done.store(true, Ordering::SeqCst);
            }
        });

        tokio::time::sleep(Duration::from_secs(2)).await;
        sched.shutdown().await.unwrap();
        assert!(!finished.load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_waits_for_short_run() {
        let finished = Arc::new(AtomicBool::new(false));
        let mut sched = Scheduler::new(
            "short",
            Trigger::once_after(Duration::ZERO),
            Duration::from_secs(10),
        );
        let done = finished.clone();
        sched.start(move || {
            let done = done.clone();
            async move {
                tokio::time::sleep(Duration::from_secs(2)).await;
                done.store(true, Ordering::SeqCst);
            }
        });

        tokio::time::sleep(Duration::from_secs(1)).await;
        sched.shutdown().await.unwrap();
        assert!(finished.load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn test_panicking_job_surfaces_on_shutdown() {
        let mut sched = Scheduler::new(
            "boom",
            Trigger::once_after(Duration::ZERO),
            Duration::from_secs(1),
        );
        sched.start(|| async {
            panic!("probe exploded");
        });

        tokio::time::sleep(Duration::from_secs(1)).await;
        let err = sched.shutdown().await.unwrap_err();
        assert!(matches!(err, DiscoveryError::Shutdown { ref job, .. } if job == "boom"));
    }

    #[tokio::test]
    async fn test_cannot_restart() {
        let runs = Arc::new(AtomicUsize::new(0));
        let mut sched = Scheduler::new(
            "once",
            Trigger::once_after(Duration::from_secs(60)),
            Duration::from_secs(1),
        );
        assert!(sched.start(counting_task(&runs)));
        assert!(!sched.start(counting_task(&runs)));

        sched.shutdown().await.unwrap();
        sched.shutdown().await.unwrap();
        assert!(!sched.start(counting_task(&runs)));
    }
}
