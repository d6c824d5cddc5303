// One reconciliation cycle (descriptors → samples → merge → persist/prune) and the
// daemon loop that repeats it on an interval.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::oneshot;
use tokio::time::{Duration, Instant, interval};
use tracing::{Instrument, debug, error, info, instrument, warn};

use crate::cgroup::ProcessResolver;
use crate::collector;
use crate::gpu_repo::GpuTelemetry;
use crate::reconcile::{self, ReconcileReport};
use crate::slurm_repo::Scheduler;
use crate::stats_repo::StatsRepo;

/// External collaborators a cycle reads from.
pub struct CycleDeps {
    pub scheduler: Arc<dyn Scheduler>,
    pub gpus: Arc<dyn GpuTelemetry>,
    pub resolver: Arc<dyn ProcessResolver>,
}

#[derive(Debug, Clone)]
pub struct CycleConfig {
    pub retention_days: u32,
    /// Cycles slower than this log a warning.
    pub slow_cycle_warn_secs: u64,
    /// A lease older than this belongs to a dead cycle and may be taken over.
    pub lease_stale_secs: u64,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CycleReport {
    /// Single-node jobs on this node with a descriptor this cycle.
    pub tracked_jobs: usize,
    /// Jobs with a GPU request, i.e. jobs that got a sample.
    pub sampled_jobs: usize,
    pub reconcile: ReconcileReport,
}

/// Runs one pass at `now`. Stages run strictly in order; an error from the scheduler or
/// GPU listing aborts before anything is written.
#[instrument(skip(deps, repo), fields(operation = "run_cycle"))]
pub async fn run_cycle(
    deps: &CycleDeps,
    repo: &StatsRepo,
    retention_days: u32,
    now: DateTime<Utc>,
) -> anyhow::Result<CycleReport> {
    let descriptors = collector::load_job_descriptors(deps.scheduler.as_ref()).await?;
    let samples =
        collector::collect_samples(&descriptors, deps.gpus.as_ref(), deps.resolver.as_ref())
            .await?;
    let merged = reconcile::merge_samples(repo, &samples, now).await;

    let active: HashSet<_> = samples.keys().cloned().collect();
    let reconcile = reconcile::reconcile(repo, &merged, &active, now, retention_days).await?;

    Ok(CycleReport {
        tracked_jobs: descriptors.len(),
        sampled_jobs: samples.len(),
        reconcile,
    })
}

/// Random delay in `[0, max_secs]` so that nodes triggered together do not query the
/// scheduler at the same instant.
pub async fn startup_jitter(max_secs: u64) {
    if max_secs == 0 {
        return;
    }
    let secs = rand::random_range(0..=max_secs);
    debug!(secs, "startup jitter");
    tokio::time::sleep(Duration::from_secs(secs)).await;
}

/// Guarded cycle: takes the lease, runs, releases. Never returns an error; failures are
/// logged with their full cause chain and leave stored rows as they were.
pub async fn run_once(
    deps: &CycleDeps,
    repo: &StatsRepo,
    config: &CycleConfig,
) -> Option<CycleReport> {
    let holder = crate::version::agent_id();
    let stale_after = chrono::Duration::seconds(config.lease_stale_secs as i64);
    match repo.try_acquire_lease(&holder, Utc::now(), stale_after).await {
        Ok(true) => {}
        Ok(false) => {
            warn!(
                operation = "try_acquire_lease",
                "another cycle is still running; skipping"
            );
            return None;
        }
        Err(e) => {
            error!(error = ?e, operation = "try_acquire_lease", "cycle aborted");
            return None;
        }
    }

    let started = Instant::now();
    let result = run_cycle(deps, repo, config.retention_days, Utc::now()).await;
    let elapsed = started.elapsed();

    if let Err(e) = repo.release_lease(&holder).await {
        warn!(error = %e, operation = "release_lease", "failed to release cycle lease");
    }
    if elapsed > Duration::from_secs(config.slow_cycle_warn_secs) {
        warn!(
            elapsed_ms = elapsed.as_millis() as u64,
            threshold_secs = config.slow_cycle_warn_secs,
            "slow cycle; telemetry collection is lagging"
        );
    }

    match result {
        Ok(report) => {
            info!(
                tracked_jobs = report.tracked_jobs,
                sampled_jobs = report.sampled_jobs,
                persisted = report.reconcile.persisted,
                deleted = report.reconcile.deleted,
                failed = report.reconcile.failed,
                elapsed_ms = elapsed.as_millis() as u64,
                "cycle complete"
            );
            Some(report)
        }
        Err(e) => {
            error!(error = ?e, elapsed_ms = elapsed.as_millis() as u64, "cycle aborted");
            None
        }
    }
}

/// When the daemon compacts the database.
#[derive(Debug, Clone)]
pub enum VacuumSchedule {
    /// Local-time cron schedule, e.g. `"0 0 3 * * *"` for 03:00 daily.
    Cron(Box<cron::Schedule>),
    Every(Duration),
}

impl VacuumSchedule {
    /// Delay from `now` until the next VACUUM; `None` when a cron schedule has no
    /// upcoming time.
    pub fn delay_from(&self, now: chrono::DateTime<chrono::Local>) -> Option<Duration> {
        match self {
            VacuumSchedule::Cron(schedule) => schedule
                .after(&now)
                .next()
                .map(|next| (next - now).to_std().unwrap_or(Duration::ZERO)),
            VacuumSchedule::Every(every) => Some(*every),
        }
    }

    fn next_deadline(&self) -> Option<Instant> {
        let deadline = self
            .delay_from(chrono::Local::now())
            .map(|delay| Instant::now() + delay);
        if deadline.is_none() {
            warn!(operation = "vacuum", "vacuum schedule has no upcoming time; VACUUM disabled");
        }
        deadline
    }
}

#[derive(Debug, Clone)]
pub struct DaemonConfig {
    pub interval_secs: u64,
    pub cycle: CycleConfig,
    pub vacuum: VacuumSchedule,
}

/// Spawns the cycle loop. Returns when `shutdown_rx` fires (or its sender is dropped);
/// a cycle or VACUUM in progress is finished first.
pub fn spawn(
    deps: Arc<CycleDeps>,
    repo: Arc<StatsRepo>,
    config: DaemonConfig,
    mut shutdown_rx: oneshot::Receiver<()>,
) -> tokio::task::JoinHandle<()> {
    let daemon_span = tracing::span!(
        tracing::Level::DEBUG,
        "daemon",
        interval_secs = config.interval_secs
    );
    let daemon = async move {
        let mut tick = interval(Duration::from_secs(config.interval_secs));
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        let mut next_vacuum = config.vacuum.next_deadline();

        loop {
            tokio::select! {
                _ = tick.tick() => {
                    run_once(&deps, &repo, &config.cycle).await;
                }
                _ = sleep_until_some(next_vacuum) => {
                    match repo.vacuum().await {
                        Ok(()) => info!(operation = "vacuum", "vacuum complete"),
                        Err(e) => warn!(error = %e, operation = "vacuum", "vacuum failed"),
                    }
                    next_vacuum = config.vacuum.next_deadline();
                }
                _ = &mut shutdown_rx => {
                    debug!("Daemon shutting down");
                    break;
                }
            }
        }
    };
    tokio::spawn(daemon.instrument(daemon_span))
}

async fn sleep_until_some(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
