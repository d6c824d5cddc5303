// Merge current samples into persisted aggregates, then write / retain / expire rows.

use std::collections::{BTreeMap, HashSet};

use chrono::{DateTime, Utc};
use tracing::{debug, instrument, warn};

use crate::models::{JobAggregate, JobId, JobSample};
use crate::stats_repo::StatsRepo;
use crate::stats_repo::aggregation;

/// What happens to one job's row at the end of a cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Active with GPUs: create or overwrite with the merged aggregate.
    Persist,
    /// Inactive and last updated before the retention cutoff.
    Delete,
    /// Inactive but still within retention: leave the row untouched.
    Retain,
}

pub fn decide(
    active_with_gpus: bool,
    updated_at: DateTime<Utc>,
    cutoff: DateTime<Utc>,
) -> Action {
    if active_with_gpus {
        Action::Persist
    } else if updated_at < cutoff {
        Action::Delete
    } else {
        Action::Retain
    }
}

/// Oldest last-update time a finished job may have and still be kept.
pub fn retention_cutoff(now: DateTime<Utc>, retention_days: u32) -> DateTime<Utc> {
    now - chrono::Duration::days(i64::from(retention_days))
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ReconcileReport {
    pub persisted: usize,
    pub deleted: usize,
    pub failed: usize,
}

/// Folds each sample into the job's stored aggregate. A job whose row cannot be read
/// is left out (its row stays as it was) rather than restarting its average at step 1.
#[instrument(skip_all, fields(operation = "merge_samples", samples = samples.len()))]
pub async fn merge_samples(
    repo: &StatsRepo,
    samples: &BTreeMap<JobId, JobSample>,
    now: DateTime<Utc>,
) -> Vec<JobAggregate> {
    let mut merged = Vec::with_capacity(samples.len());
    for (job_id, sample) in samples {
        match repo.get(job_id).await {
            Ok(previous) => merged.push(aggregation::merge(previous.as_ref(), sample, now)),
            Err(e) => {
                warn!(job_id = %job_id, error = %e, "cannot read stored stats; skipping job this cycle");
            }
        }
    }
    merged
}

/// Writes the merged aggregates of active jobs and deletes expired rows of inactive ones.
/// Every row is written or deleted on its own; a failure is logged and counted and the
/// remaining rows are still processed.
#[instrument(skip_all, fields(operation = "reconcile", merged = merged.len(), retention_days = retention_days))]
pub async fn reconcile(
    repo: &StatsRepo,
    merged: &[JobAggregate],
    active: &HashSet<JobId>,
    now: DateTime<Utc>,
    retention_days: u32,
) -> anyhow::Result<ReconcileReport> {
    let cutoff = retention_cutoff(now, retention_days);
    let mut report = ReconcileReport::default();

    for agg in merged {
        let action = decide(active.contains(&agg.job_id), agg.updated_at, cutoff);
        if action != Action::Persist {
            continue;
        }
        match repo.put(agg).await {
            Ok(()) => report.persisted += 1,
            Err(e) => {
                warn!(job_id = %agg.job_id, error = %e, "failed to store job stats");
                report.failed += 1;
            }
        }
    }

    for (job_id, updated_at) in repo.expired_before(cutoff).await? {
        if decide(active.contains(&job_id), updated_at, cutoff) != Action::Delete {
            continue;
        }
        match repo.delete(&job_id).await {
            Ok(_) => {
                debug!(job_id = %job_id, %updated_at, "expired job stats deleted");
                report.deleted += 1;
            }
            Err(e) => {
                warn!(job_id = %job_id, error = %e, "failed to delete expired job stats");
                report.failed += 1;
            }
        }
    }

    Ok(report)
}
