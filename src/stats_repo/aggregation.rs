// job_stats schema + the running-average merge rule.
// DB access (get, put, delete, sweep) stays in stats_repo::mod.

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;

use crate::models::{JobAggregate, JobSample};

/// Creates the job_stats table and its expiry index if not present.
pub async fn init_job_stats_table(pool: &SqlitePool) -> anyhow::Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS job_stats (
            job_id TEXT PRIMARY KEY,
            gpu_util REAL NOT NULL,
            gpu_power REAL NOT NULL,
            gpu_mem_max REAL NOT NULL,
            step INTEGER NOT NULL,
            ngpu INTEGER NOT NULL,
            ncpu INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_job_stats_updated_at ON job_stats(updated_at)")
        .execute(pool)
        .await?;

    Ok(())
}

/// Folds one sample into the job's previous aggregate.
///
/// Every cycle carries equal weight regardless of the wall-clock gap between cycles:
/// with `n` previous steps, `avg' = (avg * n + cur) / (n + 1)`. Memory keeps the maximum.
/// Without a previous aggregate the sample becomes step 1.
pub fn merge(
    previous: Option<&JobAggregate>,
    sample: &JobSample,
    now: DateTime<Utc>,
) -> JobAggregate {
    let Some(prev) = previous else {
        return JobAggregate {
            job_id: sample.job_id.clone(),
            gpu_util: sample.gpu_util,
            gpu_power: sample.gpu_power,
            gpu_mem_max: sample.gpu_mem_max,
            step: 1,
            ngpu: sample.ngpu,
            ncpu: sample.ncpu,
            updated_at: now,
        };
    };

    let n = prev.step.max(1) as f64;
    JobAggregate {
        job_id: sample.job_id.clone(),
        gpu_util: running_mean(prev.gpu_util, n, sample.gpu_util),
        gpu_power: running_mean(prev.gpu_power, n, sample.gpu_power),
        gpu_mem_max: prev.gpu_mem_max.max(sample.gpu_mem_max),
        step: prev.step.max(1) + 1,
        ngpu: sample.ngpu,
        ncpu: sample.ncpu,
        updated_at: now,
    }
}

fn running_mean(prev: f64, n: f64, cur: f64) -> f64 {
    (prev * n + cur) / (n + 1.0)
}
