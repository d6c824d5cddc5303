// SQLite job statistics: one row per job id, no cross-row transactions.
// Each put/delete commits on its own so a failed cycle leaves every already
// written row valid; unwritten rows keep their previous value.

pub mod aggregation;
mod lease;

use std::path::Path;

use anyhow::Context;
use chrono::{DateTime, Utc};
use futures_util::{Stream, StreamExt};
use sqlx::Row;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use tracing::instrument;

use crate::models::{JobAggregate, JobId};

const SELECT_ONE: &str = "SELECT job_id, gpu_util, gpu_power, gpu_mem_max, step, ngpu, ncpu, updated_at
     FROM job_stats WHERE job_id = $1";
const SELECT_ALL: &str = "SELECT job_id, gpu_util, gpu_power, gpu_mem_max, step, ngpu, ncpu, updated_at
     FROM job_stats ORDER BY job_id";
const UPSERT: &str = "INSERT OR REPLACE INTO job_stats
     (job_id, gpu_util, gpu_power, gpu_mem_max, step, ngpu, ncpu, updated_at)
     VALUES ($1, $2, $3, $4, $5, $6, $7, $8)";
const INSERT_IF_ABSENT: &str = "INSERT OR IGNORE INTO job_stats
     (job_id, gpu_util, gpu_power, gpu_mem_max, step, ngpu, ncpu, updated_at)
     VALUES ($1, $2, $3, $4, $5, $6, $7, $8)";

pub struct StatsRepo {
    pool: SqlitePool,
}

impl StatsRepo {
    pub async fn connect(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating {}", parent.display()))?;
        }
        let opts = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .busy_timeout(std::time::Duration::from_secs(5))
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal);
        let pool = SqlitePoolOptions::new()
            .max_connections(2)
            .connect_with(opts)
            .await
            .with_context(|| format!("opening {}", path.display()))?;
        Ok(Self { pool })
    }

    pub async fn init(&self) -> anyhow::Result<()> {
        aggregation::init_job_stats_table(&self.pool).await?;
        lease::init_lease_table(&self.pool).await?;
        Ok(())
    }

    #[instrument(skip(self), fields(repo = "stats", operation = "get"))]
    pub async fn get(&self, job_id: &str) -> anyhow::Result<Option<JobAggregate>> {
        let row = sqlx::query(SELECT_ONE)
            .bind(job_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(parse_row).transpose()
    }

    /// Creates or overwrites the job's row.
    #[instrument(skip(self, agg), fields(repo = "stats", operation = "put", job_id = %agg.job_id))]
    pub async fn put(&self, agg: &JobAggregate) -> anyhow::Result<()> {
        bind_aggregate(sqlx::query(UPSERT), agg)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Inserts the row only when the job has none yet. Returns whether it was inserted.
    #[instrument(skip(self, agg), fields(repo = "stats", operation = "insert_if_absent", job_id = %agg.job_id))]
    pub async fn insert_if_absent(&self, agg: &JobAggregate) -> anyhow::Result<bool> {
        let r = bind_aggregate(sqlx::query(INSERT_IF_ABSENT), agg)
            .execute(&self.pool)
            .await?;
        Ok(r.rows_affected() == 1)
    }

    /// Returns whether a row was removed.
    #[instrument(skip(self), fields(repo = "stats", operation = "delete"))]
    pub async fn delete(&self, job_id: &str) -> anyhow::Result<bool> {
        let r = sqlx::query("DELETE FROM job_stats WHERE job_id = $1")
            .bind(job_id)
            .execute(&self.pool)
            .await?;
        Ok(r.rows_affected() > 0)
    }

    /// Jobs whose last update is strictly before `cutoff`, oldest first.
    /// Reads only the key and timestamp through the updated_at index.
    #[instrument(skip(self), fields(repo = "stats", operation = "expired_before"))]
    pub async fn expired_before(
        &self,
        cutoff: DateTime<Utc>,
    ) -> anyhow::Result<Vec<(JobId, DateTime<Utc>)>> {
        let rows = sqlx::query(
            "SELECT job_id, updated_at FROM job_stats WHERE updated_at < $1 ORDER BY updated_at ASC",
        )
        .bind(cutoff.timestamp_micros())
        .fetch_all(&self.pool)
        .await?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let job_id: String = row.try_get("job_id")?;
            let updated_at = micros_to_utc(row.try_get("updated_at")?)?;
            out.push((job_id, updated_at));
        }
        Ok(out)
    }

    /// Every row ordered by job id, decoded one at a time.
    pub fn stream_all(&self) -> impl Stream<Item = anyhow::Result<JobAggregate>> + '_ {
        sqlx::query(SELECT_ALL)
            .fetch(&self.pool)
            .map(|row| parse_row(&row?))
    }

    pub async fn count(&self) -> anyhow::Result<i64> {
        let n = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM job_stats")
            .fetch_one(&self.pool)
            .await?;
        Ok(n)
    }

    /// Reclaim space after deletes (daemon mode runs this periodically).
    #[instrument(skip(self), fields(repo = "stats", operation = "vacuum"))]
    pub async fn vacuum(&self) -> anyhow::Result<()> {
        sqlx::query("VACUUM").execute(&self.pool).await?;
        Ok(())
    }
}

type SqliteQuery<'q> = sqlx::query::Query<'q, sqlx::Sqlite, sqlx::sqlite::SqliteArguments<'q>>;

fn bind_aggregate<'q>(query: SqliteQuery<'q>, agg: &'q JobAggregate) -> SqliteQuery<'q> {
    query
        .bind(agg.job_id.as_str())
        .bind(agg.gpu_util)
        .bind(agg.gpu_power)
        .bind(agg.gpu_mem_max)
        .bind(agg.step as i64)
        .bind(agg.ngpu as i64)
        .bind(agg.ncpu as i64)
        .bind(agg.updated_at.timestamp_micros())
}

fn micros_to_utc(micros: i64) -> anyhow::Result<DateTime<Utc>> {
    DateTime::from_timestamp_micros(micros)
        .ok_or_else(|| anyhow::anyhow!("updated_at out of range: {}", micros))
}

fn parse_row(row: &SqliteRow) -> anyhow::Result<JobAggregate> {
    let step: i64 = row.try_get("step")?;
    let ngpu: i64 = row.try_get("ngpu")?;
    let ncpu: i64 = row.try_get("ncpu")?;
    Ok(JobAggregate {
        job_id: row.try_get("job_id")?,
        gpu_util: row.try_get("gpu_util")?,
        gpu_power: row.try_get("gpu_power")?,
        gpu_mem_max: row.try_get("gpu_mem_max")?,
        step: u64::try_from(step).context("negative step")?,
        ngpu: u32::try_from(ngpu).context("ngpu out of range")?,
        ncpu: u32::try_from(ncpu).context("ncpu out of range")?,
        updated_at: micros_to_utc(row.try_get("updated_at")?)?,
    })
}
