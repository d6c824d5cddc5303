// Single-row lease guarding against overlapping cycles on one node.
// A holder that crashed without releasing is taken over once its lease is stale.

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use tracing::instrument;

use super::StatsRepo;

pub(super) async fn init_lease_table(pool: &SqlitePool) -> anyhow::Result<()> {
    sqlx::query(
        "CREATE TABLE IF NOT EXISTS cycle_lease (id INTEGER PRIMARY KEY CHECK (id = 1), holder TEXT NOT NULL, acquired_at INTEGER NOT NULL)",
    )
    .execute(pool)
    .await?;
    Ok(())
}

impl StatsRepo {
    /// Takes the lease when it is free or older than `stale_after`. Returns false when
    /// another cycle holds a live lease.
    #[instrument(skip(self), fields(repo = "stats", operation = "try_acquire_lease"))]
    pub async fn try_acquire_lease(
        &self,
        holder: &str,
        now: DateTime<Utc>,
        stale_after: chrono::Duration,
    ) -> anyhow::Result<bool> {
        let stale_before = (now - stale_after).timestamp_micros();
        let r = sqlx::query(
            r#"
            INSERT INTO cycle_lease (id, holder, acquired_at) VALUES (1, $1, $2)
            ON CONFLICT(id) DO UPDATE SET holder = excluded.holder, acquired_at = excluded.acquired_at
            WHERE cycle_lease.acquired_at < $3
            "#,
        )
        .bind(holder)
        .bind(now.timestamp_micros())
        .bind(stale_before)
        .execute(&self.pool)
        .await?;
        Ok(r.rows_affected() == 1)
    }

    #[instrument(skip(self), fields(repo = "stats", operation = "release_lease"))]
    pub async fn release_lease(&self, holder: &str) -> anyhow::Result<()> {
        sqlx::query("DELETE FROM cycle_lease WHERE id = 1 AND holder = $1")
            .bind(holder)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
