// One-time import of the JSON state file kept by the earlier gpustats script:
//   {"4242": {"gpu_util": 55.0, "gpu_mem_max": 2200, "ngpu": 2, "ncpu": 8, "step": 2,
//             "gpu_power": 230.0, "timestamp": "2024-03-10 12:00:00"}, ...}
// Timestamps are naive local time. Rows that already exist in the database win.

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::Context;
use chrono::{DateTime, Local, NaiveDateTime, TimeZone, Utc};
use serde::Deserialize;
use tracing::{info, warn};

use crate::models::JobAggregate;
use crate::stats_repo::StatsRepo;

const LEGACY_TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Debug, Deserialize)]
struct LegacyRecord {
    gpu_util: f64,
    gpu_power: f64,
    gpu_mem_max: f64,
    #[serde(default)]
    ngpu: u32,
    #[serde(default)]
    ncpu: u32,
    step: u64,
    timestamp: String,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ImportReport {
    pub imported: usize,
    /// Already present in the database.
    pub existing: usize,
    /// Zero-GPU jobs or unparseable records.
    pub skipped: usize,
}

fn parse_legacy_timestamp(raw: &str) -> anyhow::Result<DateTime<Utc>> {
    let naive = NaiveDateTime::parse_from_str(raw, LEGACY_TIMESTAMP_FORMAT)
        .with_context(|| format!("bad timestamp {:?}", raw))?;
    let local = Local
        .from_local_datetime(&naive)
        .earliest()
        .ok_or_else(|| anyhow::anyhow!("timestamp {:?} does not exist in local time", raw))?;
    Ok(local.with_timezone(&Utc))
}

fn to_aggregate(job_id: &str, record: LegacyRecord) -> anyhow::Result<JobAggregate> {
    Ok(JobAggregate {
        job_id: job_id.to_string(),
        gpu_util: record.gpu_util,
        gpu_power: record.gpu_power,
        gpu_mem_max: record.gpu_mem_max,
        step: record.step.max(1),
        ngpu: record.ngpu,
        ncpu: record.ncpu,
        updated_at: parse_legacy_timestamp(&record.timestamp)?,
    })
}

/// Imports every GPU job from `path` that has no row yet.
pub async fn import_legacy_json(repo: &StatsRepo, path: &Path) -> anyhow::Result<ImportReport> {
    let s = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("reading {}", path.display()))?;
    let records: BTreeMap<String, serde_json::Value> =
        serde_json::from_str(&s).with_context(|| format!("parsing {}", path.display()))?;

    let mut report = ImportReport::default();
    for (job_id, value) in records {
        let agg = match serde_json::from_value::<LegacyRecord>(value)
            .map_err(anyhow::Error::from)
            .and_then(|r| to_aggregate(&job_id, r))
        {
            Ok(agg) => agg,
            Err(e) => {
                warn!(job_id = %job_id, error = %e, "skipping unreadable legacy record");
                report.skipped += 1;
                continue;
            }
        };
        if agg.ngpu == 0 {
            report.skipped += 1;
            continue;
        }
        if repo.insert_if_absent(&agg).await? {
            report.imported += 1;
        } else {
            report.existing += 1;
        }
    }
    info!(
        imported = report.imported,
        existing = report.existing,
        skipped = report.skipped,
        "legacy import complete"
    );
    Ok(report)
}
