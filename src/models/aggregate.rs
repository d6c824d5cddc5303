// Persisted per-job running statistics (one row per job id in job_stats).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::JobId;

/// Running summary of a job's GPU usage across every cycle it was observed in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobAggregate {
    pub job_id: JobId,
    /// Mean of all folded `JobSample::gpu_util` values.
    pub gpu_util: f64,
    /// Mean of all folded `JobSample::gpu_power` values (W).
    pub gpu_power: f64,
    /// Largest memory footprint ever seen (MiB).
    pub gpu_mem_max: f64,
    /// Number of samples folded in so far (>= 1).
    pub step: u64,
    pub ngpu: u32,
    pub ncpu: u32,
    pub updated_at: DateTime<Utc>,
}
