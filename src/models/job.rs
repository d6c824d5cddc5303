// Scheduler-side job descriptors and the per-cycle sample built from GPU telemetry.

use serde::{Deserialize, Serialize};

/// Slurm job id as printed by squeue (`%A`).
pub type JobId = String;

/// Resources the scheduler granted a job on this node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobDescriptor {
    pub ncpu: u32,
    pub ngpu: u32,
    pub nnodes: u32,
}

/// One cycle's GPU usage for a job. Never persisted directly; folded into a `JobAggregate`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSample {
    pub job_id: JobId,
    /// Percent of requested GPU capacity (sum of device_util / ngpu over the job's devices).
    pub gpu_util: f64,
    /// Watts, summed over the job's devices.
    pub gpu_power: f64,
    /// MiB, largest per-device process memory total seen this cycle.
    pub gpu_mem_max: f64,
    pub ngpu: u32,
    pub ncpu: u32,
}

impl JobSample {
    /// Zero sample for a job that is active but not yet seen on any device this cycle.
    pub fn seed(job_id: impl Into<JobId>, descriptor: &JobDescriptor) -> Self {
        Self {
            job_id: job_id.into(),
            gpu_util: 0.0,
            gpu_power: 0.0,
            gpu_mem_max: 0.0,
            ngpu: descriptor.ngpu,
            ncpu: descriptor.ncpu,
        }
    }
}
