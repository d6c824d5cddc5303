// Job descriptor loading and GPU → job attribution for one cycle.

use std::collections::BTreeMap;

use anyhow::Context;
use tracing::{debug, instrument, warn};

use crate::cgroup::ProcessResolver;
use crate::gpu_repo::GpuTelemetry;
use crate::models::{JobDescriptor, JobId, JobSample};
use crate::slurm_repo::Scheduler;

/// Descriptors of the jobs on this node that the aggregator tracks.
///
/// Multi-node jobs are left out: their GPUs on other nodes are invisible here, so a
/// per-node average would misrepresent them. A job whose descriptor query fails (it
/// usually just finished) is skipped for this cycle. Failure to list jobs at all is
/// returned as an error.
#[instrument(skip(scheduler), fields(operation = "load_job_descriptors"))]
pub async fn load_job_descriptors(
    scheduler: &dyn Scheduler,
) -> anyhow::Result<BTreeMap<JobId, JobDescriptor>> {
    let jobs = scheduler
        .active_jobs()
        .await
        .context("listing active jobs")?;

    let mut out = BTreeMap::new();
    for job_id in jobs {
        let descriptor = match scheduler.job_descriptor(&job_id).await {
            Ok(d) => d,
            Err(e) => {
                warn!(job_id = %job_id, error = %e, "job descriptor unavailable; skipping job this cycle");
                continue;
            }
        };
        if descriptor.nnodes > 1 {
            debug!(job_id = %job_id, nnodes = descriptor.nnodes, "multi-node job excluded");
            continue;
        }
        out.insert(job_id, descriptor);
    }
    Ok(out)
}

/// One sample per descriptor with a nonzero GPU request, filled from device telemetry.
///
/// Each device is credited to a single job: the job of the last resident process that
/// could be resolved. Co-resident processes of other jobs still add their memory to the
/// device total, but utilization and power go to that one job; a debug event records
/// such devices. Processes that resolve to no job contribute nothing.
#[instrument(skip_all, fields(operation = "collect_samples", jobs = descriptors.len()))]
pub async fn collect_samples(
    descriptors: &BTreeMap<JobId, JobDescriptor>,
    gpus: &dyn GpuTelemetry,
    resolver: &dyn ProcessResolver,
) -> anyhow::Result<BTreeMap<JobId, JobSample>> {
    let mut samples: BTreeMap<JobId, JobSample> = descriptors
        .iter()
        .filter(|(_, d)| d.ngpu > 0)
        .map(|(id, d)| (id.clone(), JobSample::seed(id.as_str(), d)))
        .collect();

    let devices = gpus.devices().await.context("reading GPU telemetry")?;

    for device in &devices {
        let mut owner: Option<JobId> = None;
        let mut mem_total = 0.0;
        for process in &device.processes {
            let Some(job_id) = resolver.job_for_pid(process.pid).await else {
                continue;
            };
            mem_total += process.used_memory_mib;
            if let Some(prev) = owner.as_deref()
                && prev != job_id
            {
                debug!(
                    gpu = device.index,
                    previous_job = prev,
                    job_id = %job_id,
                    "processes of several jobs on one GPU; crediting the last one"
                );
            }
            owner = Some(job_id);
        }

        let Some(job_id) = owner else {
            continue;
        };
        let Some(sample) = samples.get_mut(&job_id) else {
            debug!(gpu = device.index, job_id = %job_id, "GPU used by an untracked job");
            continue;
        };
        sample.gpu_util += device.utilization_pct / sample.ngpu as f64;
        sample.gpu_power += device.power_watts;
        sample.gpu_mem_max = sample.gpu_mem_max.max(mem_total);
    }

    Ok(samples)
}
