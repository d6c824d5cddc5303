// Slurm scheduler queries via squeue/scontrol.

pub mod parse;

use async_trait::async_trait;
use tracing::instrument;

use crate::command::{self, CommandError};
use crate::models::{JobDescriptor, JobId};

#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    #[error(transparent)]
    Command(#[from] CommandError),
    #[error("malformed descriptor for job {job_id}: {reason}")]
    Parse { job_id: JobId, reason: String },
}

/// Scheduler view of the local node.
#[async_trait]
pub trait Scheduler: Send + Sync {
    /// Ids of jobs currently occupying this node.
    async fn active_jobs(&self) -> Result<Vec<JobId>, SchedulerError>;

    /// Resources granted to one job. Fails once the job has left the scheduler.
    async fn job_descriptor(&self, job_id: &str) -> Result<JobDescriptor, SchedulerError>;
}

pub struct SlurmRepo {
    squeue_bin: String,
    scontrol_bin: String,
    node_name: String,
    gpu_tres_key: String,
}

impl SlurmRepo {
    pub fn new(
        squeue_bin: impl Into<String>,
        scontrol_bin: impl Into<String>,
        node_name: impl Into<String>,
        gpu_tres_key: impl Into<String>,
    ) -> Self {
        Self {
            squeue_bin: squeue_bin.into(),
            scontrol_bin: scontrol_bin.into(),
            node_name: node_name.into(),
            gpu_tres_key: gpu_tres_key.into(),
        }
    }
}

/// Short host name (up to the first dot), the form squeue -w expects.
pub fn local_node_name() -> Option<String> {
    let host = sysinfo::System::host_name()?;
    let short = host.split('.').next().unwrap_or_default();
    if short.is_empty() {
        None
    } else {
        Some(short.to_string())
    }
}

#[async_trait]
impl Scheduler for SlurmRepo {
    #[instrument(skip(self), fields(repo = "slurm", operation = "active_jobs", node = %self.node_name))]
    async fn active_jobs(&self) -> Result<Vec<JobId>, SchedulerError> {
        let out = command::output(
            &self.squeue_bin,
            &["-w", self.node_name.as_str(), "-h", "-o", "%A"],
        )
        .await?;
        Ok(parse::parse_active_jobs(&out))
    }

    #[instrument(skip(self), fields(repo = "slurm", operation = "job_descriptor"))]
    async fn job_descriptor(&self, job_id: &str) -> Result<JobDescriptor, SchedulerError> {
        let out = command::output(&self.scontrol_bin, &["-o", "show", "job", job_id]).await?;
        parse::parse_job_descriptor(&out, &self.gpu_tres_key).map_err(|reason| {
            SchedulerError::Parse {
                job_id: job_id.to_string(),
                reason,
            }
        })
    }
}
