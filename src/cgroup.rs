// Process → Slurm job attribution through /proc/<pid>/cgroup.
//
// slurmstepd places every task under a cgroup path containing `job_<id>`, e.g.
//   v1: 4:memory:/slurm/uid_1000/job_4242/step_0/task_0
//   v2: 0::/system.slice/slurmstepd.scope/job_4242/step_0/user/task_0

use std::path::PathBuf;

use async_trait::async_trait;
use tracing::trace;

use crate::models::JobId;

#[async_trait]
pub trait ProcessResolver: Send + Sync {
    /// Job owning `pid`, or `None` when the process is gone or not part of a job.
    async fn job_for_pid(&self, pid: u32) -> Option<JobId>;
}

/// Reads cgroup membership from a procfs mount (normally `/proc`).
pub struct CgroupResolver {
    proc_root: PathBuf,
}

impl CgroupResolver {
    pub fn new(proc_root: impl Into<PathBuf>) -> Self {
        Self {
            proc_root: proc_root.into(),
        }
    }
}

impl Default for CgroupResolver {
    fn default() -> Self {
        Self::new("/proc")
    }
}

#[async_trait]
impl ProcessResolver for CgroupResolver {
    async fn job_for_pid(&self, pid: u32) -> Option<JobId> {
        let path = self.proc_root.join(pid.to_string()).join("cgroup");
        match tokio::fs::read_to_string(&path).await {
            Ok(contents) => {
                let job = job_id_from_cgroup(&contents);
                if job.is_none() {
                    trace!(pid, "process is not inside a job cgroup");
                }
                job
            }
            Err(e) => {
                trace!(pid, error = %e, "cannot read cgroup membership");
                None
            }
        }
    }
}

/// First `job_<digits>` path segment in cgroup file contents.
pub fn job_id_from_cgroup(contents: &str) -> Option<JobId> {
    contents
        .lines()
        .filter_map(|line| line.splitn(3, ':').nth(2))
        .flat_map(|path| path.split('/'))
        .find_map(|segment| {
            let id = segment.strip_prefix("job_")?;
            (!id.is_empty() && id.bytes().all(|b| b.is_ascii_digit())).then(|| id.to_string())
        })
}
