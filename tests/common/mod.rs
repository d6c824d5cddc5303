// Shared test helpers: in-memory collaborators and a temporary stats database.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use gpustats::cgroup::ProcessResolver;
use gpustats::command::CommandError;
use gpustats::gpu_repo::{GpuTelemetry, TelemetryError};
use gpustats::models::*;
use gpustats::slurm_repo::{Scheduler, SchedulerError};
use gpustats::stats_repo::StatsRepo;
use gpustats::worker::CycleDeps;
use tempfile::TempDir;

pub async fn temp_repo() -> (TempDir, StatsRepo) {
    let dir = TempDir::new().unwrap();
    let repo = StatsRepo::connect(dir.path().join("gpustats.db"))
        .await
        .unwrap();
    repo.init().await.unwrap();
    (dir, repo)
}

pub fn descriptor(ngpu: u32, nnodes: u32) -> JobDescriptor {
    JobDescriptor {
        ncpu: 4,
        ngpu,
        nnodes,
    }
}

fn unavailable(program: &str) -> CommandError {
    CommandError::Spawn {
        program: program.to_string(),
        source: std::io::Error::new(std::io::ErrorKind::NotFound, "not installed"),
    }
}

/// Scheduler whose job list and descriptors can be changed between cycles.
#[derive(Default)]
pub struct FakeScheduler {
    state: Mutex<SchedulerState>,
}

#[derive(Default)]
struct SchedulerState {
    active: Vec<JobId>,
    descriptors: HashMap<JobId, JobDescriptor>,
    down: bool,
}

impl FakeScheduler {
    /// Job listed as active with the given descriptor.
    pub fn add_job(&self, job_id: &str, descriptor: JobDescriptor) {
        let mut s = self.state.lock().unwrap();
        s.active.push(job_id.to_string());
        s.descriptors.insert(job_id.to_string(), descriptor);
    }

    /// Job listed as active whose descriptor query fails (finished in between).
    pub fn add_vanishing_job(&self, job_id: &str) {
        self.state.lock().unwrap().active.push(job_id.to_string());
    }

    pub fn clear(&self) {
        let mut s = self.state.lock().unwrap();
        s.active.clear();
        s.descriptors.clear();
    }

    pub fn set_down(&self, down: bool) {
        self.state.lock().unwrap().down = down;
    }
}

#[async_trait]
impl Scheduler for FakeScheduler {
    async fn active_jobs(&self) -> Result<Vec<JobId>, SchedulerError> {
        let s = self.state.lock().unwrap();
        if s.down {
            return Err(unavailable("squeue").into());
        }
        Ok(s.active.clone())
    }

    async fn job_descriptor(&self, job_id: &str) -> Result<JobDescriptor, SchedulerError> {
        let s = self.state.lock().unwrap();
        s.descriptors
            .get(job_id)
            .copied()
            .ok_or_else(|| SchedulerError::Parse {
                job_id: job_id.to_string(),
                reason: "Invalid job id specified".into(),
            })
    }
}

#[derive(Default)]
pub struct FakeGpus {
    state: Mutex<(Vec<GpuDevice>, bool)>,
}

impl FakeGpus {
    pub fn set_devices(&self, devices: Vec<GpuDevice>) {
        self.state.lock().unwrap().0 = devices;
    }

    pub fn set_down(&self, down: bool) {
        self.state.lock().unwrap().1 = down;
    }
}

#[async_trait]
impl GpuTelemetry for FakeGpus {
    async fn devices(&self) -> Result<Vec<GpuDevice>, TelemetryError> {
        let s = self.state.lock().unwrap();
        if s.1 {
            return Err(unavailable("nvidia-smi").into());
        }
        Ok(s.0.clone())
    }
}

/// pid → job table; unknown pids resolve to no job.
#[derive(Default)]
pub struct FakeResolver {
    owners: Mutex<HashMap<u32, JobId>>,
}

impl FakeResolver {
    pub fn assign(&self, pid: u32, job_id: &str) {
        self.owners.lock().unwrap().insert(pid, job_id.to_string());
    }
}

#[async_trait]
impl ProcessResolver for FakeResolver {
    async fn job_for_pid(&self, pid: u32) -> Option<JobId> {
        self.owners.lock().unwrap().get(&pid).cloned()
    }
}

pub fn device(index: u32, util: f64, power: f64, processes: &[(u32, f64)]) -> GpuDevice {
    GpuDevice {
        index,
        uuid: format!("GPU-{index:04}"),
        utilization_pct: util,
        power_watts: power,
        processes: processes
            .iter()
            .map(|&(pid, mib)| GpuProcess {
                pid,
                used_memory_mib: mib,
            })
            .collect(),
    }
}

/// Fakes plus the `CycleDeps` that share them.
pub struct Cluster {
    pub scheduler: Arc<FakeScheduler>,
    pub gpus: Arc<FakeGpus>,
    pub resolver: Arc<FakeResolver>,
}

impl Cluster {
    pub fn new() -> Self {
        Self {
            scheduler: Arc::new(FakeScheduler::default()),
            gpus: Arc::new(FakeGpus::default()),
            resolver: Arc::new(FakeResolver::default()),
        }
    }

    pub fn deps(&self) -> CycleDeps {
        CycleDeps {
            scheduler: self.scheduler.clone(),
            gpus: self.gpus.clone(),
            resolver: self.resolver.clone(),
        }
    }
}
