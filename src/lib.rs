// Library for tests to access modules

pub mod cgroup;
pub mod cli;
pub mod collector;
pub mod command;
pub mod config;
pub mod gpu_repo;
pub mod import;
pub mod logging;
pub mod models;
pub mod reconcile;
pub mod slurm_repo;
pub mod stats_repo;
pub mod version;
pub mod worker;
