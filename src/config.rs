use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::Deserialize;

/// Config file read when neither `--config` nor `CONFIG_FILE` is given. Optional.
pub const DEFAULT_CONFIG_FILE: &str = "gpustats.toml";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub collector: CollectorConfig,
    pub daemon: DaemonConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub path: PathBuf,
    /// Days a finished job's stats survive after their last update.
    pub retention_days: u32,
    pub lease_stale_secs: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("/var/lib/gpustats/gpustats.db"),
            retention_days: 7,
            lease_stale_secs: 600,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CollectorConfig {
    /// Upper bound of the random sleep before a `run` cycle.
    pub max_jitter_secs: u64,
    pub slow_cycle_warn_secs: u64,
    pub proc_root: PathBuf,
    /// Node name passed to `squeue -w`; defaults to the short host name.
    pub node_name: Option<String>,
    /// TRES key carrying the job's GPU count, e.g. "gres/gpu" or "gres/gpu:tesla".
    pub gpu_tres_key: String,
    pub squeue_bin: String,
    pub scontrol_bin: String,
    pub nvidia_smi_bin: String,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            max_jitter_secs: 30,
            slow_cycle_warn_secs: 20,
            proc_root: PathBuf::from("/proc"),
            node_name: None,
            gpu_tres_key: "gres/gpu".into(),
            squeue_bin: "squeue".into(),
            scontrol_bin: "scontrol".into(),
            nvidia_smi_bin: "nvidia-smi".into(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    pub interval_secs: u64,
    /// Cron expression (local time, seconds field first) for VACUUM, e.g. "0 0 4 * * *".
    pub vacuum_schedule: Option<String>,
    pub vacuum_interval_secs: u64,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            interval_secs: 60,
            vacuum_schedule: None,
            vacuum_interval_secs: 24 * 60 * 60,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Also append log output to this file.
    pub file: Option<PathBuf>,
}

impl AppConfig {
    /// Loads `path` if given (it must exist), else `CONFIG_FILE`, else `gpustats.toml`
    /// when present, else built-in defaults.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let explicit = path
            .map(Path::to_path_buf)
            .or_else(|| std::env::var_os("CONFIG_FILE").map(PathBuf::from));
        let path = match explicit {
            Some(p) => p,
            None => {
                let p = PathBuf::from(DEFAULT_CONFIG_FILE);
                if !p.exists() {
                    return Self::load_from_str("");
                }
                p
            }
        };
        let s = std::fs::read_to_string(&path)
            .with_context(|| format!("reading config {}", path.display()))?;
        Self::load_from_str(&s).with_context(|| format!("invalid config {}", path.display()))
    }

    /// Parse and validate config from a string (e.g. for tests).
    pub fn load_from_str(s: &str) -> anyhow::Result<Self> {
        let config: AppConfig = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    /// Re-checks after command-line overrides have been applied.
    pub fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(
            !self.database.path.as_os_str().is_empty(),
            "database.path must be non-empty"
        );
        anyhow::ensure!(
            self.database.retention_days > 0,
            "database.retention_days must be > 0, got {}",
            self.database.retention_days
        );
        anyhow::ensure!(
            self.database.lease_stale_secs > 0,
            "database.lease_stale_secs must be > 0, got {}",
            self.database.lease_stale_secs
        );
        anyhow::ensure!(
            self.collector.slow_cycle_warn_secs > 0,
            "collector.slow_cycle_warn_secs must be > 0, got {}",
            self.collector.slow_cycle_warn_secs
        );
        anyhow::ensure!(
            !self.collector.gpu_tres_key.is_empty(),
            "collector.gpu_tres_key must be non-empty"
        );
        for (name, bin) in [
            ("collector.squeue_bin", &self.collector.squeue_bin),
            ("collector.scontrol_bin", &self.collector.scontrol_bin),
            ("collector.nvidia_smi_bin", &self.collector.nvidia_smi_bin),
        ] {
            anyhow::ensure!(!bin.is_empty(), "{} must be non-empty", name);
        }
        if let Some(node) = &self.collector.node_name {
            anyhow::ensure!(!node.is_empty(), "collector.node_name must be non-empty when set");
        }
        anyhow::ensure!(
            self.daemon.interval_secs > 0,
            "daemon.interval_secs must be > 0, got {}",
            self.daemon.interval_secs
        );
        anyhow::ensure!(
            self.daemon.vacuum_interval_secs > 0,
            "daemon.vacuum_interval_secs must be > 0, got {}",
            self.daemon.vacuum_interval_secs
        );
        self.daemon.vacuum_cron()?;
        Ok(())
    }
}

impl DaemonConfig {
    /// Parsed `vacuum_schedule`, if one is set.
    pub fn vacuum_cron(&self) -> anyhow::Result<Option<cron::Schedule>> {
        self.vacuum_schedule
            .as_deref()
            .map(|expr| {
                expr.parse::<cron::Schedule>().map_err(|e| {
                    anyhow::anyhow!("daemon.vacuum_schedule {:?} is invalid: {}", expr, e)
                })
            })
            .transpose()
    }
}
