use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use futures_util::TryStreamExt;
use gpustats::cli::{Cli, Command};
use gpustats::config::AppConfig;
use gpustats::*;

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    let app_config = match cli.app_config() {
        Ok(c) => c,
        Err(e) => {
            // No usable config: still report through tracing, to --logfile when given.
            let _log_guard = logging::init(cli.logfile.as_deref())?;
            tracing::error!(error = ?e, "invalid configuration");
            return Ok(ExitCode::FAILURE);
        }
    };

    let _log_guard = logging::init(app_config.logging.file.as_deref())?;

    let repo = match open_repo(&app_config).await {
        Ok(r) => Arc::new(r),
        Err(e) => {
            tracing::error!(error = ?e, db = %app_config.database.path.display(), "cannot open stats database");
            return Ok(ExitCode::FAILURE);
        }
    };

    match cli.command {
        Command::Run { no_sleep, .. } => {
            if !no_sleep {
                worker::startup_jitter(app_config.collector.max_jitter_secs).await;
            }
            let Some(deps) = cycle_deps(&app_config) else {
                return Ok(ExitCode::FAILURE);
            };
            worker::run_once(&deps, &repo, &cycle_config(&app_config)).await;
        }
        Command::Daemon { no_sleep, .. } => {
            if !no_sleep {
                worker::startup_jitter(app_config.collector.max_jitter_secs).await;
            }
            let Some(deps) = cycle_deps(&app_config) else {
                return Ok(ExitCode::FAILURE);
            };
            let deps = Arc::new(deps);
            let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel();
            let handle = worker::spawn(
                deps,
                repo.clone(),
                worker::DaemonConfig {
                    interval_secs: app_config.daemon.interval_secs,
                    cycle: cycle_config(&app_config),
                    vacuum: vacuum_schedule(&app_config)?,
                },
                shutdown_rx,
            );
            tracing::info!(
                version = version::VERSION,
                interval_secs = app_config.daemon.interval_secs,
                db = %app_config.database.path.display(),
                "daemon started"
            );
            shutdown_signal().await;
            tracing::info!("Received shutdown signal");
            let _ = shutdown_tx.send(());
            let _ = handle.await;
        }
        Command::Show { job_id } => match repo.get(&job_id).await? {
            Some(agg) => println!("{}", serde_json::to_string(&agg)?),
            None => {
                eprintln!("job {} not found", job_id);
                return Ok(ExitCode::FAILURE);
            }
        },
        Command::List => {
            let mut rows = std::pin::pin!(repo.stream_all());
            while let Some(agg) = rows.try_next().await? {
                println!("{}", serde_json::to_string(&agg)?);
            }
        }
        Command::Import { path } => {
            let report = import::import_legacy_json(&repo, &path).await?;
            println!(
                "imported {}, already present {}, skipped {}",
                report.imported, report.existing, report.skipped
            );
        }
    }

    Ok(ExitCode::SUCCESS)
}

async fn open_repo(config: &AppConfig) -> Result<stats_repo::StatsRepo> {
    let repo = stats_repo::StatsRepo::connect(&config.database.path).await?;
    repo.init().await?;
    Ok(repo)
}

fn cycle_deps(config: &AppConfig) -> Option<worker::CycleDeps> {
    let node_name = match &config.collector.node_name {
        Some(n) => n.clone(),
        None => {
            let Some(n) = slurm_repo::local_node_name() else {
                tracing::error!("cannot determine host name; set collector.node_name");
                return None;
            };
            n
        }
    };
    Some(worker::CycleDeps {
        scheduler: Arc::new(slurm_repo::SlurmRepo::new(
            config.collector.squeue_bin.clone(),
            config.collector.scontrol_bin.clone(),
            node_name,
            config.collector.gpu_tres_key.clone(),
        )),
        gpus: Arc::new(gpu_repo::NvidiaSmiRepo::new(
            config.collector.nvidia_smi_bin.clone(),
        )),
        resolver: Arc::new(cgroup::CgroupResolver::new(
            config.collector.proc_root.clone(),
        )),
    })
}

fn vacuum_schedule(config: &AppConfig) -> Result<worker::VacuumSchedule> {
    Ok(match config.daemon.vacuum_cron()? {
        Some(schedule) => worker::VacuumSchedule::Cron(Box::new(schedule)),
        None => worker::VacuumSchedule::Every(std::time::Duration::from_secs(
            config.daemon.vacuum_interval_secs,
        )),
    })
}

fn cycle_config(config: &AppConfig) -> worker::CycleConfig {
    worker::CycleConfig {
        retention_days: config.database.retention_days,
        slow_cycle_warn_secs: config.collector.slow_cycle_warn_secs,
        lease_stale_secs: config.database.lease_stale_secs,
    }
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        let mut sigterm =
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(s) => s,
                Err(_) => {
                    let _ = tokio::signal::ctrl_c().await;
                    return;
                }
            };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
