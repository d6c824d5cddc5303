use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::config::AppConfig;
use crate::version;

#[derive(Debug, Parser)]
#[command(name = "gpustats")]
#[command(about = "Running GPU usage statistics for the Slurm jobs on this node", long_about = None)]
#[command(version = version::VERSION)]
pub struct Cli {
    /// Config file (TOML). Defaults to ./gpustats.toml when present.
    #[arg(long, env = "CONFIG_FILE", global = true)]
    pub config: Option<PathBuf>,

    /// Stats database path (overrides database.path)
    #[arg(long, global = true)]
    pub db: Option<PathBuf>,

    /// Append log output to this file (overrides logging.file)
    #[arg(short = 'l', long, global = true)]
    pub logfile: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run one sampling cycle and exit
    Run {
        /// Don't sleep a random interval before sampling
        #[arg(short = 'n', long)]
        no_sleep: bool,

        /// Days a finished job's stats are kept (overrides database.retention_days)
        #[arg(short = 'm', long)]
        max_age: Option<u32>,
    },
    /// Run sampling cycles on a fixed interval until interrupted
    Daemon {
        /// Don't sleep a random interval before the first cycle
        #[arg(short = 'n', long)]
        no_sleep: bool,

        /// Days a finished job's stats are kept (overrides database.retention_days)
        #[arg(short = 'm', long)]
        max_age: Option<u32>,
    },
    /// Print one job's stats as JSON
    Show {
        job_id: String,
    },
    /// Print every stored job's stats as JSON lines
    List,
    /// Import a JSON state file written by the earlier gpustats script
    Import {
        path: PathBuf,
    },
}

impl Cli {
    /// Loads the config file and applies command-line overrides, then validates the result.
    pub fn app_config(&self) -> anyhow::Result<AppConfig> {
        let mut config = AppConfig::load(self.config.as_deref())?;
        if let Some(db) = &self.db {
            config.database.path = db.clone();
        }
        if let Some(logfile) = &self.logfile {
            config.logging.file = Some(logfile.clone());
        }
        if let Command::Run {
            max_age: Some(days),
            ..
        }
        | Command::Daemon {
            max_age: Some(days),
            ..
        } = &self.command
        {
            config.database.retention_days = *days;
        }
        config.validate()?;
        Ok(config)
    }
}
