// Child-process helper shared by the Slurm and nvidia-smi collaborators.

use std::process::ExitStatus;

use tokio::process::Command;
use tracing::instrument;

#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    #[error("failed to run {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("{program} exited with {status}: {stderr}")]
    Failed {
        program: String,
        status: ExitStatus,
        stderr: String,
    },
    #[error("{program} produced non-UTF-8 output")]
    Utf8 { program: String },
}

/// Runs `program args...` to completion and returns its stdout.
#[instrument(level = "debug", skip(args), fields(operation = "run_command"))]
pub async fn output(program: &str, args: &[&str]) -> Result<String, CommandError> {
    let out = Command::new(program)
        .args(args)
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|source| CommandError::Spawn {
            program: program.to_string(),
            source,
        })?;
    if !out.status.success() {
        return Err(CommandError::Failed {
            program: program.to_string(),
            status: out.status,
            stderr: String::from_utf8_lossy(&out.stderr).trim().to_string(),
        });
    }
    String::from_utf8(out.stdout).map_err(|_| CommandError::Utf8 {
        program: program.to_string(),
    })
}
