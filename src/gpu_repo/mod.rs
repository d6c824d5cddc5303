// GPU telemetry via nvidia-smi query mode.

pub mod parse;

use async_trait::async_trait;
use tracing::instrument;

use crate::command::{self, CommandError};
use crate::models::GpuDevice;

#[derive(Debug, thiserror::Error)]
pub enum TelemetryError {
    #[error(transparent)]
    Command(#[from] CommandError),
}

/// Per-device utilization, power, and resident processes on this node.
#[async_trait]
pub trait GpuTelemetry: Send + Sync {
    async fn devices(&self) -> Result<Vec<GpuDevice>, TelemetryError>;
}

pub struct NvidiaSmiRepo {
    nvidia_smi_bin: String,
}

impl NvidiaSmiRepo {
    pub fn new(nvidia_smi_bin: impl Into<String>) -> Self {
        Self {
            nvidia_smi_bin: nvidia_smi_bin.into(),
        }
    }
}

#[async_trait]
impl GpuTelemetry for NvidiaSmiRepo {
    #[instrument(skip(self), fields(repo = "nvidia_smi", operation = "devices"))]
    async fn devices(&self) -> Result<Vec<GpuDevice>, TelemetryError> {
        let gpus =
            command::output(&self.nvidia_smi_bin, &[parse::GPU_QUERY, parse::CSV_FORMAT]).await?;
        let apps =
            command::output(&self.nvidia_smi_bin, &[parse::APPS_QUERY, parse::CSV_FORMAT]).await?;
        Ok(parse::parse_devices(&gpus, &apps))
    }
}
