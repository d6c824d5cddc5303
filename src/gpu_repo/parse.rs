// CSV output of nvidia-smi query mode (`--format=csv,noheader`, units kept).
//
//   --query-gpu=index,uuid,utilization.gpu,power.draw      0, GPU-8f2c..., 45 %, 35.25 W
//   --query-compute-apps=gpu_uuid,pid,used_memory          GPU-8f2c..., 1234, 1750 MiB

use std::collections::HashMap;

use tracing::warn;

use crate::models::{GpuDevice, GpuProcess, Quantity, QuantityError};

pub const GPU_QUERY: &str = "--query-gpu=index,uuid,utilization.gpu,power.draw";
pub const APPS_QUERY: &str = "--query-compute-apps=gpu_uuid,pid,used_memory";
pub const CSV_FORMAT: &str = "--format=csv,noheader";

#[derive(Debug, thiserror::Error)]
pub enum RowError {
    #[error("expected {expected} fields, got {actual}")]
    FieldCount { expected: usize, actual: usize },
    #[error("invalid {field}: {value:?}")]
    Integer { field: &'static str, value: String },
    #[error("{field}: {source}")]
    Quantity {
        field: &'static str,
        #[source]
        source: QuantityError,
    },
}

fn fields(line: &str, expected: usize) -> Result<Vec<&str>, RowError> {
    let parts: Vec<&str> = line.split(',').map(str::trim).collect();
    if parts.len() != expected {
        return Err(RowError::FieldCount {
            expected,
            actual: parts.len(),
        });
    }
    Ok(parts)
}

fn quantity<T>(
    field: &'static str,
    raw: &str,
    convert: impl FnOnce(&Quantity) -> Result<T, QuantityError>,
) -> Result<T, RowError> {
    raw.parse::<Quantity>()
        .and_then(|q| convert(&q))
        .map_err(|source| RowError::Quantity { field, source })
}

fn integer(field: &'static str, raw: &str) -> Result<u32, RowError> {
    raw.parse().map_err(|_| RowError::Integer {
        field,
        value: raw.to_string(),
    })
}

/// Power and memory readings are optional: an unreadable value counts as 0 so the
/// rest of the row (utilization, pid) still reaches the collector.
fn optional_quantity(
    field: &'static str,
    raw: &str,
    convert: impl FnOnce(&Quantity) -> Result<f64, QuantityError>,
    line: &str,
) -> f64 {
    quantity(field, raw, convert).unwrap_or_else(|e| {
        warn!(error = %e, row = line, "unreadable telemetry field; counting it as 0");
        0.0
    })
}

pub fn parse_gpu_row(line: &str) -> Result<GpuDevice, RowError> {
    let f = fields(line, 4)?;
    Ok(GpuDevice {
        index: integer("index", f[0])?,
        uuid: f[1].to_string(),
        utilization_pct: quantity("utilization.gpu", f[2], Quantity::percent)?,
        power_watts: optional_quantity("power.draw", f[3], Quantity::watts, line),
        processes: Vec::new(),
    })
}

pub fn parse_app_row(line: &str) -> Result<(String, GpuProcess), RowError> {
    let f = fields(line, 3)?;
    Ok((
        f[0].to_string(),
        GpuProcess {
            pid: integer("pid", f[1])?,
            used_memory_mib: optional_quantity("used_memory", f[2], Quantity::mebibytes, line),
        },
    ))
}

/// Joins both query outputs into devices. A GPU row without a readable index, uuid
/// or utilization is dropped with its processes; a process row without a readable
/// pid is dropped alone. Both are logged.
pub fn parse_devices(gpu_csv: &str, apps_csv: &str) -> Vec<GpuDevice> {
    let mut devices = Vec::new();
    let mut by_uuid = HashMap::new();
    for line in gpu_csv.lines().filter(|l| !l.trim().is_empty()) {
        match parse_gpu_row(line) {
            Ok(device) => {
                by_uuid.insert(device.uuid.clone(), devices.len());
                devices.push(device);
            }
            Err(e) => warn!(error = %e, row = line, "dropping GPU with malformed telemetry"),
        }
    }
    for line in apps_csv.lines().filter(|l| !l.trim().is_empty()) {
        match parse_app_row(line) {
            Ok((uuid, process)) => match by_uuid.get(&uuid) {
                Some(&i) => devices[i].processes.push(process),
                None => tracing::debug!(gpu_uuid = %uuid, pid = process.pid, "process on unlisted GPU"),
            },
            Err(e) => warn!(error = %e, row = line, "dropping GPU process with malformed telemetry"),
        }
    }
    devices
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn joins_processes_to_devices() {
        let gpus = "0, GPU-aaa, 45 %, 35.25 W\n1, GPU-bbb, 0 %, 20.00 W\n";
        let apps = "GPU-aaa, 100, 1750 MiB\nGPU-aaa, 101, 1 GiB\n";
        let devices = parse_devices(gpus, apps);
        assert_eq!(devices.len(), 2);
        assert_eq!(devices[0].utilization_pct, 45.0);
        assert_eq!(devices[0].power_watts, 35.25);
        assert_eq!(devices[0].processes.len(), 2);
        assert_eq!(devices[0].processes[1].used_memory_mib, 1024.0);
        assert!(devices[1].processes.is_empty());
    }

    #[test]
    fn unavailable_power_keeps_device_and_utilization() {
        let devices = parse_devices("0, GPU-aaa, 80 %, [N/A]", "GPU-aaa, 100, 1000 MiB");
        assert_eq!(devices.len(), 1);
        assert_eq!(devices[0].utilization_pct, 80.0);
        assert_eq!(devices[0].power_watts, 0.0);
        assert_eq!(devices[0].processes[0].pid, 100);
        assert_eq!(devices[0].processes[0].used_memory_mib, 1000.0);
    }

    #[test]
    fn unavailable_memory_keeps_process() {
        let devices = parse_devices("0, GPU-aaa, 80 %, 100 W", "GPU-aaa, 100, [N/A]");
        assert_eq!(devices[0].processes.len(), 1);
        assert_eq!(devices[0].processes[0].pid, 100);
        assert_eq!(devices[0].processes[0].used_memory_mib, 0.0);
    }

    #[test]
    fn unexpected_memory_unit_counts_as_zero() {
        let devices = parse_devices("0, GPU-aaa, 45 %, 30 W", "GPU-aaa, 100, 1750 MB\nGPU-aaa, 101, 5 MiB");
        assert_eq!(devices[0].processes.len(), 2);
        assert_eq!(devices[0].processes[0].used_memory_mib, 0.0);
        assert_eq!(devices[0].processes[1].used_memory_mib, 5.0);
    }

    #[test]
    fn unreadable_utilization_or_pid_drops_the_row() {
        let gpus = "0, GPU-aaa, [N/A], 35 W\n1, GPU-bbb, 10 %, 20 W\n";
        let apps = "GPU-aaa, 100, 1750 MiB\nGPU-bbb, x, 10 MiB\nGPU-bbb, 200, 10 MiB\n";
        let devices = parse_devices(gpus, apps);
        assert_eq!(devices.len(), 1);
        assert_eq!(devices[0].uuid, "GPU-bbb");
        assert_eq!(devices[0].processes.len(), 1);
        assert_eq!(devices[0].processes[0].pid, 200);
    }

    #[test]
    fn wrong_field_count_is_rejected() {
        assert!(matches!(
            parse_gpu_row("0, GPU-aaa, 45 %"),
            Err(RowError::FieldCount { expected: 4, actual: 3 })
        ));
        assert!(matches!(
            parse_app_row("GPU-aaa, x, 1 MiB"),
            Err(RowError::Integer { field: "pid", .. })
        ));
    }
}
