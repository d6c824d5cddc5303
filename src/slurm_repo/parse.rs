// Parsing of squeue / `scontrol -o show job` output into job descriptors.

use crate::models::{JobDescriptor, JobId};

/// Job ids from `squeue -h -o %A`, one per line.
pub fn parse_active_jobs(output: &str) -> Vec<JobId> {
    output.split_whitespace().map(str::to_string).collect()
}

/// Value of the first `key=value` token whose key equals `key`.
fn field<'a>(output: &'a str, key: &str) -> Option<&'a str> {
    output.split_whitespace().find_map(|token| {
        let (k, v) = token.split_once('=')?;
        (k == key).then_some(v)
    })
}

/// Leading integer of a count that scontrol may print as a range (`1-1`).
fn parse_count(raw: &str) -> Option<u32> {
    raw.split('-').next()?.parse().ok()
}

/// GPU count from a TRES list such as `cpu=8,mem=64G,node=1,gres/gpu=2`.
/// The last entry whose key equals `gpu_key` wins; a bare `gpu_key` means one GPU.
/// A count that is not a number is an error.
pub fn gpu_count(tres: &str, gpu_key: &str) -> Result<u32, String> {
    let mut ngpu = 0;
    for entry in tres.split(',') {
        match entry.split_once('=') {
            Some((key, count)) if key == gpu_key => {
                ngpu = count
                    .parse()
                    .map_err(|_| format!("invalid GPU count in TRES entry {:?}", entry))?;
            }
            None if entry == gpu_key => ngpu = 1,
            _ => {}
        }
    }
    Ok(ngpu)
}

/// Builds a descriptor from one-line `scontrol -o show job` output.
pub fn parse_job_descriptor(output: &str, gpu_key: &str) -> Result<JobDescriptor, String> {
    let ncpu = field(output, "NumCPUs")
        .and_then(parse_count)
        .ok_or_else(|| "missing or invalid NumCPUs".to_string())?;
    let nnodes = field(output, "NumNodes")
        .and_then(parse_count)
        .ok_or_else(|| "missing or invalid NumNodes".to_string())?;
    let tres = field(output, "TRES")
        .or_else(|| field(output, "AllocTRES"))
        .or_else(|| field(output, "ReqTRES"))
        .unwrap_or_default();
    Ok(JobDescriptor {
        ncpu,
        ngpu: gpu_count(tres, gpu_key)?,
        nnodes,
    })
}
