// Domain models: job descriptors, per-cycle samples, persisted aggregates, GPU telemetry.

mod aggregate;
mod gpu;
mod job;

pub use aggregate::JobAggregate;
pub use gpu::{GpuDevice, GpuProcess, Quantity, QuantityError, Unit};
pub use job::{JobDescriptor, JobId, JobSample};
