//! Telemetry setup shared by the coalesce binaries and tests.

pub mod metrics;
pub mod tracing;
