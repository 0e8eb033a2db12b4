//! Closed-loop GPU cooling and power-limit controller.
//!
//! The control core lives in [`control`]: smoothing filters, the fan and
//! power regulators, and the [`GpuController`](control::GpuController) that
//! ties them to a device on a fixed interval. Hardware is reached only
//! through the [`GpuDevice`](device::GpuDevice) trait, and tick snapshots
//! leave through a [`MetricsSink`](metrics::MetricsSink).
//!
//! [`daemon::run`] is the entry point for binaries: it installs signal
//! handling, runs the loop until cancelled and enforces the shutdown
//! deadline.

pub mod config;
pub mod control;
pub mod daemon;
pub mod device;
pub mod error;
pub mod metrics;
pub mod pidfile;
pub mod tracing;

pub use config::Config;
pub use control::GpuController;
pub use error::{Error, Result};
