//! Process-level runner: single-instance guard, signal handling and the
//! control loop, in that order.

use tokio::signal::unix::{SignalKind, signal};
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::control::GpuController;
use crate::device::GpuDevice;
use crate::error::Result;
use crate::metrics::MetricsSink;
use crate::pidfile::PidFile;
use crate::tracing::prelude::*;

/// Run the controller for `device` until SIGINT or SIGTERM.
///
/// Returns an error when startup fails, when a write failure aborts the loop
/// under the `abort` policy, or when shutdown overruns its deadline. The
/// caller should exit non-zero in all of those cases.
pub async fn run<D, M>(device: D, metrics: M, config: Config) -> Result<()>
where
    D: GpuDevice,
    M: MetricsSink,
{
    let _pid_file = PidFile::acquire(&config.pid_file)?;

    let cancel = CancellationToken::new();
    let signals = tokio::spawn(cancel_on_signal(cancel.clone()));

    let result = match GpuController::initialize(device, metrics, config).await {
        Ok(controller) => controller.run(cancel.clone()).await,
        Err(e) => Err(e),
    };

    cancel.cancel();
    if let Err(e) = signals.await {
        debug!(error = %e, "Signal task ended abnormally");
    }

    result
}

/// Cancel `cancel` on the first SIGINT or SIGTERM. Returns early if the
/// token is cancelled by someone else.
pub async fn cancel_on_signal(cancel: CancellationToken) {
    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(s) => Some(s),
        Err(e) => {
            error!(error = %e, "Failed to install SIGTERM handler");
            None
        }
    };
    let terminate = async {
        match sigterm.as_mut() {
            Some(s) => {
                s.recv().await;
            }
            None => std::future::pending::<()>().await,
        }
    };

    tokio::select! {
        _ = cancel.cancelled() => return,
        result = tokio::signal::ctrl_c() => match result {
            Ok(()) => info!("Received SIGINT, shutting down"),
            Err(e) => error!(error = %e, "Failed to listen for SIGINT, shutting down"),
        },
        _ = terminate => info!("Received SIGTERM, shutting down"),
    }

    cancel.cancel();
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::device::SimulatedGpu;
    use crate::device::sim::{Fault, Operation};
    use crate::error::Error;
    use crate::metrics::NoopMetrics;
    use crate::pidfile::PidFileError;

    fn config(pid_file: std::path::PathBuf) -> Config {
        Config {
            pid_file,
            ..Config::default()
        }
        .finalize()
        .unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn should_stop_when_token_is_cancelled_externally() {
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(cancel_on_signal(cancel.clone()));

        tokio::time::sleep(Duration::from_millis(10)).await;
        cancel.cancel();

        handle.await.unwrap();
    }

    #[tokio::test]
    async fn should_refuse_second_instance() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gpuctl.pid");
        let _held = PidFile::acquire(&path).unwrap();

        let result = run(SimulatedGpu::default(), NoopMetrics, config(path)).await;

        assert!(matches!(
            result,
            Err(Error::PidFile(PidFileError::AlreadyRunning(_)))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn should_release_pid_file_after_failed_start() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gpuctl.pid");
        let gpu = SimulatedGpu::default();
        gpu.inject(Operation::FanSpeedLimits, Fault::Hang);

        let result = run(gpu, NoopMetrics, config(path.clone())).await;

        assert!(matches!(result, Err(Error::Initialize(_))));
        assert!(!path.exists());
    }
}
