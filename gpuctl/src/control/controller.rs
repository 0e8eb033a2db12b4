use std::fmt::Debug;
use std::future::Future;
use std::time::Duration;

use time::OffsetDateTime;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use super::degraded::{DegradedAlarm, DegradedStatus};
use super::fan::{FanAction, FanCurve, FanMode, FanPlan, FanRegulator};
use super::filter::MovingAverage;
use super::power::{PowerAction, PowerPlan, PowerRegulator, PowerTuning};
use super::{MIN_TEMPERATURE_C, WINDOW_SIZE};
use crate::config::{Config, WriteFailurePolicy};
use crate::device::{CapabilityLimits, DeviceError, GpuDevice};
use crate::error::{Error, Result};
use crate::metrics::{
    FanMetrics, MetricsSink, PowerMetrics, Snapshot, StateMetrics, TemperatureMetrics,
};
use crate::tracing::prelude::*;

/// One round of device readings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sample {
    pub temperature: i32,
    /// Every fan, in index order. Never empty.
    pub fan_speeds: Vec<i32>,
    pub power_limit: i32,
}

impl Sample {
    /// The first fan is the control reference.
    pub fn fan_speed(&self) -> i32 {
        self.fan_speeds.first().copied().unwrap_or_default()
    }
}

/// Owns all control state and drives one GPU.
///
/// Nothing here is shared: the filters, regulator state and last-known
/// readings belong to whichever task runs [`run`](Self::run), and ticks never
/// overlap.
pub struct GpuController<D: GpuDevice, M: MetricsSink> {
    device: D,
    metrics: M,
    config: Config,
    limits: CapabilityLimits,
    fan: FanRegulator,
    power: PowerRegulator,
    temperature_filter: MovingAverage,
    power_filter: MovingAverage,
    last_sample: Sample,
    degraded: DegradedAlarm,
}

impl<D: GpuDevice, M: MetricsSink> GpuController<D, M> {
    /// Read capability limits and an initial sample, and reset the power
    /// limit to the board default unless only monitoring.
    ///
    /// Any failure here is fatal: without limits there is nothing safe to
    /// clamp against.
    pub async fn initialize(device: D, metrics: M, config: Config) -> Result<Self> {
        let timeout = config.device_timeout();

        let fan_limits = bounded(timeout, device.fan_speed_limits())
            .await
            .map_err(Error::Initialize)?;
        let power_limits = bounded(timeout, device.power_limits())
            .await
            .map_err(Error::Initialize)?;
        let limits = CapabilityLimits {
            fan: fan_limits,
            power: power_limits,
        };

        info!(
            device = %device.name(),
            fan_min = fan_limits.min,
            fan_max = fan_limits.max,
            power_min = power_limits.min,
            power_max = power_limits.max,
            power_default = power_limits.default,
            "Device limits detected"
        );

        if !config.is_monitor_mode() {
            let watts = power_limits.restore_target();
            bounded(timeout, device.set_power_limit(watts))
                .await
                .map_err(|source| Error::SetPowerLimit { watts, source })?;
            info!(watts, "Power limit reset to default");
        }

        let sample = Sample {
            temperature: bounded(timeout, device.temperature())
                .await
                .map_err(Error::Initialize)?,
            fan_speeds: bounded(timeout, fan_speeds(&device))
                .await
                .map_err(Error::Initialize)?,
            power_limit: bounded(timeout, device.power_limit())
                .await
                .map_err(Error::Initialize)?,
        };

        let curve = FanCurve::new(
            fan_limits,
            config.max_fan_speed(),
            config.max_temperature(),
            config.is_performance_mode(),
        );
        let tuning = PowerTuning {
            target_temperature: config.max_temperature(),
            fan_ceiling: curve.cap(),
            hysteresis: config.power_hysteresis,
            restore_factor: config.restore_factor,
            performance: config.is_performance_mode(),
        };

        Ok(Self {
            fan: FanRegulator::new(curve, config.hysteresis, sample.fan_speed()),
            power: PowerRegulator::new(power_limits, tuning, sample.power_limit),
            temperature_filter: MovingAverage::new(WINDOW_SIZE),
            power_filter: MovingAverage::new(WINDOW_SIZE),
            degraded: DegradedAlarm::default(),
            last_sample: sample,
            device,
            metrics,
            config,
            limits,
        })
    }

    pub fn limits(&self) -> CapabilityLimits {
        self.limits
    }

    pub fn fan_mode(&self) -> FanMode {
        self.fan.mode()
    }

    pub fn last_sample(&self) -> &Sample {
        &self.last_sample
    }

    /// Tick on the configured interval until `cancel` fires or a write
    /// failure aborts the loop, then run [`shutdown`](Self::shutdown).
    ///
    /// Cancellation is only observed between ticks. A tick that has started
    /// always finishes.
    pub async fn run(mut self, cancel: CancellationToken) -> Result<()> {
        let mut interval = tokio::time::interval(self.config.interval());
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            interval = ?self.config.interval(),
            max_temperature = self.config.max_temperature(),
            max_fan_speed = self.config.max_fan_speed(),
            performance = self.config.is_performance_mode(),
            monitor = self.config.is_monitor_mode(),
            "Control loop started"
        );

        let outcome = loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    info!("Control loop cancelled");
                    break Ok(());
                }
                _ = interval.tick() => {
                    match self.tick().await {
                        Ok(_) => {}
                        Err(e)
                            if e.is_write_failure()
                                && self.config.on_write_failure == WriteFailurePolicy::Continue =>
                        {
                            warn!(error = %e, "Device write failed, retrying next tick");
                        }
                        Err(e) => {
                            error!(error = %e, "Control loop aborted");
                            break Err(e);
                        }
                    }
                }
            }
        };

        let shutdown = self.shutdown().await;
        outcome.and(shutdown)
    }

    /// One control cycle: sample, smooth, regulate, write, report.
    ///
    /// Returns the snapshot of this tick, or the first write failure. The
    /// snapshot is handed to the metrics sink either way.
    pub async fn tick(&mut self) -> Result<Snapshot> {
        let (sample, degraded) = self.sample().await;
        self.report_degraded(degraded);

        let average_temperature = self.temperature_filter.update(sample.temperature);
        let average_power = self.power_filter.update(sample.power_limit);
        let fan_speed = sample.fan_speed();

        let fan_plan = self.fan.plan(average_temperature, fan_speed);
        let power_plan = self
            .power
            .plan(sample.temperature, fan_speed, sample.power_limit);

        let outcome = if self.config.is_monitor_mode() {
            Ok(())
        } else {
            let fan = self.apply_fan(&fan_plan, fan_speed).await;
            let power = self.apply_power(&power_plan, sample.power_limit).await;
            fan.and(power)
        };

        let snapshot = Snapshot {
            timestamp: OffsetDateTime::now_utc(),
            fan_speed: FanMetrics {
                current: fan_speed,
                target: fan_plan.target,
            },
            temperature: TemperatureMetrics {
                current: sample.temperature,
                average: average_temperature,
            },
            power_limit: PowerMetrics {
                current: sample.power_limit,
                target: power_plan.target,
                average: average_power,
            },
            state: StateMetrics {
                auto_fan_control: fan_plan.mode == FanMode::Auto,
                performance_mode: self.config.is_performance_mode(),
                degraded,
            },
        };

        self.log_tick(&sample, &snapshot);

        let timeout = self.config.device_timeout();
        match tokio::time::timeout(timeout, self.metrics.record(&snapshot)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(error = %e, "Failed to record metrics"),
            Err(_) => warn!(?timeout, "Recording metrics timed out"),
        }

        self.last_sample = sample;
        outcome.map(|()| snapshot)
    }

    /// Put the device back in the hands of its defaults: power limit to
    /// `min(default, max)`, fans to automatic, then close metrics.
    ///
    /// Individual failures are logged and do not stop the remaining steps.
    /// The only error is the whole sequence overrunning its deadline.
    pub async fn shutdown(&mut self) -> Result<()> {
        let deadline = self.config.shutdown_timeout();
        info!(timeout = ?deadline, "Restoring device defaults");

        match tokio::time::timeout(deadline, self.restore_defaults()).await {
            Ok(()) => {
                info!("Shutdown complete");
                Ok(())
            }
            Err(_) => {
                error!(timeout = ?deadline, "Shutdown did not finish in time");
                Err(Error::ShutdownTimedOut(deadline))
            }
        }
    }

    async fn restore_defaults(&mut self) {
        let timeout = self.config.device_timeout();
        let watts = self.limits.power.restore_target();

        match bounded(timeout, self.device.set_power_limit(watts)).await {
            Ok(()) => info!(watts, "Power limit restored"),
            Err(e) => error!(watts, error = %e, "Failed to restore power limit"),
        }

        match bounded(timeout, self.device.enable_auto_fan_control()).await {
            Ok(()) => info!("Auto fan control restored"),
            Err(e) => error!(error = %e, "Failed to restore auto fan control"),
        }

        match tokio::time::timeout(timeout, self.metrics.close()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!(error = %e, "Failed to close metrics"),
            Err(_) => error!(?timeout, "Closing metrics timed out"),
        }
    }

    /// Read everything, substituting the last known value for any read that
    /// fails or times out. The flag reports whether any substitution
    /// happened.
    async fn sample(&self) -> (Sample, bool) {
        let timeout = self.config.device_timeout();
        let last = &self.last_sample;
        let mut degraded = false;

        let temperature = or_last_known(
            "temperature",
            bounded(timeout, self.device.temperature()).await,
            &last.temperature,
            &mut degraded,
        );
        let fan_speeds = or_last_known(
            "fan_speeds",
            bounded(timeout, fan_speeds(&self.device)).await,
            &last.fan_speeds,
            &mut degraded,
        );
        let power_limit = or_last_known(
            "power_limit",
            bounded(timeout, self.device.power_limit()).await,
            &last.power_limit,
            &mut degraded,
        );

        let sample = Sample {
            temperature,
            fan_speeds,
            power_limit,
        };
        (sample, degraded)
    }

    fn report_degraded(&mut self, degraded: bool) {
        match self.degraded.observe(degraded) {
            DegradedStatus::Raised => error!(
                ticks = self.degraded.threshold(),
                "Device reads keep failing, regulating on stale values"
            ),
            DegradedStatus::Cleared => info!("Device reads recovered"),
            _ => {}
        }
    }

    async fn apply_fan(&mut self, plan: &FanPlan, current_speed: i32) -> Result<()> {
        let timeout = self.config.device_timeout();

        match plan.action {
            FanAction::EnableAuto => {
                bounded(timeout, self.device.enable_auto_fan_control())
                    .await
                    .map_err(Error::EnableAutoFan)?;
                info!(
                    min_temperature = MIN_TEMPERATURE_C,
                    "Temperature at or below minimum, auto fan control enabled"
                );
            }
            FanAction::SetSpeed(speed) => {
                bounded(timeout, self.device.set_fan_speed(speed))
                    .await
                    .map_err(|source| Error::SetFanSpeed { speed, source })?;
                debug!(from = current_speed, to = speed, "Fan speed set");
            }
            FanAction::Hold => {}
        }

        if plan.mode != self.fan.mode() {
            debug!(from = %self.fan.mode(), to = %plan.mode, "Fan mode changed");
        }
        self.fan.commit(plan, current_speed);
        Ok(())
    }

    async fn apply_power(&mut self, plan: &PowerPlan, current_limit: i32) -> Result<()> {
        if let PowerAction::SetLimit(watts) = plan.action {
            let timeout = self.config.device_timeout();
            bounded(timeout, self.device.set_power_limit(watts))
                .await
                .map_err(|source| Error::SetPowerLimit { watts, source })?;
            debug!(from = current_limit, to = watts, "Power limit set");
        }

        self.power.commit(plan, current_limit);
        Ok(())
    }

    fn log_tick(&self, sample: &Sample, snapshot: &Snapshot) {
        debug!(
            current_temperature = snapshot.temperature.current,
            average_temperature = snapshot.temperature.average,
            current_fan_speed = snapshot.fan_speed.current,
            target_fan_speed = snapshot.fan_speed.target,
            last_fan_speed = self.fan.last_fan_speed(),
            fan_speeds = ?sample.fan_speeds,
            min_fan_speed = self.limits.fan.min,
            max_fan_speed = self.fan.curve().cap(),
            current_power_limit = snapshot.power_limit.current,
            target_power_limit = snapshot.power_limit.target,
            average_power_limit = snapshot.power_limit.average,
            last_power_limit = self.power.last_power_limit(),
            min_power_limit = self.limits.power.min,
            max_power_limit = self.limits.power.max,
            hysteresis = self.config.hysteresis,
            auto_fan_control = snapshot.state.auto_fan_control,
            performance = snapshot.state.performance_mode,
            monitor = self.config.is_monitor_mode(),
            degraded = snapshot.state.degraded,
            "Control tick"
        );

        info!(
            temperature = snapshot.temperature.current,
            average_temperature = snapshot.temperature.average,
            fan_speed = snapshot.fan_speed.current,
            target_fan_speed = snapshot.fan_speed.target,
            power_limit = snapshot.power_limit.current,
            target_power_limit = snapshot.power_limit.target,
            "Tick"
        );
    }
}

/// Race a device call against `deadline`.
async fn bounded<T, F>(deadline: Duration, op: F) -> std::result::Result<T, DeviceError>
where
    F: Future<Output = std::result::Result<T, DeviceError>>,
{
    tokio::time::timeout(deadline, op)
        .await
        .unwrap_or(Err(DeviceError::Timeout(deadline)))
}

/// Fan readings with an empty list treated as a failed read.
async fn fan_speeds<D: GpuDevice>(device: &D) -> std::result::Result<Vec<i32>, DeviceError> {
    let speeds = device.fan_speeds().await?;
    if speeds.is_empty() {
        return Err(DeviceError::NotSupported);
    }
    Ok(speeds)
}

fn or_last_known<T: Clone + Debug>(
    reading: &'static str,
    result: std::result::Result<T, DeviceError>,
    last: &T,
    degraded: &mut bool,
) -> T {
    match result {
        Ok(value) => value,
        Err(e) => {
            *degraded = true;
            warn!(reading, error = %e, last_known = ?last, "Device read failed, using last known value");
            last.clone()
        }
    }
}
