//! In-memory GPU used by tests and the simulator tool.
//!
//! Readings are whatever the owner last put in. Writes are range-checked
//! against the configured limits and recorded, and any operation can be made
//! to fail or hang so degraded paths can be exercised.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use super::{DeviceError, FanSpeedLimits, GpuDevice, PowerLimits};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Temperature,
    FanSpeeds,
    PowerLimit,
    SetFanSpeed,
    SetPowerLimit,
    EnableAutoFan,
    FanSpeedLimits,
    PowerLimits,
}

#[derive(Debug, Clone)]
pub enum Fault {
    /// Return this error immediately.
    Fail(DeviceError),
    /// Never complete.
    Hang,
}

/// A write the simulated device accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    SetFanSpeed(i32),
    SetPowerLimit(i32),
    EnableAutoFan,
}

#[derive(Debug, Clone)]
pub struct SimState {
    pub temperature: i32,
    pub fan_speeds: Vec<i32>,
    pub auto_fan: bool,
    /// Speed the hardware curve settles on while in automatic mode.
    pub auto_fan_speed: i32,
    pub power_limit: i32,
    pub fan_limits: FanSpeedLimits,
    pub power_limits: PowerLimits,
}

#[derive(Debug)]
struct Inner {
    state: SimState,
    faults: HashMap<Operation, Fault>,
    commands: Vec<Command>,
}

/// Cloning yields another handle to the same device.
#[derive(Debug, Clone)]
pub struct SimulatedGpu {
    inner: Arc<Mutex<Inner>>,
}

impl Default for SimulatedGpu {
    /// A two-fan board with typical desktop limits, idling at 45°C.
    fn default() -> Self {
        Self::new(SimState {
            temperature: 45,
            fan_speeds: vec![30, 30],
            auto_fan: true,
            auto_fan_speed: 30,
            power_limit: 300,
            fan_limits: FanSpeedLimits { min: 30, max: 100 },
            power_limits: PowerLimits {
                min: 100,
                max: 350,
                default: 320,
            },
        })
    }
}

impl SimulatedGpu {
    pub fn new(state: SimState) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                state,
                faults: HashMap::new(),
                commands: Vec::new(),
            })),
        }
    }

    pub fn state(&self) -> SimState {
        self.inner.lock().state.clone()
    }

    pub fn set_temperature(&self, celsius: i32) {
        self.inner.lock().state.temperature = celsius;
    }

    /// Overwrite the fan readings without going through a command, as if the
    /// hardware drifted on its own.
    pub fn set_fan_speeds(&self, speeds: Vec<i32>) {
        self.inner.lock().state.fan_speeds = speeds;
    }

    pub fn inject(&self, op: Operation, fault: Fault) {
        self.inner.lock().faults.insert(op, fault);
    }

    pub fn clear_fault(&self, op: Operation) {
        self.inner.lock().faults.remove(&op);
    }

    /// Every accepted write, oldest first.
    pub fn commands(&self) -> Vec<Command> {
        self.inner.lock().commands.clone()
    }

    pub fn clear_commands(&self) {
        self.inner.lock().commands.clear();
    }

    async fn check(&self, op: Operation) -> Result<(), DeviceError> {
        let fault = self.inner.lock().faults.get(&op).cloned();
        match fault {
            None => Ok(()),
            Some(Fault::Fail(e)) => Err(e),
            Some(Fault::Hang) => std::future::pending().await,
        }
    }
}

#[async_trait]
impl GpuDevice for SimulatedGpu {
    fn name(&self) -> String {
        "Simulated GPU".to_string()
    }

    async fn temperature(&self) -> Result<i32, DeviceError> {
        self.check(Operation::Temperature).await?;
        Ok(self.inner.lock().state.temperature)
    }

    async fn fan_speeds(&self) -> Result<Vec<i32>, DeviceError> {
        self.check(Operation::FanSpeeds).await?;
        Ok(self.inner.lock().state.fan_speeds.clone())
    }

    async fn power_limit(&self) -> Result<i32, DeviceError> {
        self.check(Operation::PowerLimit).await?;
        Ok(self.inner.lock().state.power_limit)
    }

    async fn set_fan_speed(&self, percent: i32) -> Result<(), DeviceError> {
        self.check(Operation::SetFanSpeed).await?;
        let mut inner = self.inner.lock();
        let FanSpeedLimits { min, max } = inner.state.fan_limits;
        if !(min..=max).contains(&percent) {
            return Err(DeviceError::OutOfRange {
                value: percent,
                min,
                max,
            });
        }
        inner.state.auto_fan = false;
        inner.state.fan_speeds.iter_mut().for_each(|s| *s = percent);
        inner.commands.push(Command::SetFanSpeed(percent));
        Ok(())
    }

    async fn set_power_limit(&self, watts: i32) -> Result<(), DeviceError> {
        self.check(Operation::SetPowerLimit).await?;
        let mut inner = self.inner.lock();
        let PowerLimits { min, max, .. } = inner.state.power_limits;
        if !(min..=max).contains(&watts) {
            return Err(DeviceError::OutOfRange {
                value: watts,
                min,
                max,
            });
        }
        inner.state.power_limit = watts;
        inner.commands.push(Command::SetPowerLimit(watts));
        Ok(())
    }

    async fn enable_auto_fan_control(&self) -> Result<(), DeviceError> {
        self.check(Operation::EnableAutoFan).await?;
        let mut inner = self.inner.lock();
        inner.state.auto_fan = true;
        let speed = inner.state.auto_fan_speed;
        inner.state.fan_speeds.iter_mut().for_each(|s| *s = speed);
        inner.commands.push(Command::EnableAutoFan);
        Ok(())
    }

    async fn fan_speed_limits(&self) -> Result<FanSpeedLimits, DeviceError> {
        self.check(Operation::FanSpeedLimits).await?;
        Ok(self.inner.lock().state.fan_limits)
    }

    async fn power_limits(&self) -> Result<PowerLimits, DeviceError> {
        self.check(Operation::PowerLimits).await?;
        Ok(self.inner.lock().state.power_limits)
    }
}
