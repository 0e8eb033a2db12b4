//! A crude first-order thermal model for live simulation.
//!
//! The die heats toward an equilibrium set by the power it is allowed to
//! draw and cools harder the faster the fans spin. Good enough to watch the
//! regulators chase a moving target, not a physical model.

use std::time::Duration;

use gpuctl::device::SimulatedGpu;
use gpuctl::tracing::prelude::*;

/// °C per watt of drawn power at minimum airflow.
const HEAT_PER_WATT: f64 = 0.22;

/// Fraction of the heat removed at 100% fan speed.
const FAN_COOLING: f64 = 0.45;

/// Fraction of the gap to equilibrium closed per step.
const RESPONSE: f64 = 0.15;

#[derive(Debug, Clone)]
pub struct ThermalModel {
    ambient: f64,
    load_watts: i32,
    temperature: f64,
}

impl ThermalModel {
    pub fn new(ambient: i32, load_watts: i32) -> Self {
        Self {
            ambient: f64::from(ambient),
            load_watts,
            temperature: f64::from(ambient),
        }
    }

    pub fn temperature(&self) -> i32 {
        self.temperature.round() as i32
    }

    /// Where the temperature settles for a given power cap and fan speed.
    pub fn equilibrium(&self, power_limit: i32, fan_speed: i32) -> f64 {
        let drawn = f64::from(self.load_watts.min(power_limit).max(0));
        let airflow = f64::from(fan_speed.clamp(0, 100)) / 100.0;
        self.ambient + drawn * HEAT_PER_WATT * (1.0 - FAN_COOLING * airflow)
    }

    /// Advance one step and return the new temperature.
    pub fn step(&mut self, power_limit: i32, fan_speed: i32) -> i32 {
        let target = self.equilibrium(power_limit, fan_speed);
        self.temperature += (target - self.temperature) * RESPONSE;
        self.temperature()
    }

    /// Drive `gpu` forever, one step per `period`.
    pub async fn drive(mut self, gpu: SimulatedGpu, period: Duration) {
        let mut interval = tokio::time::interval(period);
        loop {
            interval.tick().await;
            let state = gpu.state();
            let fan_speed = state.fan_speeds.first().copied().unwrap_or(0);
            let temperature = self.step(state.power_limit, fan_speed);
            trace!(temperature, fan_speed, power_limit = state.power_limit, "Model step");
            gpu.set_temperature(temperature);
        }
    }
}
