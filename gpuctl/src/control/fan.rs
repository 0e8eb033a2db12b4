use crate::device::FanSpeedLimits;

use super::MIN_TEMPERATURE_C;
use super::numeric::{clamp, within_hysteresis};

/// Curve exponent in performance mode: ramps up earlier.
pub const PERFORMANCE_EXPONENT: f64 = 1.5;

/// Curve exponent otherwise: stays quiet longer, then climbs steeply.
pub const BALANCED_EXPONENT: f64 = 2.0;

/// Who governs fan speed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum FanMode {
    /// The hardware's own curve; the controller issues no speed.
    Auto,
    /// The controller commands an explicit percentage.
    Manual,
}

impl FanMode {
    /// Auto at or below [`MIN_TEMPERATURE_C`], Manual above it. The mode
    /// depends only on the smoothed temperature, never on the previous mode.
    pub fn for_temperature(average_temperature: i32) -> Self {
        if average_temperature <= MIN_TEMPERATURE_C {
            FanMode::Auto
        } else {
            FanMode::Manual
        }
    }
}

/// Maps smoothed temperature to fan speed.
#[derive(Debug, Clone, PartialEq)]
pub struct FanCurve {
    max_temperature: i32,
    min_speed: i32,
    cap: i32,
    exponent: f64,
}

impl FanCurve {
    /// `max_fan_speed` is the operator's ceiling; it is intersected with the
    /// hardware range.
    pub fn new(
        limits: FanSpeedLimits,
        max_fan_speed: i32,
        max_temperature: i32,
        performance: bool,
    ) -> Self {
        let cap = clamp(max_fan_speed.min(limits.max), limits.min, limits.max);
        Self {
            max_temperature,
            min_speed: limits.min,
            cap,
            exponent: if performance {
                PERFORMANCE_EXPONENT
            } else {
                BALANCED_EXPONENT
            },
        }
    }

    pub fn cap(&self) -> i32 {
        self.cap
    }

    pub fn target(&self, temperature: i32) -> i32 {
        if temperature <= MIN_TEMPERATURE_C {
            return self.min_speed;
        }
        if temperature >= self.max_temperature {
            return self.cap;
        }

        let span = f64::from(self.max_temperature - MIN_TEMPERATURE_C);
        let position = f64::from(temperature - MIN_TEMPERATURE_C) / span;
        let speed_range = f64::from(self.cap - self.min_speed);
        let speed = self.min_speed + (speed_range * position.powf(self.exponent)) as i32;

        clamp(speed, self.min_speed, self.cap)
    }
}

/// What the fan regulator wants done this tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FanAction {
    /// Hand control back to the hardware.
    EnableAuto,
    /// Command this speed.
    SetSpeed(i32),
    /// Leave the fans alone.
    Hold,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FanPlan {
    pub mode: FanMode,
    pub target: i32,
    pub action: FanAction,
}

/// Fan curve plus the Auto/Manual state machine and the hysteresis gate.
///
/// [`plan`](Self::plan) is side-effect free. The caller performs the device
/// write and then reports success through [`commit`](Self::commit), so a
/// failed write leaves the regulator state untouched and the next tick tries
/// again.
#[derive(Debug, Clone)]
pub struct FanRegulator {
    curve: FanCurve,
    hysteresis: i32,
    mode: FanMode,
    last_fan_speed: i32,
}

impl FanRegulator {
    /// Starts in Manual so that a cool first tick explicitly hands control
    /// back to the hardware.
    pub fn new(curve: FanCurve, hysteresis: i32, initial_fan_speed: i32) -> Self {
        Self {
            curve,
            hysteresis,
            mode: FanMode::Manual,
            last_fan_speed: initial_fan_speed,
        }
    }

    pub fn mode(&self) -> FanMode {
        self.mode
    }

    pub fn is_auto(&self) -> bool {
        self.mode == FanMode::Auto
    }

    /// Fan speed before the most recent command.
    pub fn last_fan_speed(&self) -> i32 {
        self.last_fan_speed
    }

    pub fn curve(&self) -> &FanCurve {
        &self.curve
    }

    pub fn plan(&self, average_temperature: i32, current_speed: i32) -> FanPlan {
        let mode = FanMode::for_temperature(average_temperature);
        let target = self.curve.target(average_temperature);

        let action = match mode {
            FanMode::Auto if self.mode == FanMode::Auto => FanAction::Hold,
            FanMode::Auto => FanAction::EnableAuto,
            FanMode::Manual if within_hysteresis(target, current_speed, self.hysteresis) => {
                FanAction::Hold
            }
            FanMode::Manual => FanAction::SetSpeed(target),
        };

        FanPlan {
            mode,
            target,
            action,
        }
    }

    /// Record that `plan` was carried out against fans reading
    /// `current_speed`.
    pub fn commit(&mut self, plan: &FanPlan, current_speed: i32) {
        if let FanAction::SetSpeed(_) = plan.action {
            self.last_fan_speed = current_speed;
        }
        self.mode = plan.mode;
    }
}
