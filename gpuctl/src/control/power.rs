use crate::device::PowerLimits;

use super::numeric::{clamp, within_hysteresis};

/// Watts cut per degree above the target temperature.
pub const WATTS_PER_DEGREE: i32 = 5;

/// Largest cut applied in a single tick.
pub const MAX_POWER_CHANGE_W: i32 = 10;

/// Default restore multiplier.
pub const DEFAULT_RESTORE_FACTOR: f64 = 2.0;

/// Restore step for a one-degree undershoot, the smallest restore the
/// regulator ever plans.
///
/// The limit only comes back if this clears the power dead-band. A factor
/// above 1 alone is not enough: with a 6 W band and a factor of 1.1 every
/// cut is applied and every one-degree restore is held.
pub fn min_restore_step(restore_factor: f64) -> i32 {
    (f64::from(WATTS_PER_DEGREE) * restore_factor).round() as i32
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerAction {
    SetLimit(i32),
    Hold,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PowerPlan {
    pub target: i32,
    pub action: PowerAction,
}

/// Tuning knobs for [`PowerRegulator`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PowerTuning {
    /// Temperature the balanced mode steers toward (°C).
    pub target_temperature: i32,
    /// Fan speed at which the fans are considered out of headroom (%).
    pub fan_ceiling: i32,
    /// Dead-band in watts.
    pub hysteresis: i32,
    pub restore_factor: f64,
    pub performance: bool,
}

/// Trades power for temperature once the fans are saturated, and gives the
/// power back faster than it took it.
///
/// Like the fan regulator, [`plan`](Self::plan) only decides. The caller
/// writes the limit and then calls [`commit`](Self::commit).
#[derive(Debug, Clone)]
pub struct PowerRegulator {
    limits: PowerLimits,
    tuning: PowerTuning,
    last_power_limit: i32,
}

impl PowerRegulator {
    pub fn new(limits: PowerLimits, tuning: PowerTuning, initial_power_limit: i32) -> Self {
        Self {
            limits,
            tuning,
            last_power_limit: initial_power_limit,
        }
    }

    /// Power limit before the most recent command.
    pub fn last_power_limit(&self) -> i32 {
        self.last_power_limit
    }

    /// Desired limit for this tick, before the hysteresis gate.
    pub fn target(&self, temperature: i32, fan_speed: i32, current_limit: i32) -> i32 {
        if self.tuning.performance {
            return self.limits.max;
        }

        let diff = temperature - self.tuning.target_temperature;
        let step = (diff.abs() * WATTS_PER_DEGREE).min(MAX_POWER_CHANGE_W);

        if diff > 0 && fan_speed >= self.tuning.fan_ceiling {
            clamp(current_limit - step, self.limits.min, self.limits.max)
        } else if diff < 0 {
            let restore = (f64::from(step) * self.tuning.restore_factor).round() as i32;
            clamp(current_limit + restore, self.limits.min, self.limits.max)
        } else {
            current_limit
        }
    }

    pub fn plan(&self, temperature: i32, fan_speed: i32, current_limit: i32) -> PowerPlan {
        let target = self.target(temperature, fan_speed, current_limit);

        // Performance mode pins to max regardless of the dead-band.
        let action = if target == current_limit
            || (!self.tuning.performance
                && within_hysteresis(target, current_limit, self.tuning.hysteresis))
        {
            PowerAction::Hold
        } else {
            PowerAction::SetLimit(target)
        };

        PowerPlan { target, action }
    }

    pub fn commit(&mut self, plan: &PowerPlan, current_limit: i32) {
        if let PowerAction::SetLimit(_) = plan.action {
            self.last_power_limit = current_limit;
        }
    }
}
