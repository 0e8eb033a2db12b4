//! The control core: filters, regulators and the loop that drives them.
//!
//! Each tick samples the device, smooths temperature and power limit through
//! [`MovingAverage`] windows, asks the [`FanRegulator`] and
//! [`PowerRegulator`] what to do, and carries that out with bounded device
//! writes. The regulators are plain state machines with no I/O, so they are
//! tested without a device or a runtime.

mod controller;
mod degraded;
mod fan;
mod filter;
mod numeric;
mod power;

pub use controller::{GpuController, Sample};
pub use degraded::{DEFAULT_DEGRADED_THRESHOLD, DegradedAlarm, DegradedStatus};
pub use fan::{
    BALANCED_EXPONENT, FanAction, FanCurve, FanMode, FanPlan, FanRegulator, PERFORMANCE_EXPONENT,
};
pub use filter::MovingAverage;
pub use power::{
    DEFAULT_RESTORE_FACTOR, MAX_POWER_CHANGE_W, PowerAction, PowerPlan, PowerRegulator,
    PowerTuning, WATTS_PER_DEGREE, min_restore_step,
};

/// At or below this smoothed temperature the fans are left to the hardware.
pub const MIN_TEMPERATURE_C: i32 = 50;

/// Samples per moving-average window, for temperature and power alike.
pub const WINDOW_SIZE: usize = 5;
