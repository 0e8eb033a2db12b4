//! Device facade.
//!
//! The controller talks to hardware only through [`GpuDevice`]. A binding
//! translates these abstract operations into vendor calls and maps vendor
//! status codes onto [`DeviceError`], so nothing above this layer ever sees
//! a raw return code.

pub mod sim;

use std::time::Duration;

use async_trait::async_trait;

pub use sim::SimulatedGpu;

/// Why a device operation failed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DeviceError {
    #[error("Operation not supported by this device")]
    NotSupported,

    #[error("Insufficient permissions")]
    NoPermission,

    #[error("Value {value} outside allowed range {min}..={max}")]
    OutOfRange { value: i32, min: i32, max: i32 },

    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    #[error("Vendor error: {0}")]
    Vendor(String),
}

/// Hardware fan speed bounds (%).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FanSpeedLimits {
    pub min: i32,
    pub max: i32,
}

/// Hardware power-limit bounds (W).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PowerLimits {
    pub min: i32,
    pub max: i32,
    pub default: i32,
}

impl PowerLimits {
    /// The limit to leave behind on exit. Some boards report a default
    /// above the settable maximum.
    pub fn restore_target(&self) -> i32 {
        self.default.min(self.max)
    }
}

/// Capability limits, read once at startup and never changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CapabilityLimits {
    pub fan: FanSpeedLimits,
    pub power: PowerLimits,
}

/// A single controllable GPU.
///
/// Any call may fail or block. The controller races every call against a
/// deadline, so implementations wrapping blocking vendor libraries should
/// move the call onto a blocking thread (`tokio::task::spawn_blocking`)
/// rather than stall the runtime.
#[async_trait]
pub trait GpuDevice: Send + Sync {
    /// Human-readable device name for logs.
    fn name(&self) -> String;

    /// Core temperature (°C).
    async fn temperature(&self) -> Result<i32, DeviceError>;

    /// Current speed of every fan (%), in fan index order.
    async fn fan_speeds(&self) -> Result<Vec<i32>, DeviceError>;

    /// Current power limit (W).
    async fn power_limit(&self) -> Result<i32, DeviceError>;

    /// Command every fan to `percent`. Takes fans out of automatic control.
    async fn set_fan_speed(&self, percent: i32) -> Result<(), DeviceError>;

    async fn set_power_limit(&self, watts: i32) -> Result<(), DeviceError>;

    /// Hand fan control back to the hardware's own curve.
    async fn enable_auto_fan_control(&self) -> Result<(), DeviceError>;

    async fn fan_speed_limits(&self) -> Result<FanSpeedLimits, DeviceError>;

    async fn power_limits(&self) -> Result<PowerLimits, DeviceError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn should_restore_to_default_when_within_max() {
        let limits = PowerLimits {
            min: 100,
            max: 350,
            default: 320,
        };
        assert_eq!(limits.restore_target(), 320);
    }

    #[test]
    fn should_restore_to_max_when_default_exceeds_it() {
        let limits = PowerLimits {
            min: 100,
            max: 300,
            default: 320,
        };
        assert_eq!(limits.restore_target(), 300);
    }
}
