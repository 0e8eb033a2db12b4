use std::time::Duration;

use crate::config::ConfigError;
use crate::device::DeviceError;
use crate::pidfile::PidFileError;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("PID file error: {0}")]
    PidFile(#[from] PidFileError),

    #[error("Failed to initialize controller: {0}")]
    Initialize(#[source] DeviceError),

    #[error("Failed to set fan speed to {speed}%: {source}")]
    SetFanSpeed { speed: i32, source: DeviceError },

    #[error("Failed to set power limit to {watts}W: {source}")]
    SetPowerLimit { watts: i32, source: DeviceError },

    #[error("Failed to enable auto fan control: {0}")]
    EnableAutoFan(#[source] DeviceError),

    #[error("Shutdown did not complete within {0:?}")]
    ShutdownTimedOut(Duration),
}

impl Error {
    /// Whether this error came from a device write during a tick.
    pub fn is_write_failure(&self) -> bool {
        matches!(
            self,
            Error::SetFanSpeed { .. } | Error::SetPowerLimit { .. } | Error::EnableAutoFan(_)
        )
    }
}
