//! Controller configuration.
//!
//! Values are layered: built-in defaults, then a TOML file, then `GPUCTL_*`
//! environment variables, then command-line overrides. The result is
//! validated once and never changes for the lifetime of the process.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::control::{MAX_POWER_CHANGE_W, min_restore_step};

/// Searched in order when no explicit path is given.
pub const DEFAULT_CONFIG_PATHS: &[&str] = &["/etc/gpuctl.toml", "gpuctl.toml"];

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("Invalid value {value:?} for {key}")]
    Env { key: String, value: String },

    #[error("Invalid {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// What to do when a fan or power write fails during a tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, strum::Display, strum::EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum WriteFailurePolicy {
    /// Stop the loop and run the shutdown sequence.
    Abort,
    /// Log it and let the next tick try again.
    Continue,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Seconds between control ticks.
    pub interval: u64,

    /// Temperature ceiling (°C). The fan curve tops out here and the power
    /// regulator steers toward it.
    pub temperature: i32,

    /// Highest fan speed the controller will command (%).
    pub fan_speed: i32,

    /// Fan dead-band (%).
    pub hysteresis: i32,

    /// Power-limit dead-band (W).
    pub power_hysteresis: i32,

    /// Multiplier applied to power restoration relative to reduction.
    /// Must be above 1, and large enough that a one-degree restore clears
    /// `power_hysteresis`.
    pub restore_factor: f64,

    pub performance: bool,
    pub monitor: bool,
    pub debug: bool,
    pub verbose: bool,

    /// Deadline for each individual device call (ms).
    pub device_timeout_ms: u64,

    /// Deadline for the whole shutdown sequence (s).
    pub shutdown_timeout_secs: u64,

    pub on_write_failure: WriteFailurePolicy,

    pub pid_file: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            interval: 2,
            temperature: 80,
            fan_speed: 100,
            hysteresis: 4,
            power_hysteresis: 5,
            restore_factor: 2.0,
            performance: false,
            monitor: false,
            debug: false,
            verbose: false,
            device_timeout_ms: 1000,
            shutdown_timeout_secs: 5,
            on_write_failure: WriteFailurePolicy::Abort,
            pid_file: std::env::temp_dir().join("gpuctl.pid"),
        }
    }
}

/// Command-line values; `None` leaves the lower layers alone.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub interval: Option<u64>,
    pub temperature: Option<i32>,
    pub fan_speed: Option<i32>,
    pub hysteresis: Option<i32>,
    pub performance: Option<bool>,
    pub monitor: Option<bool>,
    pub debug: Option<bool>,
    pub verbose: Option<bool>,
}

impl Config {
    /// The config file to read: `explicit` if given, otherwise the first of
    /// [`DEFAULT_CONFIG_PATHS`] that exists.
    pub fn find(explicit: Option<&Path>) -> Option<PathBuf> {
        match explicit {
            Some(path) => Some(path.to_owned()),
            None => DEFAULT_CONFIG_PATHS
                .iter()
                .map(PathBuf::from)
                .find(|p| p.exists()),
        }
    }

    /// Build the effective configuration from every layer and validate it.
    ///
    /// `path` must exist when given; without one the file layer is skipped.
    /// Use [`find`](Self::find) to pick the path.
    pub fn load(path: Option<&Path>, overrides: &Overrides) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };

        config.apply_env(|key| std::env::var(key).ok())?;
        config.apply_overrides(overrides);
        config.finalize()
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_owned(),
            source,
        })?;
        Self::from_toml(&text).map_err(|source| ConfigError::Parse {
            path: path.to_owned(),
            source,
        })
    }

    pub fn from_toml(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    /// Apply `GPUCTL_<KEY>` variables found through `lookup`.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        fn parse<T: std::str::FromStr>(key: &str, value: String) -> Result<T, ConfigError> {
            value.trim().parse().map_err(|_| ConfigError::Env {
                key: key.to_owned(),
                value,
            })
        }

        macro_rules! env_field {
            ($field:ident, $name:literal) => {
                let key = concat!("GPUCTL_", $name);
                if let Some(value) = lookup(key) {
                    self.$field = parse(key, value)?;
                }
            };
        }

        env_field!(interval, "INTERVAL");
        env_field!(temperature, "TEMPERATURE");
        env_field!(fan_speed, "FAN_SPEED");
        env_field!(hysteresis, "HYSTERESIS");
        env_field!(power_hysteresis, "POWER_HYSTERESIS");
        env_field!(restore_factor, "RESTORE_FACTOR");
        env_field!(performance, "PERFORMANCE");
        env_field!(monitor, "MONITOR");
        env_field!(debug, "DEBUG");
        env_field!(verbose, "VERBOSE");
        env_field!(device_timeout_ms, "DEVICE_TIMEOUT_MS");
        env_field!(shutdown_timeout_secs, "SHUTDOWN_TIMEOUT_SECS");
        env_field!(on_write_failure, "ON_WRITE_FAILURE");
        env_field!(pid_file, "PID_FILE");

        Ok(())
    }

    pub fn apply_overrides(&mut self, overrides: &Overrides) {
        if let Some(v) = overrides.interval {
            self.interval = v;
        }
        if let Some(v) = overrides.temperature {
            self.temperature = v;
        }
        if let Some(v) = overrides.fan_speed {
            self.fan_speed = v;
        }
        if let Some(v) = overrides.hysteresis {
            self.hysteresis = v;
        }
        if let Some(v) = overrides.performance {
            self.performance = v;
        }
        if let Some(v) = overrides.monitor {
            self.monitor = v;
        }
        if let Some(v) = overrides.debug {
            self.debug = v;
        }
        if let Some(v) = overrides.verbose {
            self.verbose = v;
        }
    }

    /// Validate and settle derived flags. Monitoring implies verbose output
    /// unless debug output is already on.
    pub fn finalize(mut self) -> Result<Self, ConfigError> {
        if self.monitor && !self.debug {
            self.verbose = true;
        }
        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        fn invalid(field: &'static str, reason: impl Into<String>) -> ConfigError {
            ConfigError::Invalid {
                field,
                reason: reason.into(),
            }
        }

        if self.interval == 0 {
            return Err(invalid("interval", "must be at least 1 second"));
        }
        if self.temperature <= crate::control::MIN_TEMPERATURE_C {
            return Err(invalid(
                "temperature",
                format!(
                    "{}°C must be above {}°C",
                    self.temperature,
                    crate::control::MIN_TEMPERATURE_C
                ),
            ));
        }
        if !(1..=100).contains(&self.fan_speed) {
            return Err(invalid(
                "fan_speed",
                format!("{}% is outside 1-100%", self.fan_speed),
            ));
        }
        if self.hysteresis < 0 {
            return Err(invalid("hysteresis", "must not be negative"));
        }
        if self.power_hysteresis < 0 {
            return Err(invalid("power_hysteresis", "must not be negative"));
        }
        if !(self.restore_factor.is_finite() && self.restore_factor > 1.0) {
            return Err(invalid(
                "restore_factor",
                format!("{} must be greater than 1", self.restore_factor),
            ));
        }
        if self.power_hysteresis >= MAX_POWER_CHANGE_W {
            return Err(invalid(
                "power_hysteresis",
                format!(
                    "{}W would hold every cut of at most {}W",
                    self.power_hysteresis, MAX_POWER_CHANGE_W
                ),
            ));
        }
        let restore = min_restore_step(self.restore_factor);
        if restore <= self.power_hysteresis {
            return Err(invalid(
                "restore_factor",
                format!(
                    "{} restores {}W per degree, inside the {}W power dead-band",
                    self.restore_factor, restore, self.power_hysteresis
                ),
            ));
        }
        if self.device_timeout_ms == 0 || self.device_timeout() >= self.interval() {
            return Err(invalid(
                "device_timeout_ms",
                format!(
                    "{}ms must be non-zero and shorter than the {}s interval",
                    self.device_timeout_ms, self.interval
                ),
            ));
        }
        if self.shutdown_timeout_secs == 0 {
            return Err(invalid("shutdown_timeout_secs", "must be non-zero"));
        }

        Ok(())
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval)
    }

    pub fn device_timeout(&self) -> Duration {
        Duration::from_millis(self.device_timeout_ms)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }

    pub fn max_temperature(&self) -> i32 {
        self.temperature
    }

    pub fn max_fan_speed(&self) -> i32 {
        self.fan_speed
    }

    pub fn is_performance_mode(&self) -> bool {
        self.performance
    }

    pub fn is_monitor_mode(&self) -> bool {
        self.monitor
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::io::Write;

    use test_case::test_case;

    use super::*;

    fn env(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn should_validate_defaults() {
        let config = Config::default().finalize().unwrap();

        assert_eq!(config.interval(), Duration::from_secs(2));
        assert_eq!(config.max_temperature(), 80);
        assert_eq!(config.max_fan_speed(), 100);
        assert_eq!(config.hysteresis, 4);
        assert_eq!(config.on_write_failure, WriteFailurePolicy::Abort);
        assert!(!config.is_performance_mode());
        assert!(!config.is_monitor_mode());
    }

    #[test]
    fn should_parse_toml_and_keep_defaults_for_missing_keys() {
        let config = Config::from_toml(
            r#"
            interval = 5
            temperature = 75
            performance = true
            on_write_failure = "continue"
            "#,
        )
        .unwrap();

        assert_eq!(config.interval, 5);
        assert_eq!(config.temperature, 75);
        assert!(config.performance);
        assert_eq!(config.on_write_failure, WriteFailurePolicy::Continue);
        assert_eq!(config.fan_speed, 100);
        assert_eq!(config.restore_factor, 2.0);
    }

    #[test]
    fn should_reject_unknown_keys() {
        assert!(Config::from_toml("fanspeed_max = 90").is_err());
    }

    #[test]
    fn should_load_explicit_file_and_apply_overrides() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "interval = 3\nhysteresis = 6").unwrap();

        let overrides = Overrides {
            hysteresis: Some(2),
            monitor: Some(true),
            ..Default::default()
        };
        let config = Config::load(Some(file.path()), &overrides).unwrap();

        assert_eq!(config.interval, 3);
        assert_eq!(config.hysteresis, 2);
        assert!(config.monitor);
        assert!(config.verbose, "monitor mode implies verbose");
    }

    #[test]
    fn should_fail_when_explicit_file_is_missing() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.toml");

        let err = Config::load(Some(&missing), &Overrides::default()).unwrap_err();

        assert!(matches!(err, ConfigError::Read { .. }));
    }

    #[test]
    fn should_prefer_explicit_path_even_if_missing() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.toml");

        assert_eq!(Config::find(Some(&missing)), Some(missing));
    }

    #[test]
    fn should_apply_environment_variables() {
        let vars = env(&[
            ("GPUCTL_INTERVAL", "4"),
            ("GPUCTL_FAN_SPEED", " 85 "),
            ("GPUCTL_PERFORMANCE", "true"),
            ("GPUCTL_ON_WRITE_FAILURE", "continue"),
        ]);
        let mut config = Config::default();

        config.apply_env(|k| vars.get(k).cloned()).unwrap();

        assert_eq!(config.interval, 4);
        assert_eq!(config.fan_speed, 85);
        assert!(config.performance);
        assert_eq!(config.on_write_failure, WriteFailurePolicy::Continue);
    }

    #[test]
    fn should_reject_unparseable_environment_variable() {
        let vars = env(&[("GPUCTL_TEMPERATURE", "hot")]);
        let mut config = Config::default();

        let err = config.apply_env(|k| vars.get(k).cloned()).unwrap_err();

        assert!(matches!(err, ConfigError::Env { ref key, .. } if key == "GPUCTL_TEMPERATURE"));
    }

    #[test]
    fn should_let_overrides_win_over_environment() {
        let vars = env(&[("GPUCTL_TEMPERATURE", "70")]);
        let mut config = Config::default();
        config.apply_env(|k| vars.get(k).cloned()).unwrap();

        config.apply_overrides(&Overrides {
            temperature: Some(72),
            ..Default::default()
        });

        assert_eq!(config.temperature, 72);
    }

    #[test_case(|c: &mut Config| c.interval = 0, "interval"; "zero interval")]
    #[test_case(|c: &mut Config| c.temperature = 50, "temperature"; "ceiling at auto threshold")]
    #[test_case(|c: &mut Config| c.fan_speed = 0, "fan_speed"; "zero fan ceiling")]
    #[test_case(|c: &mut Config| c.fan_speed = 101, "fan_speed"; "fan ceiling above 100")]
    #[test_case(|c: &mut Config| c.hysteresis = -1, "hysteresis"; "negative hysteresis")]
    #[test_case(|c: &mut Config| c.power_hysteresis = -1, "power_hysteresis"; "negative power hysteresis")]
    #[test_case(|c: &mut Config| c.restore_factor = 1.0, "restore_factor"; "symmetric restore")]
    #[test_case(|c: &mut Config| c.restore_factor = f64::NAN, "restore_factor"; "nan restore")]
    #[test_case(|c: &mut Config| c.power_hysteresis = 10, "power_hysteresis"; "dead-band swallows every cut")]
    #[test_case(|c: &mut Config| { c.power_hysteresis = 6; c.restore_factor = 1.1; }, "restore_factor"; "restore inside dead-band")]
    #[test_case(|c: &mut Config| c.device_timeout_ms = 2000, "device_timeout_ms"; "timeout equals interval")]
    #[test_case(|c: &mut Config| c.device_timeout_ms = 0, "device_timeout_ms"; "zero timeout")]
    #[test_case(|c: &mut Config| c.shutdown_timeout_secs = 0, "shutdown_timeout_secs"; "zero shutdown timeout")]
    fn should_reject_invalid_values(mutate: fn(&mut Config), expected: &str) {
        let mut config = Config::default();
        mutate(&mut config);

        match config.validate() {
            Err(ConfigError::Invalid { field, .. }) => assert_eq!(field, expected),
            other => panic!("expected invalid {expected}, got {other:?}"),
        }
    }
}
