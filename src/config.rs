//! Canary Configuration using Figment
//!
//! Configuration is layered, later sources overriding earlier ones:
//! 1. Built-in defaults (the canary rover's component names and expectations)
//! 2. A TOML file (`config/canary.toml` by default)
//! 3. Environment variables prefixed with `ROVER_CANARY_`, with `__` separating
//!    nested keys
//!
//! # Example
//! ```no_run
//! use rover_canary::config::CanaryConfig;
//!
//! let config = CanaryConfig::load_from("config/canary.toml")?;
//! config.validate()?;
//! println!("Odometry: {}", config.odometry);
//! # Ok::<(), rover_canary::error::CanaryError>(())
//! ```
//!
//! `ROVER_CANARY_RUN__TICK_INTERVAL_MS=50` overrides `run.tick_interval_ms`.

use crate::error::{AppResult, CanaryError};
use crate::logging::OutputFormat;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default configuration file location
pub const DEFAULT_CONFIG_PATH: &str = "config/canary.toml";

/// Environment variable prefix
pub const ENV_PREFIX: &str = "ROVER_CANARY_";

/// Top-level canary configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CanaryConfig {
    /// Movement sensor used for base telemetry
    pub odometry: String,
    /// Application settings
    pub application: ApplicationConfig,
    /// Timing of the test catalogue
    pub run: RunConfig,
    /// Bases under test, in execution order
    pub bases: Vec<BaseConfig>,
    /// Motors under test, in execution order
    pub motors: Vec<MotorConfig>,
    /// Power monitor expectations
    pub power_sensor: PowerSensorConfig,
    /// IMU expectations
    pub imu: ImuConfig,
    /// Grid path test
    pub grid: GridConfig,
    /// Trace file storage
    pub storage: StorageConfig,
    /// Result reporting
    pub report: ReportConfig,
}

/// Application-level configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApplicationConfig {
    /// Application name
    pub name: String,
    /// Logging level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Log output format (pretty, compact, json)
    pub log_format: OutputFormat,
}

/// Timing of the test catalogue
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    /// Sampler polling interval
    pub tick_interval_ms: u64,
    /// Pause between consecutive tests
    pub delay_between_tests_ms: u64,
    /// Settle time before sampling a held velocity or rpm
    pub ramp_up_ms: u64,
    /// Sampling window of a velocity/rpm hold (seconds)
    pub hold_window_secs: f64,
    /// Sampling window of the second leg of the consecutive velocity test (seconds)
    pub consecutive_second_window_secs: f64,
    /// Longest acceptable Spin call when speed is not checked (seconds)
    pub spin_time_ceiling_secs: f64,
    /// Wait after base SetPower before checking motion
    pub base_power_settle_ms: u64,
    /// Wait after motor SetPower before checking power
    pub motor_power_settle_ms: u64,
    /// Wait after ResetZeroPosition in the GoTo test
    pub goto_settle_ms: u64,
    /// Wait after an odometry reset
    pub odometry_reset_settle_ms: u64,
}

/// One base under test
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BaseConfig {
    /// Component name
    pub name: String,
    /// Slowest linear velocity this base holds reliably (mm/s)
    #[serde(default = "default_min_linear_velocity")]
    pub min_linear_velocity: f64,
    /// Slowest angular velocity this base holds reliably (deg/s)
    #[serde(default = "default_min_angular_velocity")]
    pub min_angular_velocity: f64,
}

/// One motor under test and its encoder
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MotorConfig {
    /// Motor component name
    pub name: String,
    /// Encoder component name
    pub encoder: String,
    /// Encoder ticks per motor revolution
    #[serde(default = "default_ticks_per_rotation")]
    pub ticks_per_rotation: f64,
}

/// Power monitor expectations
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PowerSensorConfig {
    /// Component name
    pub name: String,
    /// Expected bus voltage (V)
    pub voltage: f64,
    /// Allowed voltage deviation (V)
    pub voltage_tolerance: f64,
    /// Expected current (A)
    pub current: f64,
    /// Allowed current deviation (A)
    pub current_tolerance: f64,
    /// Expected power (W)
    pub power: f64,
    /// Allowed power deviation (W)
    pub power_tolerance: f64,
}

/// IMU expectations
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImuConfig {
    /// Component name
    pub name: String,
    /// Expected vertical acceleration at rest (m/s²)
    pub gravity: f64,
    /// Allowed deviation as a fraction of `gravity`
    pub tolerance_fraction: f64,
}

/// Grid path test
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GridConfig {
    /// Base driven along the grid
    pub base: String,
    /// Straight-leg speed (mm/s)
    pub speed_mm_per_sec: f64,
    /// Turn speed (deg/s)
    pub spin_deg_per_sec: f64,
    /// Long leg length (mm)
    pub long_leg_mm: f64,
    /// Short leg length (mm)
    pub short_leg_mm: f64,
    /// Largest acceptable RMS position error (mm)
    pub rms_threshold_mm: f64,
    /// Pause after each turn
    pub spin_pause_ms: u64,
}

/// Trace file storage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Root directory of the `<group>Des` / `<group>Data` trace directories
    pub output_dir: PathBuf,
}

/// Result reporting
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReportConfig {
    /// Chat webhook receiving the run summary
    pub webhook_url: Option<String>,
    /// Post the summary even when every test passed
    pub notify_on_success: bool,
    /// Webhook request timeout (seconds)
    pub timeout_secs: u64,
}

// Default value functions
fn default_min_linear_velocity() -> f64 {
    100.0
}

fn default_min_angular_velocity() -> f64 {
    30.0
}

fn default_ticks_per_rotation() -> f64 {
    1992.0
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            name: "Rover Canary".to_string(),
            log_level: "info".to_string(),
            log_format: OutputFormat::Compact,
        }
    }
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: 100,
            delay_between_tests_ms: 1000,
            ramp_up_ms: 5000,
            hold_window_secs: 5.0,
            consecutive_second_window_secs: 10.0,
            spin_time_ceiling_secs: 5.0,
            base_power_settle_ms: 1000,
            motor_power_settle_ms: 2000,
            goto_settle_ms: 500,
            odometry_reset_settle_ms: 100,
        }
    }
}

impl RunConfig {
    /// Sampler polling interval
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    /// Pause between consecutive tests
    pub fn delay_between_tests(&self) -> Duration {
        Duration::from_millis(self.delay_between_tests_ms)
    }

    /// Settle time before sampling a hold
    pub fn ramp_up(&self) -> Duration {
        Duration::from_millis(self.ramp_up_ms)
    }

    /// Longest acceptable unchecked-speed Spin call
    pub fn spin_time_ceiling(&self) -> Duration {
        Duration::try_from_secs_f64(self.spin_time_ceiling_secs).unwrap_or(Duration::ZERO)
    }

    /// Wait after base SetPower
    pub fn base_power_settle(&self) -> Duration {
        Duration::from_millis(self.base_power_settle_ms)
    }

    /// Wait after motor SetPower
    pub fn motor_power_settle(&self) -> Duration {
        Duration::from_millis(self.motor_power_settle_ms)
    }

    /// Wait after ResetZeroPosition in GoTo
    pub fn goto_settle(&self) -> Duration {
        Duration::from_millis(self.goto_settle_ms)
    }

    /// Wait after an odometry reset
    pub fn odometry_reset_settle(&self) -> Duration {
        Duration::from_millis(self.odometry_reset_settle_ms)
    }

    /// Timing with every settle and pause removed and a 100 ms tick
    pub fn immediate() -> Self {
        Self {
            delay_between_tests_ms: 0,
            ramp_up_ms: 0,
            base_power_settle_ms: 0,
            motor_power_settle_ms: 0,
            goto_settle_ms: 0,
            odometry_reset_settle_ms: 0,
            ..Self::default()
        }
    }
}

impl BaseConfig {
    /// Base with the default velocity thresholds
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            min_linear_velocity: default_min_linear_velocity(),
            min_angular_velocity: default_min_angular_velocity(),
        }
    }
}

impl MotorConfig {
    /// Motor with the default encoder resolution
    pub fn new(name: impl Into<String>, encoder: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            encoder: encoder.into(),
            ticks_per_rotation: default_ticks_per_rotation(),
        }
    }
}

impl Default for PowerSensorConfig {
    fn default() -> Self {
        Self {
            name: "ina219".to_string(),
            voltage: 15.2,
            voltage_tolerance: 1.5,
            current: 0.29,
            current_tolerance: 0.15,
            power: 4.4,
            power_tolerance: 1.5,
        }
    }
}

impl Default for ImuConfig {
    fn default() -> Self {
        Self {
            name: "imu".to_string(),
            gravity: 9.81,
            tolerance_fraction: 0.5,
        }
    }
}

impl Default for GridConfig {
    fn default() -> Self {
        Self {
            base: "sensor_base".to_string(),
            speed_mm_per_sec: 100.0,
            spin_deg_per_sec: 30.0,
            long_leg_mm: 1500.0,
            short_leg_mm: 500.0,
            rms_threshold_mm: 150.0,
            spin_pause_ms: 1000,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("traces"),
        }
    }
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            webhook_url: None,
            notify_on_success: false,
            timeout_secs: 30,
        }
    }
}

impl Default for CanaryConfig {
    fn default() -> Self {
        Self {
            odometry: "odometry".to_string(),
            application: ApplicationConfig::default(),
            run: RunConfig::default(),
            bases: vec![BaseConfig::new("viam_base"), BaseConfig::new("sensor_base")],
            motors: vec![
                MotorConfig::new("left", "left-enc"),
                MotorConfig::new("right", "right-enc"),
            ],
            power_sensor: PowerSensorConfig::default(),
            imu: ImuConfig::default(),
            grid: GridConfig::default(),
            storage: StorageConfig::default(),
            report: ReportConfig::default(),
        }
    }
}

impl CanaryConfig {
    /// Load from the default file, defaults and environment
    pub fn load() -> AppResult<Self> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Load configuration from a specific file path
    ///
    /// A missing file is not an error; defaults and environment still apply.
    pub fn load_from<P: AsRef<Path>>(path: P) -> AppResult<Self> {
        let config = Self::figment(path.as_ref()).extract()?;
        Ok(config)
    }

    /// Provider stack used by [`CanaryConfig::load_from`]
    pub fn figment(path: &Path) -> Figment {
        Figment::from(Serialized::defaults(CanaryConfig::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    /// Render the effective configuration as TOML
    pub fn to_toml(&self) -> AppResult<String> {
        toml::to_string_pretty(self).map_err(|e| CanaryError::Configuration(e.to_string()))
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> AppResult<()> {
        self.check().map_err(CanaryError::Configuration)
    }

    fn check(&self) -> Result<(), String> {
        // Validate log level
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.application.log_level.as_str()) {
            return Err(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.application.log_level,
                valid_levels.join(", ")
            ));
        }

        if self.run.tick_interval_ms == 0 {
            return Err("run.tick_interval_ms must be positive".to_string());
        }
        for (key, value) in [
            ("run.hold_window_secs", self.run.hold_window_secs),
            ("run.consecutive_second_window_secs", self.run.consecutive_second_window_secs),
            ("run.spin_time_ceiling_secs", self.run.spin_time_ceiling_secs),
        ] {
            if !(value.is_finite() && value > 0.0) {
                return Err(format!("{key} must be positive, got {value}"));
            }
        }

        if self.bases.is_empty() {
            return Err("At least one base must be configured".to_string());
        }
        for base in &self.bases {
            if !(base.min_linear_velocity > 0.0 && base.min_angular_velocity > 0.0) {
                return Err(format!(
                    "Base '{}' minimum velocities must be positive",
                    base.name
                ));
            }
        }
        for motor in &self.motors {
            if !(motor.ticks_per_rotation > 0.0) {
                return Err(format!(
                    "Motor '{}' ticks_per_rotation must be positive",
                    motor.name
                ));
            }
        }

        // Validate component names are unique
        let mut names = HashSet::new();
        let all_names = std::iter::once(self.odometry.as_str())
            .chain(self.bases.iter().map(|b| b.name.as_str()))
            .chain(self.motors.iter().map(|m| m.name.as_str()))
            .chain(self.motors.iter().map(|m| m.encoder.as_str()))
            .chain([self.power_sensor.name.as_str(), self.imu.name.as_str()]);
        for name in all_names {
            if name.trim().is_empty() {
                return Err("Component names must not be empty".to_string());
            }
            if !names.insert(name) {
                return Err(format!("Duplicate component name: {name}"));
            }
        }

        for (key, value) in [
            ("power_sensor.voltage_tolerance", self.power_sensor.voltage_tolerance),
            ("power_sensor.current_tolerance", self.power_sensor.current_tolerance),
            ("power_sensor.power_tolerance", self.power_sensor.power_tolerance),
            ("imu.tolerance_fraction", self.imu.tolerance_fraction),
        ] {
            if !(value > 0.0) {
                return Err(format!("{key} must be strictly positive, got {value}"));
            }
        }

        if !self.bases.iter().any(|b| b.name == self.grid.base) {
            return Err(format!(
                "Grid base '{}' is not a configured base",
                self.grid.base
            ));
        }
        for (key, value) in [
            ("grid.speed_mm_per_sec", self.grid.speed_mm_per_sec),
            ("grid.spin_deg_per_sec", self.grid.spin_deg_per_sec),
            ("grid.long_leg_mm", self.grid.long_leg_mm),
            ("grid.short_leg_mm", self.grid.short_leg_mm),
            ("grid.rms_threshold_mm", self.grid.rms_threshold_mm),
        ] {
            if !(value > 0.0) {
                return Err(format!("{key} must be positive, got {value}"));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config_is_valid() {
        let config = CanaryConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.bases.len(), 2);
        assert_eq!(config.motors[1].encoder, "right-enc");
        assert_eq!(config.run.tick_interval(), Duration::from_millis(100));
    }

    #[test]
    fn test_invalid_log_level() {
        let mut config = CanaryConfig::default();
        config.application.log_level = "invalid".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_duplicate_component_names() {
        let mut config = CanaryConfig::default();
        config.motors[1].encoder = "left-enc".to_string();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("left-enc"));
    }

    #[test]
    fn test_grid_base_must_exist() {
        let mut config = CanaryConfig::default();
        config.grid.base = "missing".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_non_positive_values() {
        let mut config = CanaryConfig::default();
        config.run.tick_interval_ms = 0;
        assert!(config.validate().is_err());

        let mut config = CanaryConfig::default();
        config.grid.rms_threshold_mm = 0.0;
        assert!(config.validate().is_err());

        let mut config = CanaryConfig::default();
        config.bases.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_from_toml_overrides_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
odometry = "wheel-odometry"

[run]
tick_interval_ms = 50

[[bases]]
name = "rover"
min_linear_velocity = 80.0

[grid]
base = "rover"
"#
        )
        .unwrap();

        let config = CanaryConfig::load_from(file.path()).unwrap();
        assert_eq!(config.odometry, "wheel-odometry");
        assert_eq!(config.run.tick_interval_ms, 50);
        assert_eq!(config.run.ramp_up_ms, 5000);
        assert_eq!(config.bases.len(), 1);
        assert_eq!(config.bases[0].min_angular_velocity, 30.0);
        assert_eq!(config.motors.len(), 2);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = CanaryConfig::load_from(dir.path().join("absent.toml")).unwrap();
        assert_eq!(config.grid, GridConfig::default());
    }

    #[test]
    fn test_round_trip_through_toml() {
        let config = CanaryConfig::default();
        let rendered = config.to_toml().unwrap();
        assert!(rendered.contains("[grid]"));
        let parsed: CanaryConfig = toml::from_str(&rendered).unwrap();
        assert_eq!(parsed, config);
    }
}
