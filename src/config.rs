//! # Configuration Module
//!
//! Handles loading and validating configuration from TOML files.

use serde::de::Error;
use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::error::Result;
use crate::session::SessionSettings;

/// Main configuration structure
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub driver: DriverConfig,
    pub watchdog: WatchdogConfig,
    pub telemetry: TelemetryConfig,
    pub link: LinkConfig,
    pub logging: LoggingConfig,
    #[serde(default)]
    pub vehicles: Vec<VehicleConfig>,
}

/// Radio driver configuration
#[derive(Debug, Deserialize, Clone)]
pub struct DriverConfig {
    /// Radio interface the drivers bind to. Required: without it no
    /// session can be created.
    pub interface: String,
}

/// Setpoint watchdog configuration
#[derive(Debug, Deserialize, Clone)]
pub struct WatchdogConfig {
    #[serde(default = "default_send_period_ms")]
    pub send_period_ms: u64,

    #[serde(default = "default_connecting_poll_ms")]
    pub connecting_poll_ms: u64,

    #[serde(default = "default_shutdown_setpoint_count")]
    pub shutdown_setpoint_count: u32,

    #[serde(default = "default_shutdown_setpoint_interval_ms")]
    pub shutdown_setpoint_interval_ms: u64,

    #[serde(default = "default_settle_ms")]
    pub settle_ms: u64,
}

/// Telemetry block configuration
#[derive(Debug, Deserialize, Clone)]
pub struct TelemetryConfig {
    #[serde(default = "default_imu_period_ms")]
    pub imu_period_ms: u64,

    #[serde(default = "default_env_period_ms")]
    pub env_period_ms: u64,
}

/// Link monitoring configuration
#[derive(Debug, Deserialize, Clone)]
pub struct LinkConfig {
    #[serde(default = "default_quality_warn_threshold")]
    pub quality_warn_threshold: f32,
}

/// Log output configuration
#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    /// Directory for rotating log files. Console-only when unset.
    #[serde(default)]
    pub dir: Option<String>,

    #[serde(default = "default_log_file_prefix")]
    pub file_prefix: String,
}

/// One bridged vehicle
#[derive(Debug, Deserialize, Clone)]
pub struct VehicleConfig {
    /// Radio link address, e.g. `radio://0/80/2M`.
    pub uri: String,

    /// Name prefix for this vehicle's topics and parameter paths.
    pub prefix: String,

    #[serde(default)]
    pub roll_trim: f32,

    #[serde(default)]
    pub pitch_trim: f32,

    #[serde(default = "default_enable_logging")]
    pub enable_logging: bool,
}

// Default value functions
fn default_send_period_ms() -> u64 { 200 }
fn default_connecting_poll_ms() -> u64 { 500 }
fn default_shutdown_setpoint_count() -> u32 { 100 }
fn default_shutdown_setpoint_interval_ms() -> u64 { 10 }
fn default_settle_ms() -> u64 { 100 }

fn default_imu_period_ms() -> u64 { 10 }
fn default_env_period_ms() -> u64 { 100 }

fn default_quality_warn_threshold() -> f32 { 80.0 }

fn default_log_file_prefix() -> String { "quad-bridge".to_string() }

fn default_enable_logging() -> bool { true }

impl Config {
    /// Load configuration from a TOML file
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the configuration file
    ///
    /// # Returns
    ///
    /// * `Result<Config>` - Loaded and validated configuration
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - File cannot be read
    /// - TOML parsing fails
    /// - Validation fails
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use quad_bridge::config::Config;
    ///
    /// let config = Config::load("config/default.toml")?;
    /// # Ok::<(), Box<dyn std::error::Error>>(())
    /// ```
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Session timing knobs in the form the sessions consume.
    pub fn session_settings(&self) -> SessionSettings {
        SessionSettings {
            send_period: Duration::from_millis(self.watchdog.send_period_ms),
            connecting_poll: Duration::from_millis(self.watchdog.connecting_poll_ms),
            shutdown_setpoint_count: self.watchdog.shutdown_setpoint_count,
            shutdown_setpoint_interval: Duration::from_millis(
                self.watchdog.shutdown_setpoint_interval_ms,
            ),
            settle: Duration::from_millis(self.watchdog.settle_ms),
            inertial_period: Duration::from_millis(self.telemetry.imu_period_ms),
            environmental_period: Duration::from_millis(self.telemetry.env_period_ms),
            quality_warn_threshold: self.link.quality_warn_threshold,
        }
    }

    /// Validate configuration values
    ///
    /// # Returns
    ///
    /// * `Result<()>` - Ok if valid, Err if invalid
    ///
    /// # Errors
    ///
    /// Returns error if any configuration value is out of valid range
    fn validate(&self) -> Result<()> {
        if self.driver.interface.trim().is_empty() {
            return Err(crate::error::BridgeError::Config(
                toml::de::Error::custom("driver interface cannot be empty"),
            ));
        }

        // The device cuts its motors ~500 ms after the last command, so the
        // send period must leave a wide margin under that.
        if self.watchdog.send_period_ms == 0 || self.watchdog.send_period_ms > 200 {
            return Err(crate::error::BridgeError::Config(
                toml::de::Error::custom("send_period_ms must be between 1 and 200"),
            ));
        }

        if self.watchdog.connecting_poll_ms == 0 || self.watchdog.connecting_poll_ms > 60000 {
            return Err(crate::error::BridgeError::Config(
                toml::de::Error::custom("connecting_poll_ms must be between 1 and 60000"),
            ));
        }

        if self.watchdog.shutdown_setpoint_count == 0 {
            return Err(crate::error::BridgeError::Config(
                toml::de::Error::custom("shutdown_setpoint_count must be greater than 0"),
            ));
        }

        if self.watchdog.shutdown_setpoint_interval_ms == 0
            || self.watchdog.shutdown_setpoint_interval_ms > 1000
        {
            return Err(crate::error::BridgeError::Config(
                toml::de::Error::custom("shutdown_setpoint_interval_ms must be between 1 and 1000"),
            ));
        }

        if self.watchdog.settle_ms > 10000 {
            return Err(crate::error::BridgeError::Config(
                toml::de::Error::custom("settle_ms must be at most 10000"),
            ));
        }

        if self.telemetry.imu_period_ms == 0 || self.telemetry.imu_period_ms > 1000 {
            return Err(crate::error::BridgeError::Config(
                toml::de::Error::custom("imu_period_ms must be between 1 and 1000"),
            ));
        }

        if self.telemetry.env_period_ms == 0 || self.telemetry.env_period_ms > 10000 {
            return Err(crate::error::BridgeError::Config(
                toml::de::Error::custom("env_period_ms must be between 1 and 10000"),
            ));
        }

        if self.link.quality_warn_threshold < 0.0 || self.link.quality_warn_threshold > 100.0 {
            return Err(crate::error::BridgeError::Config(
                toml::de::Error::custom("quality_warn_threshold must be between 0 and 100"),
            ));
        }

        if let Some(dir) = &self.logging.dir {
            if dir.trim().is_empty() {
                return Err(crate::error::BridgeError::Config(
                    toml::de::Error::custom("logging dir cannot be empty when set"),
                ));
            }
        }

        for vehicle in &self.vehicles {
            if vehicle.uri.trim().is_empty() {
                return Err(crate::error::BridgeError::Config(
                    toml::de::Error::custom("vehicle uri cannot be empty"),
                ));
            }
            if vehicle.prefix.trim().is_empty() {
                return Err(crate::error::BridgeError::Config(
                    toml::de::Error::custom("vehicle prefix cannot be empty"),
                ));
            }
            // Prefixes become path segments; the parameter path and device
            // name delimiters cannot appear in them.
            if vehicle.prefix.contains('/') || vehicle.prefix.contains('.') {
                return Err(crate::error::BridgeError::Config(toml::de::Error::custom(
                    format!("vehicle prefix '{}' must not contain '/' or '.'", vehicle.prefix),
                )));
            }
        }

        for (i, vehicle) in self.vehicles.iter().enumerate() {
            if self.vehicles[..i].iter().any(|v| v.prefix == vehicle.prefix) {
                return Err(crate::error::BridgeError::Config(toml::de::Error::custom(
                    format!("duplicate vehicle prefix '{}'", vehicle.prefix),
                )));
            }
            if self.vehicles[..i].iter().any(|v| v.uri == vehicle.uri) {
                return Err(crate::error::BridgeError::Config(toml::de::Error::custom(
                    format!("duplicate vehicle uri '{}'", vehicle.uri),
                )));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config() -> Config {
        Config {
            driver: DriverConfig {
                interface: "radio0".to_string(),
            },
            watchdog: WatchdogConfig {
                send_period_ms: default_send_period_ms(),
                connecting_poll_ms: default_connecting_poll_ms(),
                shutdown_setpoint_count: default_shutdown_setpoint_count(),
                shutdown_setpoint_interval_ms: default_shutdown_setpoint_interval_ms(),
                settle_ms: default_settle_ms(),
            },
            telemetry: TelemetryConfig {
                imu_period_ms: default_imu_period_ms(),
                env_period_ms: default_env_period_ms(),
            },
            link: LinkConfig {
                quality_warn_threshold: default_quality_warn_threshold(),
            },
            logging: LoggingConfig {
                dir: None,
                file_prefix: default_log_file_prefix(),
            },
            vehicles: vec![VehicleConfig {
                uri: "radio://0/80/2M".to_string(),
                prefix: "cf1".to_string(),
                roll_trim: 0.0,
                pitch_trim: 0.0,
                enable_logging: true,
            }],
        }
    }

    #[test]
    fn test_default_config_is_valid() {
        assert!(base_config().validate().is_ok());
    }

    #[test]
    fn test_session_settings_conversion() {
        let settings = base_config().session_settings();
        assert_eq!(settings.send_period, Duration::from_millis(200));
        assert_eq!(settings.connecting_poll, Duration::from_millis(500));
        assert_eq!(settings.shutdown_setpoint_count, 100);
        assert_eq!(settings.inertial_period, Duration::from_millis(10));
    }

    #[test]
    fn test_send_period_must_stay_under_failsafe() {
        let mut config = base_config();
        config.watchdog.send_period_ms = 250; // Invalid: > 200
        assert!(config.validate().is_err());

        config.watchdog.send_period_ms = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_empty_interface_is_rejected() {
        let mut config = base_config();
        config.driver.interface = "  ".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_prefix_delimiters_are_rejected() {
        let mut config = base_config();
        config.vehicles[0].prefix = "cf/1".to_string();
        assert!(config.validate().is_err());

        config.vehicles[0].prefix = "cf.1".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_duplicate_prefixes_are_rejected() {
        let mut config = base_config();
        let mut second = config.vehicles[0].clone();
        second.uri = "radio://0/90/2M".to_string();
        config.vehicles.push(second);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_shutdown_count_is_rejected() {
        let mut config = base_config();
        config.watchdog.shutdown_setpoint_count = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_config_from_file() {
        use std::io::Write;
        use tempfile::NamedTempFile;

        let toml_content = r#"
[driver]
interface = "radio0"

[watchdog]
send_period_ms = 100

[telemetry]
env_period_ms = 200

[link]

[logging]

[[vehicles]]
uri = "radio://0/80/2M"
prefix = "cf1"
roll_trim = 1.5
pitch_trim = -0.5
enable_logging = false

[[vehicles]]
uri = "radio://0/90/2M"
prefix = "cf2"
"#;

        let mut file = NamedTempFile::new().expect("failed to create temp file");
        file.write_all(toml_content.as_bytes())
            .expect("failed to write config");

        let config = Config::load(file.path()).expect("failed to load config");
        assert_eq!(config.driver.interface, "radio0");
        assert_eq!(config.watchdog.send_period_ms, 100);
        assert_eq!(config.watchdog.connecting_poll_ms, 500);
        assert_eq!(config.telemetry.env_period_ms, 200);
        assert_eq!(config.vehicles.len(), 2);
        assert_eq!(config.vehicles[0].roll_trim, 1.5);
        assert!(!config.vehicles[0].enable_logging);
        // Per-vehicle defaults fill the second entry.
        assert_eq!(config.vehicles[1].pitch_trim, 0.0);
        assert!(config.vehicles[1].enable_logging);
    }

    #[test]
    fn test_missing_driver_section_fails() {
        use std::io::Write;
        use tempfile::NamedTempFile;

        let toml_content = r#"
[watchdog]

[telemetry]

[link]

[logging]
"#;

        let mut file = NamedTempFile::new().expect("failed to create temp file");
        file.write_all(toml_content.as_bytes())
            .expect("failed to write config");

        assert!(Config::load(file.path()).is_err());
    }
}
