//! # Radio Link Module
//!
//! The seam between a vehicle session and the radio-link driver.
//!
//! This module handles:
//! - The [`RadioLink`] trait the concrete driver implements
//! - Link lifecycle and data events ([`LinkEvent`]) delivered over a channel
//! - Wire-facing data types (setpoints, log block specs, parameter ids)
//! - Process-wide driver initialization and teardown
//!
//! The driver itself (radio dongle I/O, device protocol framing) lives
//! outside this crate. [`sim::SimLink`] provides an in-process simulated
//! device for development and integration tests.

pub mod sim;

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::bus::VelocityCommand;
use crate::config::DriverConfig;
use crate::error::{BridgeError, Result};
use crate::params::ParamValue;
use crate::units::clamp_thrust;

/// Sending half of a session's link event channel, held by the driver.
pub type LinkEventSender = mpsc::UnboundedSender<LinkEvent>;

/// Receiving half of a session's link event channel, consumed by the session.
pub type LinkEventReceiver = mpsc::UnboundedReceiver<LinkEvent>;

/// Create the event channel connecting a driver to a session.
pub fn event_channel() -> (LinkEventSender, LinkEventReceiver) {
    mpsc::unbounded_channel()
}

/// The (roll, pitch, yaw-rate, thrust) command applied to the vehicle.
///
/// Roll and pitch are absolute angles in degrees, yaw rate is in
/// degrees/second, thrust is the raw device value in `[0, 60000]`.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Setpoint {
    pub roll: f32,
    pub pitch: f32,
    pub yaw_rate: f32,
    pub thrust: u16,
}

impl Setpoint {
    /// The safe default: level attitude, zero rotation, motors idle.
    pub fn zero() -> Self {
        Self::default()
    }

    /// Build a setpoint from an external velocity command, applying the
    /// session's trim biases and clamping the thrust to the device range.
    ///
    /// # Examples
    ///
    /// ```
    /// use quad_bridge::bus::VelocityCommand;
    /// use quad_bridge::link::Setpoint;
    ///
    /// let command = VelocityCommand {
    ///     lateral: 2.0,
    ///     longitudinal: 3.0,
    ///     angular: 0.1,
    ///     vertical: 100.0,
    /// };
    /// let setpoint = Setpoint::from_command(&command, 1.0, -0.5);
    /// assert_eq!(setpoint.roll, 3.0);
    /// assert_eq!(setpoint.pitch, 2.5);
    /// assert_eq!(setpoint.thrust, 100);
    /// ```
    pub fn from_command(command: &VelocityCommand, roll_trim: f32, pitch_trim: f32) -> Self {
        Self {
            roll: command.lateral + roll_trim,
            pitch: command.longitudinal + pitch_trim,
            yaw_rate: command.angular,
            thrust: clamp_thrust(command.vertical),
        }
    }
}

/// A telemetry log block to register with the device.
///
/// The device validates every variable name against its capability table
/// (TOC) before streaming begins.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogBlockSpec {
    /// Block identifier, echoed back on every sample.
    pub name: String,
    /// Streaming period requested from the device.
    pub period: Duration,
    /// Device variable names (`group.name`) included in the block.
    pub variables: Vec<String>,
}

impl LogBlockSpec {
    pub fn new(name: impl Into<String>, period: Duration) -> Self {
        Self {
            name: name.into(),
            period,
            variables: Vec::new(),
        }
    }

    /// Add a device variable to the block.
    pub fn with_variable(mut self, name: impl Into<String>) -> Self {
        self.variables.push(name.into());
        self
    }
}

/// A (group, name) parameter identifier from the device catalog.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ParamId {
    pub group: String,
    pub name: String,
}

impl ParamId {
    pub fn new(group: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            group: group.into(),
            name: name.into(),
        }
    }

    /// The dot-separated identifier used on the device side.
    pub fn device_name(&self) -> String {
        format!("{}.{}", self.group, self.name)
    }
}

/// One decoded measurement batch from a started log block.
///
/// Values are keyed by device variable name (`acc.x`, `baro.temp`, ...) and
/// tagged with the block identifier and the arrival time. Samples are
/// transient: the telemetry publisher consumes them immediately.
#[derive(Debug, Clone)]
pub struct TelemetrySample {
    pub block: String,
    pub received_at: DateTime<Utc>,
    pub values: HashMap<String, f32>,
}

impl TelemetrySample {
    pub fn new(block: impl Into<String>) -> Self {
        Self {
            block: block.into(),
            received_at: Utc::now(),
            values: HashMap::new(),
        }
    }

    /// Add a named value to the batch.
    pub fn with_value(mut self, name: impl Into<String>, value: f32) -> Self {
        self.values.insert(name.into(), value);
        self
    }

    /// Look up a named value.
    pub fn value(&self, name: &str) -> Option<f32> {
        self.values.get(name).copied()
    }
}

/// Events delivered from the link driver to the owning session.
///
/// The driver never touches session state directly; everything it observes
/// arrives here and is consumed inside the session's own task.
#[derive(Debug, Clone)]
pub enum LinkEvent {
    /// Link established and the device capability tables downloaded.
    Connected { uri: String },
    /// Initial connection attempt failed (no device at the address).
    ConnectionFailed { uri: String, reason: String },
    /// Connection dropped after being established (device out of range).
    ConnectionLost { uri: String, reason: String },
    /// Link closed; fires in all disconnect paths.
    Disconnected { uri: String },
    /// Radio link quality estimate, percent 0-100.
    LinkQuality { percent: f32 },
    /// Decoded sample batch from a started log block.
    LogData(TelemetrySample),
    /// The device reported an error on a started log block.
    LogError { block: String, reason: String },
    /// Device-originated parameter change, full `group.name` identifier.
    ParamUpdated { name: String, value: ParamValue },
}

/// Radio link driver interface.
///
/// Implementations must be internally synchronized: the session task and
/// external service calls may invoke methods concurrently through a shared
/// handle. All methods are expected to return promptly or fail; none may
/// block indefinitely. `connect` only *issues* the open request; the outcome
/// arrives later as [`LinkEvent::Connected`] or
/// [`LinkEvent::ConnectionFailed`] on the session's event channel.
#[async_trait]
pub trait RadioLink: Send + Sync {
    /// Issue a link-open request to the given address.
    async fn connect(&self, uri: &str) -> Result<()>;

    /// Close the link.
    async fn disconnect(&self) -> Result<()>;

    /// Send one setpoint frame to the vehicle.
    async fn send_setpoint(&self, setpoint: Setpoint) -> Result<()>;

    /// Validate a log block against the device capability table and start
    /// streaming it. Returns [`BridgeError::LogBlock`] if any variable is
    /// not in the table.
    async fn start_log_block(&self, spec: &LogBlockSpec) -> Result<()>;

    /// Fetch the device's settable-parameter catalog.
    async fn param_toc(&self) -> Result<Vec<ParamId>>;

    /// Pull the current value of the parameter `group.name` from the device.
    async fn request_param(&self, name: &str) -> Result<ParamValue>;

    /// Push a value to the device parameter `group.name`.
    async fn set_param(&self, name: &str, value: &ParamValue) -> Result<()>;

    /// Enable device-originated change notifications for a parameter group.
    async fn watch_param_group(&self, group: &str) -> Result<()>;
}

/// Live initialization count for the process-wide radio drivers.
static DRIVER_REFS: AtomicUsize = AtomicUsize::new(0);

/// Witness that the radio drivers are initialized.
///
/// [`crate::session::Session::spawn`] takes a reference to this guard, so a
/// session cannot exist without driver initialization having run first.
/// Dropping the last guard tears the drivers down.
#[derive(Debug)]
pub struct DriverGuard {
    _private: (),
}

/// Initialize the process-wide radio drivers.
///
/// Must run before any session is created. A missing or empty driver
/// interface in the configuration is a fatal startup condition.
///
/// # Errors
///
/// Returns [`BridgeError::Driver`] if the configured interface is empty.
pub fn init_drivers(config: &DriverConfig) -> Result<DriverGuard> {
    if config.interface.trim().is_empty() {
        return Err(BridgeError::Driver(
            "radio driver interface is not configured".to_string(),
        ));
    }

    if DRIVER_REFS.fetch_add(1, Ordering::SeqCst) == 0 {
        info!("Radio drivers initialized (interface: {})", config.interface);
    }
    Ok(DriverGuard { _private: () })
}

impl Drop for DriverGuard {
    fn drop(&mut self) {
        if DRIVER_REFS.fetch_sub(1, Ordering::SeqCst) == 1 {
            debug!("Radio drivers shut down");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn driver_config(interface: &str) -> DriverConfig {
        DriverConfig {
            interface: interface.to_string(),
        }
    }

    #[test]
    fn test_setpoint_zero_is_safe_default() {
        let zero = Setpoint::zero();
        assert_eq!(zero.roll, 0.0);
        assert_eq!(zero.pitch, 0.0);
        assert_eq!(zero.yaw_rate, 0.0);
        assert_eq!(zero.thrust, 0);
    }

    #[test]
    fn test_setpoint_applies_trim() {
        let command = VelocityCommand {
            lateral: 2.0,
            longitudinal: 3.0,
            angular: 0.1,
            vertical: 100.0,
        };
        let setpoint = Setpoint::from_command(&command, 1.0, -0.5);

        assert_eq!(setpoint.roll, 3.0);
        assert_eq!(setpoint.pitch, 2.5);
        assert_eq!(setpoint.yaw_rate, 0.1);
        assert_eq!(setpoint.thrust, 100);
    }

    #[test]
    fn test_setpoint_clamps_thrust() {
        let mut command = VelocityCommand {
            lateral: 0.0,
            longitudinal: 0.0,
            angular: 0.0,
            vertical: 70_000.0,
        };
        assert_eq!(Setpoint::from_command(&command, 0.0, 0.0).thrust, 60000);

        command.vertical = -10.0;
        assert_eq!(Setpoint::from_command(&command, 0.0, 0.0).thrust, 0);
    }

    #[test]
    fn test_log_block_builder() {
        let spec = LogBlockSpec::new("imu", Duration::from_millis(10))
            .with_variable("acc.x")
            .with_variable("gyro.x");

        assert_eq!(spec.name, "imu");
        assert_eq!(spec.period, Duration::from_millis(10));
        assert_eq!(spec.variables, vec!["acc.x", "gyro.x"]);
    }

    #[test]
    fn test_param_id_device_name() {
        let id = ParamId::new("flightmode", "posSet");
        assert_eq!(id.device_name(), "flightmode.posSet");
    }

    #[test]
    fn test_sample_value_lookup() {
        let sample = TelemetrySample::new("imu").with_value("acc.x", 12.5);
        assert_eq!(sample.value("acc.x"), Some(12.5));
        assert_eq!(sample.value("acc.y"), None);
    }

    #[test]
    fn test_init_drivers_rejects_empty_interface() {
        let err = init_drivers(&driver_config("  ")).unwrap_err();
        assert!(matches!(err, BridgeError::Driver(_)));
    }

    #[test]
    fn test_init_drivers_guard_lifecycle() {
        let guard = init_drivers(&driver_config("radio0")).expect("init failed");
        // Re-entrant while a guard is alive (tests run in parallel)
        let second = init_drivers(&driver_config("radio0")).expect("second init failed");
        drop(second);
        drop(guard);
    }
}
