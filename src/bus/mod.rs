//! # Bus Module
//!
//! The control-plane surface of the bridge.
//!
//! This module handles:
//! - Inbound velocity commands and live publisher tracking ([`CommandTopic`])
//! - Outbound telemetry publication ([`TelemetrySink`], [`BroadcastSink`])
//! - The shared parameter service ([`ParamStore`], [`MemoryParamStore`])
//!
//! Everything here is transport-neutral: the concrete message-bus binding
//! attaches publishers, subscribes to the broadcast sink, and reads or
//! seeds the parameter store without the sessions knowing about it.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::params::ParamValue;

/// A velocity command received from the control plane.
///
/// Components are expressed in the command frame and mapped onto the
/// vehicle by [`crate::link::Setpoint::from_command`]: lateral to roll,
/// longitudinal to pitch, angular to yaw rate, vertical to raw thrust.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct VelocityCommand {
    /// Sideways component, degrees of roll.
    pub lateral: f32,
    /// Forward component, degrees of pitch.
    pub longitudinal: f32,
    /// Rotation component, degrees/second of yaw rate.
    pub angular: f32,
    /// Vertical component, raw thrust units.
    pub vertical: f32,
}

/// Where velocity commands come from, as seen by a session.
///
/// The only property a session ever asks for is whether anyone is
/// currently commanding the vehicle: with zero publishers attached the
/// watchdog streams zero setpoints instead of the last command.
#[cfg_attr(test, mockall::automock)]
pub trait CommandSource: Send + Sync {
    /// Number of currently attached command publishers.
    fn publisher_count(&self) -> usize;
}

/// Command intake endpoint with live publisher tracking.
///
/// Publisher attachment is RAII: [`CommandTopic::attach_publisher`] bumps
/// the count and the returned guard releases it on drop, so a crashed or
/// disconnected publisher can never be counted forever.
#[derive(Debug, Default)]
pub struct CommandTopic {
    publishers: Arc<AtomicUsize>,
}

impl CommandTopic {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a command publisher. The count stays up until the returned
    /// guard is dropped.
    pub fn attach_publisher(&self) -> PublisherGuard {
        self.publishers.fetch_add(1, Ordering::SeqCst);
        PublisherGuard {
            publishers: Arc::clone(&self.publishers),
        }
    }
}

impl CommandSource for CommandTopic {
    fn publisher_count(&self) -> usize {
        self.publishers.load(Ordering::SeqCst)
    }
}

/// Live-publisher witness handed out by [`CommandTopic::attach_publisher`].
#[derive(Debug)]
pub struct PublisherGuard {
    publishers: Arc<AtomicUsize>,
}

impl Drop for PublisherGuard {
    fn drop(&mut self) {
        self.publishers.fetch_sub(1, Ordering::SeqCst);
    }
}

/// An inertial measurement in SI units.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ImuReading {
    pub stamp: DateTime<Utc>,
    /// Body-frame rotation rates (x, y, z), rad/s.
    pub angular_velocity: [f64; 3],
    /// Body-frame accelerations (x, y, z), m/s^2.
    pub linear_acceleration: [f64; 3],
    /// Attitude quaternion (x, y, z, w). `None` when the device does not
    /// estimate one, so consumers cannot mistake it for identity attitude.
    pub orientation: Option<[f64; 4]>,
}

/// A single timestamped scalar measurement.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScalarReading {
    pub stamp: DateTime<Utc>,
    pub value: f64,
}

/// A single timestamped vector measurement.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VectorReading {
    pub stamp: DateTime<Utc>,
    pub vector: [f64; 3],
}

/// Telemetry published to the control plane, one variant per stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TelemetryEvent {
    /// Combined accelerometer and gyro reading.
    Imu(ImuReading),
    /// Barometer temperature, degrees Celsius.
    Temperature(ScalarReading),
    /// Magnetometer field vector, Tesla.
    MagneticField(VectorReading),
    /// Barometric pressure, hectopascal.
    Pressure(ScalarReading),
    /// Battery voltage, volts.
    Battery(ScalarReading),
}

impl TelemetryEvent {
    /// Stream name for logging and routing.
    pub fn stream(&self) -> &'static str {
        match self {
            TelemetryEvent::Imu(_) => "imu",
            TelemetryEvent::Temperature(_) => "temperature",
            TelemetryEvent::MagneticField(_) => "magnetic_field",
            TelemetryEvent::Pressure(_) => "pressure",
            TelemetryEvent::Battery(_) => "battery",
        }
    }
}

/// Outbound telemetry endpoint.
///
/// Publication is fire-and-forget: when no consumer is attached the event
/// is dropped, never queued and never reported as an error.
pub trait TelemetrySink: Send + Sync {
    fn publish(&self, event: TelemetryEvent);
}

/// Fan-out [`TelemetrySink`] over a tokio broadcast channel.
///
/// Slow subscribers lag and lose the oldest events rather than stall the
/// publishing session.
pub struct BroadcastSink {
    tx: broadcast::Sender<TelemetryEvent>,
}

impl BroadcastSink {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Attach a telemetry consumer.
    pub fn subscribe(&self) -> broadcast::Receiver<TelemetryEvent> {
        self.tx.subscribe()
    }
}

impl TelemetrySink for BroadcastSink {
    fn publish(&self, event: TelemetryEvent) {
        // A send error only means nobody is subscribed right now.
        let _ = self.tx.send(event);
    }
}

/// Shared parameter service keyed by slash-separated path
/// (`<prefix>/<group>/<name>`).
pub trait ParamStore: Send + Sync {
    fn get(&self, path: &str) -> Option<ParamValue>;
    fn set(&self, path: &str, value: ParamValue);
    fn contains(&self, path: &str) -> bool;
}

/// In-memory [`ParamStore`].
///
/// Paths set before a session connects act as operator overrides: the
/// initial parameter sweep pushes them down to the device instead of
/// pulling the device's values up.
#[derive(Debug, Default)]
pub struct MemoryParamStore {
    entries: Mutex<HashMap<String, ParamValue>>,
}

impl MemoryParamStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ParamStore for MemoryParamStore {
    fn get(&self, path: &str) -> Option<ParamValue> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(path)
            .cloned()
    }

    fn set(&self, path: &str, value: ParamValue) {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(path.to_string(), value);
    }

    fn contains(&self, path: &str) -> bool {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(path)
    }
}
