//! # Telemetry Module
//!
//! Decodes raw device sample batches into typed telemetry events.
//!
//! This module handles:
//! - The two standard log blocks registered on every connection
//! - Unit conversion from device-native to SI units
//! - Publication of typed events through a [`TelemetrySink`]
//!
//! The publisher is stateless between samples: each batch is converted,
//! stamped, published, and forgotten.

use std::sync::Arc;
use std::time::Duration;

use tracing::warn;

use crate::bus::{ImuReading, ScalarReading, TelemetryEvent, TelemetrySink, VectorReading};
use crate::link::{LogBlockSpec, TelemetrySample};
use crate::units::{accel_milli_g_to_si, gyro_deg_to_rad};

/// Block identifier of the high-rate inertial stream.
pub const INERTIAL_BLOCK: &str = "imu";

/// Block identifier of the environmental/magnetic/battery stream.
pub const ENVIRONMENTAL_BLOCK: &str = "env";

/// The high-rate inertial block: accelerometer and gyro, all three axes.
pub fn inertial_block(period: Duration) -> LogBlockSpec {
    LogBlockSpec::new(INERTIAL_BLOCK, period)
        .with_variable("acc.x")
        .with_variable("acc.y")
        .with_variable("acc.z")
        .with_variable("gyro.x")
        .with_variable("gyro.y")
        .with_variable("gyro.z")
}

/// The slower environmental block: magnetometer, barometer, battery.
pub fn environmental_block(period: Duration) -> LogBlockSpec {
    LogBlockSpec::new(ENVIRONMENTAL_BLOCK, period)
        .with_variable("mag.x")
        .with_variable("mag.y")
        .with_variable("mag.z")
        .with_variable("baro.temp")
        .with_variable("baro.pressure")
        .with_variable("pm.vbat")
}

/// Converts decoded sample batches into typed events on a sink.
pub struct TelemetryPublisher {
    sink: Arc<dyn TelemetrySink>,
}

impl TelemetryPublisher {
    pub fn new(sink: Arc<dyn TelemetrySink>) -> Self {
        Self { sink }
    }

    /// Convert and publish one sample batch, routed on its block id.
    pub fn handle_sample(&self, sample: &TelemetrySample) {
        match sample.block.as_str() {
            INERTIAL_BLOCK => self.publish_inertial(sample),
            ENVIRONMENTAL_BLOCK => self.publish_environmental(sample),
            other => warn!("Dropping sample from unknown block '{other}'"),
        }
    }

    /// One inertial event per sample. Gyro axes arrive in degrees/second
    /// and accelerometer axes in milli-g; both go out in SI. The device
    /// does not estimate orientation, so that field stays `None`.
    fn publish_inertial(&self, sample: &TelemetrySample) {
        let (Some(gx), Some(gy), Some(gz)) = (
            field(sample, "gyro.x"),
            field(sample, "gyro.y"),
            field(sample, "gyro.z"),
        ) else {
            return;
        };
        let (Some(ax), Some(ay), Some(az)) = (
            field(sample, "acc.x"),
            field(sample, "acc.y"),
            field(sample, "acc.z"),
        ) else {
            return;
        };

        self.sink.publish(TelemetryEvent::Imu(ImuReading {
            stamp: sample.received_at,
            angular_velocity: [
                gyro_deg_to_rad(gx),
                gyro_deg_to_rad(gy),
                gyro_deg_to_rad(gz),
            ],
            linear_acceleration: [
                accel_milli_g_to_si(ax),
                accel_milli_g_to_si(ay),
                accel_milli_g_to_si(az),
            ],
            orientation: None,
        }));
    }

    /// Four independent events per environmental sample. Temperature (°C),
    /// magnetic field (Tesla), pressure (hPa) and battery voltage (V) are
    /// already in standard units on the device side. A field missing from
    /// the batch drops only the event that needed it.
    fn publish_environmental(&self, sample: &TelemetrySample) {
        let stamp = sample.received_at;

        if let Some(value) = field(sample, "baro.temp") {
            self.sink
                .publish(TelemetryEvent::Temperature(ScalarReading { stamp, value }));
        }
        if let (Some(x), Some(y), Some(z)) = (
            field(sample, "mag.x"),
            field(sample, "mag.y"),
            field(sample, "mag.z"),
        ) {
            self.sink.publish(TelemetryEvent::MagneticField(VectorReading {
                stamp,
                vector: [x, y, z],
            }));
        }
        if let Some(value) = field(sample, "baro.pressure") {
            self.sink
                .publish(TelemetryEvent::Pressure(ScalarReading { stamp, value }));
        }
        if let Some(value) = field(sample, "pm.vbat") {
            self.sink
                .publish(TelemetryEvent::Battery(ScalarReading { stamp, value }));
        }
    }
}

fn field(sample: &TelemetrySample, name: &str) -> Option<f64> {
    let value = sample.value(name);
    if value.is_none() {
        warn!(
            "Sample from block '{}' is missing field {name}",
            sample.block
        );
    }
    value.map(f64::from)
}
