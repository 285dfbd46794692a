//! # Unit Conversions
//!
//! Pure conversions between device-native units and standard physical units.
//!
//! The vehicle reports inertial data in its own units (gyroscope axes in
//! degrees/second, accelerometer axes in milli-g) while the bus-facing
//! telemetry events use radians/second and m/s². Outgoing values use the
//! inverse mappings. All conversions are linear and invertible.
//!
//! **Gravity**: 9.81 m/s² (the constant the vehicle firmware calibrates
//! against, not the ISO 9.80665).

/// Standard gravity used for accelerometer scaling, in m/s².
pub const STANDARD_GRAVITY: f64 = 9.81;

/// Maximum raw thrust value accepted by the device.
pub const THRUST_MAX: u16 = 60000;

/// Convert an angular rate from device units (degrees/second) to
/// radians/second.
///
/// # Examples
///
/// ```
/// use quad_bridge::units::gyro_deg_to_rad;
///
/// let rate = gyro_deg_to_rad(180.0);
/// assert!((rate - std::f64::consts::PI).abs() < 1e-9);
/// ```
pub fn gyro_deg_to_rad(deg_per_sec: f64) -> f64 {
    deg_per_sec.to_radians()
}

/// Convert an angular rate from radians/second back to device units
/// (degrees/second).
pub fn gyro_rad_to_deg(rad_per_sec: f64) -> f64 {
    rad_per_sec.to_degrees()
}

/// Convert a linear acceleration from device units (milli-g) to m/s².
///
/// # Examples
///
/// ```
/// use quad_bridge::units::accel_milli_g_to_si;
///
/// // 1000 milli-g is one standard gravity
/// assert!((accel_milli_g_to_si(1000.0) - 9.81).abs() < 1e-9);
/// ```
pub fn accel_milli_g_to_si(milli_g: f64) -> f64 {
    milli_g * STANDARD_GRAVITY / 1000.0
}

/// Convert a linear acceleration from m/s² back to device units (milli-g).
pub fn accel_si_to_milli_g(si: f64) -> f64 {
    si * 1000.0 / STANDARD_GRAVITY
}

/// Clamp a raw vertical-thrust command to the device's accepted range.
///
/// The fractional part is floored away before clamping to `[0, 60000]`, so
/// any negative input maps to 0 and any oversized input maps to
/// [`THRUST_MAX`].
///
/// # Examples
///
/// ```
/// use quad_bridge::units::clamp_thrust;
///
/// assert_eq!(clamp_thrust(100.9), 100);
/// assert_eq!(clamp_thrust(-5.0), 0);
/// assert_eq!(clamp_thrust(70_000.0), 60000);
/// ```
pub fn clamp_thrust(raw: f32) -> u16 {
    raw.floor().clamp(0.0, THRUST_MAX as f32) as u16
}
