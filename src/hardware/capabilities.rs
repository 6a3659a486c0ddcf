//! Rover Component Capabilities
//!
//! This module defines the capability traits the canary harness consumes from a
//! rover. Each trait mirrors one component API exposed by the robot-control
//! client:
//!
//! - A drivetrain implements: `Base`
//! - A single wheel actuator implements: `Motor`
//! - A quadrature encoder implements: `Encoder`
//! - Odometry or an IMU implements: `MovementSensor`
//! - A current/voltage monitor implements: `PowerSensor`
//!
//! The harness never mutates a sensor, so every method takes `&self` and the
//! same handle can be shared between the foreground runner and a background
//! sampler task.
//!
//! # Design Philosophy
//!
//! Each capability trait:
//! - Is async (uses #[async_trait])
//! - Is thread-safe (requires Send + Sync)
//! - Uses anyhow::Result for errors
//! - Blocks until the component reports the command complete
//!
//! # Cancellation
//!
//! A telemetry read that was abandoned because its caller stopped waiting
//! fails with [`Cancelled`]. Use [`is_cancelled`] to tell it apart from a real
//! telemetry failure.
//!
//! # Example
//!
//! ```rust,ignore
//! async fn drive_forward<B: Base + ?Sized>(base: &B) -> Result<()> {
//!     base.move_straight(100.0, 50.0).await?;
//!     base.stop().await
//! }
//! ```

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

// =============================================================================
// Value Types
// =============================================================================

/// Mean earth radius used by great-circle computations (km).
pub const EARTH_RADIUS_KM: f64 = 6371.0;

/// Millimeters covered by one degree of arc on the great circle.
pub const MM_PER_DEGREE: f64 = EARTH_RADIUS_KM * 1.0e6 * std::f64::consts::PI / 180.0;

/// Three-component vector used for velocities and accelerations.
///
/// Base axes follow the rover convention: `y` is forward, `z` is yaw.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Vector3 {
    /// Lateral component
    pub x: f64,
    /// Forward component
    pub y: f64,
    /// Vertical / yaw component
    pub z: f64,
}

impl Vector3 {
    /// Create a vector from its components
    pub const fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    /// Vector with only a forward component
    pub const fn forward(y: f64) -> Self {
        Self { x: 0.0, y, z: 0.0 }
    }

    /// Vector with only a yaw component
    pub const fn yaw(z: f64) -> Self {
        Self { x: 0.0, y: 0.0, z }
    }
}

/// A position reported by a movement sensor.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    /// Latitude in degrees
    pub lat: f64,
    /// Longitude in degrees
    pub lng: f64,
}

impl GeoPoint {
    /// Create a point from latitude and longitude in degrees
    pub const fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }

    /// Haversine great-circle distance to `other` in kilometers.
    pub fn great_circle_distance_km(&self, other: &GeoPoint) -> f64 {
        let lat1 = self.lat.to_radians();
        let lat2 = other.lat.to_radians();
        let dlat = lat2 - lat1;
        let dlng = (other.lng - self.lng).to_radians();

        let a = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlng / 2.0).sin().powi(2);
        let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());
        EARTH_RADIUS_KM * c
    }

    /// Great-circle distance to `other` in millimeters.
    pub fn great_circle_distance_mm(&self, other: &GeoPoint) -> f64 {
        self.great_circle_distance_km(other) * 1.0e6
    }

    /// Project onto the rover's local plane around `origin` (millimeters).
    ///
    /// `x` points north (forward at heading 0) and `y` points west, so a
    /// positive (counter-clockwise) spin of 90 degrees faces `+y`.
    pub fn to_local_mm(&self, origin: &GeoPoint) -> (f64, f64) {
        let x = (self.lat - origin.lat) * MM_PER_DEGREE;
        let y = -(self.lng - origin.lng) * MM_PER_DEGREE * origin.lat.to_radians().cos();
        (x, y)
    }

    /// Inverse of [`GeoPoint::to_local_mm`] for small offsets.
    pub fn from_local_mm(origin: &GeoPoint, x_mm: f64, y_mm: f64) -> Self {
        let lat = origin.lat + x_mm / MM_PER_DEGREE;
        let lng = origin.lng - y_mm / (MM_PER_DEGREE * origin.lat.to_radians().cos());
        Self { lat, lng }
    }
}

impl fmt::Display for GeoPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({:.9}, {:.9})", self.lat, self.lng)
    }
}

/// Options for [`MovementSensor::position`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PositionQueryOptions {
    /// Report the position relative to the last odometry reset
    pub relative_to_reset: bool,
}

impl PositionQueryOptions {
    /// Query relative to the last [`MovementSensor::reset`]
    pub const fn relative() -> Self {
        Self {
            relative_to_reset: true,
        }
    }
}

/// Marker error for a component call abandoned by its caller.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Cancelled;

impl fmt::Display for Cancelled {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("operation cancelled")
    }
}

impl std::error::Error for Cancelled {}

/// Returns true if `err` (or anything in its chain) is a [`Cancelled`].
pub fn is_cancelled(err: &anyhow::Error) -> bool {
    err.chain()
        .any(|cause| cause.downcast_ref::<Cancelled>().is_some())
}

// =============================================================================
// Actuators
// =============================================================================

/// Capability: Mobile Drivetrain
///
/// # Contract
/// - Linear values are mm and mm/s, angular values are degrees and deg/s
/// - `move_straight` and `spin` return once the motion has completed
/// - `set_velocity` and `set_power` return once the command is applied; the
///   base keeps moving until `stop`
/// - `distance × speed` gives the direction of travel; either may be negative
#[async_trait]
pub trait Base: Send + Sync {
    /// Component name as configured on the robot
    fn name(&self) -> &str;

    /// Hold a linear (`y`, mm/s) and angular (`z`, deg/s) velocity
    async fn set_velocity(&self, linear: Vector3, angular: Vector3) -> Result<()>;

    /// Drive straight for `distance_mm` at `speed_mm_per_sec`
    async fn move_straight(&self, distance_mm: f64, speed_mm_per_sec: f64) -> Result<()>;

    /// Rotate in place by `angle_deg` at `speed_deg_per_sec`
    async fn spin(&self, angle_deg: f64, speed_deg_per_sec: f64) -> Result<()>;

    /// Apply open-loop power fractions in [-1, 1]
    async fn set_power(&self, linear: Vector3, angular: Vector3) -> Result<()>;

    /// Stop all motion
    async fn stop(&self) -> Result<()>;

    /// Whether the base is currently moving
    async fn is_moving(&self) -> Result<bool>;
}

/// Capability: Single Motor
///
/// Positions are in revolutions relative to the motor's zero point.
#[async_trait]
pub trait Motor: Send + Sync {
    /// Component name as configured on the robot
    fn name(&self) -> &str;

    /// Turn `revolutions` at `rpm`; the sign of `rpm × revolutions` is the direction
    async fn go_for(&self, rpm: f64, revolutions: f64) -> Result<()>;

    /// Turn to `position` (revolutions) at `|rpm|`
    async fn go_to(&self, rpm: f64, position: f64) -> Result<()>;

    /// Spin indefinitely at `rpm`
    async fn set_rpm(&self, rpm: f64) -> Result<()>;

    /// Apply an open-loop power fraction in [-1, 1]
    async fn set_power(&self, power: f64) -> Result<()>;

    /// Stop the motor
    async fn stop(&self) -> Result<()>;

    /// Current position in revolutions
    async fn position(&self) -> Result<f64>;

    /// Redefine the current position using `offset`
    async fn reset_zero_position(&self, offset: f64) -> Result<()>;

    /// Whether power is applied, and the applied fraction
    async fn is_powered(&self) -> Result<(bool, f64)>;

    /// Whether the motor is currently moving
    async fn is_moving(&self) -> Result<bool>;
}

// =============================================================================
// Sensors
// =============================================================================

/// Capability: Tick Encoder
#[async_trait]
pub trait Encoder: Send + Sync {
    /// Component name as configured on the robot
    fn name(&self) -> &str;

    /// Position in ticks
    async fn position(&self) -> Result<f64>;

    /// Zero the tick count
    async fn reset_position(&self) -> Result<()>;
}

/// Capability: Odometry / IMU
///
/// # Contract
/// - `linear_velocity` is in m/s (forward on `y`)
/// - `angular_velocity` is in deg/s (yaw on `z`)
/// - `orientation` is the yaw angle in degrees, wrapped into [0, 360)
/// - `linear_acceleration` is in m/s²
#[async_trait]
pub trait MovementSensor: Send + Sync {
    /// Component name as configured on the robot
    fn name(&self) -> &str;

    /// Current linear velocity (m/s)
    async fn linear_velocity(&self) -> Result<Vector3>;

    /// Current angular velocity (deg/s)
    async fn angular_velocity(&self) -> Result<Vector3>;

    /// Current position
    async fn position(&self, options: PositionQueryOptions) -> Result<GeoPoint>;

    /// Current yaw in degrees
    async fn orientation(&self) -> Result<f64>;

    /// Current linear acceleration (m/s²)
    async fn linear_acceleration(&self) -> Result<Vector3>;

    /// Re-zero position and orientation at the current pose
    ///
    /// # Default Implementation
    /// Returns an error indicating reset is not supported.
    async fn reset(&self) -> Result<()> {
        anyhow::bail!("Reset not supported by movement sensor {}", self.name())
    }
}

/// Capability: Power Monitoring
#[async_trait]
pub trait PowerSensor: Send + Sync {
    /// Component name as configured on the robot
    fn name(&self) -> &str;

    /// Bus voltage (V)
    async fn voltage(&self) -> Result<f64>;

    /// Current draw (A)
    async fn current(&self) -> Result<f64>;

    /// Power draw (W)
    async fn power(&self) -> Result<f64>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_great_circle_matches_local_projection() {
        let origin = GeoPoint::default();
        let point = GeoPoint::from_local_mm(&origin, 1000.0, 0.0);

        let dist = origin.great_circle_distance_mm(&point);
        assert!((dist - 1000.0).abs() < 1e-3, "distance = {dist}");

        let (x, y) = point.to_local_mm(&origin);
        assert!((x - 1000.0).abs() < 1e-6);
        assert!(y.abs() < 1e-6);
    }

    #[test]
    fn test_local_projection_round_trip_west() {
        let origin = GeoPoint::new(0.0, 0.0);
        let point = GeoPoint::from_local_mm(&origin, 0.0, 500.0);
        assert!(point.lng < 0.0, "west should decrease longitude");

        let (x, y) = point.to_local_mm(&origin);
        assert!(x.abs() < 1e-6);
        assert!((y - 500.0).abs() < 1e-6);
    }

    #[test]
    fn test_is_cancelled_walks_chain() {
        let err = anyhow::Error::new(Cancelled).context("reading odometry");
        assert!(is_cancelled(&err));

        let other = anyhow::anyhow!("serial timeout");
        assert!(!is_cancelled(&other));
    }
}
