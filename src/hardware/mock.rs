//! Simulated Rover Hardware
//!
//! Provides simulated rover components for running the canary catalogue
//! without a physical robot. All simulated devices use async-safe operations
//! (tokio::time::sleep, not std::thread::sleep) and read the clock through
//! `tokio::time::Instant`, so tests can run whole scenarios under paused time.
//!
//! # Available Simulations
//!
//! - `SimulatedRover` - rigid body shared by base handles and odometry
//! - `SimulatedBase` - drivetrain handle onto a `SimulatedRover`
//! - `SimulatedOdometry` - movement sensor reporting the rover pose
//! - `SimulatedMotor` / `SimulatedEncoder` - encoded motor sharing one tick counter
//! - `SimulatedImu` - static IMU reporting gravity
//! - `MockPowerSensor` - power monitor with small deterministic noise
//!
//! # Kinematics
//!
//! The rover pose is integrated lazily on every command or query from the
//! currently held linear and angular velocity, using the exact arc solution.
//! Faults in [`RoverFaults`] and [`MotorFaults`] scale the executed motion or
//! fail calls so runners can be exercised against a misbehaving rover.

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio::time::{sleep, Duration, Instant};

use crate::hardware::capabilities::{
    Base, Encoder, GeoPoint, Motor, MovementSensor, PositionQueryOptions, PowerSensor, Vector3,
};

/// Linear speed reached at full open-loop power (mm/s)
const MAX_LINEAR_MM_PER_SEC: f64 = 500.0;

/// Angular speed reached at full open-loop power (deg/s)
const MAX_ANGULAR_DEG_PER_SEC: f64 = 180.0;

/// Motor speed reached at full open-loop power (rpm)
const MAX_MOTOR_RPM: f64 = 120.0;

/// Convert a signed duration estimate in seconds into a sleepable duration.
///
/// A stalled actuator (zero effective speed) completes immediately.
fn motion_duration(seconds: f64) -> Duration {
    Duration::try_from_secs_f64(seconds.abs()).unwrap_or(Duration::ZERO)
}

fn direction(value: f64) -> f64 {
    if value < 0.0 {
        -1.0
    } else {
        1.0
    }
}

// =============================================================================
// Fault Injection
// =============================================================================

/// Deviations applied by a [`SimulatedRover`].
#[derive(Debug, Clone)]
pub struct RoverFaults {
    /// Fraction of the commanded distance/angle actually travelled
    pub distance_scale: f64,
    /// Fraction of the commanded speed actually reached
    pub speed_scale: f64,
    /// Offset (mm) added to reported positions, to the left of the heading,
    /// once the rover has moved since the last odometry reset
    pub lateral_offset_mm: f64,
    /// Base commands that fail (e.g. "move_straight", "spin")
    pub failing_commands: HashSet<String>,
    /// Fail every odometry read
    pub telemetry_failure: bool,
}

impl Default for RoverFaults {
    fn default() -> Self {
        Self {
            distance_scale: 1.0,
            speed_scale: 1.0,
            lateral_offset_mm: 0.0,
            failing_commands: HashSet::new(),
            telemetry_failure: false,
        }
    }
}

impl RoverFaults {
    /// Travel only `scale` of every commanded distance or angle
    pub fn with_distance_scale(mut self, scale: f64) -> Self {
        self.distance_scale = scale;
        self
    }

    /// Reach only `scale` of every commanded speed
    pub fn with_speed_scale(mut self, scale: f64) -> Self {
        self.speed_scale = scale;
        self
    }

    /// Report positions shifted sideways by `offset_mm`
    pub fn with_lateral_offset(mut self, offset_mm: f64) -> Self {
        self.lateral_offset_mm = offset_mm;
        self
    }

    /// Make `command` fail
    pub fn with_failing_command(mut self, command: impl Into<String>) -> Self {
        self.failing_commands.insert(command.into());
        self
    }

    /// Fail odometry reads
    pub fn with_telemetry_failure(mut self) -> Self {
        self.telemetry_failure = true;
        self
    }
}

// =============================================================================
// SimulatedRover - Rigid Body
// =============================================================================

#[derive(Debug)]
struct RoverState {
    x_mm: f64,
    y_mm: f64,
    /// Unwrapped heading, counter-clockwise positive
    heading_deg: f64,
    linear_mm_per_sec: f64,
    angular_deg_per_sec: f64,
    updated: Instant,
    origin: (f64, f64, f64),
    moved_since_reset: bool,
    faults: RoverFaults,
}

impl RoverState {
    fn advance(&mut self, now: Instant) {
        let dt = now.saturating_duration_since(self.updated).as_secs_f64();
        self.updated = now;
        if dt == 0.0 {
            return;
        }

        let v = self.linear_mm_per_sec;
        let w = self.angular_deg_per_sec.to_radians();
        let h0 = self.heading_deg.to_radians();

        if w.abs() < 1e-12 {
            self.x_mm += v * dt * h0.cos();
            self.y_mm += v * dt * h0.sin();
        } else {
            let h1 = h0 + w * dt;
            self.x_mm += v / w * (h1.sin() - h0.sin());
            self.y_mm += v / w * (h0.cos() - h1.cos());
        }
        self.heading_deg += self.angular_deg_per_sec * dt;
    }

    fn hold(&mut self, linear_mm_per_sec: f64, angular_deg_per_sec: f64) {
        self.advance(Instant::now());
        self.linear_mm_per_sec = linear_mm_per_sec;
        self.angular_deg_per_sec = angular_deg_per_sec;
        if linear_mm_per_sec != 0.0 || angular_deg_per_sec != 0.0 {
            self.moved_since_reset = true;
        }
    }

    /// Pose relative to the last reset, with the lateral offset fault applied.
    fn relative_pose(&self) -> (f64, f64, f64) {
        let (ox, oy, oh) = self.origin;
        let rot = -oh.to_radians();
        let (dx, dy) = (self.x_mm - ox, self.y_mm - oy);
        let mut x = dx * rot.cos() - dy * rot.sin();
        let mut y = dx * rot.sin() + dy * rot.cos();
        let heading = self.heading_deg - oh;

        let offset = self.faults.lateral_offset_mm;
        if offset != 0.0 && self.moved_since_reset {
            let h = heading.to_radians();
            x -= offset * h.sin();
            y += offset * h.cos();
        }
        (x, y, heading)
    }

    fn check_command(&self, command: &str) -> Result<()> {
        if self.faults.failing_commands.contains(command) {
            bail!("SimulatedRover: {command} rejected by injected fault");
        }
        Ok(())
    }
}

/// Simulated rover body.
///
/// Several [`SimulatedBase`] handles (e.g. a wheeled and a sensor-controlled
/// base) and a [`SimulatedOdometry`] share one body, the same way the
/// physical canary rover exposes several base components over one chassis.
#[derive(Clone)]
pub struct SimulatedRover {
    state: Arc<RwLock<RoverState>>,
    anchor: GeoPoint,
}

impl SimulatedRover {
    /// Create a rover at rest at the origin, facing north
    pub fn new() -> Self {
        Self::with_faults(RoverFaults::default())
    }

    /// Create a rover that misbehaves according to `faults`
    pub fn with_faults(faults: RoverFaults) -> Self {
        Self {
            state: Arc::new(RwLock::new(RoverState {
                x_mm: 0.0,
                y_mm: 0.0,
                heading_deg: 0.0,
                linear_mm_per_sec: 0.0,
                angular_deg_per_sec: 0.0,
                updated: Instant::now(),
                origin: (0.0, 0.0, 0.0),
                moved_since_reset: false,
                faults,
            })),
            anchor: GeoPoint::new(0.0, 0.0),
        }
    }

    /// Drivetrain handle named `name`
    pub fn base(&self, name: impl Into<String>) -> SimulatedBase {
        SimulatedBase {
            name: name.into(),
            rover: self.clone(),
        }
    }

    /// Odometry handle named `name`
    pub fn odometry(&self, name: impl Into<String>) -> SimulatedOdometry {
        SimulatedOdometry {
            name: name.into(),
            rover: self.clone(),
        }
    }

    async fn timed_motion(&self, command: &str, amount: f64, speed: f64) -> Result<()> {
        if speed == 0.0 {
            bail!("SimulatedRover: {command} requires a non-zero speed");
        }
        let dir = direction(amount * speed);
        let (actual_speed, duration) = {
            let state = self.state.read().await;
            state.check_command(command)?;
            let faults = &state.faults;
            let actual_speed = speed.abs() * faults.speed_scale;
            let travel = amount.abs() * faults.distance_scale;
            (actual_speed, motion_duration(travel / actual_speed))
        };

        tracing::debug!(command, amount, speed, ?duration, "SimulatedRover: motion started");
        {
            let mut state = self.state.write().await;
            if command == "spin" {
                state.hold(0.0, actual_speed * dir);
            } else {
                state.hold(actual_speed * dir, 0.0);
            }
        }

        sleep(duration).await;

        self.state.write().await.hold(0.0, 0.0);
        tracing::debug!(command, "SimulatedRover: motion complete");
        Ok(())
    }
}

impl Default for SimulatedRover {
    fn default() -> Self {
        Self::new()
    }
}

/// Drivetrain handle onto a [`SimulatedRover`].
pub struct SimulatedBase {
    name: String,
    rover: SimulatedRover,
}

#[async_trait]
impl Base for SimulatedBase {
    fn name(&self) -> &str {
        &self.name
    }

    async fn set_velocity(&self, linear: Vector3, angular: Vector3) -> Result<()> {
        let mut state = self.rover.state.write().await;
        state.check_command("set_velocity")?;
        let scale = state.faults.speed_scale;
        state.hold(linear.y * scale, angular.z * scale);
        Ok(())
    }

    async fn move_straight(&self, distance_mm: f64, speed_mm_per_sec: f64) -> Result<()> {
        self.rover
            .timed_motion("move_straight", distance_mm, speed_mm_per_sec)
            .await
    }

    async fn spin(&self, angle_deg: f64, speed_deg_per_sec: f64) -> Result<()> {
        self.rover
            .timed_motion("spin", angle_deg, speed_deg_per_sec)
            .await
    }

    async fn set_power(&self, linear: Vector3, angular: Vector3) -> Result<()> {
        if linear.y.abs() > 1.0 || angular.z.abs() > 1.0 {
            bail!("SimulatedRover: power fractions must be within [-1, 1]");
        }
        let mut state = self.rover.state.write().await;
        state.check_command("set_power")?;
        let scale = state.faults.speed_scale;
        state.hold(
            linear.y * MAX_LINEAR_MM_PER_SEC * scale,
            angular.z * MAX_ANGULAR_DEG_PER_SEC * scale,
        );
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        let mut state = self.rover.state.write().await;
        state.check_command("stop")?;
        state.hold(0.0, 0.0);
        Ok(())
    }

    async fn is_moving(&self) -> Result<bool> {
        let state = self.rover.state.read().await;
        Ok(state.linear_mm_per_sec != 0.0 || state.angular_deg_per_sec != 0.0)
    }
}

/// Odometry handle onto a [`SimulatedRover`].
pub struct SimulatedOdometry {
    name: String,
    rover: SimulatedRover,
}

impl SimulatedOdometry {
    async fn snapshot(&self) -> Result<tokio::sync::RwLockWriteGuard<'_, RoverState>> {
        let mut state = self.rover.state.write().await;
        if state.faults.telemetry_failure {
            return Err(anyhow!("SimulatedOdometry: {} not responding", self.name));
        }
        state.advance(Instant::now());
        Ok(state)
    }
}

#[async_trait]
impl MovementSensor for SimulatedOdometry {
    fn name(&self) -> &str {
        &self.name
    }

    async fn linear_velocity(&self) -> Result<Vector3> {
        let state = self.snapshot().await?;
        Ok(Vector3::forward(state.linear_mm_per_sec / 1000.0))
    }

    async fn angular_velocity(&self) -> Result<Vector3> {
        let state = self.snapshot().await?;
        Ok(Vector3::yaw(state.angular_deg_per_sec))
    }

    async fn position(&self, options: PositionQueryOptions) -> Result<GeoPoint> {
        let state = self.snapshot().await?;
        let (x, y) = if options.relative_to_reset {
            let (x, y, _) = state.relative_pose();
            (x, y)
        } else {
            (state.x_mm, state.y_mm)
        };
        Ok(GeoPoint::from_local_mm(&self.rover.anchor, x, y))
    }

    async fn orientation(&self) -> Result<f64> {
        let state = self.snapshot().await?;
        let (_, _, heading) = state.relative_pose();
        Ok(heading.rem_euclid(360.0))
    }

    async fn linear_acceleration(&self) -> Result<Vector3> {
        let _state = self.snapshot().await?;
        Ok(Vector3::default())
    }

    async fn reset(&self) -> Result<()> {
        let mut state = self.snapshot().await?;
        let pose = (state.x_mm, state.y_mm, state.heading_deg);
        state.origin = pose;
        state.moved_since_reset = false;
        Ok(())
    }
}

// =============================================================================
// SimulatedMotor / SimulatedEncoder
// =============================================================================

/// Deviations applied by a [`SimulatedMotor`].
#[derive(Debug, Clone)]
pub struct MotorFaults {
    /// Fraction of the commanded revolutions actually turned
    pub distance_scale: f64,
    /// Fraction of the commanded rpm actually reached
    pub speed_scale: f64,
    /// Offset sign convention of `reset_zero_position` is flipped
    pub inverted_zero_offset: bool,
    /// Commands that fail (e.g. "go_for")
    pub failing_commands: HashSet<String>,
}

impl Default for MotorFaults {
    fn default() -> Self {
        Self {
            distance_scale: 1.0,
            speed_scale: 1.0,
            inverted_zero_offset: false,
            failing_commands: HashSet::new(),
        }
    }
}

#[derive(Debug)]
struct MotorState {
    ticks: f64,
    offset_revs: f64,
    rpm: f64,
    power: f64,
    updated: Instant,
    ticks_per_rotation: f64,
    faults: MotorFaults,
}

impl MotorState {
    fn advance(&mut self, now: Instant) {
        let dt = now.saturating_duration_since(self.updated).as_secs_f64();
        self.updated = now;
        self.ticks += self.rpm / 60.0 * dt * self.ticks_per_rotation;
    }

    fn position(&self) -> f64 {
        self.ticks / self.ticks_per_rotation + self.offset_revs
    }

    fn drive(&mut self, rpm: f64, power: f64) {
        self.advance(Instant::now());
        self.rpm = rpm;
        self.power = power;
    }

    fn check_command(&self, command: &str) -> Result<()> {
        if self.faults.failing_commands.contains(command) {
            bail!("SimulatedMotor: {command} rejected by injected fault");
        }
        Ok(())
    }
}

/// Simulated encoded motor.
///
/// The motor and its [`SimulatedEncoder`] count the same ticks, so resetting
/// one is visible through the other.
#[derive(Clone)]
pub struct SimulatedMotor {
    name: String,
    state: Arc<RwLock<MotorState>>,
}

impl SimulatedMotor {
    /// Create a stopped motor at position zero
    pub fn new(name: impl Into<String>, ticks_per_rotation: f64) -> Self {
        Self::with_faults(name, ticks_per_rotation, MotorFaults::default())
    }

    /// Create a motor that misbehaves according to `faults`
    pub fn with_faults(
        name: impl Into<String>,
        ticks_per_rotation: f64,
        faults: MotorFaults,
    ) -> Self {
        Self {
            name: name.into(),
            state: Arc::new(RwLock::new(MotorState {
                ticks: 0.0,
                offset_revs: 0.0,
                rpm: 0.0,
                power: 0.0,
                updated: Instant::now(),
                ticks_per_rotation,
                faults,
            })),
        }
    }

    /// Encoder handle named `name` reading this motor's ticks
    pub fn encoder(&self, name: impl Into<String>) -> SimulatedEncoder {
        SimulatedEncoder {
            name: name.into(),
            state: Arc::clone(&self.state),
        }
    }

    async fn timed_turn(&self, command: &str, rpm: f64, revolutions: f64) -> Result<()> {
        let duration = {
            let mut state = self.state.write().await;
            state.check_command(command)?;
            let dir = direction(rpm * revolutions);
            let actual_rpm = rpm.abs() * state.faults.speed_scale;
            let travel = revolutions.abs() * state.faults.distance_scale;
            state.drive(actual_rpm * dir, 0.0);
            motion_duration(travel / actual_rpm * 60.0)
        };

        sleep(duration).await;

        self.state.write().await.drive(0.0, 0.0);
        Ok(())
    }
}

#[async_trait]
impl Motor for SimulatedMotor {
    fn name(&self) -> &str {
        &self.name
    }

    async fn go_for(&self, rpm: f64, revolutions: f64) -> Result<()> {
        if rpm == 0.0 {
            bail!("SimulatedMotor: go_for requires a non-zero rpm");
        }
        self.timed_turn("go_for", rpm, revolutions).await
    }

    async fn go_to(&self, rpm: f64, position: f64) -> Result<()> {
        if rpm == 0.0 {
            bail!("SimulatedMotor: go_to requires a non-zero rpm");
        }
        let delta = {
            let mut state = self.state.write().await;
            state.advance(Instant::now());
            position - state.position()
        };
        self.timed_turn("go_to", rpm.abs(), delta).await
    }

    async fn set_rpm(&self, rpm: f64) -> Result<()> {
        let mut state = self.state.write().await;
        state.check_command("set_rpm")?;
        let scale = state.faults.speed_scale;
        state.drive(rpm * scale, 0.0);
        Ok(())
    }

    async fn set_power(&self, power: f64) -> Result<()> {
        if power.abs() > 1.0 {
            bail!("SimulatedMotor: power must be within [-1, 1]");
        }
        let mut state = self.state.write().await;
        state.check_command("set_power")?;
        let scale = state.faults.speed_scale;
        state.drive(power * MAX_MOTOR_RPM * scale, power);
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        let mut state = self.state.write().await;
        state.check_command("stop")?;
        state.drive(0.0, 0.0);
        Ok(())
    }

    async fn position(&self) -> Result<f64> {
        let mut state = self.state.write().await;
        state.advance(Instant::now());
        Ok(state.position())
    }

    async fn reset_zero_position(&self, offset: f64) -> Result<()> {
        let mut state = self.state.write().await;
        state.check_command("reset_zero_position")?;
        state.advance(Instant::now());
        state.ticks = 0.0;
        state.offset_revs = if state.faults.inverted_zero_offset {
            offset
        } else {
            -offset
        };
        Ok(())
    }

    async fn is_powered(&self) -> Result<(bool, f64)> {
        let state = self.state.read().await;
        let fraction = if state.power != 0.0 {
            state.power
        } else {
            state.rpm / MAX_MOTOR_RPM
        };
        Ok((fraction != 0.0, fraction))
    }

    async fn is_moving(&self) -> Result<bool> {
        Ok(self.state.read().await.rpm != 0.0)
    }
}

/// Encoder handle onto a [`SimulatedMotor`].
pub struct SimulatedEncoder {
    name: String,
    state: Arc<RwLock<MotorState>>,
}

#[async_trait]
impl Encoder for SimulatedEncoder {
    fn name(&self) -> &str {
        &self.name
    }

    async fn position(&self) -> Result<f64> {
        let mut state = self.state.write().await;
        state.advance(Instant::now());
        Ok(state.ticks)
    }

    async fn reset_position(&self) -> Result<()> {
        let mut state = self.state.write().await;
        state.advance(Instant::now());
        state.ticks = 0.0;
        Ok(())
    }
}

// =============================================================================
// SimulatedImu - Static IMU
// =============================================================================

/// Stationary IMU reporting gravity on `z`.
pub struct SimulatedImu {
    name: String,
    gravity: f64,
}

impl SimulatedImu {
    /// Create an IMU reporting `gravity` m/s²
    pub fn new(name: impl Into<String>, gravity: f64) -> Self {
        Self {
            name: name.into(),
            gravity,
        }
    }
}

#[async_trait]
impl MovementSensor for SimulatedImu {
    fn name(&self) -> &str {
        &self.name
    }

    async fn linear_velocity(&self) -> Result<Vector3> {
        Ok(Vector3::default())
    }

    async fn angular_velocity(&self) -> Result<Vector3> {
        Ok(Vector3::default())
    }

    async fn position(&self, _options: PositionQueryOptions) -> Result<GeoPoint> {
        Ok(GeoPoint::default())
    }

    async fn orientation(&self) -> Result<f64> {
        Ok(0.0)
    }

    async fn linear_acceleration(&self) -> Result<Vector3> {
        Ok(Vector3::new(0.0, 0.0, self.gravity))
    }
}

// =============================================================================
// MockPowerSensor - Simulated Power Monitor
// =============================================================================

/// Mock power monitor with simulated readings
///
/// Adds ~1% deterministic noise derived from the system clock.
pub struct MockPowerSensor {
    name: String,
    voltage: f64,
    current: f64,
}

impl MockPowerSensor {
    /// Create a monitor reading `voltage` V at `current` A
    pub fn new(name: impl Into<String>, voltage: f64, current: f64) -> Self {
        Self {
            name: name.into(),
            voltage,
            current,
        }
    }

    fn noisy(value: f64) -> f64 {
        let noise_factor = 1.0
            + (std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap_or_default()
                .as_nanos()
                % 200) as f64
                / 10000.0
            - 0.01;
        value * noise_factor
    }
}

#[async_trait]
impl PowerSensor for MockPowerSensor {
    fn name(&self) -> &str {
        &self.name
    }

    async fn voltage(&self) -> Result<f64> {
        Ok(Self::noisy(self.voltage))
    }

    async fn current(&self) -> Result<f64> {
        Ok(Self::noisy(self.current))
    }

    async fn power(&self) -> Result<f64> {
        Ok(Self::noisy(self.voltage * self.current))
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_move_straight_travels_commanded_distance() {
        let rover = SimulatedRover::new();
        let base = rover.base("base");
        let odometry = rover.odometry("odometry");

        let start = odometry.position(PositionQueryOptions::relative()).await.unwrap();
        base.move_straight(100.0, 50.0).await.unwrap();
        let end = odometry.position(PositionQueryOptions::relative()).await.unwrap();

        let travelled = start.great_circle_distance_mm(&end);
        assert!((travelled - 100.0).abs() < 1.0, "travelled {travelled}");
        assert!(!base.is_moving().await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_negative_speed_reverses_direction() {
        let rover = SimulatedRover::new();
        let base = rover.base("base");
        let odometry = rover.odometry("odometry");

        base.move_straight(100.0, -50.0).await.unwrap();
        let end = odometry.position(PositionQueryOptions::relative()).await.unwrap();
        let (x, _) = end.to_local_mm(&GeoPoint::default());
        assert!((x + 100.0).abs() < 1.0, "x = {x}");
    }

    #[tokio::test(start_paused = true)]
    async fn test_spin_wraps_orientation() {
        let rover = SimulatedRover::new();
        let base = rover.base("base");
        let odometry = rover.odometry("odometry");

        base.spin(40.0, -60.0).await.unwrap();
        let theta = odometry.orientation().await.unwrap();
        assert!((theta - 320.0).abs() < 0.5, "theta = {theta}");
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_rezeroes_odometry() {
        let rover = SimulatedRover::new();
        let base = rover.base("base");
        let odometry = rover.odometry("odometry");

        base.spin(90.0, 30.0).await.unwrap();
        base.move_straight(200.0, 100.0).await.unwrap();
        odometry.reset().await.unwrap();

        let pos = odometry.position(PositionQueryOptions::relative()).await.unwrap();
        assert!(pos.great_circle_distance_mm(&GeoPoint::default()) < 1e-6);
        assert!(odometry.orientation().await.unwrap().abs() < 1e-9);
    }

    #[tokio::test(start_paused = true)]
    async fn test_lateral_offset_starts_with_motion() {
        let rover = SimulatedRover::with_faults(RoverFaults::default().with_lateral_offset(200.0));
        let base = rover.base("base");
        let odometry = rover.odometry("odometry");

        odometry.reset().await.unwrap();
        let origin = odometry.position(PositionQueryOptions::relative()).await.unwrap();
        assert!(origin.great_circle_distance_mm(&GeoPoint::default()) < 1e-6);

        base.move_straight(100.0, 50.0).await.unwrap();
        let end = odometry.position(PositionQueryOptions::relative()).await.unwrap();
        let (x, y) = end.to_local_mm(&origin);
        assert!((x - 100.0).abs() < 1.0, "x = {x}");
        assert!((y - 200.0).abs() < 1.0, "y = {y}");

        odometry.reset().await.unwrap();
        let rezeroed = odometry.position(PositionQueryOptions::relative()).await.unwrap();
        assert!(rezeroed.great_circle_distance_mm(&GeoPoint::default()) < 1e-6);
    }

    #[tokio::test(start_paused = true)]
    async fn test_injected_command_failure() {
        let rover = SimulatedRover::with_faults(RoverFaults::default().with_failing_command("spin"));
        let base = rover.base("base");
        assert!(base.spin(90.0, 30.0).await.is_err());
        assert!(base.move_straight(10.0, 10.0).await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_motor_go_for_and_encoder_share_ticks() {
        let motor = SimulatedMotor::new("left", 1992.0);
        let encoder = motor.encoder("left-enc");

        motor.go_for(60.0, 2.0).await.unwrap();
        let pos = motor.position().await.unwrap();
        assert!((pos - 2.0).abs() < 0.01, "pos = {pos}");

        let ticks = encoder.position().await.unwrap();
        assert!((ticks - pos * 1992.0).abs() < 1e-6);

        encoder.reset_position().await.unwrap();
        assert_eq!(encoder.position().await.unwrap(), 0.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_motor_reset_zero_position_offset_sign() {
        let motor = SimulatedMotor::new("left", 1992.0);
        motor.go_for(60.0, 3.0).await.unwrap();

        motor.reset_zero_position(-2.0).await.unwrap();
        assert_eq!(motor.position().await.unwrap(), 2.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_motor_set_power_reports_powered() {
        let motor = SimulatedMotor::new("right", 1992.0);
        motor.set_power(-0.5).await.unwrap();
        let (powered, fraction) = motor.is_powered().await.unwrap();
        assert!(powered);
        assert_eq!(fraction, -0.5);

        motor.stop().await.unwrap();
        assert!(!motor.is_moving().await.unwrap());
    }

    #[tokio::test]
    async fn test_mock_power_sensor_read() {
        let sensor = MockPowerSensor::new("ina219", 15.2, 0.29);

        let volts = sensor.voltage().await.unwrap();
        assert!(volts > 15.0 && volts < 15.4, "Reading {} not in expected range", volts);

        let power = sensor.power().await.unwrap();
        assert!(power > 4.3 && power < 4.5, "Reading {} not in expected range", power);
    }
}
