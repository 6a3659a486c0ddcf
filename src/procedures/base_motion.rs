//! Base Motion Runners
//!
//! SetVelocity holds, the consecutive velocity hold, MoveStraight, Spin and
//! open-loop SetPower. Goals are [`MotionGoal`]s of `|requested| × direction`,
//! with the direction taken from `sign(distance × speed)`.

use crate::error::CanaryError;
use crate::hardware::capabilities::{PositionQueryOptions, Vector3};
use crate::procedures::{
    expect_telemetry, expect_within, run_with_sampler, BaseUnderTest, RunnerEnv, RunnerResult,
};
use crate::report::{TraceRow, TraceTag};
use crate::sampling::{dist_between_angles, GoalKind, MotionGoal, ToleranceBand};
use tokio::time::{sleep, Instant};
use tracing::info;

async fn reset_odometry(env: &RunnerEnv, rig: &BaseUnderTest) -> RunnerResult {
    rig.odometry
        .reset()
        .await
        .map_err(|e| CanaryError::command("Reset", rig.odometry.name(), e))?;
    sleep(env.timing.odometry_reset_settle()).await;
    Ok(())
}

async fn stop(rig: &BaseUnderTest) -> RunnerResult {
    rig.base
        .stop()
        .await
        .map_err(|e| CanaryError::command("Stop", rig.name.as_str(), e))
}

async fn is_moving(rig: &BaseUnderTest) -> Result<bool, CanaryError> {
    rig.base
        .is_moving()
        .await
        .map_err(|e| CanaryError::telemetry(format!("{} IsMoving", rig.name), e))
}

// =============================================================================
// SetVelocity
// =============================================================================

/// Hold `(linear, angular)` and sample it for `window_secs` after the ramp-up.
async fn hold_velocity(
    env: &RunnerEnv,
    rig: &BaseUnderTest,
    linear: f64,
    angular: f64,
    window_secs: f64,
) -> RunnerResult {
    let params = format!("linear={linear}, angular={angular}");
    rig.traces.desired.append_record(
        &TraceRow::new(TraceTag::SetVelocity, env.elapsed_ms()).with_velocity(linear, angular),
    );

    rig.base
        .set_velocity(Vector3::forward(linear), Vector3::yaw(angular))
        .await
        .map_err(|e| CanaryError::command("SetVelocity", params.as_str(), e))?;
    sleep(env.timing.ramp_up()).await;

    let sampler = env.base_sampler(rig, TraceTag::SetVelocity, linear, angular, window_secs);
    let window = sampler.time_budget();
    let (_, output) = run_with_sampler(sampler, async {
        sleep(window).await;
        Ok(())
    })
    .await;

    let (linear_est, angular_est) = output.estimates();
    info!(
        device = %rig.name,
        command = "SetVelocity",
        expected = %params,
        measured_linear = linear_est,
        measured_angular = angular_est,
        "Velocity hold sampled"
    );

    let linear_goal = MotionGoal::signed(GoalKind::LinearVelocity, linear);
    let angular_goal = MotionGoal::signed(GoalKind::AngularVelocity, angular);
    expect_within("linear velocity", linear_goal.convergence_band(), linear_est)?;
    expect_within("angular velocity", angular_goal.convergence_band(), angular_est)?;
    expect_telemetry(&output)
}

/// Command a velocity, hold it and check both axes.
pub async fn set_velocity(
    env: &RunnerEnv,
    rig: &BaseUnderTest,
    linear: f64,
    angular: f64,
) -> RunnerResult {
    let held = hold_velocity(env, rig, linear, angular, env.timing.hold_window_secs).await;
    let stopped = stop(rig).await;
    held.and(stopped)
}

/// Hold 200 mm/s, then drop straight to the base's minimum linear velocity.
pub async fn consecutive_set_velocity(env: &RunnerEnv, rig: &BaseUnderTest) -> RunnerResult {
    let legs = async {
        hold_velocity(env, rig, 200.0, 0.0, env.timing.hold_window_secs).await?;
        hold_velocity(
            env,
            rig,
            rig.min_linear_velocity,
            0.0,
            env.timing.consecutive_second_window_secs,
        )
        .await
    }
    .await;
    let stopped = stop(rig).await;
    legs.and(stopped)
}

// =============================================================================
// MoveStraight
// =============================================================================

/// Drive `distance_mm` at `speed_mm_per_sec` and check distance and speed.
pub async fn move_straight(
    env: &RunnerEnv,
    rig: &BaseUnderTest,
    distance_mm: f64,
    speed_mm_per_sec: f64,
) -> RunnerResult {
    let params = format!("distance={distance_mm}, speed={speed_mm_per_sec}");
    let distance = MotionGoal::resolved(GoalKind::Distance, distance_mm, distance_mm, speed_mm_per_sec);
    let speed = distance.along(GoalKind::LinearVelocity, speed_mm_per_sec);
    let expected_distance = distance.target();
    let expected_speed = speed.target();

    reset_odometry(env, rig).await?;
    let start = rig
        .odometry
        .position(PositionQueryOptions::relative())
        .await
        .map_err(|e| CanaryError::telemetry("odometry position", e))?;

    let time_est = (distance_mm / speed_mm_per_sec).abs();
    rig.traces.desired.append_record(
        &TraceRow::new(TraceTag::MoveStraight, env.elapsed_ms())
            .with_velocity(expected_speed, 0.0)
            .with_position(0.0, 0.0),
    );
    rig.traces.desired.append_record(
        &TraceRow::new(
            TraceTag::MoveStraight,
            env.elapsed_ms() + (time_est * 1000.0) as i64,
        )
        .with_velocity(expected_speed, 0.0)
        .with_position(expected_distance, 0.0),
    );

    let sampler = env.base_sampler(rig, TraceTag::MoveStraight, expected_speed, 0.0, time_est);
    let (result, output) =
        run_with_sampler(sampler, rig.base.move_straight(distance_mm, speed_mm_per_sec)).await;
    result.map_err(|e| CanaryError::command("MoveStraight", params.as_str(), e))?;

    let end = rig
        .odometry
        .position(PositionQueryOptions::relative())
        .await
        .map_err(|e| CanaryError::telemetry("odometry position", e))?;
    let moved = start.great_circle_distance_mm(&end) * distance.direction;
    let speed_est = output.primary.achieved_value;
    info!(
        device = %rig.name,
        command = "MoveStraight",
        expected = %params,
        measured_distance = moved,
        measured_speed = speed_est,
        "Straight move finished"
    );

    expect_within("distance", distance.band(), moved)?;
    expect_within("speed", speed.band(), speed_est)?;
    expect_telemetry(&output)
}

// =============================================================================
// Spin
// =============================================================================

/// Rotate `angle_deg` at `speed_deg_per_sec` and check the rotation.
///
/// With `test_speed` the sampled angular speed is checked too; without it the
/// call must finish within the configured spin time ceiling instead.
pub async fn spin(
    env: &RunnerEnv,
    rig: &BaseUnderTest,
    angle_deg: f64,
    speed_deg_per_sec: f64,
    test_speed: bool,
) -> RunnerResult {
    let params = format!("distance={angle_deg}, speed={speed_deg_per_sec}");
    let angle = MotionGoal::resolved(GoalKind::Distance, angle_deg, angle_deg, speed_deg_per_sec);
    let speed = angle.along(GoalKind::AngularVelocity, speed_deg_per_sec);
    let expected_angle = angle.target();
    let expected_speed = speed.target();

    reset_odometry(env, rig).await?;
    let start = rig
        .odometry
        .orientation()
        .await
        .map_err(|e| CanaryError::telemetry("odometry orientation", e))?;

    let time_est = (angle_deg / speed_deg_per_sec).abs();
    rig.traces.desired.append_record(
        &TraceRow::new(TraceTag::Spin, env.elapsed_ms())
            .with_velocity(0.0, expected_speed)
            .with_theta(start),
    );
    rig.traces.desired.append_record(
        &TraceRow::new(TraceTag::Spin, env.elapsed_ms() + (time_est * 1000.0) as i64)
            .with_velocity(0.0, expected_speed)
            .with_theta((start + expected_angle).rem_euclid(360.0)),
    );

    let sampler = env.base_sampler(rig, TraceTag::Spin, 0.0, expected_speed, time_est);
    let started = Instant::now();
    let (result, output) =
        run_with_sampler(sampler, rig.base.spin(angle_deg, speed_deg_per_sec)).await;
    let elapsed = started.elapsed();
    result.map_err(|e| CanaryError::command("Spin", params.as_str(), e))?;

    let end = rig
        .odometry
        .orientation()
        .await
        .map_err(|e| CanaryError::telemetry("odometry orientation", e))?;
    let turned = dist_between_angles(end, start, expected_angle);
    let speed_est = output.secondary.achieved_value;
    info!(
        device = %rig.name,
        command = "Spin",
        expected = %params,
        measured_angle = turned,
        measured_speed = speed_est,
        elapsed_s = elapsed.as_secs_f64(),
        "Spin finished"
    );

    expect_within("angle", angle.band(), turned)?;
    if test_speed {
        expect_within("angular speed", speed.band(), speed_est)?;
        expect_telemetry(&output)
    } else {
        let ceiling = env.timing.spin_time_ceiling().as_secs_f64();
        expect_within(
            "spin duration (s)",
            ToleranceBand::fixed(0.0, ceiling),
            elapsed.as_secs_f64(),
        )
    }
}

// =============================================================================
// SetPower
// =============================================================================

/// Drive open-loop at `power` and check that the base moves the right way.
///
/// The angular fraction is `1 - power` for forward power and zero otherwise.
pub async fn set_power(env: &RunnerEnv, rig: &BaseUnderTest, power: f64) -> RunnerResult {
    let angular = if power > 0.0 { 1.0 - power } else { 0.0 };
    let params = format!("linear={power}, angular={angular}");

    let checks = async {
        rig.base
            .set_power(Vector3::forward(power), Vector3::yaw(angular))
            .await
            .map_err(|e| CanaryError::command("SetPower", params.as_str(), e))?;
        sleep(env.timing.base_power_settle()).await;

        if !is_moving(rig).await? {
            return Err(CanaryError::InvariantViolation(format!(
                "{} not moving after SetPower({params})",
                rig.name
            )));
        }

        let linear = rig
            .odometry
            .linear_velocity()
            .await
            .map_err(|e| CanaryError::telemetry("odometry linear velocity", e))?;
        let spin = rig
            .odometry
            .angular_velocity()
            .await
            .map_err(|e| CanaryError::telemetry("odometry angular velocity", e))?;
        info!(
            device = %rig.name,
            command = "SetPower",
            expected = %params,
            measured_linear = linear.y,
            measured_angular = spin.z,
            "Open-loop power applied"
        );

        let wrong_way = if power < 0.0 {
            linear.y > 0.0
        } else {
            linear.y < 0.0 || spin.z < 0.0
        };
        if wrong_way {
            return Err(CanaryError::InvariantViolation(format!(
                "{} moving against SetPower({params}): linear={}, angular={}",
                rig.name, linear.y, spin.z
            )));
        }
        Ok(())
    }
    .await;

    let stopped = stop(rig).await;
    checks.and(stopped)?;

    if is_moving(rig).await? {
        return Err(CanaryError::InvariantViolation(format!(
            "{} still moving after Stop",
            rig.name
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RunConfig;
    use crate::hardware::mock::{RoverFaults, SimulatedRover};
    use crate::procedures::FailureKind;
    use crate::report::{MemorySink, TraceSinks};
    use std::sync::Arc;

    fn rig_on(rover: &SimulatedRover) -> BaseUnderTest {
        BaseUnderTest {
            name: "viam_base".to_string(),
            base: Arc::new(rover.base("viam_base")),
            odometry: Arc::new(rover.odometry("odometry")),
            min_linear_velocity: 100.0,
            min_angular_velocity: 30.0,
            traces: TraceSinks::null(),
        }
    }

    fn env() -> RunnerEnv {
        RunnerEnv {
            timing: RunConfig::immediate(),
            run_start: Instant::now(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_set_velocity_passes_on_healthy_base() {
        let rover = SimulatedRover::new();
        let rig = rig_on(&rover);
        assert!(set_velocity(&env(), &rig, 100.0, 0.0).await.is_ok());
        assert!(set_velocity(&env(), &rig, 0.0, 90.0).await.is_ok());
        assert!(!rig.base.is_moving().await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_set_velocity_detects_slow_base() {
        let rover = SimulatedRover::with_faults(RoverFaults::default().with_speed_scale(0.2));
        let rig = rig_on(&rover);
        let err = set_velocity(&env(), &rig, 250.0, 0.0).await.unwrap_err();
        assert_eq!(err.kind(), FailureKind::Tolerance);
        assert!(err.to_string().contains("linear velocity"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_consecutive_set_velocity() {
        let rover = SimulatedRover::new();
        let rig = rig_on(&rover);
        assert!(consecutive_set_velocity(&env(), &rig).await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_move_straight_negative_distance_and_speed() {
        let rover = SimulatedRover::new();
        let rig = rig_on(&rover);
        assert!(move_straight(&env(), &rig, -1000.0, -250.0).await.is_ok());
        assert!(move_straight(&env(), &rig, 1000.0, -50.0).await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_move_straight_writes_traces() {
        let rover = SimulatedRover::new();
        let desired = Arc::new(MemorySink::new());
        let measured = Arc::new(MemorySink::new());
        let rig = BaseUnderTest {
            traces: TraceSinks {
                desired: desired.clone(),
                measured: measured.clone(),
            },
            ..rig_on(&rover)
        };

        move_straight(&env(), &rig, 100.0, 50.0).await.unwrap();

        let planned = desired.rows();
        assert_eq!(planned.len(), 2);
        assert_eq!(planned[1].pos_x, 100.0);
        let sampled = measured.rows();
        assert!(sampled.len() >= 15);
        assert!(sampled.iter().all(|row| row.tag == TraceTag::MoveStraight));
    }

    #[tokio::test(start_paused = true)]
    async fn test_spin_without_speed_check() {
        let rover = SimulatedRover::new();
        let rig = rig_on(&rover);
        assert!(spin(&env(), &rig, 40.0, 20.0, false).await.is_ok());
        assert!(spin(&env(), &rig, 40.0, -60.0, false).await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_spin_too_slow_exceeds_time_ceiling() {
        let rover = SimulatedRover::with_faults(RoverFaults::default().with_speed_scale(0.1));
        let rig = rig_on(&rover);
        let err = spin(&env(), &rig, 40.0, 20.0, false).await.unwrap_err();
        assert!(err.to_string().contains("spin duration"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_spin_full_turn_with_speed_check() {
        let rover = SimulatedRover::new();
        let rig = rig_on(&rover);
        assert!(spin(&env(), &rig, -360.0, -90.0, true).await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_set_power_directions() {
        let rover = SimulatedRover::new();
        let rig = rig_on(&rover);
        for power in [0.1, 0.9, -0.5] {
            assert!(set_power(&env(), &rig, power).await.is_ok(), "power {power}");
        }
        assert!(!rig.base.is_moving().await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_command_failure_is_reported_as_command() {
        let rover =
            SimulatedRover::with_faults(RoverFaults::default().with_failing_command("move_straight"));
        let rig = rig_on(&rover);
        let err = move_straight(&env(), &rig, 100.0, 50.0).await.unwrap_err();
        assert_eq!(err.kind(), FailureKind::Command);
        assert!(err.to_string().contains("MoveStraight (distance=100, speed=50)"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_odometry_failure_fails_move() {
        let rover = SimulatedRover::with_faults(RoverFaults::default().with_telemetry_failure());
        let rig = rig_on(&rover);
        let err = move_straight(&env(), &rig, 100.0, 50.0).await.unwrap_err();
        assert!(matches!(
            err.kind(),
            FailureKind::Command | FailureKind::Telemetry
        ));
    }
}
