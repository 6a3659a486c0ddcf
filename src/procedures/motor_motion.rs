//! Motor Motion Runners
//!
//! GoFor, GoTo, SetRPM holds and open-loop SetPower. Motor speed is estimated
//! by the sampler from position deltas, so every check here works in
//! revolutions and revolutions per minute.

use crate::error::CanaryError;
use crate::procedures::{
    expect_telemetry, expect_within, run_with_sampler, MotorUnderTest, RunnerEnv, RunnerResult,
};
use crate::report::{TraceRow, TraceTag};
use crate::sampling::{sign, GoalKind, MotionGoal};
use tokio::time::sleep;
use tracing::info;

/// Offset passed to `reset_zero_position` before GoTo.
pub const GOTO_ZERO_OFFSET: f64 = -2.0;

/// Position the motor must report after the GoTo zero reset.
pub const GOTO_EXPECTED_START: f64 = 2.0;

async fn position(rig: &MotorUnderTest) -> Result<f64, CanaryError> {
    rig.motor
        .position()
        .await
        .map_err(|e| CanaryError::telemetry(format!("{} Position", rig.name), e))
}

async fn stop(rig: &MotorUnderTest) -> RunnerResult {
    rig.motor
        .stop()
        .await
        .map_err(|e| CanaryError::command("Stop", rig.name.as_str(), e))
}

fn plan(rig: &MotorUnderTest, tag: TraceTag, time_ms: i64, rpm: f64, position: f64) {
    rig.traces
        .desired
        .append_record(&TraceRow::new(tag, time_ms).with_velocity(rpm, 0.0).with_position(position, 0.0));
}

// =============================================================================
// GoFor / GoTo
// =============================================================================

/// Turn `revolutions` at `rpm` and check the revolutions and the speed.
pub async fn go_for(env: &RunnerEnv, rig: &MotorUnderTest, rpm: f64, revolutions: f64) -> RunnerResult {
    let params = format!("rpm={rpm}, revolutions={revolutions}");
    let travel = MotionGoal::resolved(GoalKind::Revolutions, revolutions, rpm, revolutions);
    let speed = travel.along(GoalKind::Rpm, rpm);
    let expected_revolutions = travel.target();
    let expected_rpm = speed.target();

    let start = position(rig).await?;
    let time_est = (revolutions / rpm * 60.0).abs();
    plan(rig, TraceTag::GoFor, env.elapsed_ms(), expected_rpm, start);
    plan(
        rig,
        TraceTag::GoFor,
        env.elapsed_ms() + (time_est * 1000.0) as i64,
        expected_rpm,
        start + expected_revolutions,
    );

    let sampler = env.motor_sampler(rig, TraceTag::GoFor, expected_rpm, time_est);
    let (result, output) = run_with_sampler(sampler, rig.motor.go_for(rpm, revolutions)).await;
    result.map_err(|e| CanaryError::command("GoFor", params.as_str(), e))?;

    let turned = position(rig).await? - start;
    let rpm_est = output.primary.achieved_value;
    info!(
        device = %rig.name,
        command = "GoFor",
        expected = %params,
        measured_revolutions = turned,
        measured_rpm = rpm_est,
        "GoFor finished"
    );

    expect_within("revolutions", travel.band(), turned)?;
    expect_within("rpm", speed.band(), rpm_est)?;
    expect_telemetry(&output)
}

/// Re-zero the motor, move to `target` at `rpm` and check where it ended up.
///
/// After `reset_zero_position(-2)` the motor must report exactly `2`. That
/// pins the offset sign convention of the motor's zeroing call.
pub async fn go_to(env: &RunnerEnv, rig: &MotorUnderTest, rpm: f64, target: f64) -> RunnerResult {
    let params = format!("rpm={rpm}, position={target}");

    rig.motor
        .reset_zero_position(GOTO_ZERO_OFFSET)
        .await
        .map_err(|e| {
            CanaryError::command("ResetZeroPosition", format!("offset={GOTO_ZERO_OFFSET}"), e)
        })?;
    sleep(env.timing.goto_settle()).await;
    let start = position(rig).await?;

    let destination = MotionGoal::signed(GoalKind::AbsolutePosition, target);
    let speed = MotionGoal::resolved(GoalKind::Rpm, rpm, target - start, rpm);
    let expected_rpm = speed.target();
    let time_est = ((target - start) / rpm * 60.0).abs();
    plan(rig, TraceTag::GoTo, env.elapsed_ms(), expected_rpm, start);
    plan(
        rig,
        TraceTag::GoTo,
        env.elapsed_ms() + (time_est * 1000.0) as i64,
        expected_rpm,
        target,
    );

    let sampler = env.motor_sampler(rig, TraceTag::GoTo, expected_rpm, time_est);
    let (result, output) = run_with_sampler(sampler, rig.motor.go_to(rpm, target)).await;
    result.map_err(|e| CanaryError::command("GoTo", params.as_str(), e))?;

    let end = position(rig).await?;
    let rpm_est = output.primary.achieved_value;
    info!(
        device = %rig.name,
        command = "GoTo",
        expected = %params,
        start_position = start,
        measured_position = end,
        measured_rpm = rpm_est,
        "GoTo finished"
    );

    if start != GOTO_EXPECTED_START {
        return Err(CanaryError::InvariantViolation(format!(
            "{} reported start position {start} after ResetZeroPosition({GOTO_ZERO_OFFSET}), expected {GOTO_EXPECTED_START}",
            rig.name
        )));
    }
    expect_within("position", destination.band(), end)?;
    expect_within("rpm", MotionGoal::signed(GoalKind::Rpm, speed.value).band(), rpm_est.abs())?;
    expect_telemetry(&output)
}

// =============================================================================
// SetRPM
// =============================================================================

/// Hold `rpm`, sampling for the hold window after the ramp-up.
async fn hold_rpm(env: &RunnerEnv, rig: &MotorUnderTest, rpm: f64) -> RunnerResult {
    let params = format!("rpm={rpm}");
    plan(rig, TraceTag::Rpm, env.elapsed_ms(), rpm, 0.0);

    rig.motor
        .set_rpm(rpm)
        .await
        .map_err(|e| CanaryError::command("SetRPM", params.as_str(), e))?;
    sleep(env.timing.ramp_up()).await;

    let sampler = env.motor_sampler(rig, TraceTag::Rpm, rpm, env.timing.hold_window_secs);
    let window = sampler.time_budget();
    let (_, output) = run_with_sampler(sampler, async {
        sleep(window).await;
        Ok(())
    })
    .await;

    let rpm_est = output.primary.achieved_value;
    info!(
        device = %rig.name,
        command = "SetRPM",
        expected = %params,
        measured_rpm = rpm_est,
        "RPM hold sampled"
    );

    expect_within("rpm", MotionGoal::signed(GoalKind::Rpm, rpm).band(), rpm_est)?;
    expect_telemetry(&output)
}

/// Command `rpm`, hold it and check the sampled speed.
pub async fn set_rpm(env: &RunnerEnv, rig: &MotorUnderTest, rpm: f64) -> RunnerResult {
    let held = hold_rpm(env, rig, rpm).await;
    let stopped = stop(rig).await;
    held.and(stopped)
}

/// Hold 30 rpm, then step straight to 60 rpm.
pub async fn consecutive_set_rpm(env: &RunnerEnv, rig: &MotorUnderTest) -> RunnerResult {
    let legs = async {
        hold_rpm(env, rig, 30.0).await?;
        hold_rpm(env, rig, 60.0).await
    }
    .await;
    let stopped = stop(rig).await;
    legs.and(stopped)
}

// =============================================================================
// SetPower
// =============================================================================

/// Drive open-loop at `power`, then check the powered state, stop and direction.
pub async fn set_power(env: &RunnerEnv, rig: &MotorUnderTest, power: f64) -> RunnerResult {
    let params = format!("power={power}");
    let start = position(rig).await?;

    let powered = async {
        rig.motor
            .set_power(power)
            .await
            .map_err(|e| CanaryError::command("SetPower", params.as_str(), e))?;
        sleep(env.timing.motor_power_settle()).await;

        let (is_on, fraction) = rig
            .motor
            .is_powered()
            .await
            .map_err(|e| CanaryError::telemetry(format!("{} IsPowered", rig.name), e))?;
        info!(
            device = %rig.name,
            command = "SetPower",
            expected = power,
            measured = fraction,
            "Open-loop power applied"
        );
        if !is_on {
            return Err(CanaryError::InvariantViolation(format!(
                "{} not powered after SetPower({power})",
                rig.name
            )));
        }
        expect_within(
            "power",
            MotionGoal::signed(GoalKind::PowerFraction, power).band(),
            fraction,
        )
    }
    .await;

    let stopped = stop(rig).await;
    powered.and(stopped)?;

    let moving = rig
        .motor
        .is_moving()
        .await
        .map_err(|e| CanaryError::telemetry(format!("{} IsMoving", rig.name), e))?;
    if moving {
        return Err(CanaryError::InvariantViolation(format!(
            "{} still moving after Stop",
            rig.name
        )));
    }

    let delta = position(rig).await? - start;
    if sign(delta) != sign(power) {
        return Err(CanaryError::InvariantViolation(format!(
            "{} turned {delta} revolutions under SetPower({power})",
            rig.name
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RunConfig;
    use crate::hardware::mock::{MotorFaults, SimulatedMotor};
    use crate::procedures::FailureKind;
    use crate::report::TraceSinks;
    use std::sync::Arc;
    use tokio::time::Instant;

    fn rig(motor: SimulatedMotor) -> MotorUnderTest {
        MotorUnderTest {
            name: "left".to_string(),
            encoder: Arc::new(motor.encoder("left-enc")),
            motor: Arc::new(motor),
            ticks_per_rotation: 1992.0,
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
    async fn test_go_for_all_directions() {
        let rig = rig(SimulatedMotor::new("left", 1992.0));
        for (rpm, revolutions) in [(10.0, 1.0), (50.0, -5.0), (-10.0, 5.0), (-50.0, -5.0)] {
            let result = go_for(&env(), &rig, rpm, revolutions).await;
            assert!(result.is_ok(), "GoFor({rpm}, {revolutions}): {result:?}");
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_go_for_short_travel_fails() {
        let faults = MotorFaults {
            distance_scale: 0.5,
            ..MotorFaults::default()
        };
        let rig = rig(SimulatedMotor::with_faults("left", 1992.0, faults));
        let err = go_for(&env(), &rig, 50.0, 5.0).await.unwrap_err();
        assert_eq!(err.kind(), FailureKind::Tolerance);
        assert!(err.to_string().contains("revolutions"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_go_to_reaches_target() {
        let rig = rig(SimulatedMotor::new("left", 1992.0));
        assert!(go_to(&env(), &rig, 50.0, -5.0).await.is_ok());
        assert!(go_to(&env(), &rig, 10.0, 0.0).await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_go_to_pins_zero_offset_sign() {
        let faults = MotorFaults {
            inverted_zero_offset: true,
            ..MotorFaults::default()
        };
        let rig = rig(SimulatedMotor::with_faults("left", 1992.0, faults));
        let err = go_to(&env(), &rig, 50.0, -5.0).await.unwrap_err();
        assert_eq!(err.kind(), FailureKind::Invariant);
        assert!(err.to_string().contains("start position -2"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_set_rpm_holds() {
        let rig = rig(SimulatedMotor::new("left", 1992.0));
        assert!(set_rpm(&env(), &rig, 10.0).await.is_ok());
        assert!(set_rpm(&env(), &rig, -50.0).await.is_ok());
        assert!(consecutive_set_rpm(&env(), &rig).await.is_ok());
        assert!(!rig.motor.is_moving().await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_set_rpm_underperforming_motor() {
        let faults = MotorFaults {
            speed_scale: 0.3,
            ..MotorFaults::default()
        };
        let rig = rig(SimulatedMotor::with_faults("left", 1992.0, faults));
        let err = set_rpm(&env(), &rig, -50.0).await.unwrap_err();
        assert_eq!(err.kind(), FailureKind::Tolerance);
    }

    #[tokio::test(start_paused = true)]
    async fn test_set_power_both_directions() {
        let rig = rig(SimulatedMotor::new("left", 1992.0));
        let env = RunnerEnv {
            timing: RunConfig {
                motor_power_settle_ms: 2000,
                ..RunConfig::immediate()
            },
            run_start: Instant::now(),
        };
        assert!(set_power(&env, &rig, 0.1).await.is_ok());
        assert!(set_power(&env, &rig, -0.9).await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_set_power_rejected_fraction() {
        let rig = rig(SimulatedMotor::new("left", 1992.0));
        let err = set_power(&env(), &rig, 1.5).await.unwrap_err();
        assert_eq!(err.kind(), FailureKind::Command);
        assert!(!rig.motor.is_moving().await.unwrap());
    }
}
