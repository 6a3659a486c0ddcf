//! Static sensor checks: encoder agreement, power monitor readings and IMU gravity.

use crate::config::{ImuConfig, PowerSensorConfig};
use crate::error::CanaryError;
use crate::hardware::capabilities::{MovementSensor, PowerSensor};
use crate::procedures::{expect_within, MotorUnderTest, RunnerResult};
use crate::sampling::ToleranceBand;
use std::fmt;
use tracing::info;

/// Largest acceptable disagreement between encoder ticks and motor position.
pub const ENCODER_TICK_TOLERANCE: f64 = 10.0;

/// Encoder ticks must track the motor position, and both must reset to zero.
pub async fn encoder_agreement(rig: &MotorUnderTest) -> RunnerResult {
    let encoder_name = rig.encoder.name().to_string();

    rig.motor
        .reset_zero_position(0.0)
        .await
        .map_err(|e| CanaryError::command("ResetZeroPosition", "offset=0", e))?;

    let (position, ticks) = read_pair(rig).await?;
    info!(
        device = %encoder_name,
        motor_position = position,
        measured = ticks,
        expected = position * rig.ticks_per_rotation,
        "Encoder read"
    );
    expect_within(
        "encoder ticks",
        ToleranceBand::fixed(position * rig.ticks_per_rotation, ENCODER_TICK_TOLERANCE),
        ticks,
    )?;

    rig.encoder
        .reset_position()
        .await
        .map_err(|e| CanaryError::command("ResetPosition", encoder_name.as_str(), e))?;

    let (position, ticks) = read_pair(rig).await?;
    let expected = position * rig.ticks_per_rotation;
    if ticks != expected || ticks != 0.0 {
        return Err(CanaryError::InvariantViolation(format!(
            "{encoder_name} reads {ticks} ticks after ResetPosition, motor {} reads {expected} ticks",
            rig.name
        )));
    }
    Ok(())
}

async fn read_pair(rig: &MotorUnderTest) -> Result<(f64, f64), CanaryError> {
    let position = rig
        .motor
        .position()
        .await
        .map_err(|e| CanaryError::telemetry(format!("{} Position", rig.name), e))?;
    let ticks = rig
        .encoder
        .position()
        .await
        .map_err(|e| CanaryError::telemetry(format!("{} Position", rig.encoder.name()), e))?;
    Ok((position, ticks))
}

/// Quantity read from a power monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerQuantity {
    /// Bus voltage (V)
    Voltage,
    /// Current draw (A)
    Current,
    /// Power (W)
    Power,
}

impl PowerQuantity {
    /// All quantities, in catalogue order
    pub const ALL: [PowerQuantity; 3] = [Self::Voltage, Self::Current, Self::Power];

    /// `(expected, tolerance)` for this quantity
    pub fn expectation(&self, config: &PowerSensorConfig) -> (f64, f64) {
        match self {
            Self::Voltage => (config.voltage, config.voltage_tolerance),
            Self::Current => (config.current, config.current_tolerance),
            Self::Power => (config.power, config.power_tolerance),
        }
    }
}

impl fmt::Display for PowerQuantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Voltage => write!(f, "Voltage"),
            Self::Current => write!(f, "Current"),
            Self::Power => write!(f, "Power"),
        }
    }
}

/// Read one quantity and compare it with the configured expectation.
pub async fn power_reading(
    sensor: &dyn PowerSensor,
    quantity: PowerQuantity,
    config: &PowerSensorConfig,
) -> RunnerResult {
    let reading = match quantity {
        PowerQuantity::Voltage => sensor.voltage().await,
        PowerQuantity::Current => sensor.current().await,
        PowerQuantity::Power => sensor.power().await,
    }
    .map_err(|e| CanaryError::telemetry(format!("{} {quantity}", sensor.name()), e))?;

    let (expected, tolerance) = quantity.expectation(config);
    info!(device = sensor.name(), quantity = %quantity, expected, measured = reading, "Power monitor read");
    expect_within(
        &quantity.to_string().to_lowercase(),
        ToleranceBand::fixed(expected, tolerance),
        reading,
    )
}

/// A resting IMU must measure gravity on its vertical axis.
pub async fn imu_gravity(imu: &dyn MovementSensor, config: &ImuConfig) -> RunnerResult {
    let acceleration = imu
        .linear_acceleration()
        .await
        .map_err(|e| CanaryError::telemetry(format!("{} LinearAcceleration", imu.name()), e))?;
    info!(device = imu.name(), expected = config.gravity, measured = acceleration.z, "IMU read");
    expect_within(
        "vertical acceleration",
        ToleranceBand::fixed(config.gravity, config.gravity * config.tolerance_fraction),
        acceleration.z,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware::capabilities::Motor;
    use crate::hardware::mock::{MockPowerSensor, SimulatedImu, SimulatedMotor};
    use crate::procedures::FailureKind;
    use crate::report::TraceSinks;
    use std::sync::Arc;

    fn rig(motor: SimulatedMotor) -> MotorUnderTest {
        MotorUnderTest {
            name: "right".to_string(),
            encoder: Arc::new(motor.encoder("right-enc")),
            motor: Arc::new(motor),
            ticks_per_rotation: 1992.0,
            traces: TraceSinks::null(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_encoder_agrees_after_motion() {
        let motor = SimulatedMotor::new("right", 1992.0);
        motor.go_for(60.0, 2.5).await.unwrap();
        assert!(encoder_agreement(&rig(motor)).await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_encoder_detects_drifting_motor() {
        let motor = SimulatedMotor::new("right", 1992.0);
        let rig = MotorUnderTest {
            ticks_per_rotation: 2048.0,
            ..rig(motor.clone())
        };
        motor.set_rpm(60.0).await.unwrap();
        // Zeroed, so no motion has accumulated yet.
        assert!(encoder_agreement(&rig).await.is_ok());

        tokio::time::sleep(std::time::Duration::from_secs(1)).await;
        let (position, ticks) = read_pair(&rig).await.unwrap();
        assert!((position * rig.ticks_per_rotation - ticks).abs() > ENCODER_TICK_TOLERANCE);
    }

    #[tokio::test]
    async fn test_power_readings_within_expectation() {
        let config = PowerSensorConfig::default();
        let sensor = MockPowerSensor::new("ina219", 15.2, 0.29);
        for quantity in PowerQuantity::ALL {
            assert!(power_reading(&sensor, quantity, &config).await.is_ok(), "{quantity}");
        }
    }

    #[tokio::test]
    async fn test_power_reading_out_of_range() {
        let config = PowerSensorConfig::default();
        let sagging = MockPowerSensor::new("ina219", 11.0, 0.29);
        let err = power_reading(&sagging, PowerQuantity::Voltage, &config)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), FailureKind::Tolerance);
        assert!(err.to_string().contains("voltage"));
    }

    #[tokio::test]
    async fn test_imu_gravity() {
        let config = ImuConfig::default();
        assert!(imu_gravity(&SimulatedImu::new("imu", 9.81), &config).await.is_ok());
        assert!(imu_gravity(&SimulatedImu::new("imu", 0.0), &config).await.is_err());
    }
}
