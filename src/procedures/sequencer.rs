//! Test Sequencer
//!
//! Enumerates the fixed canary catalogue and runs it case by case through a
//! [`TestRunContext`]. Cases refer to devices by their index in the [`Fleet`],
//! in configuration order.

use crate::config::CanaryConfig;
use crate::error::{AppResult, CanaryError};
use crate::hardware::capabilities::{MovementSensor, PowerSensor};
use crate::hardware::mock::{MockPowerSensor, SimulatedImu, SimulatedMotor, SimulatedRover};
use crate::procedures::sensor_checks::PowerQuantity;
use crate::procedures::{
    base_motion, grid, motor_motion, sensor_checks, BaseUnderTest, MotorUnderTest, RunSummary,
    RunnerEnv, RunnerResult, TestRunContext,
};
use crate::report::{TraceGroup, TraceSinks};
use std::path::Path;
use std::sync::Arc;
use tracing::info;

/// One entry of the catalogue.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TestCase {
    /// Hold a base velocity
    SetVelocity {
        /// Base index
        base: usize,
        /// mm/s
        linear: f64,
        /// deg/s
        angular: f64,
    },
    /// 200 mm/s, then the base's minimum linear velocity
    ConsecutiveVelocity {
        /// Base index
        base: usize,
    },
    /// Straight move
    MoveStraight {
        /// Base index
        base: usize,
        /// mm
        distance: f64,
        /// mm/s
        speed: f64,
    },
    /// In-place rotation
    Spin {
        /// Base index
        base: usize,
        /// deg
        angle: f64,
        /// deg/s
        speed: f64,
        /// Check the sampled angular speed
        test_speed: bool,
    },
    /// Open-loop base power
    BaseSetPower {
        /// Base index
        base: usize,
        /// Linear power fraction
        power: f64,
    },
    /// Motor GoFor
    GoFor {
        /// Motor index
        motor: usize,
        /// Revolutions per minute
        rpm: f64,
        /// Revolutions
        revolutions: f64,
    },
    /// Motor GoTo
    GoTo {
        /// Motor index
        motor: usize,
        /// Revolutions per minute
        rpm: f64,
        /// Target position (revolutions)
        position: f64,
    },
    /// Motor rpm hold
    SetRpm {
        /// Motor index
        motor: usize,
        /// Revolutions per minute
        rpm: f64,
    },
    /// 30 rpm, then 60 rpm
    ConsecutiveRpm {
        /// Motor index
        motor: usize,
    },
    /// Open-loop motor power
    MotorSetPower {
        /// Motor index
        motor: usize,
        /// Power fraction
        power: f64,
    },
    /// Encoder against motor position
    Encoder {
        /// Motor index
        motor: usize,
    },
    /// One power monitor reading
    Power(PowerQuantity),
    /// IMU gravity
    Gravity,
    /// Grid path on the configured grid base
    Grid,
}

/// Devices exercised by a run.
#[derive(Clone)]
pub struct Fleet {
    /// Bases, in configuration order
    pub bases: Vec<BaseUnderTest>,
    /// Motors and their encoders, in configuration order
    pub motors: Vec<MotorUnderTest>,
    /// Power monitor
    pub power_sensor: Arc<dyn PowerSensor>,
    /// IMU
    pub imu: Arc<dyn MovementSensor>,
    /// Trace sinks of the grid test
    pub grid_traces: TraceSinks,
}

impl Fleet {
    /// Wire the configured devices onto simulated hardware.
    ///
    /// Every base shares `rover`'s body and one odometry handle. With a
    /// `trace_root`, each device group writes CSV traces below it.
    pub fn simulated(
        config: &CanaryConfig,
        rover: &SimulatedRover,
        trace_root: Option<&Path>,
    ) -> AppResult<Self> {
        let traces = |group: TraceGroup| match trace_root {
            Some(root) => TraceSinks::csv(root, group),
            None => Ok(TraceSinks::null()),
        };

        let odometry: Arc<dyn MovementSensor> = Arc::new(rover.odometry(config.odometry.as_str()));
        let mut bases = Vec::with_capacity(config.bases.len());
        for (index, base) in config.bases.iter().enumerate() {
            bases.push(BaseUnderTest {
                name: base.name.clone(),
                base: Arc::new(rover.base(base.name.as_str())),
                odometry: Arc::clone(&odometry),
                min_linear_velocity: base.min_linear_velocity,
                min_angular_velocity: base.min_angular_velocity,
                traces: traces(TraceGroup::for_base(index))?,
            });
        }

        let mut motors = Vec::with_capacity(config.motors.len());
        for (index, motor) in config.motors.iter().enumerate() {
            let simulated = SimulatedMotor::new(motor.name.as_str(), motor.ticks_per_rotation);
            motors.push(MotorUnderTest {
                name: motor.name.clone(),
                encoder: Arc::new(simulated.encoder(motor.encoder.as_str())),
                motor: Arc::new(simulated),
                ticks_per_rotation: motor.ticks_per_rotation,
                traces: traces(TraceGroup::for_motor(index))?,
            });
        }

        let power = &config.power_sensor;
        Ok(Self {
            bases,
            motors,
            power_sensor: Arc::new(MockPowerSensor::new(
                power.name.as_str(),
                power.voltage,
                power.current,
            )),
            imu: Arc::new(SimulatedImu::new(config.imu.name.as_str(), config.imu.gravity)),
            grid_traces: traces(TraceGroup::Grid)?,
        })
    }
}

impl std::fmt::Debug for Fleet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Fleet")
            .field("bases", &self.bases.iter().map(|b| &b.name).collect::<Vec<_>>())
            .field("motors", &self.motors.iter().map(|m| &m.name).collect::<Vec<_>>())
            .field("power_sensor", &self.power_sensor.name())
            .field("imu", &self.imu.name())
            .finish()
    }
}

/// Runs the canary catalogue over a [`Fleet`].
#[derive(Debug)]
pub struct Sequencer {
    config: CanaryConfig,
    fleet: Fleet,
}

impl Sequencer {
    /// Create a sequencer for `fleet`
    pub fn new(config: CanaryConfig, fleet: Fleet) -> Self {
        Self { config, fleet }
    }

    /// The ordered catalogue: bases, motors, encoders, power monitor, IMU, grid.
    pub fn catalogue(&self) -> Vec<TestCase> {
        let mut cases = Vec::new();

        for (base, rig) in self.fleet.bases.iter().enumerate() {
            let min_lin = rig.min_linear_velocity;
            let min_ang = rig.min_angular_velocity;
            for (linear, angular) in [
                (min_lin, 0.0),
                (-250.0, 0.0),
                (0.0, -min_ang),
                (0.0, 90.0),
                (200.0, 45.0),
            ] {
                cases.push(TestCase::SetVelocity {
                    base,
                    linear,
                    angular,
                });
            }
            cases.push(TestCase::ConsecutiveVelocity { base });
            for (distance, speed) in [(100.0, 50.0), (-100.0, 250.0), (1000.0, -50.0), (-1000.0, -250.0)] {
                cases.push(TestCase::MoveStraight {
                    base,
                    distance,
                    speed,
                });
            }
            for (angle, speed, test_speed) in [
                (40.0, 20.0, false),
                (40.0, -60.0, false),
                (-360.0, 20.0, true),
                (-360.0, -90.0, true),
            ] {
                cases.push(TestCase::Spin {
                    base,
                    angle,
                    speed,
                    test_speed,
                });
            }
            for power in [0.1, 0.9, -0.5] {
                cases.push(TestCase::BaseSetPower { base, power });
            }
        }

        for motor in 0..self.fleet.motors.len() {
            for (rpm, revolutions) in [(10.0, 1.0), (50.0, -5.0), (-10.0, 5.0), (-50.0, -5.0)] {
                cases.push(TestCase::GoFor {
                    motor,
                    rpm,
                    revolutions,
                });
            }
            for (rpm, position) in [(50.0, -5.0), (10.0, 0.0)] {
                cases.push(TestCase::GoTo {
                    motor,
                    rpm,
                    position,
                });
            }
            for rpm in [10.0, -50.0] {
                cases.push(TestCase::SetRpm { motor, rpm });
            }
            cases.push(TestCase::ConsecutiveRpm { motor });
            for power in [0.1, -0.9] {
                cases.push(TestCase::MotorSetPower { motor, power });
            }
        }

        cases.extend((0..self.fleet.motors.len()).map(|motor| TestCase::Encoder { motor }));
        cases.extend(PowerQuantity::ALL.into_iter().map(TestCase::Power));
        cases.push(TestCase::Gravity);
        cases.push(TestCase::Grid);
        cases
    }

    /// Failure label of `case`, e.g. `viam_base SetVelocity: linear=100, angular=0`.
    pub fn label(&self, case: &TestCase) -> String {
        let base = |i: usize| self.fleet.bases.get(i).map_or("<missing base>", |b| b.name.as_str());
        let motor = |i: usize| self.fleet.motors.get(i).map_or("<missing motor>", |m| m.name.as_str());
        match *case {
            TestCase::SetVelocity {
                base: i,
                linear,
                angular,
            } => format!("{} SetVelocity: linear={linear}, angular={angular}", base(i)),
            TestCase::ConsecutiveVelocity { base: i } => {
                format!("{} ConsecutiveSetVelocity", base(i))
            }
            TestCase::MoveStraight {
                base: i,
                distance,
                speed,
            } => format!("{} MoveStraight: distance={distance}, speed={speed}", base(i)),
            TestCase::Spin {
                base: i,
                angle,
                speed,
                test_speed,
            } => format!(
                "{} Spin: distance={angle}, speed={speed}, test_speed={test_speed}",
                base(i)
            ),
            TestCase::BaseSetPower { base: i, power } => {
                format!("{} SetPower: power={power}", base(i))
            }
            TestCase::GoFor {
                motor: i,
                rpm,
                revolutions,
            } => format!("{} GoFor: rpm={rpm}, revolutions={revolutions}", motor(i)),
            TestCase::GoTo {
                motor: i,
                rpm,
                position,
            } => format!("{} GoTo: rpm={rpm}, position={position}", motor(i)),
            TestCase::SetRpm { motor: i, rpm } => format!("{} SetRPM: rpm={rpm}", motor(i)),
            TestCase::ConsecutiveRpm { motor: i } => format!("{} ConsecutiveSetRPM", motor(i)),
            TestCase::MotorSetPower { motor: i, power } => {
                format!("{} SetPower: power={power}", motor(i))
            }
            TestCase::Encoder { motor: i } => match self.fleet.motors.get(i) {
                Some(rig) => format!("{} Position: motor={}", rig.encoder.name(), rig.name),
                None => "<missing encoder> Position".to_string(),
            },
            TestCase::Power(quantity) => format!("{} {quantity}", self.fleet.power_sensor.name()),
            TestCase::Gravity => format!("{} LinearAcceleration", self.fleet.imu.name()),
            TestCase::Grid => format!("{} Grid", self.config.grid.base),
        }
    }

    fn base(&self, index: usize) -> Result<&BaseUnderTest, CanaryError> {
        self.fleet
            .bases
            .get(index)
            .ok_or_else(|| CanaryError::Configuration(format!("no base at index {index}")))
    }

    fn motor(&self, index: usize) -> Result<&MotorUnderTest, CanaryError> {
        self.fleet
            .motors
            .get(index)
            .ok_or_else(|| CanaryError::Configuration(format!("no motor at index {index}")))
    }

    /// Run one case against the fleet.
    pub async fn execute(&self, env: &RunnerEnv, case: &TestCase) -> RunnerResult {
        match *case {
            TestCase::SetVelocity {
                base,
                linear,
                angular,
            } => base_motion::set_velocity(env, self.base(base)?, linear, angular).await,
            TestCase::ConsecutiveVelocity { base } => {
                base_motion::consecutive_set_velocity(env, self.base(base)?).await
            }
            TestCase::MoveStraight {
                base,
                distance,
                speed,
            } => base_motion::move_straight(env, self.base(base)?, distance, speed).await,
            TestCase::Spin {
                base,
                angle,
                speed,
                test_speed,
            } => base_motion::spin(env, self.base(base)?, angle, speed, test_speed).await,
            TestCase::BaseSetPower { base, power } => {
                base_motion::set_power(env, self.base(base)?, power).await
            }
            TestCase::GoFor {
                motor,
                rpm,
                revolutions,
            } => motor_motion::go_for(env, self.motor(motor)?, rpm, revolutions).await,
            TestCase::GoTo {
                motor,
                rpm,
                position,
            } => motor_motion::go_to(env, self.motor(motor)?, rpm, position).await,
            TestCase::SetRpm { motor, rpm } => {
                motor_motion::set_rpm(env, self.motor(motor)?, rpm).await
            }
            TestCase::ConsecutiveRpm { motor } => {
                motor_motion::consecutive_set_rpm(env, self.motor(motor)?).await
            }
            TestCase::MotorSetPower { motor, power } => {
                motor_motion::set_power(env, self.motor(motor)?, power).await
            }
            TestCase::Encoder { motor } => sensor_checks::encoder_agreement(self.motor(motor)?).await,
            TestCase::Power(quantity) => {
                sensor_checks::power_reading(
                    self.fleet.power_sensor.as_ref(),
                    quantity,
                    &self.config.power_sensor,
                )
                .await
            }
            TestCase::Gravity => {
                sensor_checks::imu_gravity(self.fleet.imu.as_ref(), &self.config.imu).await
            }
            TestCase::Grid => {
                let base = self
                    .fleet
                    .bases
                    .iter()
                    .find(|b| b.name == self.config.grid.base)
                    .ok_or_else(|| {
                        CanaryError::Configuration(format!(
                            "grid base '{}' is not in the fleet",
                            self.config.grid.base
                        ))
                    })?;
                let rig = BaseUnderTest {
                    traces: self.fleet.grid_traces.clone(),
                    ..base.clone()
                };
                grid::grid_test(env, &rig, &self.config.grid).await
            }
        }
    }

    /// Run the whole catalogue and deliver the summary.
    pub async fn run(&self, mut ctx: TestRunContext) -> RunSummary {
        let catalogue = self.catalogue();
        info!(tests = catalogue.len(), "Starting canary run");
        let env = ctx.env();
        for case in &catalogue {
            ctx.run_case(self.label(case), self.execute(&env, case)).await;
        }
        ctx.finish().await
    }
}
