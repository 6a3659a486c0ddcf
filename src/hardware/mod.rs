//! Rover Hardware Abstractions
//!
//! Capability traits consumed by the canary runners, plus a simulated rover
//! that implements them.

pub mod capabilities;
pub mod mock;

pub use capabilities::{
    is_cancelled, Base, Cancelled, Encoder, GeoPoint, Motor, MovementSensor,
    PositionQueryOptions, PowerSensor, Vector3,
};
pub use mock::{
    MockPowerSensor, MotorFaults, RoverFaults, SimulatedBase, SimulatedEncoder, SimulatedImu,
    SimulatedMotor, SimulatedOdometry, SimulatedRover,
};
