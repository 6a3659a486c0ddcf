//! Telemetry Sampling and Convergence
//!
//! - [`tolerance`]: tolerance bands, direction signs, angle-wrap arithmetic
//! - [`sampler`]: the background telemetry sampler and its convergence judge

pub mod sampler;
pub mod tolerance;

pub use sampler::{
    ConvergenceResult, SamplePosition, SampleRecord, Sampler, SamplerHandle, SamplerOutput,
    TelemetrySource, DEFAULT_TICK_INTERVAL, FAILURE_SENTINEL,
};
pub use tolerance::{
    dist_between_angles, is_within_tolerance, resolve_direction, sign, tolerance_width, GoalKind,
    MotionGoal, ToleranceBand,
};
