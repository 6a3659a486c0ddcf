//! Tolerance bands, direction signs and angle-wrap arithmetic.
//!
//! Every check in the canary compares an achieved value against
//! `|requested| × direction` inside a band whose width grows with the goal and
//! never collapses to zero.

use serde::{Deserialize, Serialize};

/// Floor of the linear velocity band (mm/s).
pub const LINEAR_VELOCITY_FLOOR: f64 = 50.0;

/// Floor of the angular velocity band (deg/s).
pub const ANGULAR_VELOCITY_FLOOR: f64 = 15.0;

/// Floor of the motor speed band (rpm).
pub const RPM_FLOOR: f64 = 5.0;

/// Floor used for displacement checks (mm, degrees or revolutions).
pub const DISPLACEMENT_FLOOR: f64 = 1.0e-3;

/// Relative width used by velocity and rpm checks.
pub const SPEED_FACTOR: f64 = 0.5;

/// Relative width used by distance, angle and revolution checks.
pub const DISTANCE_FACTOR: f64 = 0.3;

/// Raw orientation deltas this close to zero are never sign-corrected.
pub const WRAP_DEADBAND_DEG: f64 = 10.0;

/// Largest acceptable error of an absolute motor position (revolutions).
pub const ABSOLUTE_POSITION_TOLERANCE: f64 = 1.0;

/// Smallest width any band may have.
const MIN_BAND_WIDTH: f64 = f64::EPSILON;

/// Acceptance window around an expected value.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ToleranceBand {
    /// Expected value
    pub center: f64,
    /// Half-width of the window, always strictly positive
    pub absolute_width: f64,
}

impl ToleranceBand {
    /// Band of width `max(floor, |goal| × relative_factor)` around `goal`.
    pub fn new(goal: f64, relative_factor: f64, floor: f64) -> Self {
        Self {
            center: goal,
            absolute_width: tolerance_width(goal, relative_factor, floor),
        }
    }

    /// Band of fixed `width` around `goal`.
    pub fn fixed(goal: f64, width: f64) -> Self {
        Self {
            center: goal,
            absolute_width: width.abs().max(MIN_BAND_WIDTH),
        }
    }

    /// Velocity band (mm/s) for a base linear goal.
    pub fn linear_velocity(goal: f64) -> Self {
        Self::new(goal, SPEED_FACTOR, LINEAR_VELOCITY_FLOOR)
    }

    /// Velocity band (deg/s) for a base angular goal.
    pub fn angular_velocity(goal: f64) -> Self {
        Self::new(goal, SPEED_FACTOR, ANGULAR_VELOCITY_FLOOR)
    }

    /// Speed band for a motor rpm goal.
    pub fn rpm(goal: f64) -> Self {
        Self::new(goal, SPEED_FACTOR, RPM_FLOOR)
    }

    /// Displacement band for a distance, angle or revolution goal.
    pub fn displacement(goal: f64) -> Self {
        Self::new(goal, DISTANCE_FACTOR, DISPLACEMENT_FLOOR)
    }

    /// Whether `sample` lies inside the band (edges included).
    pub fn contains(&self, sample: f64) -> bool {
        (self.center - sample).abs() <= self.absolute_width
    }
}

/// Width of a band: `max(floor, |goal| × relative_factor)`, never zero.
pub fn tolerance_width(goal: f64, relative_factor: f64, floor: f64) -> f64 {
    floor
        .abs()
        .max(goal.abs() * relative_factor.abs())
        .max(MIN_BAND_WIDTH)
}

/// Returns true if `|goal - sample| <= max(floor, |goal| × relative_factor)`.
pub fn is_within_tolerance(goal: f64, sample: f64, relative_factor: f64, floor: f64) -> bool {
    ToleranceBand::new(goal, relative_factor, floor).contains(sample)
}

/// Sign with `sign(0) = +1`.
pub fn sign(value: f64) -> f64 {
    if value < 0.0 {
        -1.0
    } else {
        1.0
    }
}

/// Direction of travel for a (distance, speed) pair: -1 if `a × b < 0`, else +1.
pub fn resolve_direction(a: f64, b: f64) -> f64 {
    sign(a * b)
}

/// What a goal value measures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GoalKind {
    /// Base linear velocity (mm/s)
    LinearVelocity,
    /// Base angular velocity (deg/s)
    AngularVelocity,
    /// Straight-line distance (mm) or rotation (degrees)
    Distance,
    /// Motor revolutions
    Revolutions,
    /// Motor absolute position (revolutions)
    AbsolutePosition,
    /// Motor speed (rpm)
    Rpm,
    /// Open-loop power fraction
    PowerFraction,
}

/// Magnitude and direction of one expected quantity.
///
/// Runners check achieved values against [`target`](Self::target), never
/// against the raw request, because distance and speed may each be negative.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MotionGoal {
    /// Quantity measured
    pub kind: GoalKind,
    /// Magnitude, never negative
    pub value: f64,
    /// +1 or -1
    pub direction: f64,
}

impl MotionGoal {
    /// Goal of magnitude `|requested|` in `direction`'s sign
    pub fn new(kind: GoalKind, requested: f64, direction: f64) -> Self {
        Self {
            kind,
            value: requested.abs(),
            direction: sign(direction),
        }
    }

    /// Goal carrying the sign of `value` itself
    pub fn signed(kind: GoalKind, value: f64) -> Self {
        Self::new(kind, value, value)
    }

    /// Goal of magnitude `|requested|` in the direction of the `(a, b)` pair
    pub fn resolved(kind: GoalKind, requested: f64, a: f64, b: f64) -> Self {
        Self::new(kind, requested, resolve_direction(a, b))
    }

    /// Another goal of `kind` travelling in this goal's direction
    pub fn along(&self, kind: GoalKind, requested: f64) -> Self {
        Self::new(kind, requested, self.direction)
    }

    /// Signed expected value, `|requested| × direction`
    pub fn target(&self) -> f64 {
        self.value * self.direction
    }

    /// Band an achieved value is validated against after the command.
    pub fn band(&self) -> ToleranceBand {
        let target = self.target();
        match self.kind {
            GoalKind::LinearVelocity | GoalKind::AngularVelocity | GoalKind::Rpm => {
                ToleranceBand::new(target, SPEED_FACTOR, DISPLACEMENT_FLOOR)
            }
            GoalKind::Distance | GoalKind::Revolutions => ToleranceBand::displacement(target),
            GoalKind::AbsolutePosition => ToleranceBand::fixed(target, ABSOLUTE_POSITION_TOLERANCE),
            GoalKind::PowerFraction => ToleranceBand::new(target, DISTANCE_FACTOR, 0.0),
        }
    }

    /// Band the sampler judges individual samples against.
    ///
    /// Velocity goals get the per-axis floors so a zero goal still accepts
    /// sensor noise.
    pub fn convergence_band(&self) -> ToleranceBand {
        let target = self.target();
        match self.kind {
            GoalKind::LinearVelocity => ToleranceBand::linear_velocity(target),
            GoalKind::AngularVelocity => ToleranceBand::angular_velocity(target),
            GoalKind::Rpm => ToleranceBand::rpm(target),
            _ => self.band(),
        }
    }
}

/// Signed rotation (degrees) between two wrapped orientations.
///
/// `requested_deg` is the signed rotation that was commanded. The raw delta is
/// corrected by one revolution when its sign disagrees with the request
/// (outside [`WRAP_DEADBAND_DEG`] of zero), and whole revolutions contained in
/// the request are added back on top, since wrapped orientations cannot
/// express them.
pub fn dist_between_angles(end_deg: f64, start_deg: f64, requested_deg: f64) -> f64 {
    let dir = sign(requested_deg);
    let turns = ((requested_deg.abs().trunc() as i64) / 360 % 360) as f64;
    let multi_turn = dir * 360.0 * turns;
    let remainder = requested_deg - multi_turn;

    let mut raw = end_deg - start_deg;

    // A whole turn stopping just short of its start reads as almost a full turn.
    if remainder.abs() < WRAP_DEADBAND_DEG && raw.abs() > 360.0 - WRAP_DEADBAND_DEG {
        raw -= sign(raw) * 360.0;
    }

    if sign(raw) != dir && raw.abs() >= WRAP_DEADBAND_DEG {
        raw += dir * 360.0;
    }

    raw + multi_turn
}
