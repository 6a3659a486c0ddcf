//! Grid Path Aggregate Test
//!
//! Drives a base along a fixed zig-zag of straight legs and 90° turns and
//! compares every odometry sample with the expected path:
//!
//! ```text
//!   L ← S ← ┐            L = long leg, S = short leg
//!           L
//!   ┌ → S → ┘ …
//!   L
//!   ● start, facing +x
//! ```
//!
//! Each sample is compared with its projection onto the current leg's
//! segment; the corner reached at the end of each leg is compared with the
//! expected corner. The test fails when the RMS error over all points exceeds
//! the configured threshold.

use crate::config::GridConfig;
use crate::error::CanaryError;
use crate::hardware::capabilities::{GeoPoint, PositionQueryOptions};
use crate::procedures::{expect_within, run_with_sampler, BaseUnderTest, RunnerEnv, RunnerResult};
use crate::report::{TraceRow, TraceTag};
use crate::sampling::{SamplePosition, ToleranceBand};
use serde::{Deserialize, Serialize};
use tokio::time::{sleep, Duration};
use tracing::info;

/// One step of the grid path.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum GridLeg {
    /// Straight move of this many millimetres
    Straight(f64),
    /// Turn left (counter-clockwise) 90°
    Left,
    /// Turn right (clockwise) 90°
    Right,
}

impl GridLeg {
    /// Heading change in degrees
    pub fn turn_deg(&self) -> f64 {
        match self {
            Self::Straight(_) => 0.0,
            Self::Left => 90.0,
            Self::Right => -90.0,
        }
    }
}

/// The canary grid: L, left, S, left, L, right, S, right, L, left, S, left, L.
pub fn grid_path(long_mm: f64, short_mm: f64) -> Vec<GridLeg> {
    use GridLeg::{Left, Right, Straight};
    vec![
        Straight(long_mm),
        Left,
        Straight(short_mm),
        Left,
        Straight(long_mm),
        Right,
        Straight(short_mm),
        Right,
        Straight(long_mm),
        Left,
        Straight(short_mm),
        Left,
        Straight(long_mm),
    ]
}

/// Point in the local frame of the last odometry reset (mm).
pub type LocalPoint = (f64, f64);

/// Expected segment of one straight leg.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Segment {
    /// Corner the leg starts from
    pub start: LocalPoint,
    /// Corner the leg ends at
    pub end: LocalPoint,
}

impl Segment {
    /// Closest point of the segment to `point`
    pub fn project(&self, point: LocalPoint) -> LocalPoint {
        let (dx, dy) = (self.end.0 - self.start.0, self.end.1 - self.start.1);
        let length_sq = dx * dx + dy * dy;
        if length_sq == 0.0 {
            return self.start;
        }
        let t = (((point.0 - self.start.0) * dx + (point.1 - self.start.1) * dy) / length_sq)
            .clamp(0.0, 1.0);
        (self.start.0 + t * dx, self.start.1 + t * dy)
    }

    /// Squared distance from `point` to the segment
    pub fn error_sq(&self, point: LocalPoint) -> f64 {
        let (px, py) = self.project(point);
        (point.0 - px).powi(2) + (point.1 - py).powi(2)
    }
}

/// Expected straight segments of `path`, starting at the origin facing +x.
pub fn expected_segments(path: &[GridLeg]) -> Vec<Segment> {
    let mut corner = (0.0, 0.0);
    let mut heading_deg: f64 = 0.0;
    let mut segments = Vec::new();
    for leg in path {
        match leg {
            GridLeg::Straight(length) => {
                let h = heading_deg.to_radians();
                let end = (corner.0 + length * h.cos(), corner.1 + length * h.sin());
                segments.push(Segment { start: corner, end });
                corner = end;
            }
            turn => heading_deg += turn.turn_deg(),
        }
    }
    segments
}

/// Accumulates squared position errors.
#[derive(Debug, Clone, Default)]
pub struct RmsAccumulator {
    sum_sq: f64,
    count: usize,
}

impl RmsAccumulator {
    /// Add one squared error
    pub fn push(&mut self, error_sq: f64) {
        self.sum_sq += error_sq;
        self.count += 1;
    }

    /// Number of points
    pub fn len(&self) -> usize {
        self.count
    }

    /// Whether no points were added
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// RMS error; zero when empty
    pub fn rms(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            (self.sum_sq / self.count as f64).sqrt()
        }
    }
}

async fn read_position(rig: &BaseUnderTest) -> Result<GeoPoint, CanaryError> {
    rig.odometry
        .position(PositionQueryOptions::relative())
        .await
        .map_err(|e| CanaryError::telemetry(format!("{} Position", rig.odometry.name()), e))
}

/// Drive the grid path on `rig` and check the RMS position error.
pub async fn grid_test(env: &RunnerEnv, rig: &BaseUnderTest, config: &GridConfig) -> RunnerResult {
    let path = grid_path(config.long_leg_mm, config.short_leg_mm);
    let mut segments = expected_segments(&path).into_iter();
    let mut errors = RmsAccumulator::default();
    let speed = config.speed_mm_per_sec;

    rig.odometry
        .reset()
        .await
        .map_err(|e| CanaryError::command("Reset", rig.odometry.name(), e))?;
    sleep(env.timing.odometry_reset_settle()).await;
    let origin = read_position(rig).await?;

    for leg in &path {
        match *leg {
            GridLeg::Straight(length) => {
                let Some(segment) = segments.next() else {
                    break;
                };
                let params = format!("distance={length}, speed={speed}");
                let time_est = length / speed;
                rig.traces.desired.append_record(
                    &TraceRow::new(TraceTag::Grid, env.elapsed_ms())
                        .with_velocity(speed, 0.0)
                        .with_position(segment.start.0, segment.start.1),
                );
                rig.traces.desired.append_record(
                    &TraceRow::new(TraceTag::Grid, env.elapsed_ms() + (time_est * 1000.0) as i64)
                        .with_velocity(speed, 0.0)
                        .with_position(segment.end.0, segment.end.1),
                );

                let sampler = env.base_sampler(rig, TraceTag::Grid, speed, 0.0, time_est);
                let (result, output) =
                    run_with_sampler(sampler, rig.base.move_straight(length, speed)).await;
                result.map_err(|e| CanaryError::command("MoveStraight", params.as_str(), e))?;
                if let Some(message) = output.telemetry_error {
                    return Err(CanaryError::telemetry(
                        "grid odometry",
                        anyhow::anyhow!("{message}"),
                    ));
                }

                for sample in &output.samples {
                    if let Some(SamplePosition::Geo(point)) = sample.position {
                        errors.push(segment.error_sq(point.to_local_mm(&origin)));
                    }
                }

                let (x, y) = read_position(rig).await?.to_local_mm(&origin);
                errors.push((x - segment.end.0).powi(2) + (y - segment.end.1).powi(2));
            }
            turn => {
                let angle = turn.turn_deg();
                rig.base
                    .spin(angle, config.spin_deg_per_sec)
                    .await
                    .map_err(|e| {
                        CanaryError::command(
                            "Spin",
                            format!("distance={angle}, speed={}", config.spin_deg_per_sec),
                            e,
                        )
                    })?;
                sleep(Duration::from_millis(config.spin_pause_ms)).await;
            }
        }
    }

    let rms = errors.rms();
    info!(
        device = %rig.name,
        command = "Grid",
        points = errors.len(),
        expected = config.rms_threshold_mm,
        measured = rms,
        "Grid path finished"
    );
    expect_within(
        "grid RMS error (mm)",
        ToleranceBand::fixed(0.0, config.rms_threshold_mm),
        rms,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expected_segments_follow_turns() {
        let segments = expected_segments(&grid_path(1500.0, 500.0));
        assert_eq!(segments.len(), 7);

        let close = |a: LocalPoint, b: LocalPoint| (a.0 - b.0).abs() < 1e-9 && (a.1 - b.1).abs() < 1e-9;
        assert!(close(segments[0].end, (1500.0, 0.0)));
        assert!(close(segments[1].end, (1500.0, 500.0)));
        assert!(close(segments[2].end, (0.0, 500.0)));
        assert!(close(segments[3].end, (0.0, 1000.0)));
        assert!(close(segments[4].end, (1500.0, 1000.0)));
        assert!(close(segments[6].end, (0.0, 1500.0)));
    }

    #[test]
    fn test_projection_clamps_to_segment() {
        let segment = Segment {
            start: (0.0, 0.0),
            end: (100.0, 0.0),
        };
        assert_eq!(segment.project((50.0, 20.0)), (50.0, 0.0));
        assert_eq!(segment.project((-30.0, 0.0)), (0.0, 0.0));
        assert_eq!(segment.error_sq((130.0, 40.0)), 30.0 * 30.0 + 40.0 * 40.0);
    }

    #[test]
    fn test_rms_accumulator() {
        let mut acc = RmsAccumulator::default();
        assert_eq!(acc.rms(), 0.0);
        acc.push(9.0);
        acc.push(16.0);
        acc.push(0.0);
        acc.push(39.0);
        assert_eq!(acc.len(), 4);
        assert_eq!(acc.rms(), 4.0);
    }
}
