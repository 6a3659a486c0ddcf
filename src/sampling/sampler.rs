//! Telemetry Sampler and Convergence Judge
//!
//! A [`Sampler`] polls one telemetry source at a fixed tick while the runner's
//! command is in flight and reports, per axis, the achieved value:
//!
//! - the latest sample inside the goal's tolerance band, if any matched
//! - otherwise the direction-aware extreme (most positive for a positive goal,
//!   most negative for a negative goal)
//! - [`FAILURE_SENTINEL`] if the source failed with anything but [`Cancelled`]
//!
//! The loop ends when the owner cancels it or when the elapsed time exceeds
//! twice the time budget, whichever comes first.
//!
//! # Example
//!
//! ```rust,ignore
//! let handle = Sampler::base(odometry, TraceTag::MoveStraight, 50.0, 0.0, 2.0)
//!     .tick_interval(Duration::from_millis(100))
//!     .spawn();
//! base.move_straight(100.0, 50.0).await?;
//! let output = handle.finish().await; // cancels, then joins
//! ```

use crate::hardware::capabilities::{
    is_cancelled, Cancelled, GeoPoint, Motor, MovementSensor, PositionQueryOptions,
};
use crate::report::{DiagnosticSink, NullSink, TraceRow, TraceTag};
use crate::sampling::tolerance::{GoalKind, MotionGoal, ToleranceBand};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, Duration, Instant, MissedTickBehavior};
use tracing::{debug, error};

/// Estimate returned when telemetry failed.
pub const FAILURE_SENTINEL: f64 = -1.0;

/// Default polling interval.
pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_millis(100);

/// Number of position deltas averaged into one rpm estimate.
const RPM_WINDOW: usize = 5;

// =============================================================================
// Data Model
// =============================================================================

/// Position part of a sample.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum SamplePosition {
    /// Odometry position
    Geo(GeoPoint),
    /// Motor position in revolutions
    Revolutions(f64),
}

/// One telemetry sample.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SampleRecord {
    /// Milliseconds since the run started
    pub timestamp_ms: i64,
    /// mm/s for bases, windowed rpm for motors
    pub linear_velocity: f64,
    /// deg/s for bases, zero for motors
    pub angular_velocity: f64,
    /// Position at the sample
    pub position: Option<SamplePosition>,
    /// Orientation in degrees (bases only)
    pub orientation_theta: Option<f64>,
}

/// Achieved value for one axis.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ConvergenceResult {
    /// Best estimate of the achieved value
    pub achieved_value: f64,
    /// Whether any sample landed inside the tolerance band
    pub reached_goal: bool,
    /// Number of samples observed
    pub sample_count: usize,
}

impl ConvergenceResult {
    fn sentinel(sample_count: usize) -> Self {
        Self {
            achieved_value: FAILURE_SENTINEL,
            reached_goal: false,
            sample_count,
        }
    }
}

/// Everything a sampler run produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SamplerOutput {
    /// Linear velocity (base) or rpm (motor)
    pub primary: ConvergenceResult,
    /// Angular velocity (base); unused for motors
    pub secondary: ConvergenceResult,
    /// Samples in time order
    pub samples: Vec<SampleRecord>,
    /// Set when the source failed and the estimates are the sentinel
    pub telemetry_error: Option<String>,
}

impl SamplerOutput {
    fn failed(samples: Vec<SampleRecord>, error: String) -> Self {
        let count = samples.len();
        Self {
            primary: ConvergenceResult::sentinel(count),
            secondary: ConvergenceResult::sentinel(count),
            samples,
            telemetry_error: Some(error),
        }
    }

    /// `(primary, secondary)` achieved values
    pub fn estimates(&self) -> (f64, f64) {
        (self.primary.achieved_value, self.secondary.achieved_value)
    }
}

// =============================================================================
// Convergence Judge
// =============================================================================

/// Tracks the latest in-band sample and the direction-aware extreme of one axis.
#[derive(Debug, Clone)]
struct AxisTracker {
    band: ToleranceBand,
    best: Option<f64>,
    extreme: f64,
    count: usize,
}

impl AxisTracker {
    fn new(band: ToleranceBand) -> Self {
        Self {
            band,
            best: None,
            extreme: 0.0,
            count: 0,
        }
    }

    fn observe(&mut self, sample: f64) {
        self.count += 1;
        if self.band.contains(sample) {
            self.best = Some(sample);
        }
        let goal = self.band.center;
        if (goal < 0.0 && sample < self.extreme) || (goal > 0.0 && sample > self.extreme) {
            self.extreme = sample;
        }
    }

    fn finish(&self) -> ConvergenceResult {
        match self.best {
            Some(value) => ConvergenceResult {
                achieved_value: value,
                reached_goal: true,
                sample_count: self.count,
            },
            None => ConvergenceResult {
                achieved_value: self.extreme,
                reached_goal: false,
                sample_count: self.count,
            },
        }
    }
}

/// Moving average of motor speed over the last [`RPM_WINDOW`] position deltas.
#[derive(Debug)]
struct RpmWindow {
    prev_position: f64,
    prev_time: Instant,
    window: VecDeque<f64>,
}

impl RpmWindow {
    fn new(position: f64, now: Instant) -> Self {
        Self {
            prev_position: position,
            prev_time: now,
            window: VecDeque::with_capacity(RPM_WINDOW),
        }
    }

    /// Returns `(instantaneous rpm, averaged rpm, previous position)`.
    fn update(&mut self, position: f64, now: Instant) -> (f64, f64, f64) {
        let minutes = now.saturating_duration_since(self.prev_time).as_secs_f64() / 60.0;
        let instantaneous = if minutes > 0.0 {
            (position - self.prev_position) / minutes
        } else {
            0.0
        };

        if self.window.len() == RPM_WINDOW {
            self.window.pop_front();
        }
        self.window.push_back(instantaneous);
        let average = self.window.iter().sum::<f64>() / self.window.len() as f64;

        let previous = self.prev_position;
        self.prev_position = position;
        self.prev_time = now;
        (instantaneous, average, previous)
    }
}

// =============================================================================
// Sampler
// =============================================================================

/// Where the sampler reads from.
#[derive(Clone)]
pub enum TelemetrySource {
    /// Base tests: odometry velocities, position and orientation
    Odometry(Arc<dyn MovementSensor>),
    /// Motor tests: speed derived from position deltas
    MotorPosition(Arc<dyn Motor>),
}

/// Polls one telemetry source and judges convergence against its goals.
pub struct Sampler {
    source: TelemetrySource,
    tag: TraceTag,
    primary: ToleranceBand,
    secondary: ToleranceBand,
    time_budget: Duration,
    tick_interval: Duration,
    sink: Arc<dyn DiagnosticSink>,
    run_start: Instant,
}

impl Sampler {
    /// Sample base telemetry against signed linear (mm/s) and angular (deg/s) goals.
    pub fn base(
        odometry: Arc<dyn MovementSensor>,
        tag: TraceTag,
        linear_goal: f64,
        angular_goal: f64,
        time_budget_secs: f64,
    ) -> Self {
        Self::new(
            TelemetrySource::Odometry(odometry),
            tag,
            MotionGoal::signed(GoalKind::LinearVelocity, linear_goal).convergence_band(),
            MotionGoal::signed(GoalKind::AngularVelocity, angular_goal).convergence_band(),
            time_budget_secs,
        )
    }

    /// Sample motor speed against a signed rpm goal.
    pub fn motor(motor: Arc<dyn Motor>, tag: TraceTag, rpm_goal: f64, time_budget_secs: f64) -> Self {
        Self::new(
            TelemetrySource::MotorPosition(motor),
            tag,
            MotionGoal::signed(GoalKind::Rpm, rpm_goal).convergence_band(),
            MotionGoal::signed(GoalKind::AngularVelocity, 0.0).convergence_band(),
            time_budget_secs,
        )
    }

    /// Sample `source` against explicit bands.
    ///
    /// A non-finite or non-positive budget falls back to one tick.
    pub fn new(
        source: TelemetrySource,
        tag: TraceTag,
        primary: ToleranceBand,
        secondary: ToleranceBand,
        time_budget_secs: f64,
    ) -> Self {
        let time_budget = Duration::try_from_secs_f64(time_budget_secs)
            .ok()
            .filter(|d| !d.is_zero())
            .unwrap_or(DEFAULT_TICK_INTERVAL);
        Self {
            source,
            tag,
            primary,
            secondary,
            time_budget,
            tick_interval: DEFAULT_TICK_INTERVAL,
            sink: Arc::new(NullSink),
            run_start: Instant::now(),
        }
    }

    /// Set the polling interval
    pub fn tick_interval(mut self, tick: Duration) -> Self {
        if !tick.is_zero() {
            self.tick_interval = tick;
        }
        self
    }

    /// Write one trace row per sample to `sink`, timestamped from `run_start`
    pub fn trace_to(mut self, sink: Arc<dyn DiagnosticSink>, run_start: Instant) -> Self {
        self.sink = sink;
        self.run_start = run_start;
        self
    }

    /// Time budget after validation
    pub fn time_budget(&self) -> Duration {
        self.time_budget
    }

    /// Run in a background task; the returned handle cancels and joins it.
    pub fn spawn(self) -> SamplerHandle {
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let task = tokio::spawn(self.run(cancel_rx));
        SamplerHandle { cancel_tx, task }
    }

    /// Run in the foreground until the `2 × budget` deadline.
    pub async fn run_window(self) -> SamplerOutput {
        let (_cancel_tx, cancel_rx) = watch::channel(false);
        self.run(cancel_rx).await
    }

    /// Run until `cancel` turns true or the `2 × budget` deadline passes.
    pub async fn run(self, mut cancel: watch::Receiver<bool>) -> SamplerOutput {
        let started = Instant::now();
        let deadline = self.time_budget * 2;
        let mut primary = AxisTracker::new(self.primary);
        let mut secondary = AxisTracker::new(self.secondary);
        let mut samples = Vec::new();

        let mut rpm = match &self.source {
            TelemetrySource::MotorPosition(motor) => {
                let initial = tokio::select! {
                    biased;
                    _ = cancelled(&mut cancel) => Err(anyhow::Error::new(Cancelled)),
                    r = motor.position() => r.context("motor position"),
                };
                match initial {
                    Ok(position) => Some(RpmWindow::new(position, Instant::now())),
                    Err(e) if is_cancelled(&e) => {
                        debug!(tag = self.tag.as_str(), "Sampler cancelled before first read");
                        return Self::output(&primary, &secondary, samples);
                    }
                    Err(e) => {
                        error!(tag = self.tag.as_str(), error = %format!("{e:#}"), "Telemetry read failed");
                        return SamplerOutput::failed(samples, format!("{e:#}"));
                    }
                }
            }
            TelemetrySource::Odometry(_) => None,
        };

        let mut ticker = interval(self.tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;

        loop {
            tokio::select! {
                biased;
                _ = cancelled(&mut cancel) => break,
                _ = ticker.tick() => {}
            }

            let reading = tokio::select! {
                biased;
                _ = cancelled(&mut cancel) => Err(anyhow::Error::new(Cancelled)),
                r = self.read(rpm.as_mut()) => r,
            };

            match reading {
                Ok((sample, row)) => {
                    self.sink.append_record(&row);
                    primary.observe(sample.linear_velocity);
                    if rpm.is_none() {
                        secondary.observe(sample.angular_velocity);
                    }
                    samples.push(sample);
                }
                Err(e) if is_cancelled(&e) => {
                    debug!(tag = self.tag.as_str(), "Telemetry read cancelled, sampler exiting");
                    break;
                }
                Err(e) => {
                    error!(tag = self.tag.as_str(), error = %format!("{e:#}"), "Telemetry read failed");
                    return SamplerOutput::failed(samples, format!("{e:#}"));
                }
            }

            if started.elapsed() > deadline {
                debug!(tag = self.tag.as_str(), "Sampler time budget exhausted");
                break;
            }
        }

        Self::output(&primary, &secondary, samples)
    }

    fn output(
        primary: &AxisTracker,
        secondary: &AxisTracker,
        samples: Vec<SampleRecord>,
    ) -> SamplerOutput {
        SamplerOutput {
            primary: primary.finish(),
            secondary: secondary.finish(),
            samples,
            telemetry_error: None,
        }
    }

    fn elapsed_ms(&self, now: Instant) -> i64 {
        now.saturating_duration_since(self.run_start).as_millis() as i64
    }

    async fn read(&self, rpm: Option<&mut RpmWindow>) -> Result<(SampleRecord, TraceRow)> {
        match (&self.source, rpm) {
            (TelemetrySource::MotorPosition(motor), Some(window)) => {
                let position = motor.position().await.context("motor position")?;
                let now = Instant::now();
                let (instantaneous, average, previous) = window.update(position, now);
                let time = self.elapsed_ms(now);
                let sample = SampleRecord {
                    timestamp_ms: time,
                    linear_velocity: average,
                    angular_velocity: 0.0,
                    position: Some(SamplePosition::Revolutions(position)),
                    orientation_theta: None,
                };
                let row = TraceRow::new(self.tag, time)
                    .with_velocity(instantaneous, previous)
                    .with_position(position, 0.0);
                Ok((sample, row))
            }
            (TelemetrySource::MotorPosition(_), None) => {
                anyhow::bail!("motor sampler started without an initial position")
            }
            (TelemetrySource::Odometry(odometry), _) => {
                let position = odometry
                    .position(PositionQueryOptions::relative())
                    .await
                    .context("odometry position")?;
                let linear = odometry
                    .linear_velocity()
                    .await
                    .context("odometry linear velocity")?;
                let angular = odometry
                    .angular_velocity()
                    .await
                    .context("odometry angular velocity")?;
                let theta = odometry
                    .orientation()
                    .await
                    .context("odometry orientation")?;

                let time = self.elapsed_ms(Instant::now());
                let linear_mm = linear.y * 1000.0;
                let (x, y) = position.to_local_mm(&GeoPoint::default());
                let sample = SampleRecord {
                    timestamp_ms: time,
                    linear_velocity: linear_mm,
                    angular_velocity: angular.z,
                    position: Some(SamplePosition::Geo(position)),
                    orientation_theta: Some(theta),
                };
                let row = TraceRow::new(self.tag, time)
                    .with_velocity(linear_mm, angular.z)
                    .with_position(x, y)
                    .with_theta(theta);
                Ok((sample, row))
            }
        }
    }
}

/// Resolves once `rx` reads true; never resolves if the sender is gone.
async fn cancelled(rx: &mut watch::Receiver<bool>) {
    if rx.wait_for(|cancelled| *cancelled).await.is_err() {
        std::future::pending::<()>().await;
    }
}

/// Handle to a sampler running in the background.
pub struct SamplerHandle {
    cancel_tx: watch::Sender<bool>,
    task: JoinHandle<SamplerOutput>,
}

impl SamplerHandle {
    /// Ask the sampler to stop at its next suspension point
    pub fn cancel(&self) {
        let _ = self.cancel_tx.send(true);
    }

    /// Cancel the sampler and wait until it has actually returned.
    pub async fn finish(self) -> SamplerOutput {
        self.cancel();
        match self.task.await {
            Ok(output) => output,
            Err(e) => {
                error!(error = %e, "Sampler task did not complete");
                SamplerOutput::failed(Vec::new(), format!("sampler task failed: {e}"))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware::capabilities::{Motor, Vector3};
    use crate::hardware::mock::SimulatedMotor;
    use crate::report::MemorySink;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    type Script = Box<dyn Fn(usize) -> Result<f64> + Send + Sync>;

    /// Odometry whose linear velocity (mm/s) follows a script indexed by read count.
    struct ScriptedOdometry {
        reads: AtomicUsize,
        linear_mm: Script,
    }

    impl ScriptedOdometry {
        fn new(linear_mm: impl Fn(usize) -> Result<f64> + Send + Sync + 'static) -> Arc<Self> {
            Arc::new(Self {
                reads: AtomicUsize::new(0),
                linear_mm: Box::new(linear_mm),
            })
        }
    }

    #[async_trait]
    impl MovementSensor for ScriptedOdometry {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn linear_velocity(&self) -> Result<Vector3> {
            let n = self.reads.fetch_add(1, Ordering::SeqCst);
            Ok(Vector3::forward((self.linear_mm)(n)? / 1000.0))
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
            Ok(Vector3::default())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_converges_on_step_function() {
        let odometry = ScriptedOdometry::new(|n| Ok(if n < 5 { 0.0 } else { 100.0 }));
        let output = Sampler::base(odometry, TraceTag::SetVelocity, 100.0, 0.0, 2.0)
            .run_window()
            .await;

        assert!(output.telemetry_error.is_none());
        assert_eq!(output.primary.achieved_value, 100.0);
        assert!(output.primary.reached_goal);
        assert!(output.secondary.reached_goal);
        assert_eq!(output.secondary.achieved_value, 0.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_falls_back_to_extreme() {
        let odometry = ScriptedOdometry::new(|n| Ok((n % 5) as f64 * 20.0));
        let started = Instant::now();
        let output = Sampler::base(odometry, TraceTag::SetVelocity, 200.0, 0.0, 1.0)
            .run_window()
            .await;
        let elapsed = started.elapsed();

        assert_eq!(output.primary.achieved_value, 80.0);
        assert!(!output.primary.reached_goal);
        assert_ne!(output.primary.achieved_value, FAILURE_SENTINEL);
        assert!(elapsed > Duration::from_secs(2), "stopped after {elapsed:?}");
        assert!(elapsed <= Duration::from_millis(2200), "stopped after {elapsed:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn test_negative_goal_tracks_most_negative() {
        let odometry = ScriptedOdometry::new(|n| Ok(-((n % 5) as f64) * 20.0));
        let output = Sampler::base(odometry, TraceTag::SetVelocity, -200.0, 0.0, 1.0)
            .run_window()
            .await;
        assert_eq!(output.primary.achieved_value, -80.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_latest_in_band_sample_wins() {
        let odometry = ScriptedOdometry::new(|n| Ok(if n < 10 { 90.0 } else { 110.0 }));
        let output = Sampler::base(odometry, TraceTag::SetVelocity, 100.0, 0.0, 1.0)
            .run_window()
            .await;
        assert_eq!(output.primary.achieved_value, 110.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_read_is_not_an_error() {
        let odometry = ScriptedOdometry::new(|n| {
            if n < 4 {
                Ok(45.0)
            } else {
                Err(anyhow::Error::new(Cancelled).context("grpc stream closed"))
            }
        });
        let output = Sampler::base(odometry, TraceTag::MoveStraight, 50.0, 0.0, 10.0)
            .run_window()
            .await;

        assert!(output.telemetry_error.is_none());
        assert_eq!(output.primary.achieved_value, 45.0);
        assert_eq!(output.samples.len(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_telemetry_error_returns_sentinel() {
        let odometry = ScriptedOdometry::new(|n| {
            if n < 2 {
                Ok(50.0)
            } else {
                Err(anyhow::anyhow!("serial timeout"))
            }
        });
        let output = Sampler::base(odometry, TraceTag::MoveStraight, 50.0, 0.0, 10.0)
            .run_window()
            .await;

        assert_eq!(output.estimates(), (FAILURE_SENTINEL, FAILURE_SENTINEL));
        assert!(output
            .telemetry_error
            .as_deref()
            .unwrap_or_default()
            .contains("serial timeout"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_handle_finish_cancels_and_joins() {
        let odometry = ScriptedOdometry::new(|_| Ok(50.0));
        let sink = Arc::new(MemorySink::new());
        let started = Instant::now();
        let handle = Sampler::base(odometry, TraceTag::MoveStraight, 50.0, 0.0, 60.0)
            .trace_to(sink.clone(), started)
            .spawn();

        tokio::time::sleep(Duration::from_millis(1050)).await;
        let output = handle.finish().await;

        assert!(started.elapsed() < Duration::from_secs(2));
        assert_eq!(output.primary.achieved_value, 50.0);
        assert_eq!(output.samples.len(), 10);
        assert_eq!(sink.rows().len(), 10);
        assert!(sink.rows().iter().all(|row| row.tag == TraceTag::MoveStraight));
    }

    #[tokio::test(start_paused = true)]
    async fn test_motor_rpm_from_position_deltas() {
        let motor = Arc::new(SimulatedMotor::new("left", 1992.0));
        motor.set_rpm(30.0).await.unwrap();

        let output = Sampler::motor(motor.clone(), TraceTag::Rpm, 30.0, 1.0)
            .run_window()
            .await;
        motor.stop().await.unwrap();

        assert!(output.primary.reached_goal);
        assert!((output.primary.achieved_value - 30.0).abs() < 0.5);
        assert_eq!(output.secondary.sample_count, 0);
    }
}
