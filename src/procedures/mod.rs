//! Canary Test Procedures
//!
//! Every motion runner follows the same template:
//!
//! ```text
//! ┌──────────────┐   spawn    ┌─────────────────────────────┐
//! │ Runner       │──────────▶│ Sampler (background task)    │
//! │              │            │  tick → read → judge → trace │
//! │ command.await│            └─────────────────────────────┘
//! │              │   finish()        ▲ cancel + join
//! │ validate     │───────────────────┘
//! └──────────────┘
//! ```
//!
//! 1. compute goals and bands from the test parameters
//! 2. take a "before" snapshot where a displacement is measured
//! 3. start the [`Sampler`] and issue the blocking rover command
//! 4. cancel the sampler and wait until it has returned ([`run_with_sampler`])
//! 5. take the "after" snapshot and validate against the bands
//!
//! Runners return [`RunnerResult`]; [`TestRunContext::run_case`] converts it to a
//! [`TestOutcome`] at the runner boundary, so the sequencer never sees a raw error.
//!
//! # Example
//!
//! ```rust,ignore
//! let mut ctx = TestRunContext::new(config.run.clone(), Arc::new(TracingReporter));
//! let env = ctx.env();
//! ctx.run_case(
//!     "viam_base MoveStraight: distance=100, speed=50",
//!     base_motion::move_straight(&env, &rig, 100.0, 50.0),
//! )
//! .await;
//! let summary = ctx.finish().await;
//! ```

pub mod base_motion;
pub mod grid;
pub mod motor_motion;
pub mod result;
pub mod sensor_checks;
pub mod sequencer;

pub use result::{FailureKind, FailureLog, RunSummary, TestOutcome};
pub use sequencer::{Fleet, Sequencer, TestCase};

use crate::config::RunConfig;
use crate::error::CanaryError;
use crate::hardware::capabilities::{Base, Encoder, Motor, MovementSensor};
use crate::report::{ReportSink, TraceSinks, TraceTag};
use crate::sampling::{Sampler, SamplerOutput, ToleranceBand};
use std::future::Future;
use std::sync::Arc;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

/// Result of one runner; the error carries the failure category.
pub type RunnerResult = Result<(), CanaryError>;

// =============================================================================
// Devices Under Test
// =============================================================================

/// A base together with the odometry that observes it.
#[derive(Clone)]
pub struct BaseUnderTest {
    /// Component name used in labels
    pub name: String,
    /// Drivetrain
    pub base: Arc<dyn Base>,
    /// Movement sensor observing this base
    pub odometry: Arc<dyn MovementSensor>,
    /// Slowest linear velocity the base holds reliably (mm/s)
    pub min_linear_velocity: f64,
    /// Slowest angular velocity the base holds reliably (deg/s)
    pub min_angular_velocity: f64,
    /// Trace sinks of this base's device group
    pub traces: TraceSinks,
}

/// A motor and its paired encoder.
#[derive(Clone)]
pub struct MotorUnderTest {
    /// Component name used in labels
    pub name: String,
    /// Motor
    pub motor: Arc<dyn Motor>,
    /// Encoder counting this motor's ticks
    pub encoder: Arc<dyn Encoder>,
    /// Encoder ticks per motor revolution
    pub ticks_per_rotation: f64,
    /// Trace sinks of this motor's device group
    pub traces: TraceSinks,
}

// =============================================================================
// Runner Environment
// =============================================================================

/// Read-only state shared by every runner of one run.
#[derive(Debug, Clone)]
pub struct RunnerEnv {
    /// Timing of the catalogue
    pub timing: RunConfig,
    /// Start of the run; trace timestamps count from here
    pub run_start: Instant,
}

impl RunnerEnv {
    /// Milliseconds since the run started
    pub fn elapsed_ms(&self) -> i64 {
        self.run_start.elapsed().as_millis() as i64
    }

    /// Sampler on `rig`'s odometry, tracing into its measured sink
    pub fn base_sampler(
        &self,
        rig: &BaseUnderTest,
        tag: TraceTag,
        linear_goal: f64,
        angular_goal: f64,
        time_budget_secs: f64,
    ) -> Sampler {
        Sampler::base(
            Arc::clone(&rig.odometry),
            tag,
            linear_goal,
            angular_goal,
            time_budget_secs,
        )
        .tick_interval(self.timing.tick_interval())
        .trace_to(Arc::clone(&rig.traces.measured), self.run_start)
    }

    /// Sampler on `rig`'s position-derived speed, tracing into its measured sink
    pub fn motor_sampler(
        &self,
        rig: &MotorUnderTest,
        tag: TraceTag,
        rpm_goal: f64,
        time_budget_secs: f64,
    ) -> Sampler {
        Sampler::motor(Arc::clone(&rig.motor), tag, rpm_goal, time_budget_secs)
            .tick_interval(self.timing.tick_interval())
            .trace_to(Arc::clone(&rig.traces.measured), self.run_start)
    }
}

/// Run `command` while `sampler` polls in the background.
///
/// The sampler is cancelled and joined before this returns, whether or not
/// the command succeeded, so the output is never read from a running task.
pub async fn run_with_sampler<F, T>(sampler: Sampler, command: F) -> (anyhow::Result<T>, SamplerOutput)
where
    F: Future<Output = anyhow::Result<T>>,
{
    let handle = sampler.spawn();
    let result = command.await;
    let output = handle.finish().await;
    (result, output)
}

/// Fail with a tolerance violation unless `band` contains `measured`.
pub fn expect_within(check: &str, band: ToleranceBand, measured: f64) -> RunnerResult {
    if band.contains(measured) {
        debug!(check, expected = band.center, measured, "Within tolerance");
        Ok(())
    } else {
        Err(CanaryError::tolerance(
            check,
            band.center,
            measured,
            band.absolute_width,
        ))
    }
}

/// Surface a sampler telemetry failure once the tolerance checks have run.
pub fn expect_telemetry(output: &SamplerOutput) -> RunnerResult {
    match &output.telemetry_error {
        Some(message) => Err(CanaryError::telemetry(
            "sampled telemetry",
            anyhow::anyhow!("{message}"),
        )),
        None => Ok(()),
    }
}

// =============================================================================
// Test Run Context
// =============================================================================

/// State of one canary run: the failure log, the reporter and the timing.
///
/// Owned by the sequencer and mutated only between test cases.
pub struct TestRunContext {
    env: RunnerEnv,
    failures: FailureLog,
    executed: usize,
    reporter: Arc<dyn ReportSink>,
}

impl TestRunContext {
    /// Start a run now
    pub fn new(timing: RunConfig, reporter: Arc<dyn ReportSink>) -> Self {
        Self {
            env: RunnerEnv {
                timing,
                run_start: Instant::now(),
            },
            failures: FailureLog::new(),
            executed: 0,
            reporter,
        }
    }

    /// Environment handed to runners
    pub fn env(&self) -> RunnerEnv {
        self.env.clone()
    }

    /// Failures recorded so far
    pub fn failures(&self) -> &FailureLog {
        &self.failures
    }

    /// Number of test cases run so far
    pub fn executed(&self) -> usize {
        self.executed
    }

    /// Run one test case, record its outcome, then pause before the next one.
    pub async fn run_case<F>(&mut self, label: impl Into<String>, case: F) -> TestOutcome
    where
        F: Future<Output = RunnerResult>,
    {
        let label = label.into();
        info!(test = %label, "Running test");

        let started = Instant::now();
        let result = case.await;
        let outcome = TestOutcome::from_result(label, result).with_duration(started.elapsed());
        self.record(outcome.clone()).await;

        sleep(self.env.timing.delay_between_tests()).await;
        outcome
    }

    /// Record an outcome and forward it to the reporter.
    pub async fn record(&mut self, outcome: TestOutcome) {
        self.executed += 1;
        self.failures.record(&outcome);
        if let Err(e) = self.reporter.report_outcome(&outcome).await {
            warn!(test = %outcome.label, error = %e, "Failed to report outcome");
        }
    }

    /// Close the run and deliver the summary.
    pub async fn finish(self) -> RunSummary {
        let summary = RunSummary::new(
            self.executed,
            &self.failures,
            self.env.run_start.elapsed(),
        );
        if let Err(e) = self.reporter.report_summary(&summary).await {
            warn!(error = %e, "Failed to report run summary");
        }
        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware::capabilities::Vector3;
    use crate::hardware::mock::SimulatedRover;
    use crate::report::TracingReporter;
    use crate::sampling::FAILURE_SENTINEL;
    use tokio::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn test_run_case_records_failures() {
        let mut ctx = TestRunContext::new(RunConfig::immediate(), Arc::new(TracingReporter));

        let passed = ctx.run_case("always passes", async { Ok(()) }).await;
        let failed = ctx
            .run_case("always fails", async {
                Err(CanaryError::tolerance("distance", 100.0, 30.0, 30.0))
            })
            .await;

        assert!(passed.passed);
        assert!(!failed.passed);
        assert_eq!(failed.kind, Some(FailureKind::Tolerance));
        assert_eq!(ctx.executed(), 2);
        assert_eq!(ctx.failures().labels(), vec!["always fails".to_string()]);

        let summary = ctx.finish().await;
        assert_eq!(summary.total, 2);
        assert_eq!(summary.failure_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_case_waits_between_tests() {
        let timing = RunConfig {
            delay_between_tests_ms: 1000,
            ..RunConfig::immediate()
        };
        let mut ctx = TestRunContext::new(timing, Arc::new(TracingReporter));
        let started = Instant::now();
        ctx.run_case("noop", async { Ok(()) }).await;
        assert!(started.elapsed() >= Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_with_sampler_joins_after_command() {
        let rover = SimulatedRover::new();
        let base = rover.base("base");
        let odometry: Arc<dyn MovementSensor> = Arc::new(rover.odometry("odometry"));

        let sampler = Sampler::base(odometry, TraceTag::MoveStraight, 50.0, 0.0, 2.0);
        let (result, output) = run_with_sampler(sampler, base.move_straight(100.0, 50.0)).await;

        assert!(result.is_ok());
        assert!(output.telemetry_error.is_none());
        assert!(output.primary.reached_goal);
        assert!((output.primary.achieved_value - 50.0).abs() < 1e-6);
        assert!(!output.samples.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_with_sampler_joins_after_failed_command() {
        let rover = SimulatedRover::new();
        let base = rover.base("base");
        let odometry: Arc<dyn MovementSensor> = Arc::new(rover.odometry("odometry"));

        let sampler = Sampler::base(odometry, TraceTag::SetVelocity, 100.0, 0.0, 5.0);
        let started = Instant::now();
        let (result, output) = run_with_sampler(sampler, async {
            base.set_velocity(Vector3::forward(0.1), Vector3::default()).await?;
            Err::<(), _>(anyhow::anyhow!("link dropped"))
        })
        .await;

        assert!(result.is_err());
        assert!(output.samples.is_empty());
        assert!(started.elapsed() < Duration::from_millis(100));
    }

    #[test]
    fn test_expect_within() {
        assert!(expect_within("speed", ToleranceBand::fixed(50.0, 25.0), 40.0).is_ok());

        let err = expect_within("speed", ToleranceBand::fixed(50.0, 25.0), 10.0).unwrap_err();
        assert_eq!(err.kind(), FailureKind::Tolerance);
        assert!(err.to_string().contains("measured speed 10"));
    }

    #[test]
    fn test_expect_telemetry() {
        let mut output = SamplerOutput {
            primary: crate::sampling::ConvergenceResult {
                achieved_value: FAILURE_SENTINEL,
                reached_goal: false,
                sample_count: 0,
            },
            secondary: crate::sampling::ConvergenceResult {
                achieved_value: FAILURE_SENTINEL,
                reached_goal: false,
                sample_count: 0,
            },
            samples: Vec::new(),
            telemetry_error: None,
        };
        assert!(expect_telemetry(&output).is_ok());

        output.telemetry_error = Some("serial timeout".to_string());
        let err = expect_telemetry(&output).unwrap_err();
        assert_eq!(err.kind(), FailureKind::Telemetry);
    }
}
