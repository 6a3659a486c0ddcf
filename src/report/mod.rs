//! Diagnostic Traces and Result Reporting
//!
//! Two seams keep the runners ignorant of files and chat services:
//!
//! - [`DiagnosticSink`] accepts [`TraceRow`]s (desired path and measured samples)
//! - [`ReportSink`] accepts per-test outcomes and the final run summary
//!
//! # Implementations
//!
//! | Sink | Purpose |
//! |------|---------|
//! | [`CsvTraceSink`] | numbered `run<N>.txt` CSV trace files |
//! | [`NullSink`] | discards rows |
//! | [`MemorySink`] | keeps rows in memory |
//! | [`TracingReporter`] | logs outcomes through `tracing` |
//! | [`WebhookReporter`] | posts the summary to a chat webhook |
//! | [`FanoutReporter`] | forwards to several reporters |

pub mod csv_log;
pub mod webhook;

pub use csv_log::CsvTraceSink;
pub use webhook::WebhookReporter;

use crate::error::AppResult;
use crate::procedures::result::{RunSummary, TestOutcome};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::{info, warn};

// =============================================================================
// Trace Rows
// =============================================================================

/// Test type tag written to the `type` column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TraceTag {
    /// SetVelocity holds
    #[serde(rename = "sv")]
    SetVelocity,
    /// MoveStraight
    #[serde(rename = "ms")]
    MoveStraight,
    /// Spin
    #[serde(rename = "s")]
    Spin,
    /// Motor GoFor
    #[serde(rename = "gf")]
    GoFor,
    /// Motor GoTo
    #[serde(rename = "gt")]
    GoTo,
    /// Motor SetRPM holds
    #[serde(rename = "rpm")]
    Rpm,
    /// Grid path legs
    #[serde(rename = "grid")]
    Grid,
}

impl TraceTag {
    /// Column value of this tag
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SetVelocity => "sv",
            Self::MoveStraight => "ms",
            Self::Spin => "s",
            Self::GoFor => "gf",
            Self::GoTo => "gt",
            Self::Rpm => "rpm",
            Self::Grid => "grid",
        }
    }
}

/// One trace line: `type,linveldes,angveldes,time,posX,posY,theta`.
///
/// Base rows carry mm/s, deg/s and the odometry position; motor rows carry the
/// instantaneous rpm, the previous position and the current position.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TraceRow {
    /// Test type
    #[serde(rename = "type")]
    pub tag: TraceTag,
    /// Linear velocity (mm/s) or rpm
    #[serde(rename = "linveldes")]
    pub linear: f64,
    /// Angular velocity (deg/s) or previous motor position
    #[serde(rename = "angveldes")]
    pub angular: f64,
    /// Milliseconds since the run started
    pub time: i64,
    /// Position, first component
    #[serde(rename = "posX")]
    pub pos_x: f64,
    /// Position, second component
    #[serde(rename = "posY")]
    pub pos_y: f64,
    /// Orientation
    pub theta: f64,
}

impl TraceRow {
    /// Column names, in order
    pub const HEADER: [&'static str; 7] =
        ["type", "linveldes", "angveldes", "time", "posX", "posY", "theta"];

    /// Row with every value zero
    pub fn new(tag: TraceTag, time_ms: i64) -> Self {
        Self {
            tag,
            linear: 0.0,
            angular: 0.0,
            time: time_ms,
            pos_x: 0.0,
            pos_y: 0.0,
            theta: 0.0,
        }
    }

    /// Set the velocity columns
    pub fn with_velocity(mut self, linear: f64, angular: f64) -> Self {
        self.linear = linear;
        self.angular = angular;
        self
    }

    /// Set the position columns
    pub fn with_position(mut self, x: f64, y: f64) -> Self {
        self.pos_x = x;
        self.pos_y = y;
        self
    }

    /// Set the orientation column
    pub fn with_theta(mut self, theta: f64) -> Self {
        self.theta = theta;
        self
    }
}

// =============================================================================
// DiagnosticSink
// =============================================================================

/// Accepts trace rows. Never fails; implementations log their own errors.
pub trait DiagnosticSink: Send + Sync {
    /// Append one row
    fn append_record(&self, row: &TraceRow);
}

/// Sink that discards every row.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl DiagnosticSink for NullSink {
    fn append_record(&self, _row: &TraceRow) {}
}

/// Sink that keeps rows in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    rows: Mutex<Vec<TraceRow>>,
}

impl MemorySink {
    /// Create an empty sink
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of all rows appended so far
    pub fn rows(&self) -> Vec<TraceRow> {
        match self.rows.lock() {
            Ok(rows) => rows.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

impl DiagnosticSink for MemorySink {
    fn append_record(&self, row: &TraceRow) {
        match self.rows.lock() {
            Ok(mut rows) => rows.push(*row),
            Err(poisoned) => poisoned.into_inner().push(*row),
        }
    }
}

/// Device group; each group writes into its own pair of trace directories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TraceGroup {
    /// First (wheeled) base
    Wheeled,
    /// Second (sensor-controlled) base
    Sensor,
    /// First (encoded) motor
    Encoded,
    /// Second (controlled) motor
    Controlled,
    /// Grid path test
    Grid,
}

impl TraceGroup {
    /// Directory stem of this group
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Wheeled => "wheeled",
            Self::Sensor => "sensor",
            Self::Encoded => "encoded",
            Self::Controlled => "controlled",
            Self::Grid => "grid",
        }
    }

    /// Group of the `index`-th configured base
    pub fn for_base(index: usize) -> Self {
        if index == 0 {
            Self::Wheeled
        } else {
            Self::Sensor
        }
    }

    /// Group of the `index`-th configured motor
    pub fn for_motor(index: usize) -> Self {
        if index == 0 {
            Self::Encoded
        } else {
            Self::Controlled
        }
    }
}

/// Desired-path and measured-sample sinks of one device group.
#[derive(Clone)]
pub struct TraceSinks {
    /// Commanded values and expected positions
    pub desired: Arc<dyn DiagnosticSink>,
    /// Sampled telemetry
    pub measured: Arc<dyn DiagnosticSink>,
}

impl TraceSinks {
    /// Sinks that discard everything
    pub fn null() -> Self {
        Self {
            desired: Arc::new(NullSink),
            measured: Arc::new(NullSink),
        }
    }

    /// CSV sinks under `<root>/<group>Des` and `<root>/<group>Data`
    pub fn csv(root: &Path, group: TraceGroup) -> AppResult<Self> {
        let desired = CsvTraceSink::create(root.join(format!("{}Des", group.as_str())))?;
        let measured = CsvTraceSink::create(root.join(format!("{}Data", group.as_str())))?;
        Ok(Self {
            desired: Arc::new(desired),
            measured: Arc::new(measured),
        })
    }
}

impl std::fmt::Debug for TraceSinks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TraceSinks").finish_non_exhaustive()
    }
}

// =============================================================================
// ReportSink
// =============================================================================

/// Receives outcomes as they happen and the summary at the end of a run.
#[async_trait]
pub trait ReportSink: Send + Sync {
    /// Called once per finished test case
    async fn report_outcome(&self, outcome: &TestOutcome) -> AppResult<()>;

    /// Called once at the end of the run
    async fn report_summary(&self, summary: &RunSummary) -> AppResult<()>;
}

/// Logs outcomes: failures at `warn`, passes at `info`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingReporter;

#[async_trait]
impl ReportSink for TracingReporter {
    async fn report_outcome(&self, outcome: &TestOutcome) -> AppResult<()> {
        if outcome.passed {
            info!(test = %outcome.label, duration_s = outcome.duration.as_secs_f64(), "Test passed");
        } else {
            warn!(
                test = %outcome.label,
                kind = ?outcome.kind,
                diagnostic = outcome.diagnostic.as_deref().unwrap_or_default(),
                "Test failed"
            );
        }
        Ok(())
    }

    async fn report_summary(&self, summary: &RunSummary) -> AppResult<()> {
        if summary.all_passed() {
            info!(total = summary.total, "Canary run passed");
        } else {
            warn!(
                total = summary.total,
                failed = summary.failure_count(),
                "Canary run finished with failures:\n{}",
                summary.message()
            );
        }
        Ok(())
    }
}

/// Forwards to several reporters; a failing reporter does not stop the others.
#[derive(Default)]
pub struct FanoutReporter {
    sinks: Vec<Arc<dyn ReportSink>>,
}

impl FanoutReporter {
    /// Create a reporter with no targets
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a target
    pub fn with(mut self, sink: Arc<dyn ReportSink>) -> Self {
        self.sinks.push(sink);
        self
    }
}

#[async_trait]
impl ReportSink for FanoutReporter {
    async fn report_outcome(&self, outcome: &TestOutcome) -> AppResult<()> {
        for sink in &self.sinks {
            if let Err(e) = sink.report_outcome(outcome).await {
                warn!(test = %outcome.label, error = %e, "Reporter failed to record outcome");
            }
        }
        Ok(())
    }

    async fn report_summary(&self, summary: &RunSummary) -> AppResult<()> {
        for sink in &self.sinks {
            if let Err(e) = sink.report_summary(summary).await {
                warn!(error = %e, "Reporter failed to deliver summary");
            }
        }
        Ok(())
    }
}
