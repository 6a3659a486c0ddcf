//! Test Outcomes and Run Summaries
//!
//! Structured output of the canary runners: one [`TestOutcome`] per test case,
//! the append-only [`FailureLog`] owned by the run, and the [`RunSummary`]
//! delivered to the reporting sinks.

use crate::error::CanaryError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

// =============================================================================
// TestOutcome
// =============================================================================

/// Why a test case failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The rover rejected or failed a command
    Command,
    /// A telemetry read failed
    Telemetry,
    /// An achieved value was outside its tolerance band
    Tolerance,
    /// A pinned regression check did not hold
    Invariant,
}

/// Result of one canary test case.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestOutcome {
    /// Test label with embedded parameters, e.g. `viam_base SetVelocity: linear=100, angular=0`
    pub label: String,

    /// Whether the test passed
    pub passed: bool,

    /// Measured vs. expected detail for failed tests
    #[serde(default)]
    pub diagnostic: Option<String>,

    /// Failure category; `None` when passed
    #[serde(default)]
    pub kind: Option<FailureKind>,

    /// Wall-clock duration of the test case
    #[serde(default)]
    pub duration: Duration,
}

impl TestOutcome {
    /// Create a passing outcome
    pub fn pass(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            passed: true,
            diagnostic: None,
            kind: None,
            duration: Duration::ZERO,
        }
    }

    /// Create a failing outcome
    pub fn failure(label: impl Into<String>, kind: FailureKind, diagnostic: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            passed: false,
            diagnostic: Some(diagnostic.into()),
            kind: Some(kind),
            duration: Duration::ZERO,
        }
    }

    /// Convert a runner result into an outcome
    pub fn from_result(label: impl Into<String>, result: Result<(), CanaryError>) -> Self {
        match result {
            Ok(()) => Self::pass(label),
            Err(err) => Self::failure(label, err.kind(), err.to_string()),
        }
    }

    /// Set the test duration
    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration = duration;
        self
    }
}

// =============================================================================
// FailureLog
// =============================================================================

/// Append-only record of the failed outcomes of one run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FailureLog {
    entries: Vec<TestOutcome>,
}

impl FailureLog {
    /// Create an empty log
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `outcome` if it failed; passing outcomes are ignored.
    pub fn record(&mut self, outcome: &TestOutcome) {
        if !outcome.passed {
            self.entries.push(outcome.clone());
        }
    }

    /// Number of failures
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no failure was recorded
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Failed outcomes in the order they were recorded
    pub fn iter(&self) -> impl Iterator<Item = &TestOutcome> {
        self.entries.iter()
    }

    /// Labels of the failed tests in order
    pub fn labels(&self) -> Vec<String> {
        self.entries.iter().map(|o| o.label.clone()).collect()
    }
}

// =============================================================================
// RunSummary
// =============================================================================

/// Final tally of a canary run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    /// Number of test cases executed
    pub total: usize,

    /// Labels of the failed tests, in execution order
    pub failed_labels: Vec<String>,

    /// Wall-clock duration of the whole run
    #[serde(default)]
    pub duration: Duration,
}

impl RunSummary {
    /// Build a summary from the run's failure log
    pub fn new(total: usize, failures: &FailureLog, duration: Duration) -> Self {
        Self {
            total,
            failed_labels: failures.labels(),
            duration,
        }
    }

    /// Number of failed tests
    pub fn failure_count(&self) -> usize {
        self.failed_labels.len()
    }

    /// Whether every test passed
    pub fn all_passed(&self) -> bool {
        self.failed_labels.is_empty()
    }

    /// Message delivered to the chat webhook
    pub fn message(&self) -> String {
        if self.all_passed() {
            return format!("all {} tests passed", self.total);
        }
        let mut message = format!("tests failed: {}/{}\n", self.failure_count(), self.total);
        for label in &self.failed_labels {
            message.push_str("- ");
            message.push_str(label);
            message.push('\n');
        }
        message
    }
}
