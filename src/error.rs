//! Custom error types for the canary harness.
//!
//! `CanaryError` covers both the failure taxonomy of a single canary test and
//! the ambient errors of the harness itself (configuration, trace files,
//! webhook delivery). Built on `thiserror`, so `?` converts the underlying
//! library errors automatically.
//!
//! ## Test Failure Taxonomy
//!
//! - **`Command`**: the rover rejected or failed a command. Fatal to the current
//!   test case only; sibling tests still run.
//! - **`Telemetry`**: a read from odometry, a motor, an encoder or a sensor failed.
//! - **`ToleranceViolation`**: an achieved value fell outside its tolerance band.
//!   Carries both the expected and the measured value.
//! - **`InvariantViolation`**: a pinned regression check (such as the GoTo zero
//!   offset) did not hold.
//!
//! Cancellation is deliberately absent: a cancelled telemetry read ends a
//! sampling loop normally and never surfaces as a `CanaryError`.
//!
//! Runners return `Result<(), CanaryError>`; the runner boundary turns that into
//! a [`TestOutcome`](crate::procedures::TestOutcome) using [`CanaryError::kind`].

use crate::procedures::result::FailureKind;
use thiserror::Error;

/// Boxed collaborator error (converted from `anyhow::Error`).
pub type SourceError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Convenience alias for results using the harness error type.
pub type AppResult<T> = std::result::Result<T, CanaryError>;

#[derive(Error, Debug)]
pub enum CanaryError {
    #[error("error calling {command} ({params}), err = {source}")]
    Command {
        command: String,
        params: String,
        #[source]
        source: SourceError,
    },

    #[error("error reading {query}, err = {source}")]
    Telemetry {
        query: String,
        #[source]
        source: SourceError,
    },

    #[error("measured {check} {measured} did not equal requested {check} {expected} (tolerance {tolerance})")]
    ToleranceViolation {
        check: String,
        expected: f64,
        measured: f64,
        tolerance: f64,
    },

    #[error("invariant violated: {0}")]
    InvariantViolation(String),

    #[error("Configuration validation error: {0}")]
    Configuration(String),

    #[error("Configuration error: {0}")]
    Config(#[from] figment::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Webhook request failed: {0}")]
    Webhook(#[from] reqwest::Error),

    #[error("Webhook returned status {status}: {body}")]
    WebhookStatus { status: u16, body: String },
}

impl CanaryError {
    /// A rover command failed.
    pub fn command(
        command: impl Into<String>,
        params: impl Into<String>,
        source: anyhow::Error,
    ) -> Self {
        Self::Command {
            command: command.into(),
            params: params.into(),
            source: source.into(),
        }
    }

    /// A telemetry read failed.
    pub fn telemetry(query: impl Into<String>, source: anyhow::Error) -> Self {
        Self::Telemetry {
            query: query.into(),
            source: source.into(),
        }
    }

    /// An achieved value fell outside its band.
    pub fn tolerance(check: impl Into<String>, expected: f64, measured: f64, tolerance: f64) -> Self {
        Self::ToleranceViolation {
            check: check.into(),
            expected,
            measured,
            tolerance,
        }
    }

    /// Failure category used in test outcomes.
    ///
    /// Harness-side errors (files, configuration, webhook) are reported like a
    /// failed command.
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::Telemetry { .. } => FailureKind::Telemetry,
            Self::ToleranceViolation { .. } => FailureKind::Tolerance,
            Self::InvariantViolation(_) => FailureKind::Invariant,
            _ => FailureKind::Command,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_error_keeps_source() {
        let err = CanaryError::command(
            "MoveStraight",
            "distance=100, speed=50",
            anyhow::anyhow!("motor driver fault"),
        );
        assert_eq!(err.kind(), FailureKind::Command);
        let text = err.to_string();
        assert!(text.contains("MoveStraight"));
        assert!(text.contains("motor driver fault"));
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn test_tolerance_message_mentions_both_values() {
        let err = CanaryError::tolerance("distance", 100.0, 30.0, 30.0);
        assert_eq!(err.kind(), FailureKind::Tolerance);
        let text = err.to_string();
        assert!(text.contains("measured distance 30"));
        assert!(text.contains("requested distance 100"));
    }

    #[test]
    fn test_kind_mapping() {
        assert_eq!(
            CanaryError::telemetry("odometry position", anyhow::anyhow!("timeout")).kind(),
            FailureKind::Telemetry
        );
        assert_eq!(
            CanaryError::InvariantViolation("startPos = -2".into()).kind(),
            FailureKind::Invariant
        );
        assert_eq!(
            CanaryError::Configuration("bad".into()).kind(),
            FailureKind::Command
        );
    }
}
