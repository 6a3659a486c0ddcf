//! Full catalogue runs through the sequencer
//!
//! Uses the default timing under paused tokio time and writes CSV traces into
//! a temporary directory.

use async_trait::async_trait;
use rover_canary::config::CanaryConfig;
use rover_canary::error::AppResult;
use rover_canary::hardware::mock::{RoverFaults, SimulatedRover};
use rover_canary::procedures::{Fleet, RunSummary, Sequencer, TestOutcome, TestRunContext};
use rover_canary::report::{FanoutReporter, ReportSink, TraceRow, TracingReporter};
use std::fs;
use std::sync::{Arc, Mutex};
use tempfile::tempdir;

#[derive(Default)]
struct CollectingReporter {
    outcomes: Mutex<Vec<TestOutcome>>,
    summaries: Mutex<Vec<RunSummary>>,
}

#[async_trait]
impl ReportSink for CollectingReporter {
    async fn report_outcome(&self, outcome: &TestOutcome) -> AppResult<()> {
        self.outcomes.lock().unwrap().push(outcome.clone());
        Ok(())
    }

    async fn report_summary(&self, summary: &RunSummary) -> AppResult<()> {
        self.summaries.lock().unwrap().push(summary.clone());
        Ok(())
    }
}

fn context(config: &CanaryConfig, collector: &Arc<CollectingReporter>) -> TestRunContext {
    let reporter = FanoutReporter::new()
        .with(Arc::new(TracingReporter))
        .with(collector.clone());
    TestRunContext::new(config.run.clone(), Arc::new(reporter))
}

#[tokio::test(start_paused = true)]
async fn test_healthy_rover_passes_whole_catalogue() {
    let config = CanaryConfig::default();
    let traces = tempdir().unwrap();
    let fleet = Fleet::simulated(&config, &SimulatedRover::new(), Some(traces.path())).unwrap();
    let sequencer = Sequencer::new(config.clone(), fleet);
    let expected_total = sequencer.catalogue().len();

    let collector = Arc::new(CollectingReporter::default());
    let summary = sequencer.run(context(&config, &collector)).await;

    assert_eq!(summary.total, expected_total);
    assert!(summary.all_passed(), "{}", summary.message());
    assert_eq!(summary.message(), format!("all {expected_total} tests passed"));
    assert_eq!(collector.outcomes.lock().unwrap().len(), expected_total);
    assert_eq!(collector.summaries.lock().unwrap().as_slice(), &[summary]);

    // One trace file per device group directory.
    for dir in [
        "wheeledDes",
        "wheeledData",
        "sensorDes",
        "sensorData",
        "encodedData",
        "controlledData",
        "gridDes",
        "gridData",
    ] {
        let file = traces.path().join(dir).join("run1.txt");
        let contents = fs::read_to_string(&file).unwrap();
        let header = contents.lines().next().unwrap();
        assert_eq!(header, TraceRow::HEADER.join(","), "{}", file.display());
    }

    let wheeled = fs::read_to_string(traces.path().join("wheeledData").join("run1.txt")).unwrap();
    assert!(wheeled.lines().any(|line| line.starts_with("sv,")));
    assert!(wheeled.lines().any(|line| line.starts_with("ms,")));
    let encoded = fs::read_to_string(traces.path().join("encodedData").join("run1.txt")).unwrap();
    assert!(encoded.lines().any(|line| line.starts_with("gf,")));
}

#[tokio::test(start_paused = true)]
async fn test_failures_are_collected_without_aborting_the_run() {
    let config = CanaryConfig::default();
    let rover =
        SimulatedRover::with_faults(RoverFaults::default().with_failing_command("move_straight"));
    let fleet = Fleet::simulated(&config, &rover, None).unwrap();
    let sequencer = Sequencer::new(config.clone(), fleet);
    let expected_total = sequencer.catalogue().len();

    let collector = Arc::new(CollectingReporter::default());
    let summary = sequencer.run(context(&config, &collector)).await;

    // Four MoveStraight cases per base, plus the grid's first leg.
    assert_eq!(summary.total, expected_total);
    assert_eq!(summary.failure_count(), 9, "{}", summary.message());
    assert!(summary
        .failed_labels
        .contains(&"sensor_base MoveStraight: distance=-1000, speed=-250".to_string()));
    assert_eq!(summary.failed_labels.last().map(String::as_str), Some("sensor_base Grid"));

    let message = summary.message();
    assert!(message.starts_with(&format!("tests failed: 9/{expected_total}\n")));
    assert!(message.contains("- viam_base MoveStraight: distance=100, speed=50\n"));
}
