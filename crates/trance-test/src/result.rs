//! Test run results

use crate::assertion::{AssertionFailure, AssertionResult};
use crate::coverage::{CoverageSummary, CoverageThresholdError};
use crate::fixture::TeardownFailure;
use crate::plan::{LoadError, UnitKindTag};
use crate::source::RegionId;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::time::Duration;

/// Final status of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum RunStatus {
    Passed,
    Failed,
    Errored,
    Skipped,
    TimedOut,
}

impl RunStatus {
    /// Failed, errored or timed out
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            RunStatus::Failed | RunStatus::Errored | RunStatus::TimedOut
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Passed => "passed",
            RunStatus::Failed => "failed",
            RunStatus::Errored => "errored",
            RunStatus::Skipped => "skipped",
            RunStatus::TimedOut => "timed-out",
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a run failed
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum Failure {
    /// First failing assertion of the run
    Assertion {
        predicate: String,
        expected: String,
        actual: String,
        message: Option<String>,
        ordinal: usize,
        line: Option<u32>,
    },
    /// The body raised an error
    Raised { message: String, line: Option<u32> },
    /// A fixture setup failed
    Fixture { fixture: String, message: String },
    /// The run exceeded its timeout
    Timeout { limit_ms: u64 },
}

impl From<AssertionFailure> for Failure {
    fn from(f: AssertionFailure) -> Self {
        Failure::Assertion {
            predicate: f.predicate,
            expected: f.expected,
            actual: f.actual,
            message: f.message,
            ordinal: f.ordinal,
            line: f.line,
        }
    }
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Failure::Assertion {
                predicate,
                expected,
                actual,
                message,
                ordinal,
                ..
            } => {
                write!(
                    f,
                    "{} failed (assertion #{}): expected {}, actual {}",
                    predicate, ordinal, expected, actual
                )?;
                if let Some(message) = message {
                    write!(f, " ({})", message)?;
                }
                Ok(())
            }
            Failure::Raised { message, .. } => write!(f, "error: {}", message),
            Failure::Fixture { fixture, message } => {
                write!(f, "fixture '{}' setup failed: {}", fixture, message)
            }
            Failure::Timeout { limit_ms } => write!(f, "timed out after {}ms", limit_ms),
        }
    }
}

/// Ordered numeric metrics; `record` keeps the last value per name,
/// `record_sample` keeps every value
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MetricSet {
    entries: Vec<Metric>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Metric {
    pub name: String,
    pub value: f64,
    /// Every recorded value when the metric was sampled
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub samples: Vec<f64>,
}

impl MetricSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, name: impl Into<String>, value: f64) {
        let name = name.into();
        match self.entries.iter_mut().find(|m| m.name == name) {
            Some(metric) => metric.value = value,
            None => self.entries.push(Metric {
                name,
                value,
                samples: Vec::new(),
            }),
        }
    }

    /// Append to the history of `name`; its value becomes the latest sample
    pub fn record_sample(&mut self, name: impl Into<String>, value: f64) {
        let name = name.into();
        match self.entries.iter_mut().find(|m| m.name == name) {
            Some(metric) => {
                metric.value = value;
                metric.samples.push(value);
            }
            None => self.entries.push(Metric {
                name,
                value,
                samples: vec![value],
            }),
        }
    }

    pub fn get(&self, name: &str) -> Option<f64> {
        self.entries.iter().find(|m| m.name == name).map(|m| m.value)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Metric> {
        self.entries.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Append `other`'s entries after ours (later names win)
    pub fn merge(&mut self, other: MetricSet) {
        for metric in other.entries {
            if metric.samples.is_empty() {
                self.record(metric.name, metric.value);
            } else {
                for sample in metric.samples {
                    self.record_sample(metric.name.clone(), sample);
                }
            }
        }
    }
}

/// Non-fatal problems attached to runs or to the suite
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum Warning {
    /// A teardown callback failed
    Teardown(TeardownFailure),
    /// Teardown did not finish within the grace period, or a global setup
    /// was still running when the suite released its fixtures
    FixtureLeaked { run: String, grace_ms: u64 },
    /// Mock bindings were still active when the run ended
    MockLeak { run: String, names: Vec<String> },
    /// A unit excluded by a load error (continue-on-load-error mode)
    LoadError { message: String },
}

impl fmt::Display for Warning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Warning::Teardown(t) => {
                write!(f, "teardown '{}' of {} failed: {}", t.label, t.scope, t.message)
            }
            Warning::FixtureLeaked { run, grace_ms } => write!(
                f,
                "fixtures of {} leaked: not released within {}ms",
                run, grace_ms
            ),
            Warning::MockLeak { run, names } => write!(
                f,
                "{} left {} mock(s) installed: {}",
                run,
                names.len(),
                names.join(", ")
            ),
            Warning::LoadError { message } => write!(f, "load error: {}", message),
        }
    }
}

/// Stable sort key: file, declaration order, parameter instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct RunKey {
    pub file: usize,
    pub ordinal: usize,
    pub param: usize,
}

/// One execution of one unit with one parameter instance
#[derive(Debug, Clone, Serialize)]
pub struct TestRun {
    #[serde(skip)]
    pub key: RunKey,
    pub file: String,
    pub group_path: Vec<String>,
    pub name: String,
    pub kind: UnitKindTag,
    pub param_index: Option<usize>,
    pub status: RunStatus,
    pub failure: Option<Failure>,
    pub skip_reason: Option<String>,
    pub assertions: Vec<AssertionResult>,
    #[serde(serialize_with = "serialize_millis")]
    pub duration: Duration,
    pub output: String,
    pub coverage: Vec<RegionId>,
    pub metrics: MetricSet,
    pub warnings: Vec<Warning>,
    /// Ids of the global fixtures this run used
    #[serde(skip)]
    pub globals: Vec<String>,
}

impl TestRun {
    /// "group/sub/name" plus "#index" for parameter instances
    pub fn full_name(&self) -> String {
        let mut name = self.group_path.clone();
        name.push(self.name.clone());
        let mut full = name.join("/");
        if let Some(index) = self.param_index {
            full.push_str(&format!("#{}", index));
        }
        full
    }

    pub fn duration_ms(&self) -> f64 {
        self.duration.as_secs_f64() * 1000.0
    }
}

/// Pass/fail/skip tallies
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SuiteCounts {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub errored: usize,
    pub timed_out: usize,
    pub skipped: usize,
}

impl SuiteCounts {
    pub fn failures(&self) -> usize {
        self.failed + self.errored + self.timed_out
    }
}

/// Everything one suite invocation produced
#[derive(Debug, Clone)]
pub struct SuiteResult {
    pub started_at: DateTime<Utc>,
    pub duration: Duration,
    /// Sorted by [`RunKey`]
    pub runs: Vec<TestRun>,
    /// Suite-level warnings (teardown failures, load errors)
    pub warnings: Vec<Warning>,
    pub load_errors: Vec<LoadError>,
    /// Present when coverage was collected
    pub coverage: Option<CoverageSummary>,
    pub threshold: Option<f64>,
    pub threshold_error: Option<CoverageThresholdError>,
}

impl SuiteResult {
    pub fn counts(&self) -> SuiteCounts {
        let mut counts = SuiteCounts {
            total: self.runs.len(),
            ..SuiteCounts::default()
        };
        for run in &self.runs {
            match run.status {
                RunStatus::Passed => counts.passed += 1,
                RunStatus::Failed => counts.failed += 1,
                RunStatus::Errored => counts.errored += 1,
                RunStatus::TimedOut => counts.timed_out += 1,
                RunStatus::Skipped => counts.skipped += 1,
            }
        }
        counts
    }

    /// No failing run and the coverage threshold (if any) was met
    pub fn is_success(&self) -> bool {
        self.threshold_error.is_none() && !self.runs.iter().any(|r| r.status.is_failure())
    }

    /// Process exit status: 0 on success, 1 otherwise
    pub fn exit_code(&self) -> i32 {
        if self.is_success() {
            0
        } else {
            1
        }
    }
}

fn serialize_millis<S: serde::Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_f64(d.as_secs_f64() * 1000.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metric_record_is_last_write_wins() {
        let mut metrics = MetricSet::new();
        metrics.record("latency", 1.0);
        metrics.record("size", 3.0);
        metrics.record("latency", 2.0);
        assert_eq!(metrics.len(), 2);
        assert_eq!(metrics.get("latency"), Some(2.0));
        let names: Vec<_> = metrics.iter().map(|m| m.name.as_str()).collect();
        assert_eq!(names, vec!["latency", "size"]);
    }

    #[test]
    fn test_metric_samples_keep_history() {
        let mut metrics = MetricSet::new();
        metrics.record_sample("t", 1.0);
        metrics.record_sample("t", 4.0);
        let metric = metrics.iter().next().unwrap();
        assert_eq!(metric.samples, vec![1.0, 4.0]);
        assert_eq!(metric.value, 4.0);
    }

    #[test]
    fn test_status_classification() {
        assert!(RunStatus::TimedOut.is_failure());
        assert!(RunStatus::Errored.is_failure());
        assert!(!RunStatus::Skipped.is_failure());
        assert_eq!(RunStatus::TimedOut.to_string(), "timed-out");
    }

    fn run(status: RunStatus) -> TestRun {
        TestRun {
            key: RunKey { file: 0, ordinal: 0, param: 0 },
            file: "a.hyp".to_string(),
            group_path: vec!["math".to_string()],
            name: "sum".to_string(),
            kind: UnitKindTag::Test,
            param_index: Some(1),
            status,
            failure: None,
            skip_reason: None,
            assertions: Vec::new(),
            duration: Duration::from_millis(3),
            output: String::new(),
            coverage: Vec::new(),
            metrics: MetricSet::new(),
            warnings: Vec::new(),
            globals: Vec::new(),
        }
    }

    fn suite(runs: Vec<TestRun>) -> SuiteResult {
        SuiteResult {
            started_at: Utc::now(),
            duration: Duration::ZERO,
            runs,
            warnings: Vec::new(),
            load_errors: Vec::new(),
            coverage: None,
            threshold: None,
            threshold_error: None,
        }
    }

    #[test]
    fn test_full_name_includes_param_index() {
        assert_eq!(run(RunStatus::Passed).full_name(), "math/sum#1");
    }

    #[test]
    fn test_skipped_runs_do_not_fail_the_suite() {
        let result = suite(vec![run(RunStatus::Passed), run(RunStatus::Skipped)]);
        assert_eq!(result.exit_code(), 0);
        let counts = result.counts();
        assert_eq!((counts.passed, counts.skipped, counts.failures()), (1, 1, 0));
    }

    #[test]
    fn test_timeout_fails_the_suite() {
        let result = suite(vec![run(RunStatus::Passed), run(RunStatus::TimedOut)]);
        assert_eq!(result.exit_code(), 1);
        assert_eq!(result.counts().timed_out, 1);
    }

    #[test]
    fn test_threshold_error_fails_a_passing_suite() {
        let mut result = suite(vec![run(RunStatus::Passed)]);
        result.threshold = Some(80.0);
        result.threshold_error = Some(CoverageThresholdError {
            actual: 65.0,
            required: 80.0,
        });
        assert!(!result.is_success());
        assert_eq!(result.exit_code(), 1);
    }

    #[test]
    fn test_run_keys_sort_by_file_then_declaration() {
        let mut keys = vec![
            RunKey { file: 1, ordinal: 0, param: 0 },
            RunKey { file: 0, ordinal: 2, param: 1 },
            RunKey { file: 0, ordinal: 2, param: 0 },
        ];
        keys.sort();
        assert_eq!(keys[0], RunKey { file: 0, ordinal: 2, param: 0 });
        assert_eq!(keys[2].file, 1);
    }
}
