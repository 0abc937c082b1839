//! Report generation
//!
//! Every format is a view of the same [`ReportDocument`]. Rendering is pure:
//! the same suite result and options give byte-identical output, and with
//! timings disabled that holds across runs as well.

mod html;
mod json;
mod junit;
mod text;

use crate::coverage::CoverageSummary;
use crate::plan::LoadError;
use crate::result::{SuiteCounts, SuiteResult, TestRun, Warning};
use serde::Serialize;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;
use tracing::info;

use junit::xml_escape;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportFormat {
    #[default]
    Text,
    Json,
    Xml,
    Html,
}

impl ReportFormat {
    pub const ALL: [ReportFormat; 4] = [
        ReportFormat::Text,
        ReportFormat::Json,
        ReportFormat::Xml,
        ReportFormat::Html,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ReportFormat::Text => "text",
            ReportFormat::Json => "json",
            ReportFormat::Xml => "xml",
            ReportFormat::Html => "html",
        }
    }
}

impl fmt::Display for ReportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReportFormat {
    type Err = ReportError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "text" => Ok(ReportFormat::Text),
            "json" => Ok(ReportFormat::Json),
            "xml" | "junit" => Ok(ReportFormat::Xml),
            "html" => Ok(ReportFormat::Html),
            other => Err(ReportError::UnknownFormat(other.to_string())),
        }
    }
}

#[derive(Debug, Error)]
pub enum ReportError {
    #[error("unknown report format '{0}' (expected text, json, xml or html)")]
    UnknownFormat(String),

    #[error("the {0} format needs an output path (--output)")]
    OutputRequired(ReportFormat),

    #[error("failed to write report to {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to serialize report: {0}")]
    Json(#[from] serde_json::Error),
}

/// Presentation switches shared by all formats
#[derive(Debug, Clone, Copy)]
pub struct ReportOptions {
    /// List passing runs and assertions in text output
    pub verbose: bool,
    /// ANSI colors in text output
    pub color: bool,
    /// Include timestamps, durations and timing metrics
    pub timings: bool,
}

impl Default for ReportOptions {
    fn default() -> Self {
        Self {
            verbose: false,
            color: true,
            timings: true,
        }
    }
}

/// Suite-level metadata
#[derive(Debug, Clone, Serialize)]
pub struct SuiteSummary {
    pub status: &'static str,
    pub exit_code: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<f64>,
    #[serde(flatten)]
    pub counts: SuiteCounts,
    pub coverage_percent: Option<f64>,
    pub coverage_threshold: Option<f64>,
    pub coverage_error: Option<String>,
}

/// Aggregate of all runs plus suite metadata
#[derive(Debug, Clone, Serialize)]
pub struct ReportDocument {
    pub suite: SuiteSummary,
    pub runs: Vec<TestRun>,
    pub warnings: Vec<Warning>,
    pub load_errors: Vec<LoadError>,
    pub coverage: Option<CoverageSummary>,
}

impl ReportDocument {
    pub fn new(result: &SuiteResult, options: &ReportOptions) -> Self {
        let mut runs = result.runs.clone();
        if !options.timings {
            for run in &mut runs {
                strip_timings(run);
            }
        }

        let suite = SuiteSummary {
            status: if result.is_success() { "passed" } else { "failed" },
            exit_code: result.exit_code(),
            started_at: options.timings.then(|| result.started_at.to_rfc3339()),
            duration_ms: options
                .timings
                .then(|| result.duration.as_secs_f64() * 1000.0),
            counts: result.counts(),
            coverage_percent: result.coverage.as_ref().map(|c| c.percent),
            coverage_threshold: result.threshold,
            coverage_error: result.threshold_error.as_ref().map(|e| e.to_string()),
        };

        Self {
            suite,
            runs,
            warnings: result.warnings.clone(),
            load_errors: result.load_errors.clone(),
            coverage: result.coverage.clone(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.suite.exit_code == 0
    }
}

/// Durations and timing metrics vary between runs
fn strip_timings(run: &mut TestRun) {
    run.duration = Duration::ZERO;
    let mut kept = crate::result::MetricSet::new();
    for metric in run.metrics.iter() {
        if is_timing_metric(&metric.name) {
            continue;
        }
        if metric.samples.is_empty() {
            kept.record(metric.name.clone(), metric.value);
        } else {
            for sample in &metric.samples {
                kept.record_sample(metric.name.clone(), *sample);
            }
        }
    }
    run.metrics = kept;
}

fn is_timing_metric(name: &str) -> bool {
    name.ends_with("_ms") || name.ends_with("_per_sec")
}

/// Render one format to a string
pub fn render(
    result: &SuiteResult,
    format: ReportFormat,
    options: &ReportOptions,
) -> Result<String, ReportError> {
    let doc = ReportDocument::new(result, options);
    match format {
        ReportFormat::Text => Ok(text::render(&doc, options)),
        ReportFormat::Json => json::render(&doc),
        ReportFormat::Xml => Ok(junit::render(&doc, options)),
        ReportFormat::Html => Ok(html::render(&doc, options)),
    }
}

/// Write a report to `output`, or return it for stdout.
///
/// Only the text format may go to stdout; the others need a file.
pub fn write_report(
    result: &SuiteResult,
    format: ReportFormat,
    options: &ReportOptions,
    output: Option<&Path>,
) -> Result<Option<String>, ReportError> {
    let Some(path) = output else {
        if format != ReportFormat::Text {
            return Err(ReportError::OutputRequired(format));
        }
        return render(result, format, options).map(Some);
    };

    let rendered = render(result, format, options)?;
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|source| ReportError::Io {
            path: parent.to_path_buf(),
            source,
        })?;
    }
    fs::write(path, rendered).map_err(|source| ReportError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    info!(format = %format, path = %path.display(), "report written");
    Ok(None)
}

#[cfg(test)]
pub(crate) mod fixtures {
    //! A small finished suite shared by the format tests

    use crate::assertion::{AssertionLocation, AssertionResult};
    use crate::coverage::{CoverageSummary, FileCoverage};
    use crate::fixture::TeardownFailure;
    use crate::plan::UnitKindTag;
    use crate::result::{
        Failure, MetricSet, RunKey, RunStatus, SuiteResult, TestRun, Warning,
    };
    use chrono::{TimeZone, Utc};
    use std::time::Duration;

    fn run(ordinal: usize, name: &str, status: RunStatus) -> TestRun {
        TestRun {
            key: RunKey {
                file: 0,
                ordinal,
                param: 0,
            },
            file: "math.hyp".to_string(),
            group_path: vec!["math".to_string()],
            name: name.to_string(),
            kind: UnitKindTag::Test,
            param_index: None,
            status,
            failure: None,
            skip_reason: None,
            assertions: Vec::new(),
            duration: Duration::from_millis(2),
            output: String::new(),
            coverage: Vec::new(),
            metrics: MetricSet::new(),
            warnings: Vec::new(),
            globals: Vec::new(),
        }
    }

    fn passing_assertion(ordinal: usize) -> AssertionResult {
        AssertionResult {
            passed: true,
            predicate: "assert_equal".to_string(),
            expected: "4".to_string(),
            actual: "4".to_string(),
            message: None,
            location: AssertionLocation {
                group_path: vec!["math".to_string()],
                test: "addition".to_string(),
                param_index: None,
                ordinal,
                line: Some(3),
            },
        }
    }

    pub fn suite() -> SuiteResult {
        let mut addition = run(0, "addition", RunStatus::Passed);
        addition.assertions.push(passing_assertion(1));
        addition.output = "2 + 2 = 4\n".to_string();

        let mut sum = run(1, "sum", RunStatus::Failed);
        sum.param_index = Some(1);
        sum.key.param = 1;
        sum.failure = Some(Failure::Assertion {
            predicate: "assert_equal".to_string(),
            expected: "12".to_string(),
            actual: "13".to_string(),
            message: Some("sum <mismatch> & more".to_string()),
            ordinal: 2,
            line: Some(9),
        });

        let mut todo = run(2, "todo", RunStatus::Skipped);
        todo.skip_reason = Some("not ready".to_string());

        let mut sort = run(3, "sort", RunStatus::Passed);
        sort.group_path.clear();
        sort.kind = UnitKindTag::Bench;
        sort.metrics.record("iterations", 10.0);
        sort.metrics.record("mean_ms", 0.25);

        let teardown = Warning::Teardown(TeardownFailure {
            scope: "db".to_string(),
            label: "teardown".to_string(),
            message: "connection already closed".to_string(),
        });

        SuiteResult {
            started_at: Utc.with_ymd_and_hms(2026, 1, 2, 3, 4, 5).unwrap(),
            duration: Duration::from_millis(42),
            runs: vec![addition, sum, todo, sort],
            warnings: vec![teardown],
            load_errors: Vec::new(),
            coverage: Some(CoverageSummary {
                covered: 3,
                total: 4,
                percent: 75.0,
                files: vec![FileCoverage {
                    file: "math.hyp".to_string(),
                    covered: 3,
                    total: 4,
                    percent: 75.0,
                    uncovered_lines: vec![12],
                }],
            }),
            threshold: None,
            threshold_error: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn quiet() -> ReportOptions {
        ReportOptions {
            verbose: false,
            color: false,
            timings: false,
        }
    }

    #[test]
    fn test_format_parsing() {
        assert_eq!("JSON".parse::<ReportFormat>().unwrap(), ReportFormat::Json);
        assert_eq!("junit".parse::<ReportFormat>().unwrap(), ReportFormat::Xml);
        assert!(matches!(
            "yaml".parse::<ReportFormat>(),
            Err(ReportError::UnknownFormat(_))
        ));
    }

    #[test]
    fn test_document_counts_and_status() {
        let doc = ReportDocument::new(&fixtures::suite(), &quiet());
        assert_eq!(doc.suite.counts.passed, 2);
        assert_eq!(doc.suite.counts.failed, 1);
        assert_eq!(doc.suite.counts.skipped, 1);
        assert_eq!(doc.suite.status, "failed");
        assert_eq!(doc.suite.exit_code, 1);
    }

    #[test]
    fn test_no_timings_strips_time_fields() {
        let doc = ReportDocument::new(&fixtures::suite(), &quiet());
        assert!(doc.suite.started_at.is_none());
        assert!(doc.runs.iter().all(|r| r.duration == Duration::ZERO));
        let bench = &doc.runs[3];
        assert_eq!(bench.metrics.get("iterations"), Some(10.0));
        assert_eq!(bench.metrics.get("mean_ms"), None);
    }

    #[test]
    fn test_rendering_is_deterministic() {
        let suite = fixtures::suite();
        for format in ReportFormat::ALL {
            let first = render(&suite, format, &quiet()).unwrap();
            let second = render(&suite, format, &quiet()).unwrap();
            assert_eq!(first, second, "{} output differs", format);
        }
    }

    #[test]
    fn test_non_text_formats_need_an_output_path() {
        let suite = fixtures::suite();
        let err = write_report(&suite, ReportFormat::Json, &quiet(), None).unwrap_err();
        assert!(matches!(err, ReportError::OutputRequired(ReportFormat::Json)));
        let text = write_report(&suite, ReportFormat::Text, &quiet(), None).unwrap();
        assert!(text.is_some());
    }

    #[test]
    fn test_write_report_creates_parent_dirs() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("reports").join("junit.xml");
        let written =
            write_report(&fixtures::suite(), ReportFormat::Xml, &quiet(), Some(&path)).unwrap();
        assert!(written.is_none());
        let content = fs::read_to_string(&path).unwrap();
        assert!(content.starts_with("<?xml"));
    }
}
