//! JUnit-compatible XML
//!
//! One `<testsuite>` per file and group path, in run order.

use super::{ReportDocument, ReportOptions};
use crate::result::{Failure, RunStatus, TestRun};
use std::fmt::Write;

pub(crate) fn xml_escape(input: &str) -> String {
    input
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}

pub(super) fn render(doc: &ReportDocument, options: &ReportOptions) -> String {
    let counts = &doc.suite.counts;
    let mut out = String::from("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n");
    let _ = write!(
        out,
        "<testsuites name=\"trance\" tests=\"{}\" failures=\"{}\" errors=\"{}\" skipped=\"{}\"",
        counts.total,
        counts.failed,
        counts.errored + counts.timed_out,
        counts.skipped
    );
    if let Some(ms) = doc.suite.duration_ms {
        let _ = write!(out, " time=\"{}\"", seconds(ms));
    }
    out.push_str(">\n");

    for (name, runs) in suites(&doc.runs) {
        write_suite(&mut out, &name, &runs, options);
    }

    out.push_str("</testsuites>\n");
    out
}

/// Group runs by file and group path, keeping first-seen order
fn suites(runs: &[TestRun]) -> Vec<(String, Vec<&TestRun>)> {
    let mut suites: Vec<(String, Vec<&TestRun>)> = Vec::new();
    for run in runs {
        let name = suite_name(run);
        match suites.iter_mut().find(|(n, _)| *n == name) {
            Some((_, members)) => members.push(run),
            None => suites.push((name, vec![run])),
        }
    }
    suites
}

fn suite_name(run: &TestRun) -> String {
    if run.group_path.is_empty() {
        run.file.clone()
    } else {
        format!("{}::{}", run.file, run.group_path.join("/"))
    }
}

fn write_suite(out: &mut String, name: &str, runs: &[&TestRun], options: &ReportOptions) {
    let failures = runs.iter().filter(|r| r.status == RunStatus::Failed).count();
    let errors = runs
        .iter()
        .filter(|r| matches!(r.status, RunStatus::Errored | RunStatus::TimedOut))
        .count();
    let skipped = runs.iter().filter(|r| r.status == RunStatus::Skipped).count();

    let _ = write!(
        out,
        "  <testsuite name=\"{}\" tests=\"{}\" failures=\"{}\" errors=\"{}\" skipped=\"{}\"",
        xml_escape(name),
        runs.len(),
        failures,
        errors,
        skipped
    );
    if options.timings {
        let total: f64 = runs.iter().map(|r| r.duration_ms()).sum();
        let _ = write!(out, " time=\"{}\"", seconds(total));
    }
    out.push_str(">\n");
    for run in runs {
        write_case(out, name, run, options);
    }
    out.push_str("  </testsuite>\n");
}

fn write_case(out: &mut String, suite: &str, run: &TestRun, options: &ReportOptions) {
    let mut name = run.name.clone();
    if let Some(index) = run.param_index {
        name.push_str(&format!("#{}", index));
    }
    let _ = write!(
        out,
        "    <testcase classname=\"{}\" name=\"{}\"",
        xml_escape(suite),
        xml_escape(&name)
    );
    if options.timings {
        let _ = write!(out, " time=\"{}\"", seconds(run.duration_ms()));
    }

    let has_body =
        run.status != RunStatus::Passed || !run.metrics.is_empty() || !run.output.is_empty();
    if !has_body {
        out.push_str("/>\n");
        return;
    }
    out.push_str(">\n");

    match (run.status, &run.failure) {
        (RunStatus::Skipped, _) => {
            let reason = run.skip_reason.as_deref().unwrap_or("skipped");
            let _ = writeln!(out, "      <skipped message=\"{}\"/>", xml_escape(reason));
        }
        (RunStatus::Failed, Some(failure)) => {
            write_failure(out, "failure", failure_type(failure), failure);
        }
        (RunStatus::Errored | RunStatus::TimedOut, Some(failure)) => {
            write_failure(out, "error", failure_type(failure), failure);
        }
        (RunStatus::Errored | RunStatus::TimedOut | RunStatus::Failed, None) => {
            let _ = writeln!(out, "      <error type=\"{}\"/>", run.status);
        }
        (RunStatus::Passed, _) => {}
    }

    if !run.metrics.is_empty() {
        out.push_str("      <properties>\n");
        for metric in run.metrics.iter() {
            let _ = writeln!(
                out,
                "        <property name=\"{}\" value=\"{}\"/>",
                xml_escape(&metric.name),
                metric.value
            );
        }
        out.push_str("      </properties>\n");
    }
    if !run.output.is_empty() {
        let _ = writeln!(out, "      <system-out>{}</system-out>", xml_escape(&run.output));
    }
    out.push_str("    </testcase>\n");
}

fn write_failure(out: &mut String, element: &str, kind: &str, failure: &Failure) {
    let message = failure.to_string();
    let _ = write!(
        out,
        "      <{} type=\"{}\" message=\"{}\">",
        element,
        kind,
        xml_escape(&message)
    );
    if let Failure::Assertion { line: Some(line), .. } | Failure::Raised { line: Some(line), .. } =
        failure
    {
        let _ = write!(out, "at line {}", line);
    }
    let _ = writeln!(out, "</{}>", element);
}

fn failure_type(failure: &Failure) -> &'static str {
    match failure {
        Failure::Assertion { .. } => "assertion",
        Failure::Raised { .. } => "raised",
        Failure::Fixture { .. } => "fixture",
        Failure::Timeout { .. } => "timeout",
    }
}

fn seconds(ms: f64) -> String {
    format!("{:.3}", ms / 1000.0)
}

#[cfg(test)]
mod tests {
    use super::super::fixtures;
    use super::*;

    fn options(timings: bool) -> ReportOptions {
        ReportOptions {
            verbose: false,
            color: false,
            timings,
        }
    }

    fn xml(timings: bool) -> String {
        let doc = ReportDocument::new(&fixtures::suite(), &options(timings));
        render(&doc, &options(timings))
    }

    #[test]
    fn test_escape_order() {
        assert_eq!(xml_escape("a<b & \"c\"'"), "a&lt;b &amp; &quot;c&quot;&apos;");
        assert_eq!(xml_escape("&lt;"), "&amp;lt;");
    }

    #[test]
    fn test_suites_per_group() {
        let xml = xml(false);
        assert!(xml.starts_with("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<testsuites"));
        assert!(xml.contains(
            "<testsuite name=\"math.hyp::math\" tests=\"3\" failures=\"1\" errors=\"0\" skipped=\"1\">"
        ));
        assert!(xml.contains("<testsuite name=\"math.hyp\" tests=\"1\""));
        assert!(xml.trim_end().ends_with("</testsuites>"));
    }

    #[test]
    fn test_failure_and_skip_elements() {
        let xml = xml(false);
        assert!(xml.contains("<testcase classname=\"math.hyp::math\" name=\"sum#1\">"));
        assert!(xml.contains(
            "<failure type=\"assertion\" message=\"assert_equal failed (assertion #2): expected 12, actual 13 (sum &lt;mismatch&gt; &amp; more)\">at line 9</failure>"
        ));
        assert!(xml.contains("<skipped message=\"not ready\"/>"));
        assert!(xml.contains("<system-out>2 + 2 = 4\n</system-out>"));
        assert!(xml.contains("<property name=\"iterations\" value=\"10\"/>"));
    }

    #[test]
    fn test_time_attributes_follow_timings() {
        assert!(!xml(false).contains("time="));
        let timed = xml(true);
        assert!(timed.contains("skipped=\"1\" time=\"0.042\">"));
        assert!(timed.contains("name=\"addition\" time=\"0.002\""));
    }
}
