//! Standalone HTML page

use super::{xml_escape, ReportDocument, ReportOptions};
use crate::result::{RunStatus, TestRun};
use std::fmt::Write;

const STYLE: &str = "body{font-family:sans-serif;margin:2em}\
table{border-collapse:collapse;margin-bottom:2em}\
td,th{border:1px solid #ccc;padding:4px 8px;text-align:left}\
.passed{color:#1a7f37}.failed,.errored,.timed-out{color:#cf222e}.skipped{color:#6e7781}\
pre{margin:0;white-space:pre-wrap}";

pub(super) fn render(doc: &ReportDocument, options: &ReportOptions) -> String {
    let mut out = String::new();
    out.push_str("<!DOCTYPE html>\n<html>\n<head>\n<meta charset=\"utf-8\">\n");
    out.push_str("<title>Test report</title>\n");
    let _ = writeln!(out, "<style>{}</style>", STYLE);
    out.push_str("</head>\n<body>\n");

    write_summary(&mut out, doc);
    write_runs(&mut out, doc, options);
    write_coverage(&mut out, doc);
    write_warnings(&mut out, doc);

    out.push_str("</body>\n</html>\n");
    out
}

fn write_summary(out: &mut String, doc: &ReportDocument) {
    let suite = &doc.suite;
    let counts = &suite.counts;
    let _ = writeln!(
        out,
        "<h1 class=\"{}\">Test result: {}</h1>",
        suite.status,
        suite.status.to_uppercase()
    );
    out.push_str("<table class=\"summary\">\n");
    let rows = [
        ("Total", counts.total),
        ("Passed", counts.passed),
        ("Failed", counts.failed),
        ("Errored", counts.errored),
        ("Timed out", counts.timed_out),
        ("Skipped", counts.skipped),
    ];
    for (label, value) in rows {
        let _ = writeln!(out, "<tr><th>{}</th><td>{}</td></tr>", label, value);
    }
    if let Some(started) = &suite.started_at {
        let _ = writeln!(out, "<tr><th>Started</th><td>{}</td></tr>", xml_escape(started));
    }
    if let Some(ms) = suite.duration_ms {
        let _ = writeln!(out, "<tr><th>Time</th><td>{:.2}ms</td></tr>", ms);
    }
    if let Some(percent) = suite.coverage_percent {
        let _ = writeln!(out, "<tr><th>Coverage</th><td>{:.1}%</td></tr>", percent);
    }
    if let Some(error) = &suite.coverage_error {
        let _ = writeln!(
            out,
            "<tr><th>Threshold</th><td class=\"failed\">{}</td></tr>",
            xml_escape(error)
        );
    }
    out.push_str("</table>\n");
}

fn write_runs(out: &mut String, doc: &ReportDocument, options: &ReportOptions) {
    out.push_str("<h2>Runs</h2>\n<table class=\"runs\">\n");
    out.push_str("<tr><th>File</th><th>Test</th><th>Kind</th><th>Status</th>");
    if options.timings {
        out.push_str("<th>Time</th>");
    }
    out.push_str("<th>Details</th></tr>\n");

    for run in &doc.runs {
        let _ = write!(
            out,
            "<tr class=\"{status}\"><td>{}</td><td>{}</td><td>{}</td><td class=\"{status}\">{status}</td>",
            xml_escape(&run.file),
            xml_escape(&run.full_name()),
            run.kind,
            status = run.status,
        );
        if options.timings {
            let _ = write!(out, "<td>{:.2}ms</td>", run.duration_ms());
        }
        let _ = writeln!(out, "<td>{}</td></tr>", details(run));
    }
    out.push_str("</table>\n");
}

fn details(run: &TestRun) -> String {
    let mut parts = Vec::new();
    if run.status == RunStatus::Skipped {
        if let Some(reason) = &run.skip_reason {
            parts.push(xml_escape(reason));
        }
    }
    if let Some(failure) = &run.failure {
        parts.push(xml_escape(&failure.to_string()));
    }
    if !run.metrics.is_empty() {
        let metrics: Vec<String> = run
            .metrics
            .iter()
            .map(|m| format!("{} = {}", xml_escape(&m.name), m.value))
            .collect();
        parts.push(metrics.join(", "));
    }
    if !run.output.is_empty() && run.status.is_failure() {
        parts.push(format!("<pre>{}</pre>", xml_escape(&run.output)));
    }
    parts.join("<br>")
}

fn write_coverage(out: &mut String, doc: &ReportDocument) {
    let Some(coverage) = &doc.coverage else {
        return;
    };
    let _ = writeln!(
        out,
        "<h2>Coverage: {:.1}% ({}/{} regions)</h2>",
        coverage.percent, coverage.covered, coverage.total
    );
    out.push_str("<table class=\"coverage\">\n");
    out.push_str("<tr><th>File</th><th>Covered</th><th>Percent</th><th>Uncovered lines</th></tr>\n");
    for file in &coverage.files {
        let lines: Vec<String> = file.uncovered_lines.iter().map(|l| l.to_string()).collect();
        let _ = writeln!(
            out,
            "<tr><td>{}</td><td>{}/{}</td><td>{:.1}%</td><td>{}</td></tr>",
            xml_escape(&file.file),
            file.covered,
            file.total,
            file.percent,
            lines.join(", ")
        );
    }
    out.push_str("</table>\n");
}

fn write_warnings(out: &mut String, doc: &ReportDocument) {
    let mut warnings: Vec<String> = doc.warnings.iter().map(|w| w.to_string()).collect();
    for run in &doc.runs {
        for warning in &run.warnings {
            if !doc.warnings.contains(warning) {
                warnings.push(warning.to_string());
            }
        }
    }
    for error in &doc.load_errors {
        warnings.push(error.to_string());
    }
    if warnings.is_empty() {
        return;
    }
    out.push_str("<h2>Warnings</h2>\n<ul>\n");
    for warning in warnings {
        let _ = writeln!(out, "<li>{}</li>", xml_escape(&warning));
    }
    out.push_str("</ul>\n");
}

#[cfg(test)]
mod tests {
    use super::super::fixtures;
    use super::*;

    fn page(timings: bool) -> String {
        let options = ReportOptions {
            verbose: false,
            color: false,
            timings,
        };
        render(&ReportDocument::new(&fixtures::suite(), &options), &options)
    }

    #[test]
    fn test_standalone_document() {
        let html = page(false);
        assert!(html.starts_with("<!DOCTYPE html>"));
        assert!(html.trim_end().ends_with("</html>"));
        assert!(!html.contains("<script"));
        assert!(html.contains("<h1 class=\"failed\">Test result: FAILED</h1>"));
    }

    #[test]
    fn test_run_rows_escape_messages() {
        let html = page(false);
        assert!(html.contains("<td>math/sum#1</td>"));
        assert!(html.contains("(sum &lt;mismatch&gt; &amp; more)"));
        assert!(!html.contains("<mismatch>"));
        assert!(html.contains("not ready"));
    }

    #[test]
    fn test_coverage_table() {
        let html = page(false);
        assert!(html.contains("<h2>Coverage: 75.0% (3/4 regions)</h2>"));
        assert!(html.contains("<tr><td>math.hyp</td><td>3/4</td><td>75.0%</td><td>12</td></tr>"));
    }

    #[test]
    fn test_timing_columns_follow_options() {
        assert!(!page(false).contains("<th>Time</th>"));
        assert!(page(true).contains("<th>Time</th>"));
    }
}
