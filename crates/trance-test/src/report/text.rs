//! Human-readable summary

use super::{ReportDocument, ReportOptions};
use crate::result::{Failure, RunStatus, TestRun};
use colored::{ColoredString, Colorize};
use std::fmt::{self, Write};

pub(super) fn render(doc: &ReportDocument, options: &ReportOptions) -> String {
    let mut out = String::new();
    // Writing into a String cannot fail
    let _ = TextReport { doc, options }.write(&mut out);
    out
}

struct TextReport<'a> {
    doc: &'a ReportDocument,
    options: &'a ReportOptions,
}

impl TextReport<'_> {
    fn write(&self, out: &mut String) -> fmt::Result {
        if self.options.verbose {
            for run in &self.doc.runs {
                self.write_run_line(out, run)?;
            }
        } else if !self.doc.runs.is_empty() {
            for run in &self.doc.runs {
                write!(out, "{}", self.marker(run.status))?;
            }
            writeln!(out)?;
        }

        writeln!(out)?;
        self.write_summary(out)?;
        self.write_failures(out)?;
        self.write_warnings(out)?;
        Ok(())
    }

    fn paint(&self, text: &str, style: fn(&str) -> ColoredString) -> String {
        if self.options.color {
            style(text).to_string()
        } else {
            text.to_string()
        }
    }

    fn marker(&self, status: RunStatus) -> String {
        match status {
            RunStatus::Passed => self.paint(".", |s| s.green()),
            RunStatus::Failed => self.paint("F", |s| s.red().bold()),
            RunStatus::Errored => self.paint("E", |s| s.red().bold()),
            RunStatus::TimedOut => self.paint("T", |s| s.yellow().bold()),
            RunStatus::Skipped => self.paint("S", |s| s.dimmed()),
        }
    }

    fn label(&self, status: RunStatus) -> String {
        match status {
            RunStatus::Passed => self.paint("PASS", |s| s.green().bold()),
            RunStatus::Failed => self.paint("FAIL", |s| s.red().bold()),
            RunStatus::Errored => self.paint("ERROR", |s| s.red().bold()),
            RunStatus::TimedOut => self.paint("TIMEOUT", |s| s.yellow().bold()),
            RunStatus::Skipped => self.paint("SKIP", |s| s.dimmed()),
        }
    }

    fn write_run_line(&self, out: &mut String, run: &TestRun) -> fmt::Result {
        write!(out, "{} {}", self.label(run.status), run.full_name())?;
        if let Some(reason) = &run.skip_reason {
            write!(out, " ({})", reason)?;
        } else if self.options.timings {
            write!(out, " ({:.2?})", run.duration)?;
        }
        writeln!(out)?;

        for assertion in run.assertions.iter().filter(|a| a.passed) {
            write!(
                out,
                "    {} {} #{}",
                self.paint("ok", |s| s.green()),
                assertion.predicate,
                assertion.location.ordinal
            )?;
            if let Some(line) = assertion.location.line {
                write!(out, " (line {})", line)?;
            }
            writeln!(out)?;
        }
        for metric in run.metrics.iter() {
            writeln!(out, "    {} = {}", metric.name, format_metric(metric.value))?;
        }
        Ok(())
    }

    fn write_summary(&self, out: &mut String) -> fmt::Result {
        let suite = &self.doc.suite;
        let counts = &suite.counts;
        writeln!(out, "{}", "─".repeat(50))?;

        let status = if self.doc.is_success() {
            self.paint("PASSED", |s| s.green().bold())
        } else {
            self.paint("FAILED", |s| s.red().bold())
        };
        writeln!(
            out,
            "Test result: {} | {} total, {} passed, {} failed, {} errored, {} timed out, {} skipped",
            status,
            counts.total,
            counts.passed,
            counts.failed,
            counts.errored,
            counts.timed_out,
            counts.skipped
        )?;
        if let Some(ms) = suite.duration_ms {
            writeln!(out, "Time: {:.2}ms", ms)?;
        }

        if let Some(coverage) = &self.doc.coverage {
            write!(
                out,
                "Coverage: {:.1}% ({}/{} regions)",
                coverage.percent, coverage.covered, coverage.total
            )?;
            if let Some(threshold) = suite.coverage_threshold {
                write!(out, ", required {:.1}%", threshold)?;
            }
            writeln!(out)?;
        }
        if let Some(error) = &suite.coverage_error {
            writeln!(out, "{}", self.paint(error, |s| s.red()))?;
        }
        Ok(())
    }

    fn write_failures(&self, out: &mut String) -> fmt::Result {
        let failures: Vec<&TestRun> = self
            .doc
            .runs
            .iter()
            .filter(|r| r.status.is_failure())
            .collect();
        if failures.is_empty() {
            return Ok(());
        }

        writeln!(out)?;
        writeln!(out, "{}", self.paint("Failures:", |s| s.red().bold()))?;
        writeln!(out)?;
        for run in failures {
            writeln!(
                out,
                "  {} {} {}",
                self.paint("●", |s| s.red()),
                run.file,
                self.paint(&run.full_name(), |s| s.bold())
            )?;
            if let Some(failure) = &run.failure {
                writeln!(out, "      {}", failure)?;
            }
            if let Some(line) = failure_line(run) {
                writeln!(out, "      at line {}", line)?;
            }
            for line in run.output.lines() {
                writeln!(out, "      | {}", self.paint(line, |s| s.dimmed()))?;
            }
            writeln!(out)?;
        }
        Ok(())
    }

    fn write_warnings(&self, out: &mut String) -> fmt::Result {
        let per_run = self
            .doc
            .runs
            .iter()
            .flat_map(|r| r.warnings.iter())
            .filter(|w| !self.doc.warnings.contains(w));
        let warnings: Vec<String> = self
            .doc
            .warnings
            .iter()
            .chain(per_run)
            .map(|w| w.to_string())
            .collect();
        if warnings.is_empty() {
            return Ok(());
        }

        writeln!(out)?;
        writeln!(out, "{}", self.paint("Warnings:", |s| s.yellow().bold()))?;
        for warning in warnings {
            writeln!(out, "  {} {}", self.paint("!", |s| s.yellow()), warning)?;
        }
        Ok(())
    }
}

fn failure_line(run: &TestRun) -> Option<u32> {
    match &run.failure {
        Some(Failure::Assertion { line, .. }) | Some(Failure::Raised { line, .. }) => *line,
        _ => None,
    }
}

fn format_metric(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        format!("{:.3}", value)
    }
}
