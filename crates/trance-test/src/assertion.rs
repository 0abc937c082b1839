//! Assertion engine
//!
//! Every predicate call appends an [`AssertionResult`] to the run's log,
//! pass or fail, and a failure is also returned as a typed
//! [`AssertionFailure`] that unwinds only the current run. Reports read the
//! log, so they never depend on how the failure propagated.
//!
//! # Predicates
//!
//! - `assert_true` / `assert_false`
//! - `assert_equal` / `assert_not_equal` (deep structural equality)
//! - `assert_greater`, `assert_greater_equal`, `assert_less`, `assert_less_equal`
//! - `assert_float_equal` (`|actual - expected| <= tolerance`)
//! - `assert_null` / `assert_not_null`, `assert_empty` / `assert_not_empty`
//! - `assert_contains` / `assert_not_contains`, `assert_length`
//! - `assert_starts_with` / `assert_ends_with`
//! - `assert_throws`, `assert_does_not_throw`, `assert_throws_with_message`

use crate::context::ScriptError;
use crate::value::Value;
use parking_lot::Mutex;
use serde::Serialize;
use std::cmp::Ordering;
use std::sync::atomic::{AtomicU32, Ordering as AtomicOrdering};
use thiserror::Error;

/// Default absolute tolerance for float equality
pub const DEFAULT_TOLERANCE: f64 = 0.001;

/// Where an assertion happened
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AssertionLocation {
    pub group_path: Vec<String>,
    pub test: String,
    pub param_index: Option<usize>,
    /// 1-based position among the run's assertions
    pub ordinal: usize,
    pub line: Option<u32>,
}

/// Immutable record of one predicate evaluation
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AssertionResult {
    pub passed: bool,
    pub predicate: String,
    pub expected: String,
    pub actual: String,
    pub message: Option<String>,
    pub location: AssertionLocation,
}

/// A failed predicate; ends the current run
#[derive(Debug, Clone, PartialEq, Error)]
#[error(
    "{predicate} failed (assertion #{ordinal}): expected {expected}, actual {actual}{}",
    message_suffix(.message)
)]
pub struct AssertionFailure {
    pub predicate: String,
    pub expected: String,
    pub actual: String,
    pub message: Option<String>,
    pub ordinal: usize,
    pub line: Option<u32>,
}

/// How a raised error is matched by the throw predicates
pub enum ThrowExpectation<'a> {
    Any,
    MessageContains(&'a str),
    Matching(&'a dyn Fn(&str) -> bool),
}

/// Identity of the run an engine belongs to
#[derive(Debug, Clone, Default)]
struct Site {
    group_path: Vec<String>,
    test: String,
    param_index: Option<usize>,
}

/// Evaluates predicates and keeps the assertion log of one run
#[derive(Debug)]
pub struct AssertionEngine {
    site: Site,
    tolerance: f64,
    line: AtomicU32,
    log: Mutex<Vec<AssertionResult>>,
}

impl AssertionEngine {
    pub fn new(test: impl Into<String>) -> Self {
        Self {
            site: Site {
                test: test.into(),
                ..Site::default()
            },
            tolerance: DEFAULT_TOLERANCE,
            line: AtomicU32::new(0),
            log: Mutex::new(Vec::new()),
        }
    }

    pub fn with_site(mut self, group_path: Vec<String>, param_index: Option<usize>) -> Self {
        self.site.group_path = group_path;
        self.site.param_index = param_index;
        self
    }

    pub fn with_tolerance(mut self, tolerance: f64) -> Self {
        self.tolerance = tolerance;
        self
    }

    pub fn tolerance(&self) -> f64 {
        self.tolerance
    }

    /// Source line attributed to the next assertions
    pub fn set_line(&self, line: u32) {
        self.line.store(line, AtomicOrdering::Relaxed);
    }

    /// Snapshot of the log in evaluation order
    pub fn results(&self) -> Vec<AssertionResult> {
        self.log.lock().clone()
    }

    pub fn count(&self) -> usize {
        self.log.lock().len()
    }

    fn check(
        &self,
        predicate: &str,
        passed: bool,
        expected: String,
        actual: String,
        message: Option<&str>,
    ) -> Result<(), AssertionFailure> {
        let line = match self.line.load(AtomicOrdering::Relaxed) {
            0 => None,
            n => Some(n),
        };
        let mut log = self.log.lock();
        let ordinal = log.len() + 1;
        log.push(AssertionResult {
            passed,
            predicate: predicate.to_string(),
            expected: expected.clone(),
            actual: actual.clone(),
            message: message.map(str::to_string),
            location: AssertionLocation {
                group_path: self.site.group_path.clone(),
                test: self.site.test.clone(),
                param_index: self.site.param_index,
                ordinal,
                line,
            },
        });
        drop(log);

        if passed {
            Ok(())
        } else {
            Err(AssertionFailure {
                predicate: predicate.to_string(),
                expected,
                actual,
                message: message.map(str::to_string),
                ordinal,
                line,
            })
        }
    }

    // ========================================================================
    // Basic assertions
    // ========================================================================

    pub fn assert_true(
        &self,
        actual: &Value,
        message: Option<&str>,
    ) -> Result<(), AssertionFailure> {
        let passed = actual.as_bool() == Some(true);
        self.check("assert_true", passed, "true".into(), actual.repr(), message)
    }

    pub fn assert_false(
        &self,
        actual: &Value,
        message: Option<&str>,
    ) -> Result<(), AssertionFailure> {
        let passed = actual.as_bool() == Some(false);
        self.check("assert_false", passed, "false".into(), actual.repr(), message)
    }

    // ========================================================================
    // Equality
    // ========================================================================

    pub fn assert_equal(
        &self,
        actual: &Value,
        expected: &Value,
        message: Option<&str>,
    ) -> Result<(), AssertionFailure> {
        self.check(
            "assert_equal",
            actual == expected,
            expected.repr(),
            actual.repr(),
            message,
        )
    }

    pub fn assert_not_equal(
        &self,
        actual: &Value,
        unexpected: &Value,
        message: Option<&str>,
    ) -> Result<(), AssertionFailure> {
        self.check(
            "assert_not_equal",
            actual != unexpected,
            format!("not {}", unexpected.repr()),
            actual.repr(),
            message,
        )
    }

    // ========================================================================
    // Ordering
    // ========================================================================

    pub fn assert_greater(
        &self,
        actual: &Value,
        bound: &Value,
        message: Option<&str>,
    ) -> Result<(), AssertionFailure> {
        self.compare("assert_greater", ">", actual, bound, message, |o| {
            o == Ordering::Greater
        })
    }

    pub fn assert_greater_equal(
        &self,
        actual: &Value,
        bound: &Value,
        message: Option<&str>,
    ) -> Result<(), AssertionFailure> {
        self.compare("assert_greater_equal", ">=", actual, bound, message, |o| {
            o != Ordering::Less
        })
    }

    pub fn assert_less(
        &self,
        actual: &Value,
        bound: &Value,
        message: Option<&str>,
    ) -> Result<(), AssertionFailure> {
        self.compare("assert_less", "<", actual, bound, message, |o| o == Ordering::Less)
    }

    pub fn assert_less_equal(
        &self,
        actual: &Value,
        bound: &Value,
        message: Option<&str>,
    ) -> Result<(), AssertionFailure> {
        self.compare("assert_less_equal", "<=", actual, bound, message, |o| {
            o != Ordering::Greater
        })
    }

    fn compare(
        &self,
        predicate: &str,
        symbol: &str,
        actual: &Value,
        bound: &Value,
        message: Option<&str>,
        accept: impl Fn(Ordering) -> bool,
    ) -> Result<(), AssertionFailure> {
        let ordering = match (actual, bound) {
            (Value::Number(a), Value::Number(b)) => a.partial_cmp(b),
            (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
            _ => None,
        };
        let passed = ordering.is_some_and(accept);
        self.check(
            predicate,
            passed,
            format!("{} {}", symbol, bound.repr()),
            actual.repr(),
            message,
        )
    }

    // ========================================================================
    // Floating point
    // ========================================================================

    /// Passes iff `|actual - expected| <= tolerance` (engine default when `None`)
    pub fn assert_float_equal(
        &self,
        actual: &Value,
        expected: &Value,
        tolerance: Option<f64>,
        message: Option<&str>,
    ) -> Result<(), AssertionFailure> {
        let tolerance = tolerance.unwrap_or(self.tolerance);
        let passed = match (actual.as_number(), expected.as_number()) {
            (Some(a), Some(b)) => within_tolerance(a, b, tolerance),
            _ => false,
        };
        self.check(
            "assert_float_equal",
            passed,
            format!("{} ± {}", expected.repr(), tolerance),
            actual.repr(),
            message,
        )
    }

    // ========================================================================
    // Null and empty
    // ========================================================================

    pub fn assert_null(
        &self,
        actual: &Value,
        message: Option<&str>,
    ) -> Result<(), AssertionFailure> {
        self.check("assert_null", actual.is_null(), "null".into(), actual.repr(), message)
    }

    pub fn assert_not_null(
        &self,
        actual: &Value,
        message: Option<&str>,
    ) -> Result<(), AssertionFailure> {
        self.check(
            "assert_not_null",
            !actual.is_null(),
            "not null".into(),
            actual.repr(),
            message,
        )
    }

    pub fn assert_empty(
        &self,
        actual: &Value,
        message: Option<&str>,
    ) -> Result<(), AssertionFailure> {
        let passed = actual.length() == Some(0);
        self.check("assert_empty", passed, "empty".into(), actual.repr(), message)
    }

    pub fn assert_not_empty(
        &self,
        actual: &Value,
        message: Option<&str>,
    ) -> Result<(), AssertionFailure> {
        let passed = actual.length().is_some_and(|n| n > 0);
        self.check("assert_not_empty", passed, "not empty".into(), actual.repr(), message)
    }

    // ========================================================================
    // Collections and strings
    // ========================================================================

    /// Array element, string substring or record key
    pub fn assert_contains(
        &self,
        haystack: &Value,
        needle: &Value,
        message: Option<&str>,
    ) -> Result<(), AssertionFailure> {
        let passed = contains(haystack, needle).unwrap_or(false);
        self.check(
            "assert_contains",
            passed,
            format!("to contain {}", needle.repr()),
            haystack.repr(),
            message,
        )
    }

    pub fn assert_not_contains(
        &self,
        haystack: &Value,
        needle: &Value,
        message: Option<&str>,
    ) -> Result<(), AssertionFailure> {
        let passed = contains(haystack, needle) == Some(false);
        self.check(
            "assert_not_contains",
            passed,
            format!("not to contain {}", needle.repr()),
            haystack.repr(),
            message,
        )
    }

    pub fn assert_length(
        &self,
        actual: &Value,
        expected: usize,
        message: Option<&str>,
    ) -> Result<(), AssertionFailure> {
        let length = actual.length();
        self.check(
            "assert_length",
            length == Some(expected),
            format!("length {}", expected),
            match length {
                Some(n) => format!("length {}", n),
                None => format!("{} without length", actual.type_name()),
            },
            message,
        )
    }

    pub fn assert_starts_with(
        &self,
        actual: &Value,
        prefix: &str,
        message: Option<&str>,
    ) -> Result<(), AssertionFailure> {
        let passed = actual.as_str().is_some_and(|s| s.starts_with(prefix));
        self.check(
            "assert_starts_with",
            passed,
            format!("to start with {:?}", prefix),
            actual.repr(),
            message,
        )
    }

    pub fn assert_ends_with(
        &self,
        actual: &Value,
        suffix: &str,
        message: Option<&str>,
    ) -> Result<(), AssertionFailure> {
        let passed = actual.as_str().is_some_and(|s| s.ends_with(suffix));
        self.check(
            "assert_ends_with",
            passed,
            format!("to end with {:?}", suffix),
            actual.repr(),
            message,
        )
    }

    // ========================================================================
    // Errors
    // ========================================================================

    /// Invoke `f` and classify what it raised.
    ///
    /// Cancellation and assertion failures are never classified: a timed-out
    /// run stops at the next safe point and a failed assertion inside `f`
    /// still ends the run.
    pub fn expect_throw<F>(
        &self,
        predicate: &str,
        f: F,
        expectation: ThrowExpectation<'_>,
        message: Option<&str>,
    ) -> Result<(), ScriptError>
    where
        F: FnOnce() -> Result<Value, ScriptError>,
    {
        let expected = match &expectation {
            ThrowExpectation::Any => "an error".to_string(),
            ThrowExpectation::MessageContains(text) => format!("an error containing {:?}", text),
            ThrowExpectation::Matching(_) => "an error matching the predicate".to_string(),
        };
        let (passed, actual) = match f() {
            Err(err @ (ScriptError::Cancelled | ScriptError::Assertion(_))) => return Err(err),
            Ok(value) => (false, format!("returned {}", value.repr())),
            Err(err) => {
                let raised = err.message();
                let passed = match expectation {
                    ThrowExpectation::Any => true,
                    ThrowExpectation::MessageContains(text) => raised.contains(text),
                    ThrowExpectation::Matching(accept) => accept(&raised),
                };
                (passed, format!("raised {:?}", raised))
            }
        };
        self.check(predicate, passed, expected, actual, message)?;
        Ok(())
    }

    pub fn assert_throws<F>(&self, f: F, message: Option<&str>) -> Result<(), ScriptError>
    where
        F: FnOnce() -> Result<Value, ScriptError>,
    {
        self.expect_throw("assert_throws", f, ThrowExpectation::Any, message)
    }

    pub fn assert_throws_with_message<F>(
        &self,
        f: F,
        expected: &str,
        message: Option<&str>,
    ) -> Result<(), ScriptError>
    where
        F: FnOnce() -> Result<Value, ScriptError>,
    {
        self.expect_throw(
            "assert_throws_with_message",
            f,
            ThrowExpectation::MessageContains(expected),
            message,
        )
    }

    pub fn assert_does_not_throw<F>(&self, f: F, message: Option<&str>) -> Result<(), ScriptError>
    where
        F: FnOnce() -> Result<Value, ScriptError>,
    {
        let (passed, actual) = match f() {
            Err(err @ (ScriptError::Cancelled | ScriptError::Assertion(_))) => return Err(err),
            Ok(value) => (true, format!("returned {}", value.repr())),
            Err(err) => (false, format!("raised {:?}", err.message())),
        };
        self.check(
            "assert_does_not_throw",
            passed,
            "no error".into(),
            actual,
            message,
        )?;
        Ok(())
    }
}

fn message_suffix(message: &Option<String>) -> String {
    message
        .as_ref()
        .map(|m| format!(" ({})", m))
        .unwrap_or_default()
}

/// Absolute tolerance comparison; `|a - b| == tolerance` passes
pub fn within_tolerance(a: f64, b: f64, tolerance: f64) -> bool {
    (a - b).abs() <= tolerance
}

fn contains(haystack: &Value, needle: &Value) -> Option<bool> {
    match (haystack, needle) {
        (Value::Array(items), _) => Some(items.iter().any(|item| item == needle)),
        (Value::String(s), Value::String(sub)) => Some(s.contains(sub.as_str())),
        (Value::Record(fields), Value::String(key)) => Some(fields.contains_key(key)),
        _ => None,
    }
}
