//! Shared helpers for the scheduler integration tests
//!
//! `Scripted` is a tiny evaluator for one-word commands so the tests can
//! exercise discovery, fixtures and scheduling without a real language.
//! Statements are separated by `;` or newlines:
//!
//! - `log X` appends X to the shared log
//! - `count` bumps the shared counter (slowly, to widen races)
//! - `set K N` / `expect K N` write and check a fixture value
//! - `equal A B` asserts two numbers are equal
//! - `sum` asserts `params[0] + params[1] == params[2]`
//! - `raise X` raises an error
//! - `spin MS` busy-waits, honouring cancellation
//! - `stall MS` is `spin MS` the first time any body runs it, a no-op after
//! - `hang MS` sleeps, ignoring cancellation
//! - `mock X` / `mocked X` / `unmocked X` install and check mock bindings
//! - `print X` writes X to the run output
//! - `teardown X` registers a callback that logs X

#![allow(dead_code)]

use parking_lot::Mutex;
use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tempfile::TempDir;
use trance_test::{
    BodyRef, Callable, ExecutionPlan, Loader, RunContext, ScriptError, ScriptEvaluator,
    Snippet, SourceFile, SyntaxError, Value,
};

#[derive(Default)]
pub struct Scripted {
    pub log: Arc<Mutex<Vec<String>>>,
    pub counter: Arc<AtomicUsize>,
    pub stalls: Arc<AtomicUsize>,
}

impl Scripted {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn log(&self) -> Vec<String> {
        self.log.lock().clone()
    }

    pub fn count(&self) -> usize {
        self.counter.load(Ordering::SeqCst)
    }
}

/// Statements of a snippet with their absolute line numbers
fn statements(snippet: &Snippet) -> Vec<(u32, Vec<String>)> {
    let mut out = Vec::new();
    for (offset, line) in snippet.text.split('\n').enumerate() {
        for stmt in line.split(';') {
            let words: Vec<String> = stmt.split_whitespace().map(str::to_string).collect();
            if !words.is_empty() {
                out.push((snippet.line + offset as u32, words));
            }
        }
    }
    out
}

fn number(word: Option<&String>) -> f64 {
    word.and_then(|w| w.parse().ok()).unwrap_or(f64::NAN)
}

impl ScriptEvaluator for Scripted {
    fn prepare(&self, _file: &SourceFile, snippet: &Snippet) -> Result<Vec<u32>, SyntaxError> {
        let mut lines = Vec::new();
        for (line, words) in statements(snippet) {
            if words[0] == "syntax_error" {
                return Err(SyntaxError::new("unexpected 'syntax_error'", line, 1));
            }
            if lines.last() != Some(&line) {
                lines.push(line);
            }
        }
        Ok(lines)
    }

    fn evaluate(&self, body: &BodyRef, ctx: &RunContext) -> Result<(), ScriptError> {
        for (line, words) in statements(&body.snippet) {
            ctx.check_cancelled()?;
            ctx.cover(&body.file.region(line));
            let arg = words.get(1).cloned().unwrap_or_default();
            let engine = ctx.assertions();

            match words[0].as_str() {
                "log" => self.log.lock().push(arg),
                "count" => {
                    self.counter.fetch_add(1, Ordering::SeqCst);
                    thread::sleep(Duration::from_millis(20));
                }
                "set" => ctx.set_fixture(&arg, Value::Number(number(words.get(2))))?,
                "expect" => {
                    let actual = ctx.fixture(&arg).unwrap_or_default();
                    engine.assert_equal(&actual, &Value::Number(number(words.get(2))), None)?;
                }
                "equal" => engine.assert_equal(
                    &Value::Number(number(words.get(1))),
                    &Value::Number(number(words.get(2))),
                    None,
                )?,
                "sum" => {
                    let p: Vec<f64> = ctx.params().iter().filter_map(Value::as_number).collect();
                    engine.assert_equal(
                        &Value::Number(p[0] + p[1]),
                        &Value::Number(p[2]),
                        None,
                    )?;
                }
                "raise" => return Err(ScriptError::raised_at(arg, line)),
                "spin" => spin(ctx, number(words.get(1)))?,
                "stall" => {
                    if self.stalls.fetch_add(1, Ordering::SeqCst) == 0 {
                        spin(ctx, number(words.get(1)))?;
                    }
                }
                "hang" => thread::sleep(Duration::from_millis(number(words.get(1)) as u64)),
                "mock" => ctx.mock(
                    arg.clone(),
                    Callable::native(arg, |_, _| Ok(Value::Number(0.0))),
                ),
                "mocked" => engine.assert_true(&Value::Bool(ctx.is_mocked(&arg)), None)?,
                "unmocked" => engine.assert_false(&Value::Bool(ctx.is_mocked(&arg)), None)?,
                "print" => ctx.print(&arg),
                "teardown" => {
                    let log = self.log.clone();
                    let entry = arg.clone();
                    ctx.on_teardown(
                        arg,
                        Callable::native(entry.clone(), move |_, _| {
                            log.lock().push(entry.clone());
                            Ok(Value::Null)
                        }),
                    );
                }
                other => {
                    let message = format!("unknown command '{}'", other);
                    return Err(ScriptError::raised_at(message, line));
                }
            }
        }
        Ok(())
    }
}

fn spin(ctx: &RunContext, ms: f64) -> Result<(), ScriptError> {
    let until = Instant::now() + Duration::from_millis(ms as u64);
    while Instant::now() < until {
        ctx.check_cancelled()?;
        thread::sleep(Duration::from_millis(1));
    }
    Ok(())
}

/// A suite written to a temporary directory
pub struct Suite {
    pub dir: TempDir,
    pub path: PathBuf,
}

pub fn suite(source: &str) -> Suite {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("suite.hyp");
    fs::write(&path, source).unwrap();
    Suite { dir, path }
}

pub fn load(evaluator: &Scripted, source: &str) -> (Suite, ExecutionPlan) {
    let suite = suite(source);
    let plan = Loader::new(evaluator)
        .load_files(&[suite.path.clone()])
        .unwrap();
    (suite, plan)
}
