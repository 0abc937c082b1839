//! Whole suites written in the script language, loaded from disk and run
//! through the scheduler with the real evaluator

use pretty_assertions::assert_eq;
use proptest::prelude::*;
use rstest::rstest;
use std::fs;
use std::sync::Arc;
use tempfile::TempDir;
use trance_script::ScriptEngine;
use trance_test::report::{render, ReportFormat, ReportOptions};
use trance_test::{
    ExecutionPlan, Failure, Loader, RunContext, RunStatus, Scheduler, SchedulerConfig,
    SuiteResult, Value, Warning,
};

struct Suite {
    _dir: TempDir,
    plan: ExecutionPlan,
    engine: Arc<ScriptEngine>,
}

/// Write `files` into a temp dir and load the `.hyp` ones
fn suite(files: &[(&str, &str)]) -> Suite {
    let dir = tempfile::tempdir().unwrap();
    let mut sources = Vec::new();
    for (name, text) in files {
        let path = dir.path().join(name);
        fs::write(&path, text).unwrap();
        if name.ends_with(".hyp") {
            sources.push(path);
        }
    }
    let engine = Arc::new(ScriptEngine::new());
    let plan = Loader::new(engine.as_ref()).load_files(&sources).unwrap();
    Suite {
        _dir: dir,
        plan,
        engine,
    }
}

fn config(workers: usize) -> SchedulerConfig {
    SchedulerConfig {
        workers,
        ..SchedulerConfig::default()
    }
}

fn run_with(suite: &Suite, config: SchedulerConfig) -> SuiteResult {
    Scheduler::new(config, suite.engine.clone()).run(&suite.plan)
}

fn run(source: &str, workers: usize) -> SuiteResult {
    run_with(&suite(&[("suite.hyp", source)]), config(workers))
}

fn statuses(result: &SuiteResult) -> Vec<(String, RunStatus)> {
    result
        .runs
        .iter()
        .map(|r| (r.full_name(), r.status))
        .collect()
}

const MATH: &str = r#"group "math" {
    test "addition" { body { assert_equal(2 + 2, 4); } }
    test "division-by-zero" { body { assert_throws(fn () { return 1 / 0; }); } }
}
"#;

// ============================================================================
// Example scenarios
// ============================================================================

#[test]
fn test_passing_group_in_parallel() {
    let result = run(MATH, 2);

    assert_eq!(
        statuses(&result),
        vec![
            ("math/addition".to_string(), RunStatus::Passed),
            ("math/division-by-zero".to_string(), RunStatus::Passed),
        ]
    );
    assert_eq!(result.counts().failures(), 0);
    assert_eq!(result.exit_code(), 0);
}

#[test]
fn test_verbose_text_report() {
    let result = run(MATH, 2);
    let options = ReportOptions {
        verbose: true,
        color: false,
        timings: false,
    };
    let text = render(&result, ReportFormat::Text, &options).unwrap();

    insta::assert_snapshot!(text, @r"
PASS math/addition
    ok assert_equal #1 (line 2)
PASS math/division-by-zero
    ok assert_throws #1 (line 3)

──────────────────────────────────────────────────
Test result: PASSED | 2 total, 2 passed, 0 failed, 0 errored, 0 timed out, 0 skipped
");
}

#[test]
fn test_failing_global_fixture_errors_the_run() {
    let result = run(
        r#"
fixture "db" global {
    setup { throw("database unavailable"); }
    teardown { throw("nothing to close"); }
}
test "query" { body { assert(has_fixture("conn")); } }
"#,
        1,
    );

    assert_eq!(result.runs[0].status, RunStatus::Errored);
    assert_eq!(
        result.runs[0].failure,
        Some(Failure::Fixture {
            fixture: "db".to_string(),
            message: "database unavailable".to_string(),
        })
    );
    assert!(result
        .warnings
        .iter()
        .any(|w| matches!(w, Warning::Teardown(t) if t.message == "nothing to close")));
    assert_ne!(result.exit_code(), 0);
}

#[test]
fn test_coverage_below_threshold_fails_the_suite() {
    // 20 statements, the 7 inside the `if` never run: 65%
    let mut body = String::from("var n = 0;\n");
    for _ in 0..10 {
        body.push_str("n += 1;\n");
    }
    body.push_str("assert_equal(n, 10);\nif n > 100 {\n");
    for _ in 0..7 {
        body.push_str("n -= 1;\n");
    }
    body.push_str("}\n");
    let source = format!("test \"partial\" {{ body {{\n{}}} }}\n", body);

    let suite = suite(&[("cov.hyp", &source)]);
    let result = run_with(
        &suite,
        SchedulerConfig {
            coverage: true,
            coverage_threshold: Some(80.0),
            ..config(1)
        },
    );

    assert_eq!(result.runs[0].status, RunStatus::Passed);
    let coverage = result.coverage.as_ref().unwrap();
    assert_eq!((coverage.covered, coverage.total), (13, 20));
    assert!((coverage.percent - 65.0).abs() < 1e-9);
    assert!(result.threshold_error.is_some());
    assert_eq!(result.exit_code(), 1);
}

// ============================================================================
// Fixtures and parameters
// ============================================================================

#[test]
fn test_group_setup_and_teardown_wrap_every_run() {
    let result = run(
        r#"
group "accounts" {
    setup {
        set_fixture("balance", 100);
        on_teardown(fn () { print("closed"); });
    }
    test "deposit" { body { assert_equal(fixture("balance") + 50, 150); } }
    test "withdraw" { body { assert_equal(fixture("balance") - 30, 70); } }
}
"#,
        2,
    );

    assert_eq!(result.counts().passed, 2, "{:?}", statuses(&result));
}

#[test]
fn test_fixture_values_are_write_once() {
    let result = run(
        r#"test "twice" { body { set_fixture("k", 1); set_fixture("k", 2); } }"#,
        1,
    );

    assert_eq!(result.runs[0].status, RunStatus::Errored);
}

#[test]
fn test_inline_and_file_parameters() {
    let suite = suite(&[
        (
            "params.hyp",
            r#"
fn add(a, b) { return a + b; }
test "inline" {
    params { [1, 2, 3], [2, 2, 5] }
    body { assert_equal(add(param(0), param(1)), param(2)); }
}
test "from file" {
    data "cases.json"
    body { let p = params(); assert_equal(add(p[0], p[1]), p[2]); }
}
"#,
        ),
        ("cases.json", "[[10, 5, 15], [0.5, 0.25, 0.75]]"),
    ]);
    let result = run_with(&suite, config(4));

    assert_eq!(
        statuses(&result),
        vec![
            ("inline#0".to_string(), RunStatus::Passed),
            ("inline#1".to_string(), RunStatus::Failed),
            ("from file#0".to_string(), RunStatus::Passed),
            ("from file#1".to_string(), RunStatus::Passed),
        ]
    );
    match &result.runs[1].failure {
        Some(Failure::Assertion {
            expected, actual, ..
        }) => assert_eq!((expected.as_str(), actual.as_str()), ("5", "4")),
        other => panic!("expected assertion failure, got {:?}", other),
    }
}

#[test]
fn test_global_values_are_built_once_across_workers() {
    let mut source = String::from(
        r#"fixture "counter" global { setup { set_fixture("start", now_ms()); } }
"#,
    );
    for i in 0..6 {
        source.push_str(&format!(
            "test \"t{i}\" {{ body {{\n  let v = acquire_global(\"shared\", fn () {{ print(\"built\"); return [1, 2]; }});\n  assert_length(v, 2);\n  assert(has_fixture(\"start\"));\n}} }}\n"
        ));
    }
    let result = run(&source, 4);

    assert_eq!(result.counts().passed, 6, "{:?}", statuses(&result));
    let built: usize = result
        .runs
        .iter()
        .map(|r| r.output.matches("built").count())
        .sum();
    assert_eq!(built, 1);
}

// ============================================================================
// Mocks
// ============================================================================

#[test]
fn test_mocks_end_with_their_run() {
    let result = run(
        r#"
fn fetch() { return "network"; }
group "service" serial {
    test "mocked" {
        body {
            mock("fetch", fn () { return "stub"; });
            assert_equal(fetch(), "stub");
        }
    }
    test "real" { body { assert_equal(fetch(), "network"); } }
}
"#,
        4,
    );

    assert_eq!(result.counts().passed, 2, "{:?}", statuses(&result));
    assert!(result.runs.iter().all(|r| r.warnings.is_empty()));
}

#[test]
fn test_helpers_called_through_mocked_dependencies() {
    let result = run(
        r#"
fn price() { return 10; }
fn total(n) { return n * price(); }
test "discount" {
    body {
        assert_equal(total(3), 30);
        mock("price", fn () { return 5; });
        assert_equal(total(3), 15);
        unmock("price");
        assert_equal(total(3), 30);
    }
}
"#,
        1,
    );

    assert_eq!(result.runs[0].status, RunStatus::Passed, "{:?}", result.runs[0].failure);
}

// ============================================================================
// Failures, errors and timeouts
// ============================================================================

#[rstest]
#[case("assert_equal(1, 2, \"numbers\");", RunStatus::Failed)]
#[case("assert_float_equal(0.1 + 0.2, 0.3);", RunStatus::Passed)]
#[case("assert_float_equal(1.0, 1.5, 0.25);", RunStatus::Failed)]
#[case("let r = { name: \"x\" }; assert_equal(r.name, \"x\");", RunStatus::Passed)]
#[case("throw(\"boom\");", RunStatus::Errored)]
#[case("let x = undefined_name;", RunStatus::Errored)]
#[case("assert_throws_with_message(fn () { throw(\"bad input\"); }, \"input\");", RunStatus::Passed)]
#[case("assert_does_not_throw(fn () { return len([1]); });", RunStatus::Passed)]
fn test_body_outcomes(#[case] body: &str, #[case] status: RunStatus) {
    let result = run(&format!("test \"t\" {{ body {{ {} }} }}", body), 1);
    assert_eq!(result.runs[0].status, status, "{:?}", result.runs[0].failure);
}

#[test]
fn test_raised_error_carries_its_line() {
    let result = run("test \"t\" {\n  body {\n    let a = 1;\n    let b = a / 0;\n  }\n}\n", 1);

    assert_eq!(
        result.runs[0].failure,
        Some(Failure::Raised {
            message: "division by zero".to_string(),
            line: Some(4),
        })
    );
}

#[test]
fn test_first_failing_assertion_ends_the_run() {
    let result = run(
        r#"test "t" { body { assert_true(true); assert_equal(1, 2); print("unreachable"); } }"#,
        1,
    );

    let run = &result.runs[0];
    assert_eq!(run.status, RunStatus::Failed);
    assert_eq!(run.assertions.len(), 2);
    assert!(!run.output.contains("unreachable"));
    match &run.failure {
        Some(Failure::Assertion { ordinal, .. }) => assert_eq!(*ordinal, 2),
        other => panic!("expected assertion failure, got {:?}", other),
    }
}

#[test]
fn test_failed_assertion_inside_throw_check_ends_the_run() {
    let result = run(
        r#"test "t" { body { assert_throws(fn () { assert_equal(1, 2); }); print("after"); } }"#,
        1,
    );

    let run = &result.runs[0];
    assert_eq!(run.status, RunStatus::Failed);
    assert_eq!(
        run.assertions
            .iter()
            .map(|a| (a.predicate.as_str(), a.passed))
            .collect::<Vec<_>>(),
        vec![("assert_equal", false)]
    );
    assert!(!run.output.contains("after"));
    match &run.failure {
        Some(Failure::Assertion { predicate, .. }) => assert_eq!(predicate, "assert_equal"),
        other => panic!("expected assertion failure, got {:?}", other),
    }
    assert_eq!(result.exit_code(), 1);
}

#[test]
fn test_timed_out_global_construction_is_rebuilt_by_the_next_run() {
    let result = run(
        r#"
group "cache" serial {
    test "a" {
        timeout 150
        body { acquire_global("k", fn () { var i = 0; while true { i += 1; } }); }
    }
    test "b" { body { assert_equal(acquire_global("k", fn () { return 2; }), 2); } }
}
"#,
        2,
    );

    assert_eq!(
        statuses(&result),
        vec![
            ("cache/a".to_string(), RunStatus::TimedOut),
            ("cache/b".to_string(), RunStatus::Passed),
        ]
    );
    assert_eq!(result.runs[1].failure, None);
}

#[test]
fn test_hung_global_setup_is_cancelled_with_its_run() {
    let result = run(
        r#"
fixture "conn" global {
    setup { var i = 0; while true { i += 1; } }
    teardown { print("closed"); }
}
test "t" { timeout 200 body { assert(true); } }
"#,
        1,
    );

    assert_eq!(result.runs[0].status, RunStatus::TimedOut);
    assert_eq!(result.runs[0].failure, Some(Failure::Timeout { limit_ms: 200 }));
    // Setup stopped at the timeout, so nothing is left running
    assert!(result
        .runs
        .iter()
        .flat_map(|r| &r.warnings)
        .chain(&result.warnings)
        .all(|w| !matches!(w, Warning::FixtureLeaked { .. })));
}

#[test]
fn test_infinite_loop_times_out_and_tears_down() {
    let result = run(
        r#"
test "spin" {
    timeout 50
    setup { on_teardown(fn () { print("released"); }); }
    body { var i = 0; while true { i += 1; } }
}
test "after" { body { assert(true); } }
"#,
        2,
    );

    assert_eq!(result.runs[0].status, RunStatus::TimedOut);
    assert_eq!(result.runs[0].failure, Some(Failure::Timeout { limit_ms: 50 }));
    assert!(result.runs[0]
        .warnings
        .iter()
        .all(|w| !matches!(w, Warning::FixtureLeaked { .. })));
    assert_eq!(result.runs[1].status, RunStatus::Passed);
    assert_eq!(result.exit_code(), 1);
}

#[test]
fn test_skips_and_tag_filters() {
    let suite = suite(&[(
        "tags.hyp",
        r#"
group "db" tags ["slow"] { test "migrate" { body { assert(true); } } }
test "quick" { body { assert(true); } }
test "later" { skip "needs server" body { throw("never"); } }
"#,
    )]);
    let mut config = config(2);
    config.filter.exclude_tags = vec!["slow".to_string()];
    let result = run_with(&suite, config);

    assert_eq!(
        result
            .runs
            .iter()
            .map(|r| (r.status, r.skip_reason.clone()))
            .collect::<Vec<_>>(),
        vec![
            (RunStatus::Skipped, Some("excluded tag 'slow'".to_string())),
            (RunStatus::Passed, None),
            (RunStatus::Skipped, Some("needs server".to_string())),
        ]
    );
    assert_eq!(result.exit_code(), 0);
}

// ============================================================================
// Benchmarks and load tests
// ============================================================================

#[test]
fn test_bench_and_load_record_metrics() {
    let result = run(
        r#"
bench "sum" {
    iterations 20
    warmup 2
    body { var t = 0; for i in range(100) { t += i; } assert_equal(t, 4950); }
}
load "lookup" {
    iterations 40
    concurrency 4
    body { let table = acquire("table", fn () { return { a: 1 }; }); assert_equal(table.a, 1); }
}
"#,
        2,
    );

    assert_eq!(result.counts().passed, 2, "{:?}", statuses(&result));
    let bench = &result.runs[0].metrics;
    assert_eq!(bench.get("iterations"), Some(20.0));
    assert!(bench.get("mean_ms").is_some());
    let load = &result.runs[1].metrics;
    assert_eq!(load.get("iterations"), Some(40.0));
    assert_eq!(load.get("concurrency"), Some(4.0));
    assert_eq!(load.get("errors"), Some(0.0));
}

#[test]
fn test_user_metrics_keep_history() {
    let result = run(
        r#"test "m" { body { record_metric("size", 1); record_metric("size", 2); record_sample("lat", 3); record_sample("lat", 4); } }"#,
        1,
    );

    let metrics = &result.runs[0].metrics;
    assert_eq!(metrics.get("size"), Some(2.0));
    let lat = metrics.iter().find(|m| m.name == "lat").unwrap();
    assert_eq!(lat.samples, vec![3.0, 4.0]);
}

// ============================================================================
// Determinism
// ============================================================================

#[test]
fn test_serial_runs_render_identically() {
    let suite = suite(&[(
        "det.hyp",
        r#"
fn fib(n) { if n < 2 { return n; } return fib(n - 1) + fib(n - 2); }
group "numbers" {
    test "fib" { params { [10, 55], [12, 144] } body { assert_equal(fib(param(0)), param(1)); } }
    test "broken" { body { assert_equal(fib(5), 6, "off by one"); } }
    test "bench" { skip "slow" body { } }
}
"#,
    )]);
    let options = ReportOptions {
        verbose: true,
        color: false,
        timings: false,
    };

    let renders: Vec<Vec<String>> = (0..2)
        .map(|_| {
            let result = run_with(&suite, config(1));
            ReportFormat::ALL
                .iter()
                .map(|format| render(&result, *format, &options).unwrap())
                .collect()
        })
        .collect();
    assert_eq!(renders[0], renders[1]);
}

// ============================================================================
// Tolerance law
// ============================================================================

proptest! {
    #[test]
    fn prop_float_equal_passes_iff_within_tolerance(
        a in -1.0e6f64..1.0e6,
        b in -1.0e6f64..1.0e6,
        tol in 0.0f64..1.0e3,
    ) {
        let ctx = RunContext::standalone("prop");
        let args = vec![Value::Number(a), Value::Number(b), Value::Number(tol)];
        let outcome = trance_script::builtins::call_builtin("assert_float_equal", &ctx, args);
        prop_assert_eq!(outcome.is_ok(), (a - b).abs() <= tol);
    }

    #[test]
    fn prop_float_equal_boundary_passes(a in -1.0e6f64..1.0e6, b in -1.0e6f64..1.0e6) {
        let ctx = RunContext::standalone("prop");
        let tol = (a - b).abs();
        let args = vec![Value::Number(a), Value::Number(b), Value::Number(tol)];
        prop_assert!(trance_script::builtins::call_builtin("assert_float_equal", &ctx, args).is_ok());
    }
}

#[test]
fn test_unreferenced_data_files_are_ignored() {
    // Data files next to suites are read only when referenced
    let suite = suite(&[
        ("a.hyp", r#"test "t" { body { assert(true); } }"#),
        ("unused.json", "not json"),
    ]);
    assert_eq!(suite.plan.instance_count(), 1);
}
