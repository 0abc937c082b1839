//! End-to-end scheduling: load a suite from disk, run it, inspect results

mod common;

use common::{load, Scripted};
use pretty_assertions::assert_eq;
use rstest::rstest;
use std::sync::Arc;
use std::time::Duration;
use trance_test::report::{render, ReportFormat, ReportOptions};
use trance_test::{Failure, RunFilter, RunStatus, Scheduler, SchedulerConfig, SuiteResult, Warning};

fn config(workers: usize) -> SchedulerConfig {
    SchedulerConfig {
        workers,
        ..SchedulerConfig::default()
    }
}

fn run(evaluator: &Arc<Scripted>, source: &str, config: SchedulerConfig) -> SuiteResult {
    let (_suite, plan) = load(evaluator, source);
    Scheduler::new(config, evaluator.clone()).run(&plan)
}

fn statuses(result: &SuiteResult) -> Vec<(String, RunStatus)> {
    result
        .runs
        .iter()
        .map(|r| (r.full_name(), r.status))
        .collect()
}

// ============================================================================
// Parameterization
// ============================================================================

#[rstest]
#[case(1)]
#[case(4)]
fn test_each_param_tuple_is_its_own_run(#[case] workers: usize) {
    let evaluator = Scripted::new();
    let result = run(
        &evaluator,
        r#"
test "sum" {
    params { [1, 2, 3], [2, 2, 4], [5, 5, 11] }
    body { sum }
}
"#,
        config(workers),
    );

    assert_eq!(
        statuses(&result),
        vec![
            ("sum#0".to_string(), RunStatus::Passed),
            ("sum#1".to_string(), RunStatus::Passed),
            ("sum#2".to_string(), RunStatus::Failed),
        ]
    );
    match &result.runs[2].failure {
        Some(Failure::Assertion {
            expected, actual, ..
        }) => {
            assert_eq!(expected, "11");
            assert_eq!(actual, "10");
        }
        other => panic!("expected assertion failure, got {:?}", other),
    }
    assert_eq!(result.exit_code(), 1);
}

// ============================================================================
// Fixtures
// ============================================================================

#[test]
fn test_teardown_runs_in_reverse_setup_order() {
    let evaluator = Scripted::new();
    let result = run(
        &evaluator,
        r#"
group "g" {
    fixture "a" { setup { log a_up } teardown { log a_down } }
    fixture "b" { setup { log b_up } teardown { log b_down } }
    test "t" { body { teardown cb; log body } }
}
"#,
        config(1),
    );

    assert_eq!(result.runs[0].status, RunStatus::Passed);
    assert_eq!(
        evaluator.log(),
        vec!["a_up", "b_up", "body", "cb", "b_down", "a_down"]
    );
}

#[test]
fn test_failed_setup_tears_down_only_what_was_set_up() {
    let evaluator = Scripted::new();
    let result = run(
        &evaluator,
        r#"
group "g" {
    fixture "a" { setup { log a_up } teardown { log a_down } }
    fixture "b" { setup { raise boom } teardown { log b_down } }
    test "t" { body { log body } }
}
"#,
        config(1),
    );

    let run = &result.runs[0];
    assert_eq!(run.status, RunStatus::Errored);
    assert_eq!(
        run.failure,
        Some(Failure::Fixture {
            fixture: "b".to_string(),
            message: "boom".to_string(),
        })
    );
    assert_eq!(evaluator.log(), vec!["a_up", "a_down"]);
}

#[test]
fn test_global_fixture_is_constructed_once() {
    let evaluator = Scripted::new();
    let mut source = String::from(
        r#"fixture "db" global { setup { count; set conn 7 } teardown { log db_down } }
"#,
    );
    for i in 0..8 {
        source.push_str(&format!("test \"t{}\" {{ body {{ expect conn 7 }} }}\n", i));
    }

    let result = run(&evaluator, &source, config(4));

    assert_eq!(result.counts().passed, 8);
    assert_eq!(evaluator.count(), 1);
    assert_eq!(evaluator.log(), vec!["db_down"]);
}

#[test]
fn test_global_teardown_failure_is_a_warning() {
    let evaluator = Scripted::new();
    let result = run(
        &evaluator,
        r#"
fixture "db" global { setup { set conn 1 } teardown { raise closed } }
test "t" { body { expect conn 1 } }
"#,
        config(1),
    );

    assert!(result.is_success());
    assert!(result
        .warnings
        .iter()
        .any(|w| matches!(w, Warning::Teardown(t) if t.message == "closed")));
    assert!(!result.runs[0].warnings.is_empty());
}

#[test]
fn test_global_setup_cut_short_by_a_timeout_is_retried() {
    let evaluator = Scripted::new();
    let result = run(
        &evaluator,
        r#"
fixture "db" global { setup { stall 5000; set conn 7 } teardown { log db_down } }
test "first" { timeout 50 body { expect conn 7 } }
test "second" { body { expect conn 7 } }
"#,
        config(1),
    );

    assert_eq!(
        statuses(&result),
        vec![
            ("first".to_string(), RunStatus::TimedOut),
            ("second".to_string(), RunStatus::Passed),
        ]
    );
    assert!(result.runs[0].duration < Duration::from_secs(5));
    // Both attempts finished, so both are torn down
    assert_eq!(evaluator.log(), vec!["db_down", "db_down"]);
    assert!(result
        .warnings
        .iter()
        .all(|w| !matches!(w, Warning::FixtureLeaked { .. })));
}

#[test]
fn test_unfinished_global_setup_is_leaked_without_teardown() {
    let evaluator = Scripted::new();
    let mut config = config(1);
    config.teardown_grace = Duration::from_millis(20);
    let result = run(
        &evaluator,
        r#"
fixture "db" global { setup { hang 300 } teardown { log db_down } }
test "stuck" { timeout 30 body { log body } }
"#,
        config,
    );

    assert_eq!(result.runs[0].status, RunStatus::TimedOut);
    assert!(result.warnings.iter().any(|w| matches!(
        w,
        Warning::FixtureLeaked { run, .. } if run == "global fixture 'db'"
    )));

    // Setup finishes later; neither the body nor the teardown runs
    std::thread::sleep(Duration::from_millis(400));
    assert!(evaluator.log().is_empty());
}

// ============================================================================
// Mocks
// ============================================================================

#[test]
fn test_mocks_do_not_leak_between_parallel_runs() {
    let evaluator = Scripted::new();
    let mut source = String::new();
    for i in 0..6 {
        source.push_str(&format!(
            "test \"mocking{}\" {{ body {{ mock clock; spin 10; mocked clock }} }}\n",
            i
        ));
        source.push_str(&format!(
            "test \"plain{}\" {{ body {{ spin 10; unmocked clock }} }}\n",
            i
        ));
    }

    let result = run(&evaluator, &source, config(4));

    assert_eq!(result.counts().passed, 12, "{:?}", statuses(&result));
    assert!(result.runs.iter().all(|r| r.warnings.is_empty()));
}

// ============================================================================
// Scheduling
// ============================================================================

#[test]
fn test_results_follow_declaration_order() {
    const SOURCE: &str = r#"
test "slowest" { body { spin 40 } }
test "slow" { body { spin 20 } }
group "inner" {
    test "fast" { body { spin 5 } }
    test "failing" { body { equal 1 2 } }
}
test "instant" { body { log done } }
"#;
    let options = ReportOptions {
        verbose: false,
        color: false,
        timings: false,
    };

    let first = run(&Scripted::new(), SOURCE, config(4));
    let second = run(&Scripted::new(), SOURCE, config(4));

    let names: Vec<String> = first.runs.iter().map(|r| r.full_name()).collect();
    assert_eq!(
        names,
        vec!["slowest", "slow", "inner/fast", "inner/failing", "instant"]
    );
    for format in [ReportFormat::Json, ReportFormat::Xml] {
        // Paths differ between the two temp dirs; compare everything else
        let a = render(&first, format, &options).unwrap();
        let b = render(&second, format, &options).unwrap();
        let strip = |s: &str, r: &SuiteResult| s.replace(&r.runs[0].file, "FILE");
        assert_eq!(strip(&a, &first), strip(&b, &second));
    }
}

#[test]
fn test_serial_group_runs_in_order() {
    let evaluator = Scripted::new();
    run(
        &evaluator,
        r#"
group "ordered" serial {
    test "a" { body { spin 20; log a } }
    test "b" { body { spin 5; log b } }
    test "c" { body { log c } }
}
"#,
        config(4),
    );
    assert_eq!(evaluator.log(), vec!["a", "b", "c"]);
}

#[test]
fn test_filters_record_skipped_runs() {
    let evaluator = Scripted::new();
    let mut config = config(2);
    config.filter = RunFilter {
        name: None,
        tags: Vec::new(),
        exclude_tags: vec!["slow".to_string()],
    };
    let result = run(
        &evaluator,
        r#"
test "quick" { body { log quick } }
test "heavy" { tags ["slow"] body { log heavy } }
test "later" { skip "not ready" body { log later } }
"#,
        config,
    );

    assert_eq!(
        statuses(&result),
        vec![
            ("quick".to_string(), RunStatus::Passed),
            ("heavy".to_string(), RunStatus::Skipped),
            ("later".to_string(), RunStatus::Skipped),
        ]
    );
    assert_eq!(result.runs[1].skip_reason.as_deref(), Some("excluded tag 'slow'"));
    assert_eq!(result.runs[2].skip_reason.as_deref(), Some("not ready"));
    assert_eq!(evaluator.log(), vec!["quick"]);
    assert!(result.is_success());
}

// ============================================================================
// Timeouts
// ============================================================================

#[test]
fn test_timeout_cancels_body_and_still_tears_down() {
    let evaluator = Scripted::new();
    let result = run(
        &evaluator,
        r#"
group "g" {
    fixture "f" { setup { log up } teardown { log down } }
    test "slow" { timeout 50 body { spin 5000 } }
}
"#,
        config(1),
    );

    let run = &result.runs[0];
    assert_eq!(run.status, RunStatus::TimedOut);
    assert_eq!(run.failure, Some(Failure::Timeout { limit_ms: 50 }));
    assert!(run.duration < Duration::from_secs(5));
    assert_eq!(evaluator.log(), vec!["up", "down"]);
    assert_eq!(result.exit_code(), 1);
}

#[test]
fn test_uncooperative_body_is_detached_as_leaked() {
    let evaluator = Scripted::new();
    let mut config = config(1);
    config.teardown_grace = Duration::from_millis(20);
    let result = run(
        &evaluator,
        r#"
test "stuck" { timeout 30 body { hang 400 } }
test "next" { body { log next } }
"#,
        config,
    );

    assert_eq!(result.runs[0].status, RunStatus::TimedOut);
    assert!(result.runs[0]
        .warnings
        .iter()
        .any(|w| matches!(w, Warning::FixtureLeaked { .. })));
    assert_eq!(result.runs[1].status, RunStatus::Passed);
}

// ============================================================================
// Coverage
// ============================================================================

const COVERED: &str = r#"
fn unused() { never }

test "t" {
    body {
        equal 1 1
        equal 2 2
        equal 3 3
    }
}
"#;

#[rstest]
#[case(Some(80.0), 1)]
#[case(Some(70.0), 0)]
#[case(None, 0)]
fn test_coverage_threshold_decides_exit_code(#[case] threshold: Option<f64>, #[case] code: i32) {
    let mut config = config(1);
    config.coverage = true;
    config.coverage_threshold = threshold;
    let result = run(&Scripted::new(), COVERED, config);

    let coverage = result.coverage.as_ref().unwrap();
    assert_eq!((coverage.covered, coverage.total), (3, 4));
    assert_eq!(coverage.files[0].uncovered_lines, vec![2]);
    assert_eq!(result.runs[0].status, RunStatus::Passed);
    assert_eq!(result.exit_code(), code);
}

#[test]
fn test_run_records_its_own_coverage() {
    let mut config = config(1);
    config.coverage = true;
    let result = run(&Scripted::new(), COVERED, config);
    let lines: Vec<u32> = result.runs[0].coverage.iter().map(|r| r.line).collect();
    assert_eq!(lines, vec![6, 7, 8]);
}
