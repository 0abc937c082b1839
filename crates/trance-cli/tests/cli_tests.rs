//! End-to-end tests of the trance binary

use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use std::path::Path;
use tempfile::TempDir;

const MATH: &str = r#"group "math" tags ["fast"] {
    test "addition" { body { assert_equal(2 + 2, 4); } }
    test "strings" { body { assert_starts_with("trance", "tr"); } }
}
"#;

const FAILING: &str = r#"test "off by one" {
    body {
        let total = 1 + 1;
        assert_equal(total, 3, "sum");
    }
}
"#;

fn project(files: &[(&str, &str)]) -> TempDir {
    let dir = TempDir::new().unwrap();
    for (name, text) in files {
        let path = dir.path().join(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(path, text).unwrap();
    }
    dir
}

/// The binary, isolated from the caller's home config and environment
fn trance(dir: &Path) -> Command {
    let mut cmd = Command::cargo_bin("trance").unwrap();
    cmd.current_dir(dir)
        .env("HOME", dir)
        .env("NO_COLOR", "1")
        .env_remove("TRANCE_LOG")
        .env_remove("TRANCE_WORKERS")
        .env_remove("TRANCE_TIMEOUT_MS")
        .env_remove("TRANCE_COVERAGE_THRESHOLD");
    cmd
}

// ============================================================================
// Exit codes
// ============================================================================

#[test]
fn test_passing_suite_exits_zero() {
    let dir = project(&[("tests/math.hyp", MATH)]);

    trance(dir.path())
        .arg("test")
        .assert()
        .success()
        .stdout(predicate::str::contains("Test result: PASSED | 2 total, 2 passed"));
}

#[test]
fn test_failing_suite_exits_one() {
    let dir = project(&[("math.hyp", MATH), ("broken.hyp", FAILING)]);

    trance(dir.path())
        .args(["test", "--workers", "1"])
        .assert()
        .code(1)
        .stdout(predicate::str::contains("Test result: FAILED"))
        .stdout(predicate::str::contains("off by one"))
        .stdout(predicate::str::contains("sum"));
}

#[test]
fn test_strict_load_error_exits_two() {
    let dir = project(&[
        ("math.hyp", MATH),
        ("bad.hyp", "test \"broken\" { body { let = ; } }\n"),
    ]);

    trance(dir.path())
        .arg("test")
        .assert()
        .code(2)
        .stderr(predicate::str::contains("load error"))
        .stderr(predicate::str::contains("broken"));
}

#[test]
fn test_continue_on_load_error_runs_the_rest() {
    let dir = project(&[
        ("math.hyp", MATH),
        (
            "mixed.hyp",
            "test \"broken\" { body { let = ; } }\ntest \"fine\" { body { assert(true); } }\n",
        ),
    ]);

    trance(dir.path())
        .args(["test", "--continue-on-load-error"])
        .assert()
        .success()
        .stdout(predicate::str::contains("3 total, 3 passed"));
}

#[test]
fn test_missing_source_exits_two() {
    let dir = project(&[("math.hyp", MATH)]);

    trance(dir.path())
        .args(["test", "nowhere/*.hyp"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("no test sources match"));
}

// ============================================================================
// Filtering
// ============================================================================

#[test]
fn test_filter_skips_other_units() {
    let dir = project(&[("math.hyp", MATH), ("broken.hyp", FAILING)]);

    trance(dir.path())
        .args(["test", "--filter", "addition", "--verbose", "--no-timings"])
        .assert()
        .success()
        .stdout(predicate::str::contains("PASS math/addition"))
        .stdout(predicate::str::contains("SKIP off by one (filtered)"))
        .stdout(predicate::str::contains("1 passed, 0 failed, 0 errored, 0 timed out, 2 skipped"));
}

#[test]
fn test_tag_filters() {
    let dir = project(&[("math.hyp", MATH), ("broken.hyp", FAILING)]);

    trance(dir.path())
        .args(["test", "--tag", "fast"])
        .assert()
        .success();

    trance(dir.path())
        .args(["test", "--exclude-tag", "fast", "--verbose", "--no-timings"])
        .assert()
        .code(1)
        .stdout(predicate::str::contains("SKIP math/addition (excluded tag 'fast')"));
}

// ============================================================================
// Reports
// ============================================================================

#[test]
fn test_structured_format_requires_output() {
    let dir = project(&[("math.hyp", MATH)]);

    trance(dir.path())
        .args(["test", "--format", "json"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("needs an output path"));
}

#[test]
fn test_unknown_format_exits_two() {
    let dir = project(&[("math.hyp", MATH)]);

    trance(dir.path())
        .args(["test", "--format", "yaml", "--output", "r.yaml"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("unknown report format 'yaml'"));
}

#[test]
fn test_json_report_written_to_file() {
    let dir = project(&[("math.hyp", MATH), ("broken.hyp", FAILING)]);

    trance(dir.path())
        .args(["test", "--format", "json", "--output", "reports/result.json"])
        .assert()
        .code(1)
        .stdout(predicate::str::contains("Report written to"));

    let text = fs::read_to_string(dir.path().join("reports/result.json")).unwrap();
    let doc: serde_json::Value = serde_json::from_str(&text).unwrap();
    assert_eq!(doc["suite"]["status"], "failed");
    assert_eq!(doc["suite"]["exit_code"], 1);
    assert_eq!(doc["suite"]["total"], 3);
    assert_eq!(doc["runs"].as_array().unwrap().len(), 3);
}

#[test]
fn test_junit_report() {
    let dir = project(&[("math.hyp", MATH)]);

    trance(dir.path())
        .args(["test", "--format", "xml", "-o", "junit.xml"])
        .assert()
        .success();

    let xml = fs::read_to_string(dir.path().join("junit.xml")).unwrap();
    assert!(xml.contains("<testsuites"));
    assert!(xml.contains("name=\"addition\""));
}

#[test]
fn test_reports_without_timings_are_identical() {
    let dir = project(&[("math.hyp", MATH), ("broken.hyp", FAILING)]);

    for name in ["a.json", "b.json"] {
        trance(dir.path())
            .args(["test", "--no-timings", "--format", "json", "--output", name])
            .assert()
            .code(1);
    }

    let a = fs::read_to_string(dir.path().join("a.json")).unwrap();
    let b = fs::read_to_string(dir.path().join("b.json")).unwrap();
    assert_eq!(a, b);
}

// ============================================================================
// Coverage
// ============================================================================

#[test]
fn test_unmet_coverage_threshold_exits_one() {
    let dir = project(&[(
        "branch.hyp",
        r#"test "branch" {
    body {
        let flag = false;
        if flag {
            print("never");
        }
    }
}
"#,
    )]);

    trance(dir.path())
        .args(["test", "--coverage-threshold", "100"])
        .assert()
        .code(1)
        .stdout(predicate::str::contains("Coverage:"))
        .stdout(predicate::str::contains("required 100.0%"));

    trance(dir.path())
        .args(["test", "--coverage"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Coverage:"));
}

// ============================================================================
// Configuration
// ============================================================================

#[test]
fn test_project_config_supplies_defaults() {
    let dir = project(&[
        ("specs/math.hyp", MATH),
        ("other/broken.hyp", FAILING),
        (
            "trance.toml",
            "[test]\ninclude = [\"specs\"]\nformat = \"json\"\noutput = \"out/report.json\"\n",
        ),
    ]);

    trance(dir.path()).arg("test").assert().success();

    assert!(dir.path().join("out/report.json").exists());
}

#[test]
fn test_invalid_project_config_exits_two() {
    let dir = project(&[("math.hyp", MATH), ("trance.toml", "[test]\nworkers = 0\n")]);

    trance(dir.path())
        .arg("test")
        .assert()
        .code(2)
        .stderr(predicate::str::contains("test.workers"));
}

#[test]
fn test_invalid_env_override_exits_two() {
    let dir = project(&[("math.hyp", MATH)]);

    trance(dir.path())
        .arg("test")
        .env("TRANCE_WORKERS", "many")
        .assert()
        .code(2)
        .stderr(predicate::str::contains("TRANCE_WORKERS"));
}

// ============================================================================
// List
// ============================================================================

#[test]
fn test_list_shows_units() {
    let dir = project(&[
        ("math.hyp", MATH),
        (
            "sum.hyp",
            "test \"sum\" { params { [1, 2, 3], [2, 2, 4] } body { assert(true); } }\n",
        ),
    ]);

    trance(dir.path())
        .args(["list", "--filter", "math"])
        .assert()
        .success()
        .stdout(predicate::str::contains("math/addition"))
        .stdout(predicate::str::contains("#fast"))
        .stdout(predicate::str::contains("sum  [test] x2 (filtered)"))
        .stdout(predicate::str::contains("3 units, 4 runs"));
}
