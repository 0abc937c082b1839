//! Configuration loading and precedence tests

use serial_test::serial;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::TempDir;
use trance_config::{ConfigError, ConfigLoader, PROJECT_CONFIG_FILE};

fn create_config_file(dir: &Path, content: &str) -> PathBuf {
    let config_path = dir.join(PROJECT_CONFIG_FILE);
    fs::write(&config_path, content).unwrap();
    config_path
}

fn create_global_file(dir: &Path, content: &str) -> PathBuf {
    let global_path = dir.join("global.toml");
    fs::write(&global_path, content).unwrap();
    global_path
}

// ============================================================================
// Config Loading Tests
// ============================================================================

#[test]
#[serial]
fn test_load_with_empty_config() {
    let temp_dir = TempDir::new().unwrap();
    create_config_file(temp_dir.path(), "");

    let mut loader = ConfigLoader::with_global_path(temp_dir.path().join("missing.toml"));
    let config = loader.load_from_directory(temp_dir.path()).unwrap();

    assert!(config.is_project());
    assert!(config.project.test.is_none());
    assert_eq!(config.test_settings().format, "text");
}

#[test]
#[serial]
fn test_load_from_nested_subdirectory() {
    let temp_dir = TempDir::new().unwrap();
    create_config_file(temp_dir.path(), "[test]\ninclude = [\"specs\"]\n");

    let deep = temp_dir.path().join("a").join("b").join("c");
    fs::create_dir_all(&deep).unwrap();

    let mut loader = ConfigLoader::with_global_path(temp_dir.path().join("missing.toml"));
    let config = loader.load_from_directory(&deep).unwrap();

    assert_eq!(config.project_root(), Some(temp_dir.path()));
    assert_eq!(
        config.test_settings().include,
        vec![temp_dir.path().join("specs")]
    );
}

// ============================================================================
// Error Tests
// ============================================================================

#[test]
#[serial]
fn test_invalid_toml_syntax() {
    let temp_dir = TempDir::new().unwrap();
    create_config_file(temp_dir.path(), "[test\nworkers = ");

    let mut loader = ConfigLoader::with_global_path(temp_dir.path().join("missing.toml"));
    let result = loader.load_from_directory(temp_dir.path());

    assert!(matches!(result, Err(ConfigError::TomlParseError { .. })));
}

#[test]
#[serial]
fn test_unknown_field_rejected() {
    let temp_dir = TempDir::new().unwrap();
    create_config_file(temp_dir.path(), "[test]\nparallel = true\n");

    let mut loader = ConfigLoader::with_global_path(temp_dir.path().join("missing.toml"));
    assert!(loader.load_from_directory(temp_dir.path()).is_err());
}

#[test]
#[serial]
fn test_invalid_value_names_field() {
    let temp_dir = TempDir::new().unwrap();
    create_config_file(temp_dir.path(), "[test]\nworkers = 0\n");

    let mut loader = ConfigLoader::with_global_path(temp_dir.path().join("missing.toml"));
    let err = loader.load_from_directory(temp_dir.path()).unwrap_err();

    assert_eq!(
        err.to_string(),
        "Invalid value for 'test.workers': must be at least 1"
    );
}

#[test]
#[serial]
fn test_broken_global_config_is_an_error() {
    let temp_dir = TempDir::new().unwrap();
    let global = create_global_file(temp_dir.path(), "[output]\ncolour = false\n");

    let mut loader = ConfigLoader::with_global_path(global);
    assert!(loader.load_from_directory(temp_dir.path()).is_err());
}

#[test]
#[serial]
fn test_missing_specific_file() {
    let temp_dir = TempDir::new().unwrap();

    let mut loader = ConfigLoader::with_global_path(temp_dir.path().join("missing.toml"));
    let result = loader.load_from_file(&temp_dir.path().join(PROJECT_CONFIG_FILE));

    assert!(matches!(result, Err(ConfigError::NotFound(_))));
}

// ============================================================================
// Precedence Tests
// ============================================================================

#[test]
#[serial]
fn test_global_defaults_apply_when_project_is_silent() {
    let temp_dir = TempDir::new().unwrap();
    let global = create_global_file(
        temp_dir.path(),
        "[test]\ntimeout_ms = 1500\nworkers = 2\n\n[output]\ncolor = false\n",
    );
    create_config_file(temp_dir.path(), "[test]\nworkers = 5\n");

    let mut loader = ConfigLoader::with_global_path(global);
    let settings = loader
        .load_from_directory(temp_dir.path())
        .unwrap()
        .test_settings();

    assert_eq!(settings.workers, 5);
    assert_eq!(settings.timeout, Duration::from_millis(1500));
    assert!(!settings.color);
}

#[test]
#[serial]
fn test_env_overrides_project_and_global() {
    let temp_dir = TempDir::new().unwrap();
    let global = create_global_file(temp_dir.path(), "[test]\ncoverage_threshold = 50.0\n");
    create_config_file(temp_dir.path(), "[test]\ncoverage_threshold = 60.0\n");

    env::set_var("TRANCE_COVERAGE_THRESHOLD", "90");
    let result = ConfigLoader::with_global_path(global).load_from_directory(temp_dir.path());
    env::remove_var("TRANCE_COVERAGE_THRESHOLD");

    let settings = result.unwrap().test_settings();
    assert_eq!(settings.coverage_threshold, Some(90.0));
    assert!(settings.coverage);
}

#[test]
#[serial]
fn test_env_override_without_project_file() {
    let temp_dir = TempDir::new().unwrap();

    env::set_var("TRANCE_TIMEOUT_MS", "75");
    let result = ConfigLoader::with_global_path(temp_dir.path().join("missing.toml"))
        .load_from_directory(temp_dir.path());
    env::remove_var("TRANCE_TIMEOUT_MS");

    let config = result.unwrap();
    assert!(!config.is_project());
    assert_eq!(config.test_settings().timeout, Duration::from_millis(75));
}
