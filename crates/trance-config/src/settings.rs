//! Effective test settings
//!
//! Collapses the layered `Option` tables into concrete values. CLI flags are
//! applied on top of the result by the caller.

use crate::loader::Config;
use crate::project::TestConfig;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Tolerance of `assert_float_equal` when neither the call nor config sets one
pub const DEFAULT_FLOAT_TOLERANCE: f64 = 0.001;

const DEFAULT_TIMEOUT_MS: u64 = 30_000;
const DEFAULT_TEARDOWN_GRACE_MS: u64 = 5_000;

/// Fully resolved test settings
#[derive(Debug, Clone, PartialEq)]
pub struct TestSettings {
    pub workers: usize,
    pub timeout: Duration,
    pub teardown_grace: Duration,
    pub float_tolerance: f64,
    /// Lowercased report format name
    pub format: String,
    /// Report file, resolved against the project root
    pub output: Option<PathBuf>,
    pub coverage: bool,
    pub coverage_threshold: Option<f64>,
    pub coverage_exclude: Vec<String>,
    pub strict_load: bool,
    /// Default sources, resolved against the project root
    pub include: Vec<PathBuf>,
    pub color: bool,
}

impl Default for TestSettings {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            timeout: Duration::from_millis(DEFAULT_TIMEOUT_MS),
            teardown_grace: Duration::from_millis(DEFAULT_TEARDOWN_GRACE_MS),
            float_tolerance: DEFAULT_FLOAT_TOLERANCE,
            format: "text".to_string(),
            output: None,
            coverage: false,
            coverage_threshold: None,
            coverage_exclude: Vec::new(),
            strict_load: true,
            include: Vec::new(),
            color: true,
        }
    }
}

impl TestSettings {
    /// Resolve settings from merged config: project > global > default
    pub fn resolve(config: &Config) -> Self {
        let mut merged = config.global.test.clone().unwrap_or_default();
        if let Some(project) = &config.project.test {
            merged.merge(project);
        }

        let root = config.project_root();
        let defaults = Self::default();
        let TestConfig {
            workers,
            timeout_ms,
            teardown_grace_ms,
            float_tolerance,
            format,
            output,
            coverage,
            coverage_threshold,
            coverage_exclude,
            strict_load,
            include,
        } = merged;

        Self {
            workers: workers.unwrap_or(defaults.workers),
            timeout: timeout_ms.map_or(defaults.timeout, Duration::from_millis),
            teardown_grace: teardown_grace_ms.map_or(defaults.teardown_grace, Duration::from_millis),
            float_tolerance: float_tolerance.unwrap_or(defaults.float_tolerance),
            format: format.map_or(defaults.format, |f| f.to_ascii_lowercase()),
            output: output.map(|p| resolve_path(root, p)),
            coverage: coverage.unwrap_or(defaults.coverage) || coverage_threshold.is_some(),
            coverage_threshold,
            coverage_exclude: coverage_exclude.unwrap_or_default(),
            strict_load: strict_load.unwrap_or(defaults.strict_load),
            include: include
                .unwrap_or_default()
                .into_iter()
                .map(|p| resolve_path(root, PathBuf::from(p)))
                .collect(),
            color: config.global.color().unwrap_or(defaults.color),
        }
    }
}

fn default_workers() -> usize {
    std::thread::available_parallelism().map_or(1, |n| n.get())
}

fn resolve_path(root: Option<&Path>, path: PathBuf) -> PathBuf {
    match root {
        Some(root) if path.is_relative() => root.join(path),
        _ => path,
    }
}
