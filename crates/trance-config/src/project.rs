//! Project Configuration (trance.toml)
//!
//! Handles project-level configuration stored in `trance.toml` at the project
//! root. Every field of the `[test]` table is optional; unset fields fall
//! back to the global config and then to built-in defaults.

use crate::{ConfigError, ConfigResult};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Project configuration from trance.toml
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(deny_unknown_fields)]
pub struct ProjectConfig {
    /// Test runner configuration
    #[serde(skip_serializing_if = "Option::is_none")]
    pub test: Option<TestConfig>,
}

/// The `[test]` table, shared by project and global config
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(deny_unknown_fields)]
pub struct TestConfig {
    /// Worker pool width (default: available parallelism)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workers: Option<usize>,

    /// Timeout for units that declare none
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,

    /// Teardown budget of a timed-out run
    #[serde(skip_serializing_if = "Option::is_none")]
    pub teardown_grace_ms: Option<u64>,

    /// Default absolute tolerance of `assert_float_equal`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub float_tolerance: Option<f64>,

    /// Report format: text, json, xml or html
    #[serde(skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,

    /// Report file
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<PathBuf>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub coverage: Option<bool>,

    /// Minimum suite coverage percentage
    #[serde(skip_serializing_if = "Option::is_none")]
    pub coverage_threshold: Option<f64>,

    /// File patterns that are not instrumented
    #[serde(skip_serializing_if = "Option::is_none")]
    pub coverage_exclude: Option<Vec<String>>,

    /// Abort on any load error (default: true)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub strict_load: Option<bool>,

    /// Default test sources when none are given on the command line
    #[serde(skip_serializing_if = "Option::is_none")]
    pub include: Option<Vec<String>>,
}

impl ProjectConfig {
    /// Load project configuration from a file
    pub fn load_from_file(path: &Path) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ConfigError::NotFound(path.to_path_buf())
            } else {
                ConfigError::IoError(e)
            }
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::TomlParseError {
            file: path.to_path_buf(),
            error: e,
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Validate the project configuration
    pub fn validate(&self) -> ConfigResult<()> {
        if let Some(test) = &self.test {
            test.validate("test")?;
        }
        Ok(())
    }

    /// Mutable `[test]` table, created when absent
    pub fn test_mut(&mut self) -> &mut TestConfig {
        self.test.get_or_insert_with(TestConfig::default)
    }
}

impl TestConfig {
    /// Validate field ranges; `section` prefixes field names in errors
    pub fn validate(&self, section: &str) -> ConfigResult<()> {
        let invalid = |field: &str, reason: String| ConfigError::InvalidValue {
            field: format!("{}.{}", section, field),
            reason,
        };

        if self.workers == Some(0) {
            return Err(invalid("workers", "must be at least 1".to_string()));
        }
        if self.timeout_ms == Some(0) {
            return Err(invalid("timeout_ms", "must be at least 1".to_string()));
        }
        if let Some(tolerance) = self.float_tolerance {
            if !tolerance.is_finite() || tolerance < 0.0 {
                return Err(invalid(
                    "float_tolerance",
                    format!("must be a non-negative number, got {}", tolerance),
                ));
            }
        }
        if let Some(threshold) = self.coverage_threshold {
            if !(0.0..=100.0).contains(&threshold) {
                return Err(invalid(
                    "coverage_threshold",
                    format!("must be between 0 and 100, got {}", threshold),
                ));
            }
        }
        if let Some(format) = &self.format {
            if !is_valid_format(format) {
                return Err(invalid(
                    "format",
                    format!("must be 'text', 'json', 'xml' or 'html', got '{}'", format),
                ));
            }
        }
        Ok(())
    }

    /// Merge another test config into this one
    /// Other config takes precedence for non-None values
    pub fn merge(&mut self, other: &TestConfig) {
        fn take<T: Clone>(slot: &mut Option<T>, other: &Option<T>) {
            if other.is_some() {
                slot.clone_from(other);
            }
        }
        take(&mut self.workers, &other.workers);
        take(&mut self.timeout_ms, &other.timeout_ms);
        take(&mut self.teardown_grace_ms, &other.teardown_grace_ms);
        take(&mut self.float_tolerance, &other.float_tolerance);
        take(&mut self.format, &other.format);
        take(&mut self.output, &other.output);
        take(&mut self.coverage, &other.coverage);
        take(&mut self.coverage_threshold, &other.coverage_threshold);
        take(&mut self.coverage_exclude, &other.coverage_exclude);
        take(&mut self.strict_load, &other.strict_load);
        take(&mut self.include, &other.include);
    }
}

/// Check if a report format name is known
fn is_valid_format(format: &str) -> bool {
    matches!(
        format.to_ascii_lowercase().as_str(),
        "text" | "json" | "xml" | "junit" | "html"
    )
}
