//! Global Configuration (~/.trance/config.toml)
//!
//! Handles user-level configuration stored in `~/.trance/config.toml`.

use crate::project::TestConfig;
use crate::{ConfigError, ConfigResult};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Global user configuration from ~/.trance/config.toml
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(deny_unknown_fields)]
pub struct GlobalConfig {
    /// Test defaults for every project
    #[serde(skip_serializing_if = "Option::is_none")]
    pub test: Option<TestConfig>,

    /// Terminal output preferences
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<OutputConfig>,
}

/// Terminal output preferences
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct OutputConfig {
    /// Colored text reports (default: true)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub color: Option<bool>,
}

impl GlobalConfig {
    /// Load global configuration from a file
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

    /// Validate the global configuration
    pub fn validate(&self) -> ConfigResult<()> {
        if let Some(test) = &self.test {
            test.validate("test")?;
        }
        Ok(())
    }

    /// Get the global config file path (~/.trance/config.toml)
    pub fn global_config_path() -> ConfigResult<PathBuf> {
        let home = dirs::home_dir().ok_or(ConfigError::HomeNotFound)?;
        Ok(home.join(".trance").join("config.toml"))
    }

    /// Color preference, if set
    pub fn color(&self) -> Option<bool> {
        self.output.as_ref().and_then(|o| o.color)
    }

    /// Merge another global config into this one
    /// Other config takes precedence for non-None values
    pub fn merge(&mut self, other: &GlobalConfig) {
        if let Some(test) = &other.test {
            self.test.get_or_insert_with(TestConfig::default).merge(test);
        }
        if other.output.is_some() {
            self.output = other.output.clone();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_minimal_global_config() {
        let toml = r#"
[output]
color = false
"#;

        let config: GlobalConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.color(), Some(false));
    }

    #[test]
    fn test_parse_full_global_config() {
        let toml = r#"
[test]
workers = 2
timeout_ms = 10000
format = "text"

[output]
color = true
"#;

        let config: GlobalConfig = toml::from_str(toml).unwrap();
        assert!(config.validate().is_ok());
        assert_eq!(config.test.unwrap().timeout_ms, Some(10000));
    }

    #[test]
    fn test_invalid_test_defaults() {
        let config = GlobalConfig {
            test: Some(TestConfig {
                coverage_threshold: Some(-1.0),
                ..Default::default()
            }),
            ..Default::default()
        };

        assert!(config.validate().is_err());
    }

    #[test]
    fn test_merge_configs() {
        let mut base = GlobalConfig {
            test: Some(TestConfig {
                workers: Some(3),
                ..Default::default()
            }),
            ..Default::default()
        };
        let override_config = GlobalConfig {
            test: Some(TestConfig {
                timeout_ms: Some(100),
                ..Default::default()
            }),
            output: Some(OutputConfig { color: Some(false) }),
        };

        base.merge(&override_config);
        let test = base.test.as_ref().unwrap();
        assert_eq!(test.workers, Some(3));
        assert_eq!(test.timeout_ms, Some(100));
        assert_eq!(base.color(), Some(false));
    }
}
