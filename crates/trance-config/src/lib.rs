//! trance configuration system
//!
//! Provides configuration for the test runner:
//! - Project configuration (`trance.toml`, `[test]` table)
//! - Global user configuration (`~/.trance/config.toml`)
//! - Environment overrides (`TRANCE_*`)
//! - Resolution into concrete [`TestSettings`]
//!
//! # Configuration Hierarchy
//!
//! Configuration is loaded and merged in the following order (later overrides earlier):
//! 1. Global config (~/.trance/config.toml)
//! 2. Project config (./trance.toml, found by walking up)
//! 3. Environment variables (TRANCE_WORKERS, TRANCE_TIMEOUT_MS, TRANCE_COVERAGE_THRESHOLD)
//! 4. CLI flags (applied by the caller to the resolved settings)
//!
//! # Example
//!
//! ```no_run
//! use trance_config::ConfigLoader;
//! use std::path::Path;
//!
//! let mut loader = ConfigLoader::new();
//! let config = loader.load_from_directory(Path::new(".")).unwrap();
//! let settings = config.test_settings();
//! ```

pub mod global;
pub mod loader;
pub mod project;
pub mod settings;

use std::path::PathBuf;
use thiserror::Error;

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Configuration file not found: {0}")]
    NotFound(PathBuf),

    #[error("Failed to read configuration file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Invalid TOML syntax in {file}: {error}")]
    TomlParseError {
        file: PathBuf,
        error: toml::de::Error,
    },

    #[error("Invalid value for '{field}': {reason}")]
    InvalidValue { field: String, reason: String },

    #[error("Invalid value '{value}' in environment variable {var}: {reason}")]
    InvalidEnv {
        var: String,
        value: String,
        reason: String,
    },

    #[error("Home directory not found")]
    HomeNotFound,
}

/// Result type for configuration operations
pub type ConfigResult<T> = Result<T, ConfigError>;

// Re-export main types
pub use global::{GlobalConfig, OutputConfig};
pub use loader::{Config, ConfigLoader};
pub use project::{ProjectConfig, TestConfig};
pub use settings::{TestSettings, DEFAULT_FLOAT_TOLERANCE};

/// Name of the project configuration file
pub const PROJECT_CONFIG_FILE: &str = "trance.toml";
