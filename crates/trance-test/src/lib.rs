//! Trance Test - test-execution core
//!
//! This library provides everything between source files and a report:
//! - Discovery and loading of test declarations into an execution plan
//! - Fixture scopes, mocks and the assertion engine
//! - Parallel scheduling with per-run timeouts
//! - Region coverage and text, JSON, JUnit XML and HTML reports
//!
//! Script bodies are evaluated through the [`ScriptEvaluator`] trait, which
//! the language crate implements.

/// Trance test-core version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub mod assertion;
pub mod context;
pub mod coverage;
pub mod discovery;
pub mod fixture;
pub mod mock;
pub mod plan;
pub mod report;
pub mod result;
pub mod scheduler;
pub mod source;
pub mod syntax;
pub mod value;

// Re-export commonly used types
pub use assertion::{AssertionEngine, AssertionFailure, AssertionResult, DEFAULT_TOLERANCE};
pub use context::{CancelToken, Callable, RunContext, ScriptError, ScriptEvaluator, ScriptFunction};
pub use coverage::{CoverageMap, CoverageSummary, CoverageThresholdError};
pub use discovery::{DiscoveryError, Loader, SOURCE_EXTENSION};
pub use fixture::{FixtureError, FixtureManager, FixtureScope, ScopeKind, TeardownFailure};
pub use plan::{ExecutionPlan, TestUnit, UnitKind};
pub use report::{write_report, ReportError, ReportFormat, ReportOptions};
pub use result::{Failure, RunStatus, SuiteCounts, SuiteResult, TestRun, Warning};
pub use scheduler::{RunFilter, Scheduler, SchedulerConfig};
pub use source::{BodyRef, RegionId, Snippet, SourceFile};
pub use syntax::SyntaxError;
pub use value::Value;
