//! The evaluator boundary and the per-run context handed to it
//!
//! Every evaluation receives an explicit [`RunContext`] bundling the assertion
//! engine, the mock registry, the fixture bindings and the cancellation
//! signal for that one run. Nothing here is process-global, so runs on
//! different workers cannot observe each other.

use crate::assertion::{AssertionEngine, AssertionFailure};
use crate::coverage::CoverageMap;
use crate::fixture::{FixtureError, FixtureManager, FixtureScope, ScopeKind, TeardownAction};
use crate::mock::MockRegistry;
use crate::result::MetricSet;
use crate::source::{BodyRef, RegionId, SourceFile, Snippet};
use crate::syntax::SyntaxError;
use crate::value::Value;
use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;

/// Script evaluator consumed by the core.
///
/// `prepare` is called once per snippet at load time and must reject
/// malformed bodies; `evaluate` runs a body against a run context.
pub trait ScriptEvaluator: Send + Sync {
    /// Validate a snippet and return its statement lines (coverage regions)
    fn prepare(&self, file: &SourceFile, snippet: &Snippet) -> Result<Vec<u32>, SyntaxError>;

    /// Evaluate a body. Output goes through [`RunContext::print`].
    fn evaluate(&self, body: &BodyRef, ctx: &RunContext) -> Result<(), ScriptError>;
}

/// Error raised out of a script evaluation
#[derive(Debug, Clone, Error)]
pub enum ScriptError {
    #[error(transparent)]
    Assertion(#[from] AssertionFailure),

    #[error("{message}")]
    Raised { message: String, line: Option<u32> },

    #[error("evaluation cancelled")]
    Cancelled,
}

impl ScriptError {
    pub fn raised(message: impl Into<String>) -> Self {
        ScriptError::Raised {
            message: message.into(),
            line: None,
        }
    }

    pub fn raised_at(message: impl Into<String>, line: u32) -> Self {
        ScriptError::Raised {
            message: message.into(),
            line: Some(line),
        }
    }

    /// Message as seen by `throws_with_message`
    pub fn message(&self) -> String {
        match self {
            ScriptError::Assertion(failure) => failure.to_string(),
            ScriptError::Raised { message, .. } => message.clone(),
            ScriptError::Cancelled => "evaluation cancelled".to_string(),
        }
    }
}

impl From<FixtureError> for ScriptError {
    fn from(err: FixtureError) -> Self {
        match err {
            FixtureError::Cancelled(_) => ScriptError::Cancelled,
            other => ScriptError::raised(other.to_string()),
        }
    }
}

/// A callable script value: user closures, helpers, mocks and native functions
pub trait ScriptFunction: Send + Sync + fmt::Debug {
    fn name(&self) -> &str;
    fn call(&self, ctx: &RunContext, args: Vec<Value>) -> Result<Value, ScriptError>;
}

/// Shared handle to a [`ScriptFunction`]
#[derive(Clone)]
pub struct Callable(Arc<dyn ScriptFunction>);

impl Callable {
    pub fn new(function: impl ScriptFunction + 'static) -> Self {
        Callable(Arc::new(function))
    }

    /// Wrap a Rust closure as a callable
    pub fn native<F>(name: impl Into<String>, f: F) -> Self
    where
        F: Fn(&RunContext, Vec<Value>) -> Result<Value, ScriptError> + Send + Sync + 'static,
    {
        Callable::new(NativeFunction {
            name: name.into(),
            f: Box::new(f),
        })
    }

    pub fn name(&self) -> &str {
        self.0.name()
    }

    pub fn call(&self, ctx: &RunContext, args: Vec<Value>) -> Result<Value, ScriptError> {
        self.0.call(ctx, args)
    }

    /// Identity comparison
    pub fn same(&self, other: &Callable) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for Callable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<fn {}>", self.name())
    }
}

type NativeFn = Box<dyn Fn(&RunContext, Vec<Value>) -> Result<Value, ScriptError> + Send + Sync>;

struct NativeFunction {
    name: String,
    f: NativeFn,
}

impl fmt::Debug for NativeFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NativeFunction")
            .field("name", &self.name)
            .finish()
    }
}

impl ScriptFunction for NativeFunction {
    fn name(&self) -> &str {
        &self.name
    }

    fn call(&self, ctx: &RunContext, args: Vec<Value>) -> Result<Value, ScriptError> {
        (self.f)(ctx, args)
    }
}

/// Cooperative cancellation signal
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Everything one evaluation may touch
pub struct RunContext {
    label: String,
    params: Vec<Value>,
    assertions: AssertionEngine,
    mocks: Mutex<MockRegistry>,
    scope: Arc<FixtureScope>,
    /// Scopes of the global fixtures this run uses, outermost first
    globals: Vec<Arc<FixtureScope>>,
    fixtures: Arc<FixtureManager>,
    coverage: Option<Arc<CoverageMap>>,
    metrics: Mutex<MetricSet>,
    output: Mutex<String>,
    cancel: CancelToken,
    /// Teardown is non-cancelable
    tearing_down: AtomicBool,
}

impl RunContext {
    pub fn new(
        label: impl Into<String>,
        scope: Arc<FixtureScope>,
        fixtures: Arc<FixtureManager>,
    ) -> Self {
        let label = label.into();
        Self {
            assertions: AssertionEngine::new(label.clone()),
            label,
            params: Vec::new(),
            mocks: Mutex::new(MockRegistry::new()),
            scope,
            globals: Vec::new(),
            fixtures,
            coverage: None,
            metrics: Mutex::new(MetricSet::new()),
            output: Mutex::new(String::new()),
            cancel: CancelToken::new(),
            tearing_down: AtomicBool::new(false),
        }
    }

    /// Context with its own per-test scope and no shared fixtures, for
    /// evaluating a body outside a scheduled run
    pub fn standalone(label: impl Into<String>) -> Self {
        let label = label.into();
        let scope = Arc::new(FixtureScope::new(ScopeKind::PerTest, label.clone()));
        Self::new(label, scope, Arc::new(FixtureManager::new()))
    }

    pub fn with_params(mut self, params: Vec<Value>) -> Self {
        self.params = params;
        self
    }

    pub fn with_assertions(mut self, engine: AssertionEngine) -> Self {
        self.assertions = engine;
        self
    }

    pub fn with_globals(mut self, globals: Vec<Arc<FixtureScope>>) -> Self {
        self.globals = globals;
        self
    }

    pub fn with_coverage(mut self, coverage: Option<Arc<CoverageMap>>) -> Self {
        self.coverage = coverage;
        self
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    // ------------------------------------------------------------------
    // Parameters
    // ------------------------------------------------------------------

    pub fn params(&self) -> &[Value] {
        &self.params
    }

    pub fn param(&self, index: usize) -> Option<&Value> {
        self.params.get(index)
    }

    // ------------------------------------------------------------------
    // Assertions
    // ------------------------------------------------------------------

    pub fn assertions(&self) -> &AssertionEngine {
        &self.assertions
    }

    // ------------------------------------------------------------------
    // Mocks
    // ------------------------------------------------------------------

    pub fn mock(&self, name: impl Into<String>, replacement: Callable) {
        self.mocks.lock().install(name, replacement);
    }

    /// Undo the most recent mock of `name`; false when it was not mocked
    pub fn unmock(&self, name: &str) -> bool {
        self.mocks.lock().restore(name)
    }

    pub fn resolve_mock(&self, name: &str) -> Option<Callable> {
        self.mocks.lock().resolve(name)
    }

    pub fn is_mocked(&self, name: &str) -> bool {
        self.mocks.lock().is_mocked(name)
    }

    /// Restore every binding; returns the names that were still installed
    pub fn restore_mocks(&self) -> Vec<String> {
        let mut mocks = self.mocks.lock();
        let names = mocks.active_names();
        mocks.restore_all();
        names
    }

    // ------------------------------------------------------------------
    // Fixtures
    // ------------------------------------------------------------------

    pub fn scope(&self) -> &Arc<FixtureScope> {
        &self.scope
    }

    pub fn fixture_manager(&self) -> &Arc<FixtureManager> {
        &self.fixtures
    }

    /// Read a fixture value: own scope first, then global scopes innermost first
    pub fn fixture(&self, key: &str) -> Option<Value> {
        self.scope
            .get(key)
            .or_else(|| self.globals.iter().rev().find_map(|g| g.get(key)))
    }

    pub fn has_fixture(&self, key: &str) -> bool {
        self.fixture(key).is_some()
    }

    pub fn set_fixture(&self, key: &str, value: Value) -> Result<(), FixtureError> {
        self.scope.set(key, value)
    }

    /// Memoised per-scope value
    pub fn acquire<F>(&self, key: &str, factory: F) -> Result<Value, FixtureError>
    where
        F: FnOnce() -> Result<Value, ScriptError>,
    {
        self.scope.acquire(key, factory)
    }

    /// Memoised value shared by every run, constructed single-flight
    pub fn acquire_global<F>(&self, key: &str, factory: F) -> Result<Value, FixtureError>
    where
        F: FnOnce() -> Result<Value, ScriptError>,
    {
        self.fixtures.acquire_global(key, factory)
    }

    pub fn on_teardown(&self, label: impl Into<String>, callback: Callable) {
        self.scope
            .register_teardown(label, TeardownAction::Callback(callback));
    }

    // ------------------------------------------------------------------
    // Coverage
    // ------------------------------------------------------------------

    /// Statement about to execute; also positions subsequent assertions
    pub fn cover(&self, region: &RegionId) {
        if let Some(coverage) = &self.coverage {
            coverage.hit(region);
        }
        self.assertions.set_line(region.line);
    }

    // ------------------------------------------------------------------
    // Metrics and output
    // ------------------------------------------------------------------

    pub fn record_metric(&self, name: impl Into<String>, value: f64) {
        self.metrics.lock().record(name, value);
    }

    pub fn record_sample(&self, name: impl Into<String>, value: f64) {
        self.metrics.lock().record_sample(name, value);
    }

    pub fn metrics(&self) -> MetricSet {
        self.metrics.lock().clone()
    }

    pub fn print(&self, text: &str) {
        let mut output = self.output.lock();
        output.push_str(text);
        output.push('\n');
    }

    pub fn output(&self) -> String {
        self.output.lock().clone()
    }

    // ------------------------------------------------------------------
    // Cancellation
    // ------------------------------------------------------------------

    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        !self.tearing_down.load(Ordering::SeqCst) && self.cancel.is_cancelled()
    }

    /// Safe point for evaluators: `Err(Cancelled)` once the run timed out
    pub fn check_cancelled(&self) -> Result<(), ScriptError> {
        if self.is_cancelled() {
            Err(ScriptError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Switch to the teardown phase, after which cancellation is ignored
    pub fn enter_teardown(&self) {
        self.tearing_down.store(true, Ordering::SeqCst);
    }
}

impl fmt::Debug for RunContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunContext")
            .field("label", &self.label)
            .field("params", &self.params)
            .finish_non_exhaustive()
    }
}
