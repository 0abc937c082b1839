//! Fixture manager
//!
//! A [`FixtureScope`] is a write-once key/value store with a LIFO teardown
//! stack. Per-test scopes are created for every parameter instance; global
//! scopes live in the [`FixtureManager`] and are constructed single-flight
//! on first reference, then released once at the end of the run.

use crate::context::{Callable, ScriptError};
use crate::plan::FixtureDecl;
use crate::source::BodyRef;
use crate::value::Value;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, OnceLock};
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ScopeKind {
    PerTest,
    Global,
}

impl fmt::Display for ScopeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScopeKind::PerTest => write!(f, "per-test"),
            ScopeKind::Global => write!(f, "global"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FixturePhase {
    Setup,
    Teardown,
}

impl fmt::Display for FixturePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FixturePhase::Setup => write!(f, "setup"),
            FixturePhase::Teardown => write!(f, "teardown"),
        }
    }
}

/// Fixture errors
#[derive(Debug, Clone, PartialEq, Error)]
pub enum FixtureError {
    #[error("fixture '{fixture}' {phase} failed: {message}")]
    Failed {
        fixture: String,
        phase: FixturePhase,
        message: String,
    },

    #[error("fixture key '{0}' is already set in this scope")]
    AlreadySet(String),

    /// Construction was interrupted by the requesting run's timeout. Never
    /// memoised: the next requester constructs the value again.
    #[error("construction of fixture '{0}' was cancelled")]
    Cancelled(String),
}

impl FixtureError {
    pub fn setup(fixture: impl Into<String>, message: impl Into<String>) -> Self {
        FixtureError::Failed {
            fixture: fixture.into(),
            phase: FixturePhase::Setup,
            message: message.into(),
        }
    }
}

/// A teardown callback that failed or panicked
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TeardownFailure {
    pub scope: String,
    pub label: String,
    pub message: String,
}

/// Work registered against a scope, run when the scope is released
pub enum TeardownAction {
    /// A declared `teardown { }` block
    Script(BodyRef),
    /// A script callable registered with `on_teardown`
    Callback(Callable),
    Native(Box<dyn FnOnce() -> Result<(), String> + Send>),
}

impl fmt::Debug for TeardownAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TeardownAction::Script(body) => write!(f, "Script(line {})", body.line()),
            TeardownAction::Callback(c) => write!(f, "Callback({})", c.name()),
            TeardownAction::Native(_) => write!(f, "Native"),
        }
    }
}

struct Teardown {
    label: String,
    action: TeardownAction,
}

/// One key of a scope. `building` is held while a factory runs, so
/// construction is single-flight while reads of a finished value never block.
#[derive(Default)]
struct Slot {
    value: OnceLock<Result<Value, FixtureError>>,
    building: Mutex<()>,
}

/// Key/value store plus teardown stack for one fixture lifetime
pub struct FixtureScope {
    kind: ScopeKind,
    name: String,
    /// The map lock is held only to find a slot; construction waits on the
    /// slot itself, so unrelated keys never block each other.
    slots: Mutex<HashMap<String, Arc<Slot>>>,
    teardowns: Mutex<Vec<Teardown>>,
}

impl FixtureScope {
    pub fn new(kind: ScopeKind, name: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
            slots: Mutex::new(HashMap::new()),
            teardowns: Mutex::new(Vec::new()),
        }
    }

    pub fn kind(&self) -> ScopeKind {
        self.kind
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn slot(&self, key: &str) -> Arc<Slot> {
        self.slots.lock().entry(key.to_string()).or_default().clone()
    }

    /// Store a value; each key can be written once per scope
    pub fn set(&self, key: &str, value: Value) -> Result<(), FixtureError> {
        self.slot(key)
            .value
            .set(Ok(value))
            .map_err(|_| FixtureError::AlreadySet(key.to_string()))
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        let slot = self.slots.lock().get(key).cloned()?;
        match slot.value.get() {
            Some(Ok(value)) => Some(value.clone()),
            _ => None,
        }
    }

    /// Return the value for `key`, invoking `factory` at most once per scope.
    ///
    /// Concurrent callers for the same key block until the first one finishes
    /// and then share its result, including a failure. A cancelled factory
    /// leaves the key empty.
    pub fn acquire<F>(&self, key: &str, factory: F) -> Result<Value, FixtureError>
    where
        F: FnOnce() -> Result<Value, ScriptError>,
    {
        let slot = self.slot(key);
        if let Some(done) = slot.value.get() {
            return done.clone();
        }
        let _building = slot.building.lock();
        if let Some(done) = slot.value.get() {
            return done.clone();
        }

        debug!(scope = %self.name, key, "constructing fixture value");
        let outcome = match factory() {
            Ok(value) => Ok(value),
            Err(ScriptError::Cancelled) => {
                debug!(scope = %self.name, key, "fixture construction cancelled");
                return Err(FixtureError::Cancelled(key.to_string()));
            }
            Err(err) => Err(FixtureError::setup(key, err.message())),
        };
        slot.value.get_or_init(|| outcome).clone()
    }

    pub fn register_teardown(&self, label: impl Into<String>, action: TeardownAction) {
        self.teardowns.lock().push(Teardown {
            label: label.into(),
            action,
        });
    }

    pub fn pending_teardowns(&self) -> usize {
        self.teardowns.lock().len()
    }

    /// Run every registered teardown, newest first.
    ///
    /// A failing or panicking teardown is recorded and the remaining ones
    /// still run. `run` executes the actions that need an evaluator.
    pub fn release<R>(&self, mut run: R) -> Vec<TeardownFailure>
    where
        R: FnMut(TeardownAction) -> Result<(), String>,
    {
        let pending = std::mem::take(&mut *self.teardowns.lock());
        let mut failures = Vec::new();
        for Teardown { label, action } in pending.into_iter().rev() {
            let outcome = catch_unwind(AssertUnwindSafe(|| match action {
                TeardownAction::Native(f) => f(),
                other => run(other),
            }));
            let message = match outcome {
                Ok(Ok(())) => continue,
                Ok(Err(message)) => message,
                Err(panic) => panic_message(panic.as_ref()),
            };
            warn!(scope = %self.name, label = %label, error = %message, "teardown failed");
            failures.push(TeardownFailure {
                scope: self.name.clone(),
                label,
                message,
            });
        }
        failures
    }
}

impl fmt::Debug for FixtureScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FixtureScope")
            .field("kind", &self.kind)
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

pub(crate) fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        format!("panicked: {}", s)
    } else if let Some(s) = panic.downcast_ref::<String>() {
        format!("panicked: {}", s)
    } else {
        "panicked".to_string()
    }
}

/// A declared global fixture and its scope
pub struct GlobalFixture {
    pub decl: Arc<FixtureDecl>,
    pub scope: Arc<FixtureScope>,
    state: OnceLock<Result<(), FixtureError>>,
    building: Mutex<()>,
}

impl GlobalFixture {
    fn new(decl: &Arc<FixtureDecl>) -> Self {
        Self {
            decl: decl.clone(),
            scope: Arc::new(FixtureScope::new(ScopeKind::Global, decl.name.clone())),
            state: OnceLock::new(),
            building: Mutex::new(()),
        }
    }

    /// Outcome of setup, once it has finished
    pub fn setup_result(&self) -> Option<&Result<(), FixtureError>> {
        self.state.get()
    }
}

/// What [`FixtureManager::release_globals`] found
#[derive(Debug, Default)]
pub struct GlobalRelease {
    /// Teardown failures paired with the id of the fixture they belong to
    pub failures: Vec<(String, TeardownFailure)>,
    /// Fixtures whose setup was still executing; their teardown is skipped
    pub leaked: Vec<Arc<FixtureDecl>>,
}

/// Owner of every global scope in a run
pub struct FixtureManager {
    /// Values created through `acquire_global`
    shared: Arc<FixtureScope>,
    declared: Mutex<HashMap<String, Arc<GlobalFixture>>>,
    /// Declared fixtures in the order their setup started
    constructed: Mutex<Vec<Arc<GlobalFixture>>>,
}

impl Default for FixtureManager {
    fn default() -> Self {
        Self::new()
    }
}

impl FixtureManager {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(FixtureScope::new(ScopeKind::Global, "shared")),
            declared: Mutex::new(HashMap::new()),
            constructed: Mutex::new(Vec::new()),
        }
    }

    pub fn shared_scope(&self) -> &Arc<FixtureScope> {
        &self.shared
    }

    /// Single-flight ad-hoc global value
    pub fn acquire_global<F>(&self, key: &str, factory: F) -> Result<Value, FixtureError>
    where
        F: FnOnce() -> Result<Value, ScriptError>,
    {
        self.shared.acquire(key, factory)
    }

    pub fn set_global(&self, key: &str, value: Value) -> Result<(), FixtureError> {
        self.shared.set(key, value)
    }

    fn declared_entry(&self, decl: &Arc<FixtureDecl>) -> Arc<GlobalFixture> {
        self.declared
            .lock()
            .entry(decl.id.clone())
            .or_insert_with(|| Arc::new(GlobalFixture::new(decl)))
            .clone()
    }

    /// Set up a declared global fixture on first reference.
    ///
    /// `setup` runs once per fixture; racing callers block on the
    /// constructing one and share its outcome. The fixture joins the release
    /// list before setup starts, so its teardown is attempted even when
    /// setup fails.
    ///
    /// A setup that returns [`FixtureError::Cancelled`] is abandoned: the
    /// next caller sets the fixture up again in a fresh scope.
    pub fn ensure<S>(
        &self,
        decl: &Arc<FixtureDecl>,
        mut setup: S,
    ) -> (Arc<GlobalFixture>, Result<(), FixtureError>)
    where
        S: FnMut(&Arc<FixtureScope>) -> Result<(), FixtureError>,
    {
        loop {
            let entry = self.declared_entry(decl);
            let _building = entry.building.lock();
            match entry.state.get() {
                // Replaced in the table by the time we got the lock
                Some(Err(FixtureError::Cancelled(_))) => continue,
                Some(done) => return (entry.clone(), done.clone()),
                None => {}
            }

            debug!(fixture = %decl.id, "global fixture setup");
            self.constructed.lock().push(entry.clone());
            let result = setup(&entry.scope);
            let _ = entry.state.set(result.clone());

            if matches!(result, Err(FixtureError::Cancelled(_))) {
                debug!(fixture = %decl.id, "global fixture setup cancelled");
                let mut declared = self.declared.lock();
                if declared
                    .get(&decl.id)
                    .is_some_and(|current| Arc::ptr_eq(current, &entry))
                {
                    declared.remove(&decl.id);
                }
            }
            return (entry.clone(), result);
        }
    }

    /// Global fixtures whose setup has started, in construction order
    pub fn constructed(&self) -> Vec<Arc<GlobalFixture>> {
        self.constructed.lock().clone()
    }

    /// Release every global scope, newest first, then forget them.
    ///
    /// `run` receives each declared fixture (to run its teardown block) and
    /// returns failures from the fixture's own scope. A fixture whose setup
    /// has not finished is reported as leaked and not torn down.
    pub fn release_globals<R>(&self, mut run: R) -> GlobalRelease
    where
        R: FnMut(&GlobalFixture) -> Vec<TeardownFailure>,
    {
        let constructed = std::mem::take(&mut *self.constructed.lock());
        let mut release = GlobalRelease::default();
        for fixture in constructed.iter().rev() {
            if fixture.state.get().is_none() {
                warn!(fixture = %fixture.decl.id, "global fixture setup still running, skipping teardown");
                release.leaked.push(fixture.decl.clone());
                continue;
            }
            debug!(fixture = %fixture.decl.id, "global fixture release");
            for failure in run(fixture) {
                release.failures.push((fixture.decl.id.clone(), failure));
            }
        }
        for failure in self.shared.release(|action| {
            Err(format!("{:?} cannot run outside a test", action))
        }) {
            release.failures.push(("shared".to_string(), failure));
        }
        self.declared.lock().clear();
        release
    }

    /// Drop all global state without running teardowns. Used between
    /// re-runs after `release_globals` has already run.
    pub fn reset(&self) {
        let leftover = self.constructed.lock().len();
        if leftover > 0 {
            warn!(count = leftover, "resetting fixtures that were never released");
        }
        self.constructed.lock().clear();
        self.declared.lock().clear();
        *self.shared.slots.lock() = HashMap::new();
        self.shared.teardowns.lock().clear();
    }
}

impl fmt::Debug for FixtureManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FixtureManager")
            .field("constructed", &self.constructed.lock().len())
            .finish_non_exhaustive()
    }
}
