//! One run on its own thread
//!
//! The run thread drives `Setup → Running → Teardown` and reports each phase
//! to the watchdog over a channel. It owns nothing shared except the global
//! fixture table and the coverage map.

use super::bench;
use crate::assertion::AssertionEngine;
use crate::context::{CancelToken, RunContext, ScriptError, ScriptEvaluator};
use crate::coverage::CoverageMap;
use crate::fixture::{
    panic_message, FixtureError, FixtureManager, FixtureScope, ScopeKind, TeardownAction,
    TeardownFailure,
};
use crate::plan::{RunSpec, UnitKind};
use crate::result::{Failure, RunStatus};
use crossbeam::channel::Sender;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tracing::{debug, trace};

/// Progress reported by a run thread
pub(crate) enum RunEvent {
    Started(Arc<RunContext>),
    Executed(Outcome),
    Finalized(Vec<TeardownFailure>),
}

/// Status decided by setup and body
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Outcome {
    pub status: RunStatus,
    pub failure: Option<Failure>,
}

impl Outcome {
    pub fn passed() -> Self {
        Self {
            status: RunStatus::Passed,
            failure: None,
        }
    }

    pub fn errored(failure: Failure) -> Self {
        Self {
            status: RunStatus::Errored,
            failure: Some(failure),
        }
    }

    /// Assertion failures fail the run, raised errors error it
    pub fn from_error(err: ScriptError) -> Self {
        match err {
            ScriptError::Assertion(failure) => Self {
                status: RunStatus::Failed,
                failure: Some(failure.into()),
            },
            ScriptError::Raised { message, line } => {
                Self::errored(Failure::Raised { message, line })
            }
            // The watchdog supplies the limit
            ScriptError::Cancelled => Self {
                status: RunStatus::TimedOut,
                failure: None,
            },
        }
    }
}

pub(crate) struct RunTask {
    pub spec: RunSpec,
    pub evaluator: Arc<dyn ScriptEvaluator>,
    pub fixtures: Arc<FixtureManager>,
    pub coverage: Option<Arc<CoverageMap>>,
    pub tolerance: f64,
    pub cancel: CancelToken,
}

impl RunTask {
    pub fn run(self, events: Sender<RunEvent>) {
        let label = self.spec.label();
        let unit = self.spec.unit.clone();

        let (globals, setup_output, global_failure) = self.ensure_globals();

        let engine = AssertionEngine::new(unit.name.clone())
            .with_site(unit.group_path.clone(), self.spec.param_index)
            .with_tolerance(self.tolerance);
        let scope = Arc::new(FixtureScope::new(ScopeKind::PerTest, label.clone()));
        let ctx = Arc::new(
            RunContext::new(label.clone(), scope, self.fixtures.clone())
                .with_params(self.spec.params.clone())
                .with_assertions(engine)
                .with_globals(globals)
                .with_coverage(self.coverage.clone())
                .with_cancel(self.cancel.clone()),
        );
        for line in setup_output.lines() {
            ctx.print(line);
        }

        // Sends fail only once the watchdog has given up on this run
        let _ = events.send(RunEvent::Started(ctx.clone()));

        let outcome = match global_failure {
            Some(outcome) => outcome,
            None => self.setup_and_execute(&ctx),
        };
        debug!(run = %label, status = %outcome.status, "run executed");
        let _ = events.send(RunEvent::Executed(outcome));

        ctx.enter_teardown();
        let failures = ctx
            .scope()
            .release(|action| run_teardown(self.evaluator.as_ref(), &ctx, action));
        trace!(run = %label, failures = failures.len(), "run finalized");
        let _ = events.send(RunEvent::Finalized(failures));
    }

    /// Construct (or join) every global fixture of the unit
    fn ensure_globals(&self) -> (Vec<Arc<FixtureScope>>, String, Option<Outcome>) {
        let mut scopes = Vec::new();
        let mut output = String::new();
        let declared = self
            .spec
            .unit
            .fixtures
            .iter()
            .filter(|f| f.scope == ScopeKind::Global);

        for decl in declared {
            let (global, result) = self.fixtures.ensure(decl, |scope| {
                let ctx = RunContext::new(
                    format!("fixture {}", decl.name),
                    scope.clone(),
                    self.fixtures.clone(),
                )
                .with_coverage(self.coverage.clone())
                .with_cancel(self.cancel.clone());
                let result = match &decl.setup {
                    Some(setup) => guarded(|| self.evaluator.evaluate(setup, &ctx)),
                    None => Ok(()),
                };
                output.push_str(&ctx.output());
                result.map_err(|e| match e {
                    ScriptError::Cancelled => FixtureError::Cancelled(decl.name.clone()),
                    other => FixtureError::setup(decl.name.clone(), other.message()),
                })
            });
            scopes.push(global.scope.clone());

            match result {
                Ok(()) => {}
                Err(FixtureError::Cancelled(_)) => {
                    return (scopes, output, Some(Outcome::from_error(ScriptError::Cancelled)))
                }
                Err(err) => {
                    let failure = Failure::Fixture {
                        fixture: decl.name.clone(),
                        message: fixture_message(err),
                    };
                    return (scopes, output, Some(Outcome::errored(failure)));
                }
            }
        }
        (scopes, output, None)
    }

    /// Per-test setups outermost first, then the body.
    ///
    /// A teardown is registered only after its setup succeeded, so a failed
    /// setup tears down exactly the fixtures that were set up.
    fn setup_and_execute(&self, ctx: &RunContext) -> Outcome {
        let unit = &self.spec.unit;
        let per_test = unit.fixtures.iter().filter(|f| f.scope == ScopeKind::PerTest);

        for decl in per_test {
            if let Some(setup) = &decl.setup {
                trace!(run = %ctx.label(), fixture = %decl.name, "fixture setup");
                match guarded(|| self.evaluator.evaluate(setup, ctx)) {
                    Ok(()) => {}
                    Err(ScriptError::Cancelled) => {
                        return Outcome::from_error(ScriptError::Cancelled)
                    }
                    Err(err) => {
                        return Outcome::errored(Failure::Fixture {
                            fixture: decl.name.clone(),
                            message: err.message(),
                        })
                    }
                }
            }
            if let Some(teardown) = &decl.teardown {
                ctx.scope()
                    .register_teardown(decl.name.clone(), TeardownAction::Script(teardown.clone()));
            }
        }

        if let Err(err) = ctx.check_cancelled() {
            return Outcome::from_error(err);
        }

        let evaluator = self.evaluator.as_ref();
        let result = guarded(|| match unit.kind {
            UnitKind::Test => evaluator.evaluate(&unit.body, ctx),
            UnitKind::Bench { iterations, warmup } => {
                bench::run_bench(evaluator, &unit.body, ctx, iterations, warmup)
            }
            UnitKind::Load {
                iterations,
                concurrency,
            } => bench::run_load(evaluator, &unit.body, ctx, iterations, concurrency),
        });

        match result {
            Ok(()) => Outcome::passed(),
            Err(err) => Outcome::from_error(err),
        }
    }
}

/// Execute one teardown action against `ctx`
pub(crate) fn run_teardown(
    evaluator: &dyn ScriptEvaluator,
    ctx: &RunContext,
    action: TeardownAction,
) -> Result<(), String> {
    match action {
        TeardownAction::Script(body) => evaluator.evaluate(&body, ctx).map_err(|e| e.message()),
        TeardownAction::Callback(callback) => callback
            .call(ctx, Vec::new())
            .map(|_| ())
            .map_err(|e| e.message()),
        TeardownAction::Native(f) => f(),
    }
}

/// Turn a panic inside evaluator code into a raised error
pub(crate) fn guarded<F>(f: F) -> Result<(), ScriptError>
where
    F: FnOnce() -> Result<(), ScriptError>,
{
    catch_unwind(AssertUnwindSafe(f))
        .unwrap_or_else(|panic| Err(ScriptError::raised(panic_message(panic.as_ref()))))
}

fn fixture_message(err: FixtureError) -> String {
    match err {
        FixtureError::Failed { message, .. } => message,
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assertion::AssertionFailure;

    #[test]
    fn test_outcome_classification() {
        let failed = Outcome::from_error(ScriptError::Assertion(AssertionFailure {
            predicate: "assert_equal".into(),
            expected: "4".into(),
            actual: "5".into(),
            message: None,
            ordinal: 1,
            line: Some(3),
        }));
        assert_eq!(failed.status, RunStatus::Failed);

        let errored = Outcome::from_error(ScriptError::raised_at("division by zero", 7));
        assert_eq!(errored.status, RunStatus::Errored);
        assert_eq!(
            errored.failure,
            Some(Failure::Raised {
                message: "division by zero".into(),
                line: Some(7)
            })
        );

        let cancelled = Outcome::from_error(ScriptError::Cancelled);
        assert_eq!(cancelled.status, RunStatus::TimedOut);
        assert_eq!(cancelled.failure, None);
    }

    #[test]
    fn test_guarded_turns_panics_into_errors() {
        let result = guarded(|| -> Result<(), ScriptError> { panic!("evaluator bug") });
        match result {
            Err(ScriptError::Raised { message, .. }) => {
                assert_eq!(message, "panicked: evaluator bug")
            }
            other => panic!("unexpected {:?}", other),
        }
    }
}
