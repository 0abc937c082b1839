//! Execution scheduler
//!
//! Runs an [`ExecutionPlan`] on a bounded worker pool. Each run executes on
//! its own thread under a watchdog so a hung body can be cancelled and, if
//! it ignores cancellation, detached. Filtering happens before scheduling;
//! results are sorted by declaration order regardless of completion order.

mod bench;
mod run;
mod watchdog;

use crate::context::{CancelToken, RunContext, ScriptEvaluator};
use crate::coverage::CoverageMap;
use crate::fixture::{FixtureManager, GlobalFixture, ScopeKind, TeardownFailure};
use crate::plan::{Batch, ExecutionPlan, RunSpec, TestUnit};
use crate::result::{Failure, MetricSet, RunKey, RunStatus, SuiteResult, TestRun, Warning};
use chrono::Utc;
use crossbeam::channel::unbounded;
use rayon::prelude::*;
use run::{guarded, run_teardown, RunTask};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

pub use crate::assertion::DEFAULT_TOLERANCE;

/// Script bodies recurse on the run thread
pub(crate) const RUN_STACK_SIZE: usize = 16 * 1024 * 1024;

/// Which units run; everything else is recorded as skipped
#[derive(Debug, Clone, Default)]
pub struct RunFilter {
    /// Substring of the unit's full name
    pub name: Option<String>,
    /// Keep units carrying any of these tags
    pub tags: Vec<String>,
    pub exclude_tags: Vec<String>,
}

impl RunFilter {
    /// Why `unit` should not run, if it should not
    pub fn skip_reason(&self, unit: &TestUnit) -> Option<String> {
        if let Some(reason) = &unit.skip {
            return Some(reason.clone());
        }
        if let Some(tag) = self.exclude_tags.iter().find(|t| unit.has_tag(t)) {
            return Some(format!("excluded tag '{}'", tag));
        }
        if let Some(name) = &self.name {
            if !unit.full_name().contains(name.as_str()) {
                return Some("filtered".to_string());
            }
        }
        if !self.tags.is_empty() && !self.tags.iter().any(|t| unit.has_tag(t)) {
            return Some("filtered".to_string());
        }
        None
    }
}

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Worker pool width; 1 runs everything serially on the calling thread
    pub workers: usize,
    /// Timeout for units that declare none
    pub default_timeout: Duration,
    /// Teardown budget of a timed-out run
    pub teardown_grace: Duration,
    pub float_tolerance: f64,
    pub filter: RunFilter,
    pub coverage: bool,
    /// Minimum suite coverage percentage; implies `coverage`
    pub coverage_threshold: Option<f64>,
    /// Keep hit counts from previous runs of this scheduler
    pub incremental_coverage: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            default_timeout: Duration::from_secs(30),
            teardown_grace: Duration::from_secs(5),
            float_tolerance: DEFAULT_TOLERANCE,
            filter: RunFilter::default(),
            coverage: false,
            coverage_threshold: None,
            incremental_coverage: false,
        }
    }
}

/// Available hardware parallelism
pub fn default_workers() -> usize {
    thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

pub struct Scheduler {
    config: SchedulerConfig,
    evaluator: Arc<dyn ScriptEvaluator>,
    fixtures: Arc<FixtureManager>,
    coverage: Arc<CoverageMap>,
}

impl Scheduler {
    pub fn new(config: SchedulerConfig, evaluator: Arc<dyn ScriptEvaluator>) -> Self {
        Self {
            config,
            evaluator,
            fixtures: Arc::new(FixtureManager::new()),
            coverage: Arc::new(CoverageMap::new()),
        }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    pub fn fixtures(&self) -> &Arc<FixtureManager> {
        &self.fixtures
    }

    pub fn coverage(&self) -> &Arc<CoverageMap> {
        &self.coverage
    }

    fn coverage_enabled(&self) -> bool {
        self.config.coverage || self.config.coverage_threshold.is_some()
    }

    /// Drop global fixture state between development re-runs
    pub fn reset_fixtures(&self) {
        self.fixtures.reset();
    }

    /// Run the whole plan and release global fixtures afterwards
    pub fn run(&self, plan: &ExecutionPlan) -> SuiteResult {
        let started_at = Utc::now();
        let start = Instant::now();

        let (batches, mut runs) = self.partition(plan);
        if self.coverage_enabled() {
            if !self.config.incremental_coverage {
                self.coverage.reset();
            }
            self.register_regions(&batches);
        }

        let scheduled: usize = batches.iter().map(|b| b.runs.len()).sum();
        info!(
            runs = scheduled,
            skipped = runs.len(),
            workers = self.config.workers,
            "starting suite"
        );
        runs.extend(self.execute(&batches));

        let mut warnings: Vec<Warning> = plan
            .load_errors
            .iter()
            .map(|e| Warning::LoadError {
                message: e.to_string(),
            })
            .collect();
        self.release_globals(&mut runs, &mut warnings);
        runs.sort_by_key(|r| r.key);

        let (coverage, threshold_error) = if self.coverage_enabled() {
            let summary = self.coverage.summary();
            let check = summary.check_threshold(self.config.coverage_threshold).err();
            if let Some(err) = &check {
                warn!(%err, "coverage threshold not met");
            }
            (Some(summary), check)
        } else {
            (None, None)
        };

        let result = SuiteResult {
            started_at,
            duration: start.elapsed(),
            runs,
            warnings,
            load_errors: plan.load_errors.clone(),
            coverage,
            threshold: self.config.coverage_threshold,
            threshold_error,
        };
        info!(
            passed = result.counts().passed,
            failures = result.counts().failures(),
            "suite finished"
        );
        result
    }

    /// Split the plan into batches to execute and runs recorded as skipped
    fn partition(&self, plan: &ExecutionPlan) -> (Vec<Batch>, Vec<TestRun>) {
        let mut batches = Vec::new();
        let mut skipped = Vec::new();
        for batch in plan.batches() {
            let mut kept = Vec::new();
            for spec in batch.runs {
                match self.config.filter.skip_reason(&spec.unit) {
                    Some(reason) => skipped.push(skipped_run(&spec, reason)),
                    None => kept.push(spec),
                }
            }
            if !kept.is_empty() {
                batches.push(Batch {
                    serial: batch.serial,
                    runs: kept,
                });
            }
        }
        (batches, skipped)
    }

    /// Instrumentable regions of everything that will run
    fn register_regions(&self, batches: &[Batch]) {
        let mut files = Vec::new();
        for spec in batches.iter().flat_map(|b| &b.runs) {
            let unit = &spec.unit;
            if unit.file.coverage_excluded {
                continue;
            }
            let bodies = std::iter::once(&unit.body).chain(
                unit.fixtures
                    .iter()
                    .flat_map(|f| f.setup.iter().chain(f.teardown.iter())),
            );
            for body in bodies {
                for line in &body.regions {
                    self.coverage.register(body.file.region(*line));
                }
            }
            if !files.iter().any(|f| Arc::ptr_eq(f, &unit.file)) {
                files.push(unit.file.clone());
            }
        }
        for file in files {
            for line in &file.helper_regions {
                self.coverage.register(file.region(*line));
            }
        }
    }

    fn execute(&self, batches: &[Batch]) -> Vec<TestRun> {
        if self.config.workers <= 1 {
            return batches.iter().flat_map(|b| self.run_batch(b)).collect();
        }

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.config.workers)
            .thread_name(|i| format!("trance-worker-{}", i))
            .build();
        match pool {
            Ok(pool) => pool.install(|| {
                batches
                    .par_iter()
                    .flat_map_iter(|b| self.run_batch(b))
                    .collect()
            }),
            Err(e) => {
                warn!(error = %e, "cannot build worker pool, running serially");
                batches.iter().flat_map(|b| self.run_batch(b)).collect()
            }
        }
    }

    /// A serial batch runs its specs in order on one worker
    fn run_batch(&self, batch: &Batch) -> Vec<TestRun> {
        batch.runs.iter().map(|spec| self.run_one(spec)).collect()
    }

    fn run_one(&self, spec: &RunSpec) -> TestRun {
        let unit = &spec.unit;
        let label = spec.label();
        let timeout = unit.timeout.unwrap_or(self.config.default_timeout);
        let coverage = self.coverage_enabled().then(|| self.coverage.clone());
        let before = coverage.as_ref().map(|c| c.snapshot());

        let (events, receiver) = unbounded();
        let cancel = CancelToken::new();
        let task = RunTask {
            spec: spec.clone(),
            evaluator: self.evaluator.clone(),
            fixtures: self.fixtures.clone(),
            coverage: coverage.clone(),
            tolerance: self.config.float_tolerance,
            cancel: cancel.clone(),
        };

        debug!(run = %label, timeout_ms = timeout.as_millis() as u64, "run started");
        let spawned = thread::Builder::new()
            .name(format!("trance-run {}", label))
            .stack_size(RUN_STACK_SIZE)
            .spawn(move || task.run(events));
        let mut run = base_run(spec);
        if let Err(e) = spawned {
            run.status = RunStatus::Errored;
            run.failure = Some(Failure::Raised {
                message: format!("cannot start run thread: {}", e),
                line: None,
            });
            return run;
        }

        let sup = watchdog::supervise(&receiver, &cancel, timeout, self.config.teardown_grace);
        run.duration = sup.elapsed;

        match (&sup.outcome, sup.timed_out) {
            (_, true) => {
                run.status = RunStatus::TimedOut;
                run.failure = Some(Failure::Timeout {
                    limit_ms: timeout.as_millis() as u64,
                });
            }
            (Some(outcome), false) => {
                run.status = outcome.status;
                run.failure = outcome.failure.clone();
            }
            (None, false) => {
                run.status = RunStatus::Errored;
                run.failure = Some(Failure::Raised {
                    message: "run thread ended without reporting a result".to_string(),
                    line: None,
                });
            }
        }

        for failure in sup.teardown.iter().flatten() {
            run.warnings.push(Warning::Teardown(failure.clone()));
        }
        if sup.leaked {
            run.warnings.push(Warning::FixtureLeaked {
                run: label.clone(),
                grace_ms: self.config.teardown_grace.as_millis() as u64,
            });
        }

        if let Some(ctx) = &sup.ctx {
            run.assertions = ctx.assertions().results();
            run.output = ctx.output();
            run.metrics = ctx.metrics();
            let leftover = ctx.restore_mocks();
            if sup.timed_out && !leftover.is_empty() {
                run.warnings.push(Warning::MockLeak {
                    run: label.clone(),
                    names: leftover,
                });
            }
        }

        if let (Some(coverage), Some(before)) = (&coverage, &before) {
            run.coverage = coverage.delta(before);
        }

        debug!(run = %label, status = %run.status, "run finalized");
        run
    }

    /// Tear down every global fixture constructed during the suite and attach
    /// failures to the runs that used the fixture
    fn release_globals(&self, runs: &mut [TestRun], warnings: &mut Vec<Warning>) {
        let evaluator = self.evaluator.as_ref();
        let coverage = self.coverage_enabled().then(|| self.coverage.clone());
        let release = self.fixtures.release_globals(|global| {
            release_global(evaluator, &self.fixtures, global, coverage.clone())
        });

        let leaked = release.leaked.into_iter().map(|decl| {
            let warning = Warning::FixtureLeaked {
                run: format!("global fixture '{}'", decl.name),
                grace_ms: self.config.teardown_grace.as_millis() as u64,
            };
            (decl.id.clone(), warning)
        });
        let failed = release
            .failures
            .into_iter()
            .map(|(id, failure)| (id, Warning::Teardown(failure)));

        for (id, warning) in leaked.chain(failed) {
            for run in runs.iter_mut().filter(|r| r.globals.contains(&id)) {
                run.warnings.push(warning.clone());
            }
            warnings.push(warning);
        }
    }
}

/// Declared teardown block first, then callbacks registered during setup
fn release_global(
    evaluator: &dyn ScriptEvaluator,
    fixtures: &Arc<FixtureManager>,
    global: &GlobalFixture,
    coverage: Option<Arc<CoverageMap>>,
) -> Vec<TeardownFailure> {
    let name = global.decl.name.clone();
    let ctx = RunContext::new(
        format!("fixture {}", name),
        global.scope.clone(),
        fixtures.clone(),
    )
    .with_coverage(coverage);
    ctx.enter_teardown();

    let mut failures = Vec::new();
    if let Some(teardown) = &global.decl.teardown {
        if let Err(err) = guarded(|| evaluator.evaluate(teardown, &ctx)) {
            failures.push(TeardownFailure {
                scope: name.clone(),
                label: "teardown".to_string(),
                message: err.message(),
            });
        }
    }
    failures.extend(
        global
            .scope
            .release(|action| run_teardown(evaluator, &ctx, action)),
    );
    if !ctx.output().is_empty() {
        debug!(fixture = %name, output = %ctx.output(), "global teardown output");
    }
    failures
}

fn base_run(spec: &RunSpec) -> TestRun {
    let unit = &spec.unit;
    TestRun {
        key: RunKey {
            file: unit.file_index,
            ordinal: unit.ordinal,
            param: spec.param_index.unwrap_or(0),
        },
        file: unit.file.name.to_string(),
        group_path: unit.group_path.clone(),
        name: unit.name.clone(),
        kind: unit.kind.tag(),
        param_index: spec.param_index,
        status: RunStatus::Passed,
        failure: None,
        skip_reason: None,
        assertions: Vec::new(),
        duration: Duration::ZERO,
        output: String::new(),
        coverage: Vec::new(),
        metrics: MetricSet::new(),
        warnings: Vec::new(),
        globals: unit
            .fixtures
            .iter()
            .filter(|f| f.scope == ScopeKind::Global)
            .map(|f| f.id.clone())
            .collect(),
    }
}

fn skipped_run(spec: &RunSpec, reason: String) -> TestRun {
    let mut run = base_run(spec);
    run.status = RunStatus::Skipped;
    run.skip_reason = Some(reason);
    run.globals.clear();
    run
}
