//! Benchmark and load-test bodies
//!
//! Both run inside a single run: fixtures are set up once and the body is
//! evaluated repeatedly against the same context.

use crate::context::{RunContext, ScriptError, ScriptEvaluator};
use crate::source::BodyRef;
use parking_lot::Mutex;
use rayon::prelude::*;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Instant;
use tracing::debug;

/// `warmup` untimed iterations, then `iterations` timed ones
pub(crate) fn run_bench(
    evaluator: &dyn ScriptEvaluator,
    body: &BodyRef,
    ctx: &RunContext,
    iterations: u32,
    warmup: u32,
) -> Result<(), ScriptError> {
    for _ in 0..warmup {
        ctx.check_cancelled()?;
        evaluator.evaluate(body, ctx)?;
    }

    let mut samples = Vec::with_capacity(iterations as usize);
    for _ in 0..iterations {
        ctx.check_cancelled()?;
        let start = Instant::now();
        evaluator.evaluate(body, ctx)?;
        samples.push(start.elapsed().as_secs_f64() * 1000.0);
    }

    let stats = Stats::from_samples(&mut samples);
    debug!(run = %ctx.label(), mean_ms = stats.mean, "bench finished");
    ctx.record_metric("iterations", f64::from(iterations));
    ctx.record_metric("mean_ms", stats.mean);
    ctx.record_metric("min_ms", stats.min);
    ctx.record_metric("max_ms", stats.max);
    ctx.record_metric("median_ms", stats.median);
    ctx.record_metric("stddev_ms", stats.stddev);
    Ok(())
}

/// Spread `iterations` evaluations over `concurrency` threads.
///
/// The first failure stops the remaining iterations and becomes the run's
/// result.
pub(crate) fn run_load(
    evaluator: &dyn ScriptEvaluator,
    body: &BodyRef,
    ctx: &RunContext,
    iterations: u32,
    concurrency: u32,
) -> Result<(), ScriptError> {
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(concurrency as usize)
        .thread_name(|i| format!("trance-load-{}", i))
        .stack_size(super::RUN_STACK_SIZE)
        .build()
        .map_err(|e| ScriptError::raised(format!("cannot start load workers: {}", e)))?;

    let stop = AtomicBool::new(false);
    let errors = AtomicUsize::new(0);
    let first_error: Mutex<Option<ScriptError>> = Mutex::new(None);
    let latencies: Mutex<Vec<f64>> = Mutex::new(Vec::with_capacity(iterations as usize));

    let start = Instant::now();
    pool.install(|| {
        (0..iterations).into_par_iter().for_each(|_| {
            if stop.load(Ordering::SeqCst) || ctx.is_cancelled() {
                return;
            }
            let began = Instant::now();
            match evaluator.evaluate(body, ctx) {
                Ok(()) => latencies.lock().push(began.elapsed().as_secs_f64() * 1000.0),
                Err(err) => {
                    errors.fetch_add(1, Ordering::SeqCst);
                    stop.store(true, Ordering::SeqCst);
                    first_error.lock().get_or_insert(err);
                }
            }
        });
    });
    let total_ms = start.elapsed().as_secs_f64() * 1000.0;

    let mut latencies = latencies.into_inner();
    let completed = latencies.len();
    let stats = Stats::from_samples(&mut latencies);
    let throughput = if total_ms > 0.0 {
        completed as f64 / (total_ms / 1000.0)
    } else {
        0.0
    };

    ctx.record_metric("iterations", completed as f64);
    ctx.record_metric("concurrency", f64::from(concurrency));
    ctx.record_metric("total_ms", total_ms);
    ctx.record_metric("throughput_per_sec", throughput);
    ctx.record_metric("mean_ms", stats.mean);
    ctx.record_metric("p95_ms", stats.p95);
    ctx.record_metric("errors", errors.load(Ordering::SeqCst) as f64);
    debug!(run = %ctx.label(), completed, total_ms, "load test finished");

    if let Some(err) = first_error.into_inner() {
        return Err(err);
    }
    ctx.check_cancelled()
}

/// Summary statistics in milliseconds
#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub(crate) struct Stats {
    pub mean: f64,
    pub min: f64,
    pub max: f64,
    pub median: f64,
    pub stddev: f64,
    pub p95: f64,
}

impl Stats {
    /// Sorts `samples` in place
    pub fn from_samples(samples: &mut [f64]) -> Self {
        if samples.is_empty() {
            return Self::default();
        }
        samples.sort_by(f64::total_cmp);
        let n = samples.len() as f64;
        let mean = samples.iter().sum::<f64>() / n;
        let variance = samples.iter().map(|s| (s - mean).powi(2)).sum::<f64>() / n;
        let len = samples.len();
        let median = if len % 2 == 0 {
            (samples[len / 2 - 1] + samples[len / 2]) / 2.0
        } else {
            samples[len / 2]
        };
        Self {
            mean,
            min: samples[0],
            max: samples[len - 1],
            median,
            stddev: variance.sqrt(),
            p95: percentile(samples, 0.95),
        }
    }
}

/// Nearest-rank percentile of sorted samples
fn percentile(sorted: &[f64], p: f64) -> f64 {
    let rank = (p * sorted.len() as f64).ceil() as usize;
    sorted[rank.clamp(1, sorted.len()) - 1]
}
