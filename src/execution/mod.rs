//! Execution engine running the per-batch analysis over many batches in parallel.
//!
//! This module sits "above" [`crate::selection`], [`crate::category`] and [`crate::stats`] and
//! provides:
//!
//! - Parallel per-batch execution on a dedicated rayon pool
//! - Resource limits / throttling (bounded number of batches in flight)
//! - Failure isolation: a fatal error drops its batch, never the run
//! - Real-time metrics + observer hooks for monitoring

mod observer;
mod pipeline;
mod semaphore;

use std::sync::Arc;
use std::time::{Duration, Instant};

use rayon::prelude::*;
use rayon::ThreadPool;
use rayon::ThreadPoolBuilder;
use serde::{Deserialize, Serialize};

use crate::error::{AnalysisError, AnalysisResult};
use crate::stats::StatsAccumulator;
use crate::types::RecordBatch;

pub use observer::{
    ExecutionEvent, ExecutionMetrics, ExecutionMetricsSnapshot, ExecutionObserver, StdErrExecutionObserver,
    TracingExecutionObserver,
};
pub use pipeline::{AnalysisPipeline, BatchOutput};

use semaphore::Semaphore;

/// Configuration for the [`ExecutionEngine`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ExecutionOptions {
    /// Number of worker threads used by the engine.
    ///
    /// If `None`, uses the platform's available parallelism.
    pub num_threads: Option<usize>,
    /// Upper bound on concurrently processed batches, on top of `num_threads`.
    pub max_in_flight_batches: usize,
}

impl Default for ExecutionOptions {
    fn default() -> Self {
        let n = std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1);
        Self {
            num_threads: None,
            max_in_flight_batches: n.max(1),
        }
    }
}

/// Outcome of [`ExecutionEngine::run_batches`].
#[derive(Debug)]
pub struct RunReport {
    /// Sum of the statistics of every successful batch.
    pub stats: StatsAccumulator,
    /// One entry per input batch, in input order. Failures are [`AnalysisError::BatchFailed`].
    pub outcomes: Vec<AnalysisResult<BatchOutput>>,
    pub metrics: ExecutionMetricsSnapshot,
}

impl RunReport {
    pub fn failures(&self) -> impl Iterator<Item = &AnalysisError> {
        self.outcomes.iter().filter_map(|o| o.as_ref().err())
    }

    pub fn is_complete(&self) -> bool {
        self.outcomes.iter().all(Result::is_ok)
    }
}

/// A configurable execution engine for batched analysis runs.
pub struct ExecutionEngine {
    pool: ThreadPool,
    opts: ExecutionOptions,
    observer: Option<Arc<dyn ExecutionObserver>>,
    metrics: Arc<ExecutionMetrics>,
}

impl ExecutionEngine {
    /// Create a new engine with the given options.
    ///
    /// Fails with [`AnalysisError::InvalidConfig`] if `max_in_flight_batches == 0` or
    /// `num_threads == Some(0)`.
    pub fn new(opts: ExecutionOptions) -> AnalysisResult<Self> {
        if opts.max_in_flight_batches == 0 {
            return Err(AnalysisError::config("max_in_flight_batches must be > 0"));
        }
        if opts.num_threads == Some(0) {
            return Err(AnalysisError::config("num_threads must be > 0 when set"));
        }

        let n_threads = opts
            .num_threads
            .unwrap_or_else(|| std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1));

        let pool = ThreadPoolBuilder::new()
            .num_threads(n_threads)
            .build()
            .map_err(|e| AnalysisError::config(format!("failed to build thread pool: {e}")))?;

        Ok(Self {
            pool,
            opts,
            observer: None,
            metrics: Arc::new(ExecutionMetrics::new()),
        })
    }

    /// Attach an observer for execution events (metrics/logging).
    pub fn with_observer(mut self, observer: Arc<dyn ExecutionObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Get a handle to real-time execution metrics.
    pub fn metrics(&self) -> Arc<ExecutionMetrics> {
        Arc::clone(&self.metrics)
    }

    /// Run `pipeline` on every batch and merge the statistics of the successful ones.
    pub fn run_batches(&self, pipeline: &AnalysisPipeline, batches: &[RecordBatch]) -> RunReport {
        let (outcomes, metrics) = self.pool.install(|| {
            self.execute(
                batches,
                &|batch: &RecordBatch| pipeline.process(batch),
                &BatchOutput::selected_events,
            )
        });
        let stats: StatsAccumulator = outcomes
            .iter()
            .filter_map(|o| o.as_ref().ok())
            .map(|o| o.stats.clone())
            .sum();
        RunReport {
            stats,
            outcomes,
            metrics,
        }
    }

    /// Apply a batch transformation in parallel, e.g. a producer or a reduction.
    ///
    /// Output order follows input order; failures are isolated per batch.
    pub fn map_batches<F>(&self, batches: &[RecordBatch], transform: F) -> Vec<AnalysisResult<RecordBatch>>
    where
        F: Fn(&RecordBatch) -> AnalysisResult<RecordBatch> + Send + Sync,
    {
        self.pool
            .install(|| self.execute(batches, &transform, &RecordBatch::num_events))
            .0
    }

    fn execute<T: Send>(
        &self,
        batches: &[RecordBatch],
        work: &(dyn Fn(&RecordBatch) -> AnalysisResult<T> + Send + Sync),
        selected: &(dyn Fn(&T) -> usize + Send + Sync),
    ) -> (Vec<AnalysisResult<T>>, ExecutionMetricsSnapshot) {
        let start = Instant::now();
        self.metrics.begin_run();
        self.emit(ExecutionEvent::RunStarted {
            batches: batches.len(),
        });

        let sem = Semaphore::new(self.opts.max_in_flight_batches);

        let outcomes: Vec<AnalysisResult<T>> = batches
            .par_iter()
            .enumerate()
            .map(|(index, batch)| {
                let (waited, _permit) = sem.acquire();
                if waited > Duration::ZERO {
                    self.metrics.on_throttle_wait(waited);
                    self.emit(ExecutionEvent::ThrottleWaited { duration: waited });
                }

                self.metrics.on_batch_start(batch.num_events());
                self.emit(ExecutionEvent::BatchStarted {
                    batch: index,
                    events: batch.num_events(),
                });

                match work(batch) {
                    Ok(out) => {
                        let selected_events = selected(&out);
                        self.emit(ExecutionEvent::BatchFinished {
                            batch: index,
                            selected_events,
                        });
                        self.metrics.on_batch_end(Some(selected_events));
                        Ok(out)
                    }
                    Err(e) => {
                        self.emit(ExecutionEvent::BatchFailed {
                            batch: index,
                            error: e.to_string(),
                        });
                        self.metrics.on_batch_end(None);
                        Err(AnalysisError::BatchFailed {
                            batch: index,
                            source: Box::new(e),
                        })
                    }
                }
            })
            .collect();

        self.metrics.end_run(start.elapsed());
        let snapshot = self.metrics.snapshot();
        self.emit(ExecutionEvent::RunFinished {
            elapsed: start.elapsed(),
            metrics: snapshot.clone(),
        });

        (outcomes, snapshot)
    }

    fn emit(&self, event: ExecutionEvent) {
        if let Some(obs) = &self.observer {
            obs.on_event(&event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{AnalysisPipeline, ExecutionEngine, ExecutionOptions};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use crate::error::AnalysisError;
    use crate::execution::{ExecutionEvent, ExecutionObserver};
    use crate::selection::{FnSelector, SelectionPipeline, SelectionResult};
    use crate::shift::ShiftRegistry;
    use crate::types::{Column, RecordBatch};

    fn batch_of(events: &[f64]) -> RecordBatch {
        RecordBatch::from_columns([
            ("met", Column::scalar(events.iter().copied())),
            ("mc_weight", Column::scalar(vec![1.0; events.len()])),
            ("process_id", Column::scalar(vec![7_i64; events.len()])),
        ])
        .unwrap()
    }

    fn batches(n: usize) -> Vec<RecordBatch> {
        (0..n).map(|i| batch_of(&[i as f64, 100.0])).collect()
    }

    fn met_pipeline() -> AnalysisPipeline {
        let selection = SelectionPipeline::new("default").with_selector(FnSelector::new(
            "met",
            ["met"],
            |b: &RecordBatch| {
                let met = b.reader("met").f64s("met")?;
                Ok(SelectionResult::new().with_step("MET", met.iter().map(|v| v.map(|x| x > 50.0)).collect()))
            },
        ));
        AnalysisPipeline::new(selection, ShiftRegistry::new().nominal().clone())
    }

    #[test]
    fn invalid_options_are_rejected() {
        let err = ExecutionEngine::new(ExecutionOptions {
            num_threads: Some(2),
            max_in_flight_batches: 0,
        })
        .err()
        .unwrap();
        assert!(matches!(err, AnalysisError::InvalidConfig { .. }));
        assert!(ExecutionEngine::new(ExecutionOptions {
            num_threads: Some(0),
            max_in_flight_batches: 1,
        })
        .is_err());
    }

    #[test]
    fn map_batches_keeps_input_order_and_isolates_errors() {
        let input = batches(16);
        let engine = ExecutionEngine::new(ExecutionOptions {
            num_threads: Some(4),
            max_in_flight_batches: 3,
        })
        .unwrap();
        let metrics = engine.metrics();

        // keep the first event only; the seventh batch is rejected
        let out = engine.map_batches(&input, |batch| {
            let met = batch.reader("met").f64s("met")?;
            if met[0] == Some(6.0) {
                return Err(AnalysisError::config("met 6 is not allowed"));
            }
            Ok(batch.take_events(&[0]))
        });

        assert_eq!(out.len(), 16);
        for (i, outcome) in out.iter().enumerate() {
            match outcome {
                Ok(b) => assert_eq!(b.column("met"), Some(&Column::scalar([i as f64]))),
                Err(e) => {
                    assert_eq!(i, 6);
                    assert!(matches!(e, AnalysisError::BatchFailed { batch: 6, .. }));
                }
            }
        }
        let snap = metrics.snapshot();
        assert_eq!(snap.batches_failed, 1);
        assert!(snap.max_active_batches <= 3);
    }

    /// Tracks batches in flight from the event stream alone.
    #[derive(Default)]
    struct InFlightObserver {
        in_flight: AtomicUsize,
        peak: AtomicUsize,
        failed: AtomicUsize,
    }

    impl ExecutionObserver for InFlightObserver {
        fn on_event(&self, event: &ExecutionEvent) {
            match event {
                ExecutionEvent::BatchStarted { .. } => {
                    let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                    self.peak.fetch_max(now, Ordering::SeqCst);
                }
                ExecutionEvent::BatchFinished { .. } => {
                    let _ = self.in_flight.fetch_sub(1, Ordering::SeqCst);
                }
                ExecutionEvent::BatchFailed { .. } => {
                    let _ = self.in_flight.fetch_sub(1, Ordering::SeqCst);
                    let _ = self.failed.fetch_add(1, Ordering::SeqCst);
                }
                _ => {}
            }
        }
    }

    #[test]
    fn max_in_flight_batches_throttles_concurrency() {
        let input = batches(32);
        let observer = Arc::new(InFlightObserver::default());
        let engine = ExecutionEngine::new(ExecutionOptions {
            num_threads: Some(4),
            max_in_flight_batches: 1,
        })
        .unwrap()
        .with_observer(observer.clone());

        let report = engine.run_batches(&met_pipeline(), &input);

        assert_eq!(report.outcomes.len(), input.len());
        assert_eq!(observer.peak.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn run_merges_stats_and_reports_metrics() {
        let input = batches(20);
        let engine = ExecutionEngine::new(ExecutionOptions {
            num_threads: Some(4),
            max_in_flight_batches: 1,
        })
        .unwrap();
        let metrics = engine.metrics();

        let report = engine.run_batches(&met_pipeline(), &input);

        assert!(report.is_complete());
        assert_eq!(report.stats.total("num_events"), 40.0);
        // met = i passes only for i > 50, so just the 100.0 event of each batch is selected
        assert_eq!(report.stats.total("num_events_selected"), 20.0);
        assert_eq!(report.stats.get("num_events_selected", "process", 7), 20.0);

        let snap = metrics.snapshot();
        assert_eq!(snap, report.metrics);
        assert_eq!(snap.events_processed, 40);
        assert_eq!(snap.events_selected, 20);
        assert_eq!(snap.batches_started, 20);
        assert_eq!(snap.batches_finished, 20);
        assert_eq!(snap.batches_failed, 0);
        assert_eq!(snap.max_active_batches, 1);
        assert!(snap.elapsed.is_some());
    }

    #[test]
    fn failing_batch_is_isolated() {
        let mut input = batches(5);
        input[2] = input[2].without_columns(["met"]);
        let observer = Arc::new(InFlightObserver::default());
        let engine = ExecutionEngine::new(ExecutionOptions {
            num_threads: Some(2),
            max_in_flight_batches: 2,
        })
        .unwrap()
        .with_observer(observer.clone());

        let report = engine.run_batches(&met_pipeline(), &input);

        assert!(!report.is_complete());
        let failures: Vec<&AnalysisError> = report.failures().collect();
        assert_eq!(failures.len(), 1);
        assert!(matches!(
            failures[0],
            AnalysisError::BatchFailed { batch: 2, source } if matches!(**source, AnalysisError::MissingColumn { .. })
        ));
        assert_eq!(observer.failed.load(Ordering::SeqCst), 1);

        // only the four healthy batches contribute
        assert_eq!(report.stats.total("num_events"), 8.0);
        assert_eq!(report.metrics.batches_failed, 1);
        assert!(report.outcomes[3].as_ref().is_ok_and(|o| o.selected_events() == 1));
    }

    #[test]
    fn empty_run_yields_empty_stats() {
        let engine = ExecutionEngine::new(ExecutionOptions::default()).unwrap();
        let report = engine.run_batches(&met_pipeline(), &[]);
        assert!(report.outcomes.is_empty());
        assert!(report.stats.is_empty());
    }
}
