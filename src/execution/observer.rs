use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use tracing::{debug, info, warn};

/// Progress of a run, as seen by an [`ExecutionObserver`].
#[derive(Debug, Clone)]
pub enum ExecutionEvent {
    RunStarted { batches: usize },
    /// A worker waited this long for a free in-flight slot.
    ThrottleWaited { duration: Duration },
    BatchStarted { batch: usize, events: usize },
    BatchFinished { batch: usize, selected_events: usize },
    /// The batch was dropped from the run; other batches are unaffected.
    BatchFailed { batch: usize, error: String },
    RunFinished {
        elapsed: Duration,
        metrics: ExecutionMetricsSnapshot,
    },
}

/// Receives [`ExecutionEvent`]s from worker threads, possibly concurrently.
pub trait ExecutionObserver: Send + Sync {
    fn on_event(&self, event: &ExecutionEvent);
}

/// Prints every event to stderr.
#[derive(Debug, Default)]
pub struct StdErrExecutionObserver;

impl ExecutionObserver for StdErrExecutionObserver {
    fn on_event(&self, event: &ExecutionEvent) {
        match event {
            ExecutionEvent::RunFinished { metrics, .. } => eprintln!("[run] finished {metrics}"),
            other => eprintln!("[run] {other:?}"),
        }
    }
}

/// Forwards execution events to `tracing`: run boundaries at info, per-batch progress at
/// debug, failures at warn.
#[derive(Debug, Default)]
pub struct TracingExecutionObserver;

impl ExecutionObserver for TracingExecutionObserver {
    fn on_event(&self, event: &ExecutionEvent) {
        match event {
            ExecutionEvent::RunStarted { batches } => info!(batches, "run started"),
            ExecutionEvent::ThrottleWaited { duration } => debug!(?duration, "throttled"),
            ExecutionEvent::BatchStarted { batch, events } => debug!(batch, events, "batch started"),
            ExecutionEvent::BatchFinished { batch, selected_events } => {
                debug!(batch, selected_events, "batch finished")
            }
            ExecutionEvent::BatchFailed { batch, error } => warn!(batch, %error, "batch failed"),
            ExecutionEvent::RunFinished { elapsed, metrics } => {
                info!(?elapsed, %metrics, "run finished")
            }
        }
    }
}

/// Live counters of the current (or last) run.
///
/// Updated by the workers while the run is in progress; [`Self::snapshot`] can be taken at any
/// time from another thread. Counters are reset when a new run begins.
#[derive(Debug, Default)]
pub struct ExecutionMetrics {
    run_id: AtomicU64,
    elapsed_ns: AtomicU64,
    events_processed: AtomicU64,
    events_selected: AtomicU64,
    batches_started: AtomicU64,
    batches_finished: AtomicU64,
    batches_failed: AtomicU64,
    throttle_wait_ns: AtomicU64,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
}

impl ExecutionMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn begin_run(&self) {
        self.run_id.fetch_add(1, Ordering::Relaxed);
        for counter in [
            &self.elapsed_ns,
            &self.events_processed,
            &self.events_selected,
            &self.batches_started,
            &self.batches_finished,
            &self.batches_failed,
            &self.throttle_wait_ns,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
        self.in_flight.store(0, Ordering::Relaxed);
        self.peak_in_flight.store(0, Ordering::Relaxed);
    }

    pub fn end_run(&self, elapsed: Duration) {
        self.elapsed_ns.store(nanos(elapsed), Ordering::Relaxed);
    }

    pub fn on_batch_start(&self, events: usize) {
        self.batches_started.fetch_add(1, Ordering::Relaxed);
        self.events_processed.fetch_add(events as u64, Ordering::Relaxed);
        let now = self.in_flight.fetch_add(1, Ordering::AcqRel) + 1;
        self.peak_in_flight.fetch_max(now, Ordering::AcqRel);
    }

    /// `None` marks a failed batch.
    pub fn on_batch_end(&self, selected_events: Option<usize>) {
        match selected_events {
            Some(selected) => {
                self.batches_finished.fetch_add(1, Ordering::Relaxed);
                self.events_selected.fetch_add(selected as u64, Ordering::Relaxed);
            }
            None => {
                self.batches_failed.fetch_add(1, Ordering::Relaxed);
            }
        }
        self.in_flight.fetch_sub(1, Ordering::AcqRel);
    }

    pub fn on_throttle_wait(&self, waited: Duration) {
        self.throttle_wait_ns.fetch_add(nanos(waited), Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> ExecutionMetricsSnapshot {
        let elapsed_ns = self.elapsed_ns.load(Ordering::Relaxed);
        ExecutionMetricsSnapshot {
            run_id: self.run_id.load(Ordering::Relaxed),
            elapsed: (elapsed_ns > 0).then(|| Duration::from_nanos(elapsed_ns)),
            events_processed: self.events_processed.load(Ordering::Relaxed),
            events_selected: self.events_selected.load(Ordering::Relaxed),
            batches_started: self.batches_started.load(Ordering::Relaxed),
            batches_finished: self.batches_finished.load(Ordering::Relaxed),
            batches_failed: self.batches_failed.load(Ordering::Relaxed),
            throttle_wait: Duration::from_nanos(self.throttle_wait_ns.load(Ordering::Relaxed)),
            max_active_batches: self.peak_in_flight.load(Ordering::Acquire),
        }
    }
}

fn nanos(d: Duration) -> u64 {
    u64::try_from(d.as_nanos()).unwrap_or(u64::MAX)
}

/// Point-in-time copy of [`ExecutionMetrics`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionMetricsSnapshot {
    pub run_id: u64,
    /// `None` while the run is still in progress.
    pub elapsed: Option<Duration>,
    pub events_processed: u64,
    pub events_selected: u64,
    pub batches_started: u64,
    pub batches_finished: u64,
    pub batches_failed: u64,
    pub throttle_wait: Duration,
    pub max_active_batches: usize,
}

impl ExecutionMetricsSnapshot {
    /// Fraction of processed events that passed the selection, 0 for an empty run.
    pub fn selection_efficiency(&self) -> f64 {
        if self.events_processed == 0 {
            0.0
        } else {
            self.events_selected as f64 / self.events_processed as f64
        }
    }

    /// Events processed per second of wall time, if the run has finished.
    pub fn events_per_second(&self) -> Option<f64> {
        let secs = self.elapsed?.as_secs_f64();
        (secs > 0.0).then(|| self.events_processed as f64 / secs)
    }
}

impl fmt::Display for ExecutionMetricsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "run={} selected={}/{} batches={}/{} failed={} peak_in_flight={} throttled={:?}",
            self.run_id,
            self.events_selected,
            self.events_processed,
            self.batches_finished,
            self.batches_started,
            self.batches_failed,
            self.max_active_batches,
            self.throttle_wait,
        )?;
        if let Some(elapsed) = self.elapsed {
            write!(f, " elapsed={elapsed:?}")?;
        }
        Ok(())
    }
}
