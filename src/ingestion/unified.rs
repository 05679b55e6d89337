//! Path-based ingestion entrypoint.
//!
//! [`ingest_from_path`] reads a `.json` / `.ndjson` / `.jsonl` event file into one [`RecordBatch`];
//! [`ingest_batches_from_path`] additionally splits it into batches of
//! [`IngestionOptions::batch_size`] events for the execution engine. If an
//! [`IngestionObserver`] is configured, success, failure and alerts are reported to it.

use std::fmt;
use std::path::Path;
use std::sync::Arc;

use crate::error::{AnalysisError, AnalysisResult};
use crate::types::{RecordBatch, Schema};

use super::json;
use super::observability::{EventFileFormat, IngestionContext, IngestionObserver, IngestionSeverity, IngestionStats};

/// Options controlling path-based ingestion.
#[derive(Clone)]
pub struct IngestionOptions {
    /// Optional observer for logging/alerts.
    pub observer: Option<Arc<dyn IngestionObserver>>,
    /// Severity threshold at which `on_alert` is invoked.
    pub alert_at_or_above: IngestionSeverity,
    /// Events per batch for [`ingest_batches_from_path`]; `None` keeps a single batch.
    pub batch_size: Option<usize>,
}

impl fmt::Debug for IngestionOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IngestionOptions")
            .field("observer_set", &self.observer.is_some())
            .field("alert_at_or_above", &self.alert_at_or_above)
            .field("batch_size", &self.batch_size)
            .finish()
    }
}

impl Default for IngestionOptions {
    fn default() -> Self {
        Self {
            observer: None,
            alert_at_or_above: IngestionSeverity::Critical,
            batch_size: None,
        }
    }
}

/// Ingest an event file into a single batch.
///
/// ```no_run
/// use std::sync::Arc;
///
/// use columnar_analysis::ingestion::{ingest_from_path, IngestionOptions, StdErrObserver};
/// use columnar_analysis::types::{DataType, Field, Schema};
///
/// # fn main() -> Result<(), columnar_analysis::AnalysisError> {
/// let schema = Schema::new(vec![
///     Field::new("event", DataType::Int64),
///     Field::new("Electron.pt", DataType::Float64),
/// ]);
/// let opts = IngestionOptions {
///     observer: Some(Arc::new(StdErrObserver)),
///     ..Default::default()
/// };
/// let batch = ingest_from_path("events.json", &schema, &opts)?;
/// println!("events={}", batch.num_events());
/// # Ok(())
/// # }
/// ```
pub fn ingest_from_path(
    path: impl AsRef<Path>,
    schema: &Schema,
    options: &IngestionOptions,
) -> AnalysisResult<RecordBatch> {
    let path = path.as_ref();
    let result = read_path(path, schema);
    report(path, options, &result, |batch| IngestionStats {
        events: batch.num_events(),
        batches: 1,
    });
    result
}

/// Ingest an event file and split it into consecutive batches of `options.batch_size` events.
pub fn ingest_batches_from_path(
    path: impl AsRef<Path>,
    schema: &Schema,
    options: &IngestionOptions,
) -> AnalysisResult<Vec<RecordBatch>> {
    let path = path.as_ref();
    let result = read_path(path, schema).and_then(|batch| split_batch(&batch, options.batch_size));
    report(path, options, &result, |batches| IngestionStats {
        events: batches.iter().map(RecordBatch::num_events).sum(),
        batches: batches.len(),
    });
    result
}

/// Split a batch into consecutive chunks of at most `batch_size` events.
pub fn split_batch(batch: &RecordBatch, batch_size: Option<usize>) -> AnalysisResult<Vec<RecordBatch>> {
    let n = batch.num_events();
    let size = match batch_size {
        Some(0) => return Err(AnalysisError::config("batch_size must be > 0")),
        Some(size) => size,
        None => return Ok(vec![batch.clone()]),
    };
    if n == 0 {
        return Ok(vec![batch.clone()]);
    }
    Ok((0..n)
        .step_by(size)
        .map(|start| {
            let indices: Vec<usize> = (start..(start + size).min(n)).collect();
            batch.take_events(&indices)
        })
        .collect())
}

fn read_path(path: &Path, schema: &Schema) -> AnalysisResult<RecordBatch> {
    match EventFileFormat::from_path(path) {
        Some(_) => json::ingest_json_from_path(path, schema),
        None => Err(AnalysisError::SchemaMismatch {
            message: format!("unsupported event file '{}' (expected .json or .ndjson)", path.display()),
        }),
    }
}

fn report<T>(
    path: &Path,
    options: &IngestionOptions,
    result: &AnalysisResult<T>,
    stats: impl FnOnce(&T) -> IngestionStats,
) {
    let Some(obs) = options.observer.as_ref() else {
        return;
    };
    let ctx = IngestionContext {
        path: path.to_path_buf(),
        format: EventFileFormat::from_path(path),
    };
    match result {
        Ok(value) => obs.on_success(&ctx, stats(value)),
        Err(e) => {
            let sev = severity_for_error(e);
            obs.on_failure(&ctx, sev, e);
            if sev >= options.alert_at_or_above {
                obs.on_alert(&ctx, sev, e);
            }
        }
    }
}

/// I/O failures are critical; anything wrong with the content is an error.
pub fn severity_for_error(e: &AnalysisError) -> IngestionSeverity {
    match e {
        AnalysisError::Io(_) => IngestionSeverity::Critical,
        AnalysisError::Csv(err) if matches!(err.kind(), ::csv::ErrorKind::Io(_)) => IngestionSeverity::Critical,
        AnalysisError::BatchFailed { source, .. } => severity_for_error(source),
        _ => IngestionSeverity::Error,
    }
}
