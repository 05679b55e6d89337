use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::AnalysisError;

/// How bad an ingestion failure is; ordered so that thresholds can be compared.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum IngestionSeverity {
    Info,
    Warning,
    /// The event file was read but its content is unusable.
    Error,
    /// The event file could not be read at all.
    Critical,
}

/// Layout of an event file, derived from its extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventFileFormat {
    /// A JSON array of events (or a single event object).
    Json,
    /// One event object per line.
    Ndjson,
}

impl EventFileFormat {
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "json" => Some(Self::Json),
            "ndjson" | "jsonl" => Some(Self::Ndjson),
            _ => None,
        }
    }
}

impl fmt::Display for EventFileFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Json => "json",
            Self::Ndjson => "ndjson",
        })
    }
}

/// The event file an outcome refers to.
#[derive(Debug, Clone)]
pub struct IngestionContext {
    pub path: PathBuf,
    /// `None` when the extension is not a known event file layout.
    pub format: Option<EventFileFormat>,
}

/// Reported on success.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IngestionStats {
    pub events: usize,
    /// Number of batches handed to the caller (1 unless a batch size was requested).
    pub batches: usize,
}

/// Receives the outcome of every path-based ingestion.
///
/// All methods default to no-ops, so an observer only implements what it cares about.
pub trait IngestionObserver: Send + Sync {
    fn on_success(&self, _ctx: &IngestionContext, _stats: IngestionStats) {}

    fn on_failure(&self, _ctx: &IngestionContext, _severity: IngestionSeverity, _error: &AnalysisError) {}

    /// Invoked after [`Self::on_failure`] when the severity reaches the configured alert
    /// threshold. Forwards to `on_failure` unless overridden.
    fn on_alert(&self, ctx: &IngestionContext, severity: IngestionSeverity, error: &AnalysisError) {
        self.on_failure(ctx, severity, error)
    }
}

/// One ingestion outcome rendered as a single `key=value` log line.
enum LogLine<'a> {
    Ok(&'a IngestionContext, IngestionStats),
    Fail(&'a IngestionContext, IngestionSeverity, &'a AnalysisError),
    Alert(&'a IngestionContext, IngestionSeverity, &'a AnalysisError),
}

impl fmt::Display for LogLine<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (tag, ctx, severity, error) = match self {
            Self::Ok(ctx, stats) => {
                write!(
                    f,
                    "ok path={} events={} batches={}",
                    ctx.path.display(),
                    stats.events,
                    stats.batches
                )?;
                if let Some(format) = ctx.format {
                    write!(f, " format={format}")?;
                }
                return Ok(());
            }
            Self::Fail(ctx, severity, error) => ("fail", ctx, severity, error),
            Self::Alert(ctx, severity, error) => ("ALERT", ctx, severity, error),
        };
        write!(f, "{tag} severity={severity:?} path={} err={error}", ctx.path.display())
    }
}

/// Forwards every outcome to each inner observer in order.
#[derive(Default)]
pub struct CompositeObserver {
    observers: Vec<Arc<dyn IngestionObserver>>,
}

impl CompositeObserver {
    pub fn new(observers: Vec<Arc<dyn IngestionObserver>>) -> Self {
        Self { observers }
    }

    pub fn with(mut self, observer: Arc<dyn IngestionObserver>) -> Self {
        self.observers.push(observer);
        self
    }

    pub fn len(&self) -> usize {
        self.observers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.observers.is_empty()
    }
}

impl fmt::Debug for CompositeObserver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompositeObserver")
            .field("observers", &self.observers.len())
            .finish()
    }
}

impl IngestionObserver for CompositeObserver {
    fn on_success(&self, ctx: &IngestionContext, stats: IngestionStats) {
        self.observers.iter().for_each(|o| o.on_success(ctx, stats));
    }

    fn on_failure(&self, ctx: &IngestionContext, severity: IngestionSeverity, error: &AnalysisError) {
        self.observers.iter().for_each(|o| o.on_failure(ctx, severity, error));
    }

    fn on_alert(&self, ctx: &IngestionContext, severity: IngestionSeverity, error: &AnalysisError) {
        self.observers.iter().for_each(|o| o.on_alert(ctx, severity, error));
    }
}

/// Prints one `[ingest] ...` line per outcome to stderr.
#[derive(Debug, Default)]
pub struct StdErrObserver;

impl IngestionObserver for StdErrObserver {
    fn on_success(&self, ctx: &IngestionContext, stats: IngestionStats) {
        eprintln!("[ingest] {}", LogLine::Ok(ctx, stats));
    }

    fn on_failure(&self, ctx: &IngestionContext, severity: IngestionSeverity, error: &AnalysisError) {
        eprintln!("[ingest] {}", LogLine::Fail(ctx, severity, error));
    }

    fn on_alert(&self, ctx: &IngestionContext, severity: IngestionSeverity, error: &AnalysisError) {
        eprintln!("[ingest] {}", LogLine::Alert(ctx, severity, error));
    }
}

/// Emits outcomes as `tracing` events: success at info, failures at warn, alerts at error.
#[derive(Debug, Default)]
pub struct TracingObserver;

impl IngestionObserver for TracingObserver {
    fn on_success(&self, ctx: &IngestionContext, stats: IngestionStats) {
        tracing::info!(
            path = %ctx.path.display(),
            format = ?ctx.format,
            events = stats.events,
            batches = stats.batches,
            "ingested events"
        );
    }

    fn on_failure(&self, ctx: &IngestionContext, severity: IngestionSeverity, error: &AnalysisError) {
        tracing::warn!(path = %ctx.path.display(), ?severity, %error, "ingestion failed");
    }

    fn on_alert(&self, ctx: &IngestionContext, severity: IngestionSeverity, error: &AnalysisError) {
        tracing::error!(path = %ctx.path.display(), ?severity, %error, "ingestion alert");
    }
}

/// Appends `<unix seconds> <log line>` records to a file.
///
/// The file is opened on the first record and kept open. Logging is best-effort: open and
/// write failures are dropped so that they never mask the ingestion outcome itself.
#[derive(Debug)]
pub struct FileObserver {
    path: PathBuf,
    file: Mutex<Option<File>>,
}

impl FileObserver {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            file: Mutex::new(None),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn record(&self, line: LogLine<'_>) {
        let mut slot = self.file.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if slot.is_none() {
            *slot = OpenOptions::new().create(true).append(true).open(&self.path).ok();
        }
        if let Some(file) = slot.as_mut() {
            let ts = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_secs())
                .unwrap_or_default();
            let _ = writeln!(file, "{ts} {line}");
        }
    }
}

impl IngestionObserver for FileObserver {
    fn on_success(&self, ctx: &IngestionContext, stats: IngestionStats) {
        self.record(LogLine::Ok(ctx, stats));
    }

    fn on_failure(&self, ctx: &IngestionContext, severity: IngestionSeverity, error: &AnalysisError) {
        self.record(LogLine::Fail(ctx, severity, error));
    }

    fn on_alert(&self, ctx: &IngestionContext, severity: IngestionSeverity, error: &AnalysisError) {
        self.record(LogLine::Alert(ctx, severity, error));
    }
}
