use std::fs;
use std::sync::{Arc, Mutex};

use columnar_analysis::ingestion::{
    ingest_batches_from_path, ingest_from_path, CompositeObserver, FileObserver, IngestionContext,
    IngestionObserver, IngestionOptions, IngestionSeverity, IngestionStats,
};
use columnar_analysis::types::{DataType, Field, Schema};
use columnar_analysis::AnalysisError;

#[derive(Default)]
struct RecordingObserver {
    successes: Mutex<Vec<IngestionStats>>,
    failures: Mutex<Vec<IngestionSeverity>>,
    alerts: Mutex<Vec<IngestionSeverity>>,
}

impl IngestionObserver for RecordingObserver {
    fn on_success(&self, _ctx: &IngestionContext, stats: IngestionStats) {
        self.successes.lock().unwrap().push(stats);
    }

    fn on_failure(&self, _ctx: &IngestionContext, severity: IngestionSeverity, _error: &AnalysisError) {
        self.failures.lock().unwrap().push(severity);
    }

    fn on_alert(&self, _ctx: &IngestionContext, severity: IngestionSeverity, _error: &AnalysisError) {
        self.alerts.lock().unwrap().push(severity);
    }
}

fn schema_event_only() -> Schema {
    Schema::new(vec![Field::new("event", DataType::Int64)])
}

fn schema_missing_col() -> Schema {
    Schema::new(vec![Field::new("Tau.pt", DataType::Float64)])
}

#[test]
fn observer_receives_failure_and_alert_on_critical_io_error() {
    let obs = Arc::new(RecordingObserver::default());
    let opts = IngestionOptions {
        observer: Some(obs.clone()),
        alert_at_or_above: IngestionSeverity::Critical,
        ..Default::default()
    };

    // Missing file -> Io error -> Critical
    let _ = ingest_from_path("tests/fixtures/does_not_exist.json", &schema_event_only(), &opts).unwrap_err();

    assert_eq!(*obs.failures.lock().unwrap(), vec![IngestionSeverity::Critical]);
    assert_eq!(*obs.alerts.lock().unwrap(), vec![IngestionSeverity::Critical]);
}

#[test]
fn observer_receives_failure_without_alert_for_non_critical_error() {
    let obs = Arc::new(RecordingObserver::default());
    let opts = IngestionOptions {
        observer: Some(obs.clone()),
        alert_at_or_above: IngestionSeverity::Critical,
        ..Default::default()
    };

    // Schema mismatch -> Error severity (not Critical) -> should not alert
    let _ = ingest_from_path("tests/fixtures/events.json", &schema_missing_col(), &opts).unwrap_err();

    assert_eq!(*obs.failures.lock().unwrap(), vec![IngestionSeverity::Error]);
    assert!(obs.alerts.lock().unwrap().is_empty());
}

#[test]
fn observer_receives_batch_stats_on_success() {
    let obs = Arc::new(RecordingObserver::default());
    let opts = IngestionOptions {
        observer: Some(obs.clone()),
        batch_size: Some(3),
        ..Default::default()
    };

    let batches = ingest_batches_from_path("tests/fixtures/events.json", &schema_event_only(), &opts).unwrap();

    assert_eq!(batches.len(), 2);
    assert_eq!(
        *obs.successes.lock().unwrap(),
        vec![IngestionStats { events: 5, batches: 2 }]
    );
    assert!(obs.failures.lock().unwrap().is_empty());
}

#[test]
fn composite_observer_fans_out_to_file_log() {
    let log = std::env::temp_dir().join(format!("columnar_analysis_ingest_{}.log", std::process::id()));
    let _ = fs::remove_file(&log);

    let recording = Arc::new(RecordingObserver::default());
    let observers: Vec<Arc<dyn IngestionObserver>> = vec![recording.clone(), Arc::new(FileObserver::new(&log))];
    let composite = CompositeObserver::new(observers);
    let opts = IngestionOptions {
        observer: Some(Arc::new(composite)),
        alert_at_or_above: IngestionSeverity::Error,
        ..Default::default()
    };

    let _ = ingest_from_path("tests/fixtures/events.json", &schema_event_only(), &opts).unwrap();
    let _ = ingest_from_path("tests/fixtures/events.json", &schema_missing_col(), &opts).unwrap_err();

    assert_eq!(recording.successes.lock().unwrap().len(), 1);
    assert_eq!(*recording.alerts.lock().unwrap(), vec![IngestionSeverity::Error]);

    let text = fs::read_to_string(&log).unwrap();
    let lines: Vec<&str> = text.lines().collect();
    // ok line, then the failure and its alert
    assert_eq!(lines.len(), 3);
    assert!(lines[0].contains(" ok path=tests/fixtures/events.json events=5 batches=1"));
    assert!(lines[1].contains(" fail severity=Error "));
    assert!(lines[2].contains(" ALERT severity=Error "));
    let _ = fs::remove_file(&log);
}
