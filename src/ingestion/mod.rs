//! Event ingestion.
//!
//! Most callers should use [`ingest_from_path`] or [`ingest_batches_from_path`] (from
//! [`unified`]), which read an event file into [`crate::types::RecordBatch`]es and optionally
//! report success/failure/alerts to an [`IngestionObserver`]. The in-memory parser lives in
//! [`json`].

pub mod json;
pub mod observability;
pub mod unified;

pub use json::{ingest_json_from_path, ingest_json_from_str};
pub use observability::{
    CompositeObserver, EventFileFormat, FileObserver, IngestionContext, IngestionObserver, IngestionSeverity, IngestionStats,
    StdErrObserver, TracingObserver,
};
pub use unified::{ingest_batches_from_path, ingest_from_path, severity_for_error, split_batch, IngestionOptions};
