use thiserror::Error;

/// Convenience result type used across the crate.
pub type AnalysisResult<T> = Result<T, AnalysisError>;

/// Which keyed map of a [`crate::selection::SelectionResult`] (or registry) a collision occurred in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollisionKind {
    /// Duplicate selection step name.
    Step,
    /// Duplicate `collection.subcollection` object index list.
    Object,
    /// Duplicate shift name or id.
    Shift,
    /// Duplicate transform name in a registry.
    Transform,
}

impl std::fmt::Display for CollisionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Step => "step",
            Self::Object => "object",
            Self::Shift => "shift",
            Self::Transform => "transform",
        };
        f.write_str(s)
    }
}

/// Error type returned by selection, categorization, shift resolution and accumulation.
///
/// Every variant except the I/O wrappers is fatal for the batch (or configuration) it was raised
/// for. Null mask entries and idempotent re-declarations are recovered silently and never surface
/// here.
#[derive(Debug, Error)]
pub enum AnalysisError {
    /// A transform requested a column that is neither present nor produced upstream.
    #[error("transform '{transform}' requires missing column '{column}'")]
    MissingColumn { transform: String, column: String },

    /// Two merged results (or two declarations) used the same key.
    #[error("key collision: {kind} '{key}' is already defined")]
    KeyCollision { kind: CollisionKind, key: String },

    /// Two shifts map the same source column to different targets.
    #[error(
        "conflicting alias for column '{source_column}' in shift '{shift}': already mapped to '{existing}', refusing '{replacement}'"
    )]
    AliasConflict {
        shift: String,
        source_column: String,
        existing: String,
        replacement: String,
    },

    /// A category (possibly a derived combination) reuses an id owned by another category.
    #[error("category '{name}' has id {id} which is already used by '{existing}'")]
    CategoryIdCollision {
        id: u64,
        existing: String,
        name: String,
    },

    /// A category name was declared twice with different attributes.
    #[error("category '{name}' is already declared with different attributes")]
    DuplicateCategory { name: String },

    #[error("unknown category '{0}'")]
    UnknownCategory(String),

    #[error("unknown categorizer '{0}'")]
    UnknownCategorizer(String),

    #[error("unknown shift '{0}'")]
    UnknownShift(String),

    #[error("unknown transform '{0}'")]
    UnknownTransform(String),

    /// A column (or mask/index list) is not aligned to the batch length.
    #[error("column '{column}' has length {actual}, expected {expected}")]
    LengthMismatch {
        column: String,
        expected: usize,
        actual: usize,
    },

    /// A column exists but has the wrong shape or value type.
    #[error("column '{column}' is not a {expected} column")]
    TypeMismatch { column: String, expected: String },

    /// Invalid declaration or configuration input.
    #[error("invalid configuration: {message}")]
    InvalidConfig { message: String },

    /// Input records do not have the shape the schema describes.
    #[error("schema mismatch: {message}")]
    SchemaMismatch { message: String },

    /// A single input value could not be converted to the schema type.
    #[error("parse error at event {row} column '{column}': {message} (raw='{raw}')")]
    ParseError {
        row: usize,
        column: String,
        raw: String,
        message: String,
    },

    /// A fatal error raised while processing one batch of a multi-batch run.
    #[error("batch {batch} failed: {source}")]
    BatchFailed {
        batch: usize,
        #[source]
        source: Box<AnalysisError>,
    },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),
}

impl AnalysisError {
    pub(crate) fn missing(transform: impl Into<String>, column: impl Into<String>) -> Self {
        Self::MissingColumn {
            transform: transform.into(),
            column: column.into(),
        }
    }

    pub(crate) fn config(message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            message: message.into(),
        }
    }

    /// Returns `true` if this error is scoped to a single batch (as opposed to configuration).
    pub fn is_batch_scoped(&self) -> bool {
        match self {
            Self::MissingColumn { .. }
            | Self::LengthMismatch { .. }
            | Self::TypeMismatch { .. }
            | Self::BatchFailed { .. } => true,
            Self::KeyCollision { kind, .. } => matches!(kind, CollisionKind::Step | CollisionKind::Object),
            _ => false,
        }
    }
}
