//! Core data model: typed values, columns and the immutable columnar [`RecordBatch`].
//!
//! Columns are addressed by dotted path. A path `collection.field` whose column is
//! [`Column::Ragged`] belongs to the sub-collection `collection`; all ragged columns of one
//! collection share the same per-event object counts.

use std::sync::Arc;

use indexmap::IndexMap;

use crate::error::{AnalysisError, AnalysisResult};

/// Logical data type for a schema field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DataType {
    /// 64-bit signed integer.
    Int64,
    /// 64-bit floating point number.
    Float64,
    /// Boolean.
    Bool,
    /// UTF-8 string.
    Utf8,
}

/// A single named, typed field in a [`Schema`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Field {
    /// Column path (`field` or `collection.field`).
    pub name: String,
    /// Field data type.
    pub data_type: DataType,
}

impl Field {
    /// Create a new field.
    pub fn new(name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            name: name.into(),
            data_type,
        }
    }
}

/// A list of fields describing the expected shape of incoming events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Schema {
    /// Ordered list of fields.
    pub fields: Vec<Field>,
}

impl Schema {
    /// Create a new schema from fields.
    pub fn new(fields: Vec<Field>) -> Self {
        Self { fields }
    }

    /// Iterate field names in order.
    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|f| f.name.as_str())
    }

    /// Returns the index of a field by name, if present.
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.name == name)
    }
}

/// A single typed value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// Missing/undefined value.
    Null,
    /// 64-bit signed integer.
    Int64(i64),
    /// 64-bit float.
    Float64(f64),
    /// Boolean.
    Bool(bool),
    /// UTF-8 string.
    Utf8(String),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Numeric view; integers are widened, everything else is `None`.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Float64(v) => Some(*v),
            Self::Int64(v) => Some(*v as f64),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int64(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(v) => Some(*v),
            _ => None,
        }
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::Float64(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Int64(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Self::Null, Into::into)
    }
}

/// One column of a [`RecordBatch`]: either one value per event or one list of values per event.
#[derive(Debug, Clone, PartialEq)]
pub enum Column {
    /// One value per event.
    Scalar(Vec<Value>),
    /// A variable-length list of values per event (one entry per object of a sub-collection).
    Ragged(Vec<Vec<Value>>),
}

impl Column {
    /// Build a scalar column from anything convertible into [`Value`].
    pub fn scalar<T: Into<Value>>(values: impl IntoIterator<Item = T>) -> Self {
        Self::Scalar(values.into_iter().map(Into::into).collect())
    }

    /// Build a ragged column from nested iterables.
    pub fn ragged<T, I>(values: impl IntoIterator<Item = I>) -> Self
    where
        T: Into<Value>,
        I: IntoIterator<Item = T>,
    {
        Self::Ragged(
            values
                .into_iter()
                .map(|event| event.into_iter().map(Into::into).collect())
                .collect(),
        )
    }

    /// Number of events covered by this column.
    pub fn len(&self) -> usize {
        match self {
            Self::Scalar(v) => v.len(),
            Self::Ragged(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_ragged(&self) -> bool {
        matches!(self, Self::Ragged(_))
    }

    /// Per-event object counts for a ragged column, `None` for scalar columns.
    pub fn object_counts(&self) -> Option<Vec<usize>> {
        match self {
            Self::Scalar(_) => None,
            Self::Ragged(v) => Some(v.iter().map(Vec::len).collect()),
        }
    }

    /// Keep only the events at `indices` (in that order).
    pub fn take_events(&self, indices: &[usize]) -> Self {
        match self {
            Self::Scalar(v) => Self::Scalar(indices.iter().map(|&i| v[i].clone()).collect()),
            Self::Ragged(v) => Self::Ragged(indices.iter().map(|&i| v[i].clone()).collect()),
        }
    }

    /// For a ragged column, keep only the objects listed per event (in the listed order).
    ///
    /// Scalar columns are returned unchanged. Out-of-range object indices become [`Value::Null`].
    pub fn take_objects(&self, per_event: &[Vec<usize>]) -> Self {
        match self {
            Self::Scalar(_) => self.clone(),
            Self::Ragged(v) => Self::Ragged(
                v.iter()
                    .zip(per_event)
                    .map(|(objects, keep)| {
                        keep.iter()
                            .map(|&j| objects.get(j).cloned().unwrap_or(Value::Null))
                            .collect()
                    })
                    .collect(),
            ),
        }
    }

    fn append(&mut self, other: &Column) -> bool {
        match (self, other) {
            (Self::Scalar(a), Self::Scalar(b)) => {
                a.extend(b.iter().cloned());
                true
            }
            (Self::Ragged(a), Self::Ragged(b)) => {
                a.extend(b.iter().cloned());
                true
            }
            _ => false,
        }
    }
}

/// Split a dotted column path into `(collection, field)`.
///
/// Only the first dot separates the collection; `"cutflow.n_ele"` yields
/// `(Some("cutflow"), "n_ele")` and `"event"` yields `(None, "event")`.
pub fn split_path(path: &str) -> (Option<&str>, &str) {
    match path.split_once('.') {
        Some((collection, field)) => (Some(collection), field),
        None => (None, path),
    }
}

/// Immutable columnar batch of `N` events.
///
/// Columns are shared via [`Arc`], so deriving a new batch with [`RecordBatch::with_column`] is
/// cheap and never mutates the source batch. Batches can therefore be processed in parallel
/// without shared mutable state.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RecordBatch {
    num_events: usize,
    columns: IndexMap<String, Arc<Column>>,
}

impl RecordBatch {
    /// Create an empty batch of `num_events` events without any columns.
    pub fn new(num_events: usize) -> Self {
        Self {
            num_events,
            columns: IndexMap::new(),
        }
    }

    /// Build a batch from `(path, column)` pairs, validating alignment.
    ///
    /// The event count is taken from the first column (zero if there is none).
    pub fn from_columns<S: Into<String>>(
        columns: impl IntoIterator<Item = (S, Column)>,
    ) -> AnalysisResult<Self> {
        let mut iter = columns.into_iter().peekable();
        let num_events = iter.peek().map_or(0, |(_, c)| c.len());
        let mut batch = Self::new(num_events);
        for (path, column) in iter {
            batch.insert(path.into(), column)?;
        }
        Ok(batch)
    }

    /// Number of events in the batch.
    pub fn num_events(&self) -> usize {
        self.num_events
    }

    pub fn has_column(&self, path: &str) -> bool {
        self.columns.contains_key(path)
    }

    pub fn column(&self, path: &str) -> Option<&Column> {
        self.columns.get(path).map(Arc::as_ref)
    }

    /// Column paths in insertion order.
    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.keys().map(String::as_str)
    }

    /// Ragged column paths belonging to `collection`.
    pub fn collection_columns<'a>(&'a self, collection: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.columns
            .iter()
            .filter(move |(path, col)| col.is_ragged() && split_path(path).0 == Some(collection))
            .map(|(path, _)| path.as_str())
    }

    /// Return a new batch with `column` added at `path` (replacing an existing column).
    pub fn with_column(&self, path: impl Into<String>, column: Column) -> AnalysisResult<Self> {
        let mut out = self.clone();
        out.insert(path.into(), column)?;
        Ok(out)
    }

    /// Return a new batch without the given columns. Unknown paths are ignored.
    pub fn without_columns<'a>(&self, paths: impl IntoIterator<Item = &'a str>) -> Self {
        let mut out = self.clone();
        for path in paths {
            out.columns.shift_remove(path);
        }
        out
    }

    /// Fail fast with [`AnalysisError::MissingColumn`] for the first absent path.
    pub fn require_columns<'a>(
        &self,
        transform: &str,
        paths: impl IntoIterator<Item = &'a str>,
    ) -> AnalysisResult<()> {
        for path in paths {
            if !self.has_column(path) {
                return Err(AnalysisError::missing(transform, path));
            }
        }
        Ok(())
    }

    /// Column accessor whose errors name `transform`.
    pub fn reader<'a>(&'a self, transform: &'a str) -> ColumnReader<'a> {
        ColumnReader {
            batch: self,
            transform,
        }
    }

    /// Keep only the events at `indices` (in that order).
    pub fn take_events(&self, indices: &[usize]) -> Self {
        Self {
            num_events: indices.len(),
            columns: self
                .columns
                .iter()
                .map(|(k, v)| (k.clone(), Arc::new(v.take_events(indices))))
                .collect(),
        }
    }

    /// Concatenate batches with identical column sets (first batch defines column order).
    pub fn concat(batches: &[RecordBatch]) -> AnalysisResult<Self> {
        let Some(first) = batches.first() else {
            return Ok(Self::default());
        };
        let mut columns: IndexMap<String, Column> = first
            .columns
            .iter()
            .map(|(k, v)| (k.clone(), v.as_ref().clone()))
            .collect();
        let mut num_events = first.num_events;

        for batch in &batches[1..] {
            if batch.columns.len() != columns.len() {
                return Err(AnalysisError::config(format!(
                    "cannot concatenate batches with {} and {} columns",
                    columns.len(),
                    batch.columns.len()
                )));
            }
            for (path, column) in columns.iter_mut() {
                let other = batch
                    .column(path)
                    .ok_or_else(|| AnalysisError::missing("concat", path.as_str()))?;
                if !column.append(other) {
                    return Err(AnalysisError::TypeMismatch {
                        column: path.clone(),
                        expected: if column.is_ragged() { "ragged" } else { "scalar" }.to_string(),
                    });
                }
            }
            num_events += batch.num_events;
        }

        Ok(Self {
            num_events,
            columns: columns.into_iter().map(|(k, v)| (k, Arc::new(v))).collect(),
        })
    }

    fn insert(&mut self, path: String, column: Column) -> AnalysisResult<()> {
        if column.len() != self.num_events {
            return Err(AnalysisError::LengthMismatch {
                column: path,
                expected: self.num_events,
                actual: column.len(),
            });
        }
        if let (Some(counts), (Some(collection), _)) = (column.object_counts(), split_path(&path)) {
            let sibling = self
                .collection_columns(collection)
                .find(|p| *p != path)
                .and_then(|p| self.column(p))
                .and_then(Column::object_counts);
            if let Some(expected) = sibling {
                if let Some(event) = (0..counts.len()).find(|&i| counts[i] != expected[i]) {
                    return Err(AnalysisError::LengthMismatch {
                        column: format!("{path}[{event}]"),
                        expected: expected[event],
                        actual: counts[event],
                    });
                }
            }
        }
        self.columns.insert(path, Arc::new(column));
        Ok(())
    }
}

/// Typed read access to a [`RecordBatch`] on behalf of a named transform.
#[derive(Debug, Clone, Copy)]
pub struct ColumnReader<'a> {
    batch: &'a RecordBatch,
    transform: &'a str,
}

impl<'a> ColumnReader<'a> {
    pub fn batch(&self) -> &'a RecordBatch {
        self.batch
    }

    fn get(&self, path: &str) -> AnalysisResult<&'a Column> {
        self.batch
            .column(path)
            .ok_or_else(|| AnalysisError::missing(self.transform, path))
    }

    fn mismatch(path: &str, expected: &str) -> AnalysisError {
        AnalysisError::TypeMismatch {
            column: path.to_string(),
            expected: expected.to_string(),
        }
    }

    pub fn scalar(&self, path: &str) -> AnalysisResult<&'a [Value]> {
        match self.get(path)? {
            Column::Scalar(v) => Ok(v),
            Column::Ragged(_) => Err(Self::mismatch(path, "scalar")),
        }
    }

    pub fn ragged(&self, path: &str) -> AnalysisResult<&'a [Vec<Value>]> {
        match self.get(path)? {
            Column::Ragged(v) => Ok(v),
            Column::Scalar(_) => Err(Self::mismatch(path, "ragged")),
        }
    }

    /// Numeric scalar column; nulls become `None`.
    pub fn f64s(&self, path: &str) -> AnalysisResult<Vec<Option<f64>>> {
        self.scalar(path)?
            .iter()
            .map(|v| numeric(path, v))
            .collect()
    }

    pub fn i64s(&self, path: &str) -> AnalysisResult<Vec<Option<i64>>> {
        self.scalar(path)?
            .iter()
            .map(|v| match v {
                Value::Null => Ok(None),
                Value::Int64(x) => Ok(Some(*x)),
                _ => Err(Self::mismatch(path, "int64")),
            })
            .collect()
    }

    pub fn bools(&self, path: &str) -> AnalysisResult<Vec<Option<bool>>> {
        self.scalar(path)?.iter().map(|v| boolean(path, v)).collect()
    }

    pub fn ragged_f64s(&self, path: &str) -> AnalysisResult<Vec<Vec<Option<f64>>>> {
        self.ragged(path)?
            .iter()
            .map(|event| event.iter().map(|v| numeric(path, v)).collect::<AnalysisResult<Vec<_>>>())
            .collect()
    }

    pub fn ragged_i64s(&self, path: &str) -> AnalysisResult<Vec<Vec<Option<i64>>>> {
        self.ragged(path)?
            .iter()
            .map(|event| {
                event
                    .iter()
                    .map(|v| match v {
                        Value::Null => Ok(None),
                        Value::Int64(x) => Ok(Some(*x)),
                        _ => Err(Self::mismatch(path, "int64")),
                    })
                    .collect::<AnalysisResult<Vec<_>>>()
            })
            .collect()
    }

    pub fn ragged_bools(&self, path: &str) -> AnalysisResult<Vec<Vec<Option<bool>>>> {
        self.ragged(path)?
            .iter()
            .map(|event| event.iter().map(|v| boolean(path, v)).collect::<AnalysisResult<Vec<_>>>())
            .collect()
    }

    /// Per-event object counts of `collection`, taken from any of its ragged columns.
    pub fn collection_len(&self, collection: &str) -> AnalysisResult<Vec<usize>> {
        self.batch
            .collection_columns(collection)
            .next()
            .and_then(|p| self.batch.column(p))
            .and_then(Column::object_counts)
            .ok_or_else(|| AnalysisError::missing(self.transform, collection))
    }
}

fn numeric(path: &str, v: &Value) -> AnalysisResult<Option<f64>> {
    match v {
        Value::Null => Ok(None),
        other => other
            .as_f64()
            .map(Some)
            .ok_or_else(|| ColumnReader::mismatch(path, "numeric")),
    }
}

fn boolean(path: &str, v: &Value) -> AnalysisResult<Option<bool>> {
    match v {
        Value::Null => Ok(None),
        Value::Bool(b) => Ok(Some(*b)),
        _ => Err(ColumnReader::mismatch(path, "bool")),
    }
}
