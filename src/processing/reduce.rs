//! Event and object reduction driven by a [`SelectionResult`].

use indexmap::IndexMap;

use crate::error::{AnalysisError, AnalysisResult};
use crate::selection::SelectionResult;
use crate::types::{split_path, Column, RecordBatch};

use super::filter_events;

const TRANSFORM: &str = "reduce_events";

/// Keep passing events and, for every `collection.subcollection` index list in `results`, only
/// the retained objects of `collection` in the listed order.
///
/// The retained objects are written as collection `subcollection`, so `Jet.Jet` replaces the
/// `Jet` collection in place while `Jet.BJet` adds a `BJet` collection next to it.
pub fn reduce_events(batch: &RecordBatch, results: &SelectionResult) -> AnalysisResult<RecordBatch> {
    let n = batch.num_events();
    results.validate_len(n)?;

    let mut columns: IndexMap<String, Column> = batch
        .column_names()
        .filter_map(|path| Some((path.to_string(), batch.column(path)?.clone())))
        .collect();

    for (collection, subs) in &results.objects {
        let fields: Vec<(&str, &Column)> = batch
            .collection_columns(collection)
            .filter_map(|path| Some((split_path(path).1, batch.column(path)?)))
            .collect();
        if fields.is_empty() {
            return Err(AnalysisError::missing(TRANSFORM, collection.as_str()));
        }
        for (sub, indices) in subs {
            for (field, column) in &fields {
                columns.insert(format!("{sub}.{field}"), column.take_objects(indices));
            }
        }
    }

    let reduced = RecordBatch::from_columns(columns)?;
    filter_events(&reduced, &results.event_mask(n))
}

/// Project `batch` onto `patterns`, in pattern order.
///
/// A pattern is either an exact column path or `collection.*` for every column of a collection.
/// Patterns matching nothing are ignored.
pub fn keep_columns<S: AsRef<str>>(batch: &RecordBatch, patterns: &[S]) -> AnalysisResult<RecordBatch> {
    let mut kept: IndexMap<String, Column> = IndexMap::new();
    for pattern in patterns {
        let pattern = pattern.as_ref();
        let matches: Vec<&str> = match pattern.strip_suffix(".*") {
            Some(collection) => batch
                .column_names()
                .filter(|p| split_path(p).0 == Some(collection))
                .collect(),
            None => batch.column_names().filter(|p| *p == pattern).collect(),
        };
        for path in matches {
            if let Some(column) = batch.column(path) {
                kept.entry(path.to_string()).or_insert_with(|| column.clone());
            }
        }
    }
    if kept.is_empty() {
        return Ok(RecordBatch::new(batch.num_events()));
    }
    RecordBatch::from_columns(kept)
}
