//! JSON event ingestion.
//!
//! Supported inputs:
//! - A JSON array of event objects: `[{"event":1}, {"event":2}]`
//! - Newline-delimited JSON (NDJSON): `{"event":1}\n{"event":2}\n`
//!
//! Schema field names are dot paths. When the first segment of a path names an array of objects
//! (`{"Jet": [{"pt": 50.0}, {"pt": 31.0}]}`), the field becomes a ragged column with one entry per
//! object; a `null` collection is read as an empty one. Otherwise the path walks nested objects
//! and yields a scalar column.

use std::fs;
use std::path::Path;

use crate::error::{AnalysisError, AnalysisResult};
use crate::types::{Column, DataType, RecordBatch, Schema, Value};

/// Ingest JSON events from a file into a [`RecordBatch`].
pub fn ingest_json_from_path(path: impl AsRef<Path>, schema: &Schema) -> AnalysisResult<RecordBatch> {
    let text = fs::read_to_string(path)?;
    ingest_json_from_str(&text, schema)
}

/// Ingest JSON events from an in-memory string into a [`RecordBatch`].
pub fn ingest_json_from_str(input: &str, schema: &Schema) -> AnalysisResult<RecordBatch> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(AnalysisError::SchemaMismatch {
            message: "json input is empty".to_string(),
        });
    }

    // First try parsing as a single JSON value (array or object).
    if let Ok(v) = serde_json::from_str::<serde_json::Value>(trimmed) {
        match v {
            serde_json::Value::Array(items) => ingest_json_values(&items, schema),
            serde_json::Value::Object(_) => ingest_json_values(std::slice::from_ref(&v), schema),
            _ => Err(AnalysisError::SchemaMismatch {
                message: "json must be an object, an array of objects, or NDJSON".to_string(),
            }),
        }
    } else {
        let mut values = Vec::new();
        for (i, line) in trimmed.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let v = serde_json::from_str::<serde_json::Value>(line).map_err(|e| AnalysisError::SchemaMismatch {
                message: format!("invalid ndjson at line {}: {}", i + 1, e),
            })?;
            values.push(v);
        }
        ingest_json_values(&values, schema)
    }
}

enum Cell {
    Scalar(Value),
    List(Vec<Value>),
}

fn ingest_json_values(values: &[serde_json::Value], schema: &Schema) -> AnalysisResult<RecordBatch> {
    let mut cells: Vec<Vec<Cell>> = schema
        .fields
        .iter()
        .map(|_| Vec::with_capacity(values.len()))
        .collect();

    for (idx0, v) in values.iter().enumerate() {
        let row = idx0 + 1;
        let obj = v.as_object().ok_or_else(|| AnalysisError::SchemaMismatch {
            message: format!("event {row} is not a json object"),
        })?;
        for (field, column) in schema.fields.iter().zip(cells.iter_mut()) {
            column.push(read_cell(row, obj, &field.name, &field.data_type)?);
        }
    }

    if schema.fields.is_empty() {
        return Ok(RecordBatch::new(values.len()));
    }
    let columns = schema
        .fields
        .iter()
        .zip(cells)
        .map(|(field, column)| Ok((field.name.clone(), into_column(&field.name, column)?)))
        .collect::<AnalysisResult<Vec<_>>>()?;
    RecordBatch::from_columns(columns)
}

fn read_cell(
    row: usize,
    obj: &serde_json::Map<String, serde_json::Value>,
    path: &str,
    data_type: &DataType,
) -> AnalysisResult<Cell> {
    let missing = || AnalysisError::SchemaMismatch {
        message: format!("event {row} missing required field '{path}'"),
    };
    let (head, rest) = match path.split_once('.') {
        Some((head, rest)) => (head, Some(rest)),
        None => (path, None),
    };
    let top = obj.get(head).ok_or_else(missing)?;

    match (top, rest) {
        (serde_json::Value::Array(objects), Some(rest)) => {
            let mut out = Vec::with_capacity(objects.len());
            for item in objects {
                let item = item.as_object().ok_or_else(|| AnalysisError::SchemaMismatch {
                    message: format!("event {row}: collection '{head}' must contain objects"),
                })?;
                let jv = get_by_dot_path(item, rest).ok_or_else(missing)?;
                out.push(convert_json_value(row, path, data_type, jv)?);
            }
            Ok(Cell::List(out))
        }
        (serde_json::Value::Object(map), Some(rest)) => {
            let jv = get_by_dot_path(map, rest).ok_or_else(missing)?;
            Ok(Cell::Scalar(convert_json_value(row, path, data_type, jv)?))
        }
        (serde_json::Value::Null, _) => Ok(Cell::Scalar(Value::Null)),
        (jv, None) => Ok(Cell::Scalar(convert_json_value(row, path, data_type, jv)?)),
        (_, Some(_)) => Err(missing()),
    }
}

/// A column is ragged as soon as one event holds a collection; null events then become empty.
fn into_column(path: &str, cells: Vec<Cell>) -> AnalysisResult<Column> {
    if !cells.iter().any(|c| matches!(c, Cell::List(_))) {
        return Ok(Column::Scalar(
            cells
                .into_iter()
                .map(|c| match c {
                    Cell::Scalar(v) => v,
                    Cell::List(_) => Value::Null,
                })
                .collect(),
        ));
    }
    cells
        .into_iter()
        .enumerate()
        .map(|(i, c)| match c {
            Cell::List(values) => Ok(values),
            Cell::Scalar(Value::Null) => Ok(Vec::new()),
            Cell::Scalar(_) => Err(AnalysisError::SchemaMismatch {
                message: format!("event {}: '{path}' is a collection field in other events", i + 1),
            }),
        })
        .collect::<AnalysisResult<Vec<_>>>()
        .map(Column::Ragged)
}

fn get_by_dot_path<'a>(
    root: &'a serde_json::Map<String, serde_json::Value>,
    path: &str,
) -> Option<&'a serde_json::Value> {
    let mut segments = path.split('.');
    let mut current = root.get(segments.next()?)?;
    for segment in segments {
        match current {
            serde_json::Value::Object(map) => current = map.get(segment)?,
            _ => return None,
        }
    }
    Some(current)
}

fn convert_json_value(
    row: usize,
    column: &str,
    data_type: &DataType,
    v: &serde_json::Value,
) -> AnalysisResult<Value> {
    if v.is_null() {
        return Ok(Value::Null);
    }
    let parse_error = |message: &str| AnalysisError::ParseError {
        row,
        column: column.to_string(),
        raw: v.to_string(),
        message: message.to_string(),
    };

    match data_type {
        DataType::Utf8 => v
            .as_str()
            .map(|s| Value::Utf8(s.to_string()))
            .ok_or_else(|| parse_error("expected string")),
        DataType::Bool => v.as_bool().map(Value::Bool).ok_or_else(|| parse_error("expected bool")),
        DataType::Int64 => {
            if let Some(n) = v.as_i64() {
                Ok(Value::Int64(n))
            } else if let Some(n) = v.as_u64() {
                i64::try_from(n)
                    .map(Value::Int64)
                    .map_err(|_| parse_error("u64 out of range for i64"))
            } else {
                Err(parse_error("expected integer number"))
            }
        }
        DataType::Float64 => v.as_f64().map(Value::Float64).ok_or_else(|| parse_error("expected number")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Field;

    fn schema() -> Schema {
        Schema::new(vec![
            Field::new("event", DataType::Int64),
            Field::new("Jet.pt", DataType::Float64),
            Field::new("HLT.IsoMu27", DataType::Bool),
        ])
    }

    #[test]
    fn collections_become_ragged_columns() {
        let input = r#"[
            {"event": 1, "Jet": [{"pt": 50.5}, {"pt": 31}], "HLT": {"IsoMu27": true}},
            {"event": 2, "Jet": [], "HLT": {"IsoMu27": false}},
            {"event": 3, "Jet": null, "HLT": {"IsoMu27": null}}
        ]"#;
        let batch = ingest_json_from_str(input, &schema()).unwrap();
        assert_eq!(batch.num_events(), 3);
        assert_eq!(
            batch.column("Jet.pt"),
            Some(&Column::ragged(vec![vec![50.5, 31.0], vec![], vec![]]))
        );
        assert_eq!(
            batch.column("HLT.IsoMu27"),
            Some(&Column::scalar([Some(true), Some(false), None]))
        );
    }

    #[test]
    fn ndjson_is_accepted() {
        let input = "{\"event\": 1, \"Jet\": [{\"pt\": 40.0}], \"HLT\": {\"IsoMu27\": true}}\n\
                     {\"event\": 2, \"Jet\": [], \"HLT\": {\"IsoMu27\": true}}\n";
        let batch = ingest_json_from_str(input, &schema()).unwrap();
        assert_eq!(batch.column("event"), Some(&Column::scalar([1_i64, 2])));
    }

    #[test]
    fn missing_fields_and_bad_types_are_reported() {
        let err = ingest_json_from_str(r#"[{"event": 1, "Jet": [{"eta": 0.1}], "HLT": {}}]"#, &schema())
            .unwrap_err();
        assert!(err.to_string().contains("missing required field 'Jet.pt'"));

        let err = ingest_json_from_str(
            r#"[{"event": "one", "Jet": [], "HLT": {"IsoMu27": true}}]"#,
            &schema(),
        )
        .unwrap_err();
        assert!(matches!(err, AnalysisError::ParseError { row: 1, ref column, .. } if column == "event"));

        assert!(ingest_json_from_str("   ", &schema()).is_err());
    }
}
