//! Event filtering for [`crate::types::RecordBatch`].

use crate::error::{AnalysisError, AnalysisResult};
use crate::types::RecordBatch;

/// Returns a new batch containing only the events whose mask entry is `true`, in input order.
pub fn filter_events(batch: &RecordBatch, mask: &[bool]) -> AnalysisResult<RecordBatch> {
    if mask.len() != batch.num_events() {
        return Err(AnalysisError::LengthMismatch {
            column: "event_mask".to_string(),
            expected: batch.num_events(),
            actual: mask.len(),
        });
    }
    let keep: Vec<usize> = mask
        .iter()
        .enumerate()
        .filter(|(_, pass)| **pass)
        .map(|(i, _)| i)
        .collect();
    Ok(batch.take_events(&keep))
}

#[cfg(test)]
mod tests {
    use super::filter_events;
    use crate::error::AnalysisError;
    use crate::types::{Column, RecordBatch};

    fn sample_batch() -> RecordBatch {
        RecordBatch::from_columns([
            ("event", Column::scalar([1_i64, 2, 3])),
            ("Muon.pt", Column::ragged(vec![vec![25.0], vec![], vec![40.0, 31.0]])),
        ])
        .unwrap()
    }

    #[test]
    fn keeps_passing_events_in_order() {
        let batch = sample_batch();
        let out = filter_events(&batch, &[false, true, true]).unwrap();

        assert_eq!(out.num_events(), 2);
        assert_eq!(out.column("event"), Some(&Column::scalar([2_i64, 3])));
        assert_eq!(
            out.column("Muon.pt"),
            Some(&Column::ragged(vec![vec![], vec![40.0, 31.0]]))
        );
        // Original unchanged
        assert_eq!(batch.num_events(), 3);
    }

    #[test]
    fn can_return_empty_batch() {
        let out = filter_events(&sample_batch(), &[false; 3]).unwrap();
        assert_eq!(out.num_events(), 0);
        assert!(out.has_column("Muon.pt"));
    }

    #[test]
    fn rejects_misaligned_mask() {
        let err = filter_events(&sample_batch(), &[true]).unwrap_err();
        assert!(matches!(err, AnalysisError::LengthMismatch { expected: 3, actual: 1, .. }));
    }
}
