use std::cmp::Ordering;

use crate::error::{AnalysisError, AnalysisResult};

/// Direction used by [`masked_sorted_indices`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortOrder {
    Ascending,
    /// Highest key first, so the first retained object is the leading one.
    #[default]
    Descending,
}

/// Per event, the indices of objects whose mask entry is `true`, ordered by `sort_key`.
///
/// Null mask entries count as `false`. Null (or NaN) sort keys are placed last regardless of
/// order, and equal keys keep ascending index order, so the result does not depend on how the
/// collection was ordered on input beyond the keys themselves.
///
/// `mask` and `sort_key` must cover the same events and, per event, the same objects;
/// otherwise this is a [`AnalysisError::LengthMismatch`] on `sort_key`.
pub fn masked_sorted_indices(
    mask: &[Vec<Option<bool>>],
    sort_key: &[Vec<Option<f64>>],
    order: SortOrder,
) -> AnalysisResult<Vec<Vec<usize>>> {
    if mask.len() != sort_key.len() {
        return Err(misaligned(mask.len(), sort_key.len()));
    }
    mask.iter()
        .zip(sort_key)
        .map(|(event_mask, keys)| {
            if event_mask.len() != keys.len() {
                return Err(misaligned(event_mask.len(), keys.len()));
            }
            let mut retained: Vec<usize> = event_mask
                .iter()
                .enumerate()
                .filter(|(_, m)| m.unwrap_or(false))
                .map(|(i, _)| i)
                .collect();
            retained.sort_by(|&a, &b| compare(key_at(keys, a), key_at(keys, b), order).then(a.cmp(&b)));
            Ok(retained)
        })
        .collect()
}

fn misaligned(expected: usize, actual: usize) -> AnalysisError {
    AnalysisError::LengthMismatch {
        column: "sort_key".to_string(),
        expected,
        actual,
    }
}

fn key_at(keys: &[Option<f64>], i: usize) -> Option<f64> {
    keys.get(i).copied().flatten().filter(|v| !v.is_nan())
}

fn compare(a: Option<f64>, b: Option<f64>, order: SortOrder) -> Ordering {
    match (a, b) {
        (Some(x), Some(y)) => {
            let ord = x.total_cmp(&y);
            match order {
                SortOrder::Ascending => ord,
                SortOrder::Descending => ord.reverse(),
            }
        }
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keeps_true_entries_sorted_descending_by_default() {
        let mask = vec![vec![Some(true), Some(false), Some(true), Some(true)]];
        let pt = vec![vec![Some(25.0), Some(90.0), Some(60.0), Some(40.0)]];
        assert_eq!(
            masked_sorted_indices(&mask, &pt, SortOrder::default()).unwrap(),
            vec![vec![2, 3, 0]]
        );
        assert_eq!(
            masked_sorted_indices(&mask, &pt, SortOrder::Ascending).unwrap(),
            vec![vec![0, 3, 2]]
        );
    }

    #[test]
    fn null_mask_entries_are_dropped_and_null_keys_sort_last() {
        let mask = vec![vec![Some(true), None, Some(true), Some(true)]];
        let pt = vec![vec![None, Some(99.0), Some(10.0), Some(f64::NAN)]];
        assert_eq!(
            masked_sorted_indices(&mask, &pt, SortOrder::Descending).unwrap(),
            vec![vec![2, 0, 3]]
        );
        assert_eq!(
            masked_sorted_indices(&mask, &pt, SortOrder::Ascending).unwrap(),
            vec![vec![2, 0, 3]]
        );
    }

    #[test]
    fn result_is_independent_of_input_ordering() {
        let pt = [50.0, 20.0, 80.0, 35.0];
        let pass = [true, false, true, true];
        let forward = masked_sorted_indices(
            &[pass.iter().map(|&b| Some(b)).collect::<Vec<_>>()],
            &[pt.iter().map(|&v| Some(v)).collect::<Vec<_>>()],
            SortOrder::Descending,
        )
        .unwrap();
        let resolved: Vec<f64> = forward[0].iter().map(|&i| pt[i]).collect();

        let perm = [3usize, 0, 2, 1];
        let shuffled = masked_sorted_indices(
            &[perm.iter().map(|&i| Some(pass[i])).collect::<Vec<_>>()],
            &[perm.iter().map(|&i| Some(pt[i])).collect::<Vec<_>>()],
            SortOrder::Descending,
        )
        .unwrap();
        let resolved_shuffled: Vec<f64> = shuffled[0].iter().map(|&i| pt[perm[i]]).collect();

        assert_eq!(resolved, vec![80.0, 50.0, 35.0]);
        assert_eq!(resolved, resolved_shuffled);
    }

    #[test]
    fn empty_events_yield_empty_lists() {
        let mask: Vec<Vec<Option<bool>>> = vec![vec![], vec![]];
        let keys: Vec<Vec<Option<f64>>> = vec![vec![], vec![]];
        let out = masked_sorted_indices(&mask, &keys, SortOrder::Descending).unwrap();
        assert_eq!(out, vec![Vec::<usize>::new(), vec![]]);
    }

    #[test]
    fn misaligned_keys_are_an_error_not_a_truncation() {
        let mask = vec![vec![Some(true)], vec![Some(true), Some(true)]];
        let one_event = vec![vec![Some(30.0)]];
        assert!(matches!(
            masked_sorted_indices(&mask, &one_event, SortOrder::Descending),
            Err(AnalysisError::LengthMismatch { expected: 2, actual: 1, .. })
        ));

        let short_event = vec![vec![Some(30.0)], vec![Some(20.0)]];
        assert!(matches!(
            masked_sorted_indices(&mask, &short_event, SortOrder::Descending),
            Err(AnalysisError::LengthMismatch { expected: 2, actual: 1, .. })
        ));
    }
}
