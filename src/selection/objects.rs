//! Configurable lepton and jet selectors.

use std::collections::BTreeSet;

use crate::error::AnalysisResult;
use crate::types::{Column, RecordBatch};

use super::{fill_none, masked_sorted_indices, Mask, SelectionResult, Selector, SortOrder};

/// Kinematic thresholds applied per object.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ObjectCuts {
    /// Strict lower bound on `pt`.
    pub min_pt: f64,
    /// Strict upper bound on `|eta|`.
    pub max_abs_eta: f64,
}

impl ObjectCuts {
    pub fn new(min_pt: f64, max_abs_eta: f64) -> Self {
        Self { min_pt, max_abs_eta }
    }

    fn object_mask(&self, pt: &[Vec<Option<f64>>], eta: &[Vec<Option<f64>>]) -> Vec<Mask> {
        pt.iter()
            .zip(eta)
            .map(|(pts, etas)| {
                pts.iter()
                    .zip(etas)
                    .map(|(p, e)| Some((*p)? > self.min_pt && (*e)?.abs() < self.max_abs_eta))
                    .collect()
            })
            .collect()
    }
}

fn and_masks(a: Vec<Mask>, b: &[Vec<Option<bool>>]) -> Vec<Mask> {
    a.into_iter()
        .zip(b)
        .map(|(xs, ys)| {
            xs.into_iter()
                .zip(ys)
                .map(|(x, y)| match (x, *y) {
                    (Some(false), _) | (_, Some(false)) => Some(false),
                    (Some(true), Some(true)) => Some(true),
                    _ => None,
                })
                .collect()
        })
        .collect()
}

fn count_true(mask: &[Mask]) -> Vec<i64> {
    mask.iter()
        .map(|m| m.iter().filter(|v| **v == Some(true)).count() as i64)
        .collect()
}

fn mask_column(mask: &[Mask]) -> Column {
    Column::ragged(mask.iter().map(|m| fill_none(m)))
}

/// Dilepton selection: the event passes when it holds exactly `required` electrons or exactly
/// `required` muons passing their cuts.
///
/// Step `Lepton`; objects `Electron.Electron` and `Muon.Muon` sorted by descending `pt`;
/// columns `cutflow.n_ele` and `cutflow.n_muo`.
#[derive(Debug, Clone, PartialEq)]
pub struct LeptonSelector {
    pub electron: ObjectCuts,
    pub muon: ObjectCuts,
    /// Additionally require `Muon.tightId`.
    pub muon_tight_id: bool,
    pub required: i64,
}

impl Default for LeptonSelector {
    fn default() -> Self {
        Self {
            electron: ObjectCuts::new(20.0, 2.4),
            muon: ObjectCuts::new(20.0, 2.4),
            muon_tight_id: true,
            required: 2,
        }
    }
}

impl Selector for LeptonSelector {
    fn name(&self) -> &str {
        "lepton_selection"
    }

    fn uses(&self) -> BTreeSet<String> {
        let mut uses: BTreeSet<String> = ["Electron.pt", "Electron.eta", "Muon.pt", "Muon.eta"]
            .into_iter()
            .map(String::from)
            .collect();
        if self.muon_tight_id {
            uses.insert("Muon.tightId".to_string());
        }
        uses
    }

    fn produces(&self) -> BTreeSet<String> {
        ["cutflow.n_ele", "cutflow.n_muo"]
            .into_iter()
            .map(String::from)
            .collect()
    }

    fn select(&self, batch: &RecordBatch) -> AnalysisResult<(RecordBatch, SelectionResult)> {
        let r = batch.reader(self.name());
        let ele_pt = r.ragged_f64s("Electron.pt")?;
        let muo_pt = r.ragged_f64s("Muon.pt")?;

        let ele_mask = self.electron.object_mask(&ele_pt, &r.ragged_f64s("Electron.eta")?);
        let mut muo_mask = self.muon.object_mask(&muo_pt, &r.ragged_f64s("Muon.eta")?);
        if self.muon_tight_id {
            muo_mask = and_masks(muo_mask, &r.ragged_bools("Muon.tightId")?);
        }

        let n_ele = count_true(&ele_mask);
        let n_muo = count_true(&muo_mask);
        let step: Mask = n_ele
            .iter()
            .zip(&n_muo)
            .map(|(e, m)| Some(*e == self.required || *m == self.required))
            .collect();

        let ele_indices = masked_sorted_indices(&ele_mask, &ele_pt, SortOrder::Descending)?;
        let muo_indices = masked_sorted_indices(&muo_mask, &muo_pt, SortOrder::Descending)?;

        let out = batch
            .with_column("cutflow.n_ele", Column::scalar(n_ele.iter().copied()))?
            .with_column("cutflow.n_muo", Column::scalar(n_muo.iter().copied()))?;

        let result = SelectionResult::new()
            .with_step("Lepton", step)
            .with_aux("ele_mask", mask_column(&ele_mask))
            .with_aux("n_electrons", Column::scalar(ele_indices.iter().map(|l| l.len() as i64)))
            .with_aux("muo_mask", mask_column(&muo_mask))
            .with_aux("n_muons", Column::scalar(muo_indices.iter().map(|l| l.len() as i64)))
            .with_objects("Electron", "Electron", ele_indices)
            .with_objects("Muon", "Muon", muo_indices);

        Ok((out, result))
    }
}

/// Jet multiplicity selection.
///
/// Step `Jet` passes with at least `min_jets` jets passing the cuts (and `Jet.jetId == jet_id`
/// when set). Writes `Jet.local_index`; objects `Jet.Jet` sorted by descending `pt`.
#[derive(Debug, Clone, PartialEq)]
pub struct JetSelector {
    pub cuts: ObjectCuts,
    pub jet_id: Option<i64>,
    pub min_jets: usize,
}

impl Default for JetSelector {
    fn default() -> Self {
        Self {
            cuts: ObjectCuts::new(30.0, 2.4),
            jet_id: Some(6),
            min_jets: 5,
        }
    }
}

impl Selector for JetSelector {
    fn name(&self) -> &str {
        "jet_selection"
    }

    fn uses(&self) -> BTreeSet<String> {
        let mut uses: BTreeSet<String> = ["Jet.pt", "Jet.eta"].into_iter().map(String::from).collect();
        if self.jet_id.is_some() {
            uses.insert("Jet.jetId".to_string());
        }
        uses
    }

    fn produces(&self) -> BTreeSet<String> {
        BTreeSet::from(["Jet.local_index".to_string()])
    }

    fn select(&self, batch: &RecordBatch) -> AnalysisResult<(RecordBatch, SelectionResult)> {
        let r = batch.reader(self.name());
        let pt = r.ragged_f64s("Jet.pt")?;
        let mut mask = self.cuts.object_mask(&pt, &r.ragged_f64s("Jet.eta")?);
        if let Some(wanted) = self.jet_id {
            let id_ok: Vec<Mask> = r
                .ragged_i64s("Jet.jetId")?
                .iter()
                .map(|ids| ids.iter().map(|id| id.map(|v| v == wanted)).collect())
                .collect();
            mask = and_masks(mask, &id_ok);
        }

        let indices = masked_sorted_indices(&mask, &pt, SortOrder::Descending)?;
        let step: Mask = indices.iter().map(|l| Some(l.len() >= self.min_jets)).collect();
        let local_index = Column::ragged(pt.iter().map(|p| (0..p.len() as i64).collect::<Vec<_>>()));

        let out = batch.with_column("Jet.local_index", local_index)?;
        let result = SelectionResult::new()
            .with_step("Jet", step)
            .with_aux("jet_mask", mask_column(&mask))
            .with_aux("n_central_jets", Column::scalar(indices.iter().map(|l| l.len() as i64)))
            .with_objects("Jet", "Jet", indices);

        Ok((out, result))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Value;

    fn leptons() -> RecordBatch {
        RecordBatch::from_columns([
            ("Electron.pt", Column::ragged(vec![vec![25.0, 45.0], vec![], vec![30.0]])),
            ("Electron.eta", Column::ragged(vec![vec![0.5, -1.2], vec![], vec![0.1]])),
            ("Muon.pt", Column::ragged(vec![vec![], vec![22.0, 35.0, 10.0], vec![40.0]])),
            ("Muon.eta", Column::ragged(vec![vec![], vec![2.0, 0.3, 0.0], vec![0.2]])),
            (
                "Muon.tightId",
                Column::ragged(vec![vec![], vec![true, true, true], vec![true]]),
            ),
        ])
        .unwrap()
    }

    #[test]
    fn lepton_selection_counts_sorts_and_writes_cutflow_columns() {
        let (out, result) = LeptonSelector::default().select(&leptons()).unwrap();
        assert_eq!(
            result.object_indices("Electron", "Electron"),
            Some(&vec![vec![1, 0], vec![], vec![0]])
        );
        assert_eq!(
            result.object_indices("Muon", "Muon"),
            Some(&vec![vec![], vec![1, 0], vec![0]])
        );
        assert_eq!(
            result.steps["Lepton"],
            vec![Some(true), Some(true), Some(false)]
        );
        assert_eq!(
            out.column("cutflow.n_ele"),
            Some(&Column::scalar([2_i64, 0, 1]))
        );
    }

    #[test]
    fn null_kinematics_never_select_objects() {
        let batch = RecordBatch::from_columns([
            ("Electron.pt", Column::Ragged(vec![vec![Value::Null, Value::Float64(50.0)]])),
            ("Electron.eta", Column::ragged(vec![vec![0.0, 0.0]])),
            ("Muon.pt", Column::ragged(vec![Vec::<f64>::new()])),
            ("Muon.eta", Column::ragged(vec![Vec::<f64>::new()])),
        ])
        .unwrap();
        let selector = LeptonSelector {
            muon_tight_id: false,
            ..LeptonSelector::default()
        };
        let (_, result) = selector.select(&batch).unwrap();
        assert_eq!(result.num_objects("Electron", "Electron"), Some(vec![1]));
        assert_eq!(result.aux["ele_mask"], Column::ragged(vec![vec![false, true]]));
    }

    #[test]
    fn jet_selection_applies_id_and_multiplicity() {
        let batch = RecordBatch::from_columns([
            ("Jet.pt", Column::ragged(vec![vec![35.0, 120.0, 60.0], vec![40.0]])),
            ("Jet.eta", Column::ragged(vec![vec![0.0, 1.0, 3.0], vec![0.0]])),
            ("Jet.jetId", Column::ragged(vec![vec![6_i64, 6, 6], vec![2]])),
        ])
        .unwrap();
        let selector = JetSelector {
            min_jets: 2,
            ..JetSelector::default()
        };
        let (out, result) = selector.select(&batch).unwrap();
        assert_eq!(result.object_indices("Jet", "Jet"), Some(&vec![vec![1, 0], vec![]]));
        assert_eq!(result.steps["Jet"], vec![Some(true), Some(false)]);
        assert_eq!(
            out.column("Jet.local_index"),
            Some(&Column::ragged(vec![vec![0_i64, 1, 2], vec![0]]))
        );
    }
}
