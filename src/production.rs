//! Column producers run outside of the selection: process ids, category ids and event weights.

use std::collections::{BTreeSet, HashSet};
use std::fmt;
use std::sync::Mutex;

use tracing::warn;

use crate::category::{CategorizerContext, CategorizerRegistry, CategoryTable, CATEGORY_IDS};
use crate::config::{AnalysisConfig, WeightDeclarations};
use crate::error::{AnalysisError, AnalysisResult};
use crate::registry::{TransformKind, TransformSpec};
use crate::shift::{AliasStage, Shift};
use crate::types::{Column, RecordBatch, Value};

/// A transform that adds columns to a batch.
pub trait Producer: Send + Sync {
    fn name(&self) -> &str;

    fn uses(&self) -> BTreeSet<String> {
        BTreeSet::new()
    }

    fn produces(&self) -> BTreeSet<String>;

    /// Return a new batch with the produced columns added.
    fn produce(&self, batch: &RecordBatch) -> AnalysisResult<RecordBatch>;

    fn spec(&self) -> TransformSpec {
        TransformSpec::new(self.name(), TransformKind::Producer)
            .uses(self.uses())
            .produces(self.produces())
    }
}

/// Writes a constant `process_id` column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessIdProducer {
    pub process_id: i64,
}

impl ProcessIdProducer {
    pub fn new(process_id: i64) -> Self {
        Self { process_id }
    }

    /// Id of `process` as declared on `config`.
    pub fn for_process(config: &AnalysisConfig, process: &str) -> AnalysisResult<Self> {
        Ok(Self::new(config.process_id(process)?))
    }
}

impl Producer for ProcessIdProducer {
    fn name(&self) -> &str {
        "process_ids"
    }

    fn produces(&self) -> BTreeSet<String> {
        BTreeSet::from(["process_id".to_string()])
    }

    fn produce(&self, batch: &RecordBatch) -> AnalysisResult<RecordBatch> {
        batch.with_column(
            "process_id",
            Column::scalar(vec![self.process_id; batch.num_events()]),
        )
    }
}

/// Writes `category_ids` from materialized columns only.
///
/// Categorizers that need selection results fail here; rebind those categories to
/// column-based categorizers first.
#[derive(Debug, Clone)]
pub struct CategoryIdsProducer {
    categories: CategoryTable,
    categorizers: CategorizerRegistry,
}

impl CategoryIdsProducer {
    pub fn new(categories: CategoryTable, categorizers: CategorizerRegistry) -> Self {
        Self {
            categories,
            categorizers,
        }
    }

    pub fn from_config(config: &AnalysisConfig) -> Self {
        Self::new(config.categories.clone(), config.categorizers.clone())
    }
}

impl Producer for CategoryIdsProducer {
    fn name(&self) -> &str {
        "category_ids"
    }

    fn uses(&self) -> BTreeSet<String> {
        self.categories
            .iter()
            .filter_map(|c| c.selection.as_deref())
            .filter_map(|s| self.categorizers.get(s).ok())
            .flat_map(|c| c.uses())
            .collect()
    }

    fn produces(&self) -> BTreeSet<String> {
        BTreeSet::from([CATEGORY_IDS.to_string()])
    }

    fn produce(&self, batch: &RecordBatch) -> AnalysisResult<RecordBatch> {
        let ctx = CategorizerContext::Production { batch };
        let ids = self.categories.assign_category_ids(&self.categorizers, &ctx)?;
        batch.with_column(CATEGORY_IDS, ids)
    }
}

/// Writes `event_weight`, the product of all configured weight columns for one shift.
///
/// A weight column is read through the shift's aliases only if the weight declares the shift's
/// source. Global weights are required; dataset weights that are absent are skipped with a
/// warning logged once per column. A null factor makes the event weight null. For data the
/// weight is 1.
pub struct EventWeightProducer {
    global: WeightDeclarations,
    dataset: Option<(String, WeightDeclarations)>,
    shift: Shift,
    is_mc: bool,
    warned: Mutex<HashSet<String>>,
}

impl fmt::Debug for EventWeightProducer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventWeightProducer")
            .field("global", &self.global)
            .field("dataset", &self.dataset)
            .field("shift", &self.shift.name)
            .field("is_mc", &self.is_mc)
            .finish()
    }
}

impl EventWeightProducer {
    pub fn new(global: WeightDeclarations, shift: Shift) -> Self {
        Self {
            global,
            dataset: None,
            shift,
            is_mc: true,
            warned: Mutex::new(HashSet::new()),
        }
    }

    /// Weights of `config` for `dataset` under `shift`.
    pub fn from_config(config: &AnalysisConfig, dataset: Option<&str>, shift: &str) -> AnalysisResult<Self> {
        let (global, per_dataset) = config.weights_for_dataset(dataset);
        let mut producer = Self::new(global.clone(), config.shift(shift)?.clone());
        if let (Some(name), Some(weights)) = (dataset, per_dataset) {
            producer = producer.with_dataset_weights(name, weights.clone());
        }
        Ok(producer)
    }

    pub fn with_dataset_weights(mut self, dataset: impl Into<String>, weights: WeightDeclarations) -> Self {
        self.dataset = Some((dataset.into(), weights));
        self
    }

    pub fn data(mut self) -> Self {
        self.is_mc = false;
        self
    }

    fn resolve<'a>(&'a self, column: &'a str, sources: &[String]) -> &'a str {
        if sources.iter().any(|s| *s == self.shift.source) {
            self.shift.resolve(column, AliasStage::Column)
        } else {
            column
        }
    }

    fn warn_once(&self, dataset: &str, column: &str) {
        let first = match self.warned.lock() {
            Ok(mut seen) => seen.insert(column.to_string()),
            Err(poisoned) => poisoned.into_inner().insert(column.to_string()),
        };
        if first {
            warn!(dataset, column, "dataset weight column not found, skipping");
        }
    }
}

fn multiply(acc: &mut [Option<f64>], factor: &[Option<f64>]) {
    for (w, f) in acc.iter_mut().zip(factor) {
        *w = match (*w, *f) {
            (Some(w), Some(f)) => Some(w * f),
            _ => None,
        };
    }
}

impl Producer for EventWeightProducer {
    fn name(&self) -> &str {
        "event_weight"
    }

    fn uses(&self) -> BTreeSet<String> {
        if !self.is_mc {
            return BTreeSet::new();
        }
        self.global
            .iter()
            .map(|(column, sources)| self.resolve(column, sources).to_string())
            .collect()
    }

    fn produces(&self) -> BTreeSet<String> {
        BTreeSet::from(["event_weight".to_string()])
    }

    fn produce(&self, batch: &RecordBatch) -> AnalysisResult<RecordBatch> {
        let mut weight = vec![Some(1.0); batch.num_events()];
        if self.is_mc {
            let reader = batch.reader(self.name());
            for (column, sources) in &self.global {
                multiply(&mut weight, &reader.f64s(self.resolve(column, sources))?);
            }
            if let Some((dataset, weights)) = &self.dataset {
                for (column, sources) in weights {
                    let resolved = self.resolve(column, sources);
                    if batch.has_column(resolved) {
                        multiply(&mut weight, &reader.f64s(resolved)?);
                    } else {
                        self.warn_once(dataset, resolved);
                    }
                }
            }
        }
        batch.with_column("event_weight", Column::scalar(weight))
    }
}

/// Sets `mc_weight` to zero where `|mc_weight|` exceeds `factor` times the median `|mc_weight|`.
///
/// The median is the element at index `n / 2` of the sorted absolute weights; null weights are
/// ignored for the median and left untouched.
#[derive(Debug, Clone, PartialEq)]
pub struct LargeWeightKiller {
    pub column: String,
    pub factor: f64,
}

impl Default for LargeWeightKiller {
    fn default() -> Self {
        Self {
            column: "mc_weight".to_string(),
            factor: 1000.0,
        }
    }
}

impl Producer for LargeWeightKiller {
    fn name(&self) -> &str {
        "large_weights_killer"
    }

    fn uses(&self) -> BTreeSet<String> {
        BTreeSet::from([self.column.clone()])
    }

    fn produces(&self) -> BTreeSet<String> {
        self.uses()
    }

    fn produce(&self, batch: &RecordBatch) -> AnalysisResult<RecordBatch> {
        let weights = batch.reader(self.name()).f64s(&self.column)?;
        let mut magnitudes: Vec<f64> = weights.iter().flatten().map(|w| w.abs()).collect();
        if magnitudes.is_empty() {
            return Ok(batch.clone());
        }
        magnitudes.sort_by(f64::total_cmp);
        let threshold = self.factor * magnitudes[magnitudes.len() / 2];
        if !threshold.is_finite() {
            return Err(AnalysisError::TypeMismatch {
                column: self.column.clone(),
                expected: "finite weight".to_string(),
            });
        }

        let killed = weights.iter().flatten().filter(|w| w.abs() > threshold).count();
        if killed > 0 {
            warn!(column = %self.column, killed, threshold, "zeroed large weights");
        }
        let cleaned = weights.into_iter().map(|w| match w {
            Some(v) if v.abs() > threshold => Value::Float64(0.0),
            other => Value::from(other),
        });
        batch.with_column(self.column.clone(), Column::Scalar(cleaned.collect()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::category::{Category, ColumnCount};
    use crate::shift::ShiftKind;

    fn weights_batch() -> RecordBatch {
        RecordBatch::from_columns([
            ("normalization_weight", Column::scalar([2.0, 2.0, 2.0])),
            ("pu_weight", Column::scalar([Some(1.0), Some(0.5), None])),
            ("pu_weight_minbias_xs_up", Column::scalar([1.5, 1.5, 1.5])),
            ("top_pt_weight", Column::scalar([0.9, 1.1, 1.0])),
        ])
        .unwrap()
    }

    fn config() -> AnalysisConfig {
        let mut config = AnalysisConfig::new("test");
        config
            .shifts
            .add_shift_pair("minbias_xs", 7, 8, ShiftKind::Shape, &[])
            .unwrap();
        config
            .shifts
            .add_aliases("minbias_xs", [("pu_weight", "pu_weight_{name}")], AliasStage::Column)
            .unwrap();
        config.add_event_weight("normalization_weight", Vec::<String>::new()).unwrap();
        config.add_event_weight("pu_weight", ["minbias_xs"]).unwrap();
        config.add_dataset_weight("tt_sl", "top_pt_weight", Vec::<String>::new()).unwrap();
        config.add_dataset_weight("tt_sl", "missing_weight", Vec::<String>::new()).unwrap();
        config
    }

    #[test]
    fn process_ids_are_constant() {
        let mut config = AnalysisConfig::new("test");
        config.add_process("tt", 7).unwrap();
        let producer = ProcessIdProducer::for_process(&config, "tt").unwrap();
        let out = producer.produce(&RecordBatch::new(2)).unwrap();
        assert_eq!(out.column("process_id"), Some(&Column::scalar([7_i64, 7])));
    }

    #[test]
    fn event_weight_multiplies_nominal_columns() {
        let producer = EventWeightProducer::from_config(&config(), None, "nominal").unwrap();
        let out = producer.produce(&weights_batch()).unwrap();
        assert_eq!(
            out.column("event_weight"),
            Some(&Column::scalar([Some(2.0), Some(1.0), None]))
        );
    }

    #[test]
    fn event_weight_reads_shifted_columns_and_tolerates_missing_dataset_weights() {
        let producer = EventWeightProducer::from_config(&config(), Some("tt_sl"), "minbias_xs_up").unwrap();
        assert!(producer.uses().contains("pu_weight_minbias_xs_up"));
        let out = producer.produce(&weights_batch()).unwrap();
        let weights = out.reader("test").f64s("event_weight").unwrap();
        let expected = [2.0 * 1.5 * 0.9, 2.0 * 1.5 * 1.1, 2.0 * 1.5 * 1.0];
        for (got, want) in weights.iter().zip(expected) {
            assert!((got.unwrap() - want).abs() < 1e-12);
        }
        assert!(producer.warned.lock().unwrap().contains("missing_weight"));
    }

    #[test]
    fn missing_global_weight_is_fatal() {
        let producer = EventWeightProducer::from_config(&config(), None, "nominal").unwrap();
        let batch = weights_batch().without_columns(["pu_weight"]);
        assert!(matches!(
            producer.produce(&batch),
            Err(AnalysisError::MissingColumn { ref column, .. }) if column == "pu_weight"
        ));
    }

    #[test]
    fn data_gets_unit_weights() {
        let producer = EventWeightProducer::from_config(&config(), None, "nominal")
            .unwrap()
            .data();
        let out = producer.produce(&RecordBatch::new(2)).unwrap();
        assert_eq!(out.column("event_weight"), Some(&Column::scalar([1.0, 1.0])));
    }

    #[test]
    fn large_weights_are_zeroed() {
        let batch = RecordBatch::from_columns([(
            "mc_weight",
            Column::scalar([Some(1.0), Some(-2.0), Some(5000.0), None, Some(1.5)]),
        )])
        .unwrap();
        let out = LargeWeightKiller::default().produce(&batch).unwrap();
        assert_eq!(
            out.column("mc_weight"),
            Some(&Column::scalar([Some(1.0), Some(-2.0), Some(0.0), None, Some(1.5)]))
        );
    }

    #[test]
    fn category_ids_in_production_context() {
        let mut config = AnalysisConfig::new("test");
        config
            .categorizers
            .register(ColumnCount::new("catid_2e").require("Electron.pt", 2))
            .unwrap();
        config.add_category(Category::leaf(30, "2e", "catid_2e")).unwrap();
        let producer = CategoryIdsProducer::from_config(&config);
        assert!(producer.uses().contains("Electron.pt"));

        let batch = RecordBatch::from_columns([(
            "Electron.pt",
            Column::ragged(vec![vec![30.0, 20.0], vec![25.0]]),
        )])
        .unwrap();
        let out = producer.produce(&batch).unwrap();
        assert_eq!(
            out.column(CATEGORY_IDS),
            Some(&Column::ragged(vec![vec![30_i64], vec![]]))
        );
    }
}
