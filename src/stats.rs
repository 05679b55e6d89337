//! Grouped, weighted event statistics.
//!
//! A [`StatsAccumulator`] holds, per named weight expression, an overall total plus totals per
//! grouping key. Accumulators form a commutative monoid under [`StatsAccumulator::merge`] (the
//! empty accumulator is the identity), so batches can be accumulated independently and combined
//! in any order.

use std::collections::BTreeMap;
use std::fmt;
use std::io;
use std::iter::Sum;
use std::ops::{Add, AddAssign};
use std::sync::Arc;

use indexmap::IndexMap;
use serde::ser::Error as _;
use serde::{Deserialize, Serialize, Serializer};

use crate::error::{AnalysisError, AnalysisResult};
use crate::shift::{AliasStage, Shift};
use crate::types::RecordBatch;

const TRANSFORM: &str = "stats";

/// How much one event contributes to a weight total.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum WeightExpr {
    /// 1 per event.
    Count,
    /// 1 per selected event.
    CountSelected,
    /// Value of `column` per event; nulls contribute 0.
    Sum { column: String },
    /// Value of `column` per selected event.
    SumSelected { column: String },
}

impl WeightExpr {
    pub fn sum(column: impl Into<String>) -> Self {
        Self::Sum {
            column: column.into(),
        }
    }

    pub fn sum_selected(column: impl Into<String>) -> Self {
        Self::SumSelected {
            column: column.into(),
        }
    }

    pub fn column(&self) -> Option<&str> {
        match self {
            Self::Count | Self::CountSelected => None,
            Self::Sum { column } | Self::SumSelected { column } => Some(column),
        }
    }

    pub fn is_masked(&self) -> bool {
        matches!(self, Self::CountSelected | Self::SumSelected { .. })
    }

    /// Per-event contributions, with the column resolved for `shift`.
    fn contributions(&self, batch: &RecordBatch, mask: &[bool], shift: &Shift) -> AnalysisResult<Vec<f64>> {
        let mut values = match self.column() {
            None => vec![1.0; batch.num_events()],
            Some(column) => batch
                .reader(TRANSFORM)
                .f64s(shift.resolve(column, AliasStage::Column))?
                .into_iter()
                .map(|v| v.unwrap_or(0.0))
                .collect(),
        };
        if self.is_masked() {
            for (v, selected) in values.iter_mut().zip(mask) {
                if !selected {
                    *v = 0.0;
                }
            }
        }
        Ok(values)
    }
}

/// The weight expressions every analysis books by default.
pub fn standard_weights() -> IndexMap<String, WeightExpr> {
    IndexMap::from([
        ("num_events".to_string(), WeightExpr::Count),
        ("num_events_selected".to_string(), WeightExpr::CountSelected),
        ("sum_mc_weight".to_string(), WeightExpr::sum("mc_weight")),
        ("sum_mc_weight_selected".to_string(), WeightExpr::sum_selected("mc_weight")),
    ])
}

/// Computes one integer grouping key per event; `None` leaves the event out of the group.
pub type KeyFn = dyn Fn(&RecordBatch) -> AnalysisResult<Vec<Option<i64>>> + Send + Sync;

/// Where the grouping key of an event comes from.
#[derive(Clone)]
pub enum GroupKey {
    /// Integer value of a scalar column.
    Column(String),
    /// Derived from the whole batch, e.g. a multiplicity bucket.
    Derived(Arc<KeyFn>),
}

impl fmt::Debug for GroupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Column(column) => f.debug_tuple("Column").field(column).finish(),
            Self::Derived(_) => f.write_str("Derived(..)"),
        }
    }
}

impl PartialEq for GroupKey {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Column(a), Self::Column(b)) => a == b,
            (Self::Derived(a), Self::Derived(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

/// Groups events by an integer key. Events with a null key are not counted in that group.
///
/// Only column keys can be written to (or read from) a configuration file.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(from = "ColumnGroup")]
pub struct GroupBy {
    pub name: String,
    pub key: GroupKey,
}

#[derive(Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct ColumnGroup {
    name: String,
    column: String,
}

impl From<ColumnGroup> for GroupBy {
    fn from(group: ColumnGroup) -> Self {
        Self::new(group.name, group.column)
    }
}

impl Serialize for GroupBy {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match &self.key {
            GroupKey::Column(column) => ColumnGroup {
                name: self.name.clone(),
                column: column.clone(),
            }
            .serialize(serializer),
            GroupKey::Derived(_) => Err(S::Error::custom(format!(
                "group '{}' has a derived key and cannot be serialized",
                self.name
            ))),
        }
    }
}

impl GroupBy {
    pub fn new(name: impl Into<String>, column: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            key: GroupKey::Column(column.into()),
        }
    }

    /// Group by a key computed from the batch.
    pub fn derived<F>(name: impl Into<String>, key: F) -> Self
    where
        F: Fn(&RecordBatch) -> AnalysisResult<Vec<Option<i64>>> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            key: GroupKey::Derived(Arc::new(key)),
        }
    }

    /// Group by `process_id`.
    pub fn process() -> Self {
        Self::new("process", "process_id")
    }

    /// The grouping column, if the key is read from one.
    pub fn column(&self) -> Option<&str> {
        match &self.key {
            GroupKey::Column(column) => Some(column),
            GroupKey::Derived(_) => None,
        }
    }

    fn keys(&self, batch: &RecordBatch) -> AnalysisResult<Vec<Option<i64>>> {
        let keys = match &self.key {
            GroupKey::Column(column) => batch.reader(TRANSFORM).i64s(column)?,
            GroupKey::Derived(key) => key(batch)?,
        };
        if keys.len() != batch.num_events() {
            return Err(AnalysisError::LengthMismatch {
                column: format!("group '{}'", self.name),
                expected: batch.num_events(),
                actual: keys.len(),
            });
        }
        Ok(keys)
    }
}

/// Totals of one weight expression.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WeightTotals {
    pub total: f64,
    pub groups: BTreeMap<String, BTreeMap<i64, f64>>,
}

impl WeightTotals {
    fn merge_in(&mut self, other: WeightTotals) {
        self.total += other.total;
        for (group, keys) in other.groups {
            let target = self.groups.entry(group).or_default();
            for (key, value) in keys {
                *target.entry(key).or_insert(0.0) += value;
            }
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StatsAccumulator {
    pub weights: BTreeMap<String, WeightTotals>,
}

#[derive(Debug, Serialize)]
struct CsvRow<'a> {
    weight: &'a str,
    group: &'a str,
    key: Option<i64>,
    value: f64,
}

impl StatsAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Accumulate one batch into a fresh accumulator.
    pub fn from_batch(
        batch: &RecordBatch,
        event_mask: &[bool],
        weights: &IndexMap<String, WeightExpr>,
        groups: &[GroupBy],
        shift: &Shift,
    ) -> AnalysisResult<Self> {
        let mut acc = Self::new();
        acc.increment(batch, event_mask, weights, groups, shift)?;
        Ok(acc)
    }

    /// Add the contributions of `batch`.
    ///
    /// All inputs are read before anything is added, so a failing batch leaves the accumulator
    /// untouched.
    pub fn increment(
        &mut self,
        batch: &RecordBatch,
        event_mask: &[bool],
        weights: &IndexMap<String, WeightExpr>,
        groups: &[GroupBy],
        shift: &Shift,
    ) -> AnalysisResult<()> {
        if event_mask.len() != batch.num_events() {
            return Err(AnalysisError::LengthMismatch {
                column: "event_mask".to_string(),
                expected: batch.num_events(),
                actual: event_mask.len(),
            });
        }

        let keys = groups
            .iter()
            .map(|g| Ok((g.name.as_str(), g.keys(batch)?)))
            .collect::<AnalysisResult<Vec<_>>>()?;
        let contributions = weights
            .iter()
            .map(|(name, expr)| Ok((name.as_str(), expr.contributions(batch, event_mask, shift)?)))
            .collect::<AnalysisResult<Vec<_>>>()?;

        for (weight, values) in contributions {
            let totals = self.weights.entry(weight.to_string()).or_default();
            totals.total += values.iter().sum::<f64>();
            for (group, group_keys) in &keys {
                let target = totals.groups.entry(group.to_string()).or_default();
                for (key, value) in group_keys.iter().zip(&values) {
                    if let Some(key) = key {
                        *target.entry(*key).or_insert(0.0) += value;
                    }
                }
            }
        }
        Ok(())
    }

    /// Elementwise sum of two accumulators.
    pub fn merge(mut self, other: StatsAccumulator) -> Self {
        self.merge_in(other);
        self
    }

    pub fn merge_in(&mut self, other: StatsAccumulator) {
        for (weight, totals) in other.weights {
            self.weights.entry(weight).or_default().merge_in(totals);
        }
    }

    /// Total of `weight` over all events, zero when absent.
    pub fn total(&self, weight: &str) -> f64 {
        self.weights.get(weight).map_or(0.0, |t| t.total)
    }

    /// Total of `weight` for `key` in `group`, zero when absent.
    pub fn get(&self, weight: &str, group: &str, key: i64) -> f64 {
        self.weights
            .get(weight)
            .and_then(|t| t.groups.get(group))
            .and_then(|keys| keys.get(&key))
            .copied()
            .unwrap_or(0.0)
    }

    /// `key -> value` map of one weight and group.
    pub fn group(&self, weight: &str, group: &str) -> Option<&BTreeMap<i64, f64>> {
        self.weights.get(weight)?.groups.get(group)
    }

    pub fn is_empty(&self) -> bool {
        self.weights.is_empty()
    }

    /// Write `weight,group,key,value` rows; overall totals have empty group and key.
    pub fn write_csv<W: io::Write>(&self, writer: W) -> AnalysisResult<()> {
        let mut out = csv::Writer::from_writer(writer);
        for (weight, totals) in &self.weights {
            out.serialize(CsvRow {
                weight,
                group: "",
                key: None,
                value: totals.total,
            })?;
            for (group, keys) in &totals.groups {
                for (key, value) in keys {
                    out.serialize(CsvRow {
                        weight,
                        group,
                        key: Some(*key),
                        value: *value,
                    })?;
                }
            }
        }
        out.flush()?;
        Ok(())
    }
}

impl Add for StatsAccumulator {
    type Output = StatsAccumulator;

    fn add(self, rhs: StatsAccumulator) -> Self::Output {
        self.merge(rhs)
    }
}

impl AddAssign for StatsAccumulator {
    fn add_assign(&mut self, rhs: StatsAccumulator) {
        self.merge_in(rhs);
    }
}

impl Sum for StatsAccumulator {
    fn sum<I: Iterator<Item = StatsAccumulator>>(iter: I) -> Self {
        iter.fold(StatsAccumulator::new(), StatsAccumulator::merge)
    }
}
