//! Stock categorizers.

use std::collections::BTreeSet;

use crate::error::{AnalysisError, AnalysisResult};
use crate::selection::{mask_from, Mask};
use crate::types::split_path;

use super::{Categorizer, CategorizerContext};

/// Every event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Inclusive {
    name: String,
}

impl Inclusive {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl Default for Inclusive {
    fn default() -> Self {
        Self::new("catid_incl")
    }
}

impl Categorizer for Inclusive {
    fn name(&self) -> &str {
        &self.name
    }

    fn evaluate(&self, ctx: &CategorizerContext<'_>) -> AnalysisResult<Mask> {
        Ok(mask_from(vec![true; ctx.num_events()]))
    }
}

/// Exact retained-object multiplicities from the selection result.
///
/// Only valid in selection context: `("Electron", "Electron", 2)` requires exactly two retained
/// electrons.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectCount {
    name: String,
    requirements: Vec<(String, String, usize)>,
}

impl ObjectCount {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            requirements: Vec::new(),
        }
    }

    pub fn require(
        mut self,
        collection: impl Into<String>,
        subcollection: impl Into<String>,
        count: usize,
    ) -> Self {
        self.requirements
            .push((collection.into(), subcollection.into(), count));
        self
    }
}

impl Categorizer for ObjectCount {
    fn name(&self) -> &str {
        &self.name
    }

    fn evaluate(&self, ctx: &CategorizerContext<'_>) -> AnalysisResult<Mask> {
        let results = ctx.results().ok_or_else(|| {
            AnalysisError::config(format!(
                "categorizer '{}' reads selection results and cannot run after production",
                self.name
            ))
        })?;

        let mut out = vec![true; ctx.num_events()];
        for (collection, sub, count) in &self.requirements {
            let counts = results
                .num_objects(collection, sub)
                .ok_or_else(|| AnalysisError::missing(&self.name, format!("objects.{collection}.{sub}")))?;
            for (slot, n) in out.iter_mut().zip(counts) {
                *slot &= n == *count;
            }
        }
        Ok(mask_from(out))
    }
}

/// Exact number of strictly positive entries in ragged columns.
///
/// Works in both contexts: `("Electron.pt", 2)` counts electrons with `pt > 0`. Null entries do
/// not count.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnCount {
    name: String,
    requirements: Vec<(String, usize)>,
}

impl ColumnCount {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            requirements: Vec::new(),
        }
    }

    pub fn require(mut self, column: impl Into<String>, count: usize) -> Self {
        self.requirements.push((column.into(), count));
        self
    }
}

impl Categorizer for ColumnCount {
    fn name(&self) -> &str {
        &self.name
    }

    fn uses(&self) -> BTreeSet<String> {
        self.requirements.iter().map(|(c, _)| c.clone()).collect()
    }

    fn evaluate(&self, ctx: &CategorizerContext<'_>) -> AnalysisResult<Mask> {
        let reader = ctx.batch().reader(&self.name);
        let mut out = vec![true; ctx.num_events()];
        for (column, count) in &self.requirements {
            let values = reader.ragged_f64s(column)?;
            for (slot, event) in out.iter_mut().zip(&values) {
                let positive = event.iter().filter(|v| v.is_some_and(|x| x > 0.0)).count();
                *slot &= positive == *count;
            }
        }
        Ok(mask_from(out))
    }
}

/// At least `min` objects in a collection, counted on the given ragged column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MinCollectionSize {
    name: String,
    column: String,
    min: usize,
}

impl MinCollectionSize {
    /// `column` must be a `collection.field` path, e.g. `Jet.pt`.
    pub fn new(name: impl Into<String>, column: impl Into<String>, min: usize) -> Self {
        Self {
            name: name.into(),
            column: column.into(),
            min,
        }
    }
}

impl Categorizer for MinCollectionSize {
    fn name(&self) -> &str {
        &self.name
    }

    fn uses(&self) -> BTreeSet<String> {
        BTreeSet::from([self.column.clone()])
    }

    fn evaluate(&self, ctx: &CategorizerContext<'_>) -> AnalysisResult<Mask> {
        if split_path(&self.column).0.is_none() {
            return Err(AnalysisError::config(format!(
                "categorizer '{}' needs a collection column, got '{}'",
                self.name, self.column
            )));
        }
        let sizes = ctx.batch().reader(&self.name).ragged(&self.column)?;
        Ok(sizes.iter().map(|objects| Some(objects.len() >= self.min)).collect())
    }
}
