//! Transform registry: which columns each named selector/categorizer/producer reads and writes.
//!
//! Every transform is declared with two immutable column sets (`uses`, `produces`) plus the names
//! of the transforms it calls. The effective sets are the transitive-closure union over those
//! dependencies, computed explicitly by the registry.

use std::collections::{BTreeSet, HashSet};

use indexmap::IndexMap;

use crate::error::{AnalysisError, AnalysisResult, CollisionKind};
use crate::types::RecordBatch;

/// Role of a transform in the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransformKind {
    Selector,
    Categorizer,
    Producer,
}

/// Declaration of a transform and its direct column dependencies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransformSpec {
    pub name: String,
    pub kind: TransformKind,
    pub uses: BTreeSet<String>,
    pub produces: BTreeSet<String>,
    /// Names of transforms invoked by this one.
    pub depends_on: Vec<String>,
}

impl TransformSpec {
    pub fn new(name: impl Into<String>, kind: TransformKind) -> Self {
        Self {
            name: name.into(),
            kind,
            uses: BTreeSet::new(),
            produces: BTreeSet::new(),
            depends_on: Vec::new(),
        }
    }

    pub fn uses<S: Into<String>>(mut self, columns: impl IntoIterator<Item = S>) -> Self {
        self.uses.extend(columns.into_iter().map(Into::into));
        self
    }

    pub fn produces<S: Into<String>>(mut self, columns: impl IntoIterator<Item = S>) -> Self {
        self.produces.extend(columns.into_iter().map(Into::into));
        self
    }

    pub fn depends_on<S: Into<String>>(mut self, transforms: impl IntoIterator<Item = S>) -> Self {
        self.depends_on.extend(transforms.into_iter().map(Into::into));
        self
    }
}

/// Registry of [`TransformSpec`]s keyed by name (declaration order preserved).
#[derive(Debug, Clone, Default)]
pub struct TransformRegistry {
    specs: IndexMap<String, TransformSpec>,
}

impl TransformRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a transform. Names are unique.
    pub fn register(&mut self, spec: TransformSpec) -> AnalysisResult<()> {
        if self.specs.contains_key(&spec.name) {
            return Err(AnalysisError::KeyCollision {
                kind: CollisionKind::Transform,
                key: spec.name,
            });
        }
        self.specs.insert(spec.name.clone(), spec);
        Ok(())
    }

    /// Builder-style [`Self::register`].
    pub fn with(mut self, spec: TransformSpec) -> AnalysisResult<Self> {
        self.register(spec)?;
        Ok(self)
    }

    pub fn get(&self, name: &str) -> AnalysisResult<&TransformSpec> {
        self.specs
            .get(name)
            .ok_or_else(|| AnalysisError::UnknownTransform(name.to_string()))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.specs.keys().map(String::as_str)
    }

    /// Transform names reachable from `name` (including itself), dependencies first.
    pub fn closure(&self, name: &str) -> AnalysisResult<Vec<&TransformSpec>> {
        let mut seen = HashSet::new();
        let mut order = Vec::new();
        self.visit(name, &mut seen, &mut order)?;
        Ok(order)
    }

    fn visit<'a>(
        &'a self,
        name: &str,
        seen: &mut HashSet<String>,
        order: &mut Vec<&'a TransformSpec>,
    ) -> AnalysisResult<()> {
        if !seen.insert(name.to_string()) {
            return Ok(());
        }
        let spec = self.get(name)?;
        for dep in &spec.depends_on {
            self.visit(dep, seen, order)?;
        }
        order.push(spec);
        Ok(())
    }

    /// Union of `uses` over the dependency closure of `name`.
    pub fn resolved_uses(&self, name: &str) -> AnalysisResult<BTreeSet<String>> {
        Ok(self
            .closure(name)?
            .into_iter()
            .flat_map(|s| s.uses.iter().cloned())
            .collect())
    }

    /// Union of `produces` over the dependency closure of `name`.
    pub fn resolved_produces(&self, name: &str) -> AnalysisResult<BTreeSet<String>> {
        Ok(self
            .closure(name)?
            .into_iter()
            .flat_map(|s| s.produces.iter().cloned())
            .collect())
    }

    /// Check, before running `name`, that each resolved input column is in `batch` or written by
    /// a transform earlier in the dependency closure.
    pub fn check_inputs(&self, name: &str, batch: &RecordBatch) -> AnalysisResult<()> {
        let mut available: BTreeSet<&str> = batch.column_names().collect();
        for spec in self.closure(name)? {
            for column in &spec.uses {
                if !available.contains(column.as_str()) {
                    return Err(AnalysisError::missing(spec.name.clone(), column.clone()));
                }
            }
            available.extend(spec.produces.iter().map(String::as_str));
        }
        Ok(())
    }
}
