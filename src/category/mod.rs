//! Category declarations and per-event category id assignment.
//!
//! Leaf categories delegate to a named [`Categorizer`]; combined categories carry their parents
//! and are members exactly when every parent is. Ids are never allocated here, only validated:
//! a positive id may belong to a single category, and a combined id must equal the sum of its
//! parents' ids.

mod builtins;
mod combine;

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::error::{AnalysisError, AnalysisResult, CollisionKind};
use crate::registry::{TransformKind, TransformSpec};
use crate::selection::{fill_none, Mask, SelectionResult};
use crate::types::{Column, RecordBatch, Value};

pub use builtins::{ColumnCount, Inclusive, MinCollectionSize, ObjectCount};
pub use combine::{create_category_combinations, CategoryGroup, CombinationPolicy};

/// Name of the column written by category assignment.
pub const CATEGORY_IDS: &str = "category_ids";

/// A named, id-tagged event classification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Category {
    pub id: u64,
    pub name: String,
    /// Categorizer name for leaf categories, `None` for combinations.
    #[serde(default)]
    pub selection: Option<String>,
    #[serde(default)]
    pub label: Option<String>,
    /// Parent category names of a combination, in group order.
    #[serde(default)]
    pub parents: Vec<String>,
}

impl Category {
    pub fn leaf(id: u64, name: impl Into<String>, selection: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            selection: Some(selection.into()),
            label: None,
            parents: Vec::new(),
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn is_combined(&self) -> bool {
        !self.parents.is_empty()
    }

    /// Label if set, otherwise the name.
    pub fn display_label(&self) -> &str {
        self.label.as_deref().unwrap_or(&self.name)
    }
}

/// What a categorizer may look at.
#[derive(Debug, Clone, Copy)]
pub enum CategorizerContext<'a> {
    /// During selection: the merged selection result of the batch is available.
    Selection {
        batch: &'a RecordBatch,
        results: &'a SelectionResult,
    },
    /// After production: only materialized columns are available.
    Production { batch: &'a RecordBatch },
}

impl<'a> CategorizerContext<'a> {
    pub fn batch(&self) -> &'a RecordBatch {
        match self {
            Self::Selection { batch, .. } | Self::Production { batch } => batch,
        }
    }

    pub fn results(&self) -> Option<&'a SelectionResult> {
        match self {
            Self::Selection { results, .. } => Some(results),
            Self::Production { .. } => None,
        }
    }

    pub fn num_events(&self) -> usize {
        self.batch().num_events()
    }
}

/// Per-event membership predicate backing one or more leaf categories.
pub trait Categorizer: Send + Sync {
    fn name(&self) -> &str;

    /// Columns read from the batch.
    fn uses(&self) -> BTreeSet<String> {
        BTreeSet::new()
    }

    fn evaluate(&self, ctx: &CategorizerContext<'_>) -> AnalysisResult<Mask>;

    fn spec(&self) -> TransformSpec {
        TransformSpec::new(self.name(), TransformKind::Categorizer).uses(self.uses())
    }
}

/// Named categorizer implementations.
#[derive(Clone, Default)]
pub struct CategorizerRegistry {
    categorizers: IndexMap<String, Arc<dyn Categorizer>>,
}

impl fmt::Debug for CategorizerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CategorizerRegistry")
            .field("categorizers", &self.categorizers.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl CategorizerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register under the categorizer's own name.
    pub fn register(&mut self, categorizer: impl Categorizer + 'static) -> AnalysisResult<()> {
        self.register_arc(Arc::new(categorizer))
    }

    pub fn register_arc(&mut self, categorizer: Arc<dyn Categorizer>) -> AnalysisResult<()> {
        let name = categorizer.name().to_string();
        if self.categorizers.contains_key(&name) {
            return Err(AnalysisError::KeyCollision {
                kind: CollisionKind::Transform,
                key: name,
            });
        }
        self.categorizers.insert(name, categorizer);
        Ok(())
    }

    /// Replace the implementation registered under `name`, returning the previous one.
    pub fn rebind(
        &mut self,
        name: &str,
        categorizer: Arc<dyn Categorizer>,
    ) -> AnalysisResult<Arc<dyn Categorizer>> {
        let slot = self
            .categorizers
            .get_mut(name)
            .ok_or_else(|| AnalysisError::UnknownCategorizer(name.to_string()))?;
        Ok(std::mem::replace(slot, categorizer))
    }

    pub fn get(&self, name: &str) -> AnalysisResult<&Arc<dyn Categorizer>> {
        self.categorizers
            .get(name)
            .ok_or_else(|| AnalysisError::UnknownCategorizer(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.categorizers.contains_key(name)
    }

    /// Evaluate `name` after checking its declared inputs.
    pub fn evaluate(&self, name: &str, ctx: &CategorizerContext<'_>) -> AnalysisResult<Vec<bool>> {
        let categorizer = self.get(name)?;
        let uses = categorizer.uses();
        ctx.batch()
            .require_columns(categorizer.name(), uses.iter().map(String::as_str))?;
        let mask = categorizer.evaluate(ctx)?;
        if mask.len() != ctx.num_events() {
            return Err(AnalysisError::LengthMismatch {
                column: format!("categorizer.{name}"),
                expected: ctx.num_events(),
                actual: mask.len(),
            });
        }
        Ok(fill_none(&mask))
    }
}

/// Categories of one configuration in declaration order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CategoryTable {
    categories: IndexMap<String, Category>,
    #[serde(skip)]
    by_id: HashMap<u64, String>,
}

impl CategoryTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a category. Returns `false` when an identical category already exists.
    ///
    /// Fails with [`AnalysisError::DuplicateCategory`] when the name exists with other
    /// attributes and with [`AnalysisError::CategoryIdCollision`] when the id is taken.
    pub fn add_category(&mut self, category: Category) -> AnalysisResult<bool> {
        if let Some(existing) = self.categories.get(&category.name) {
            if *existing == category {
                return Ok(false);
            }
            return Err(AnalysisError::DuplicateCategory {
                name: category.name,
            });
        }
        if category.id == 0 {
            return Err(AnalysisError::config(format!(
                "category '{}' must have a positive id",
                category.name
            )));
        }
        category_id_value(&category)?;
        if let Some(owner) = self.by_id.get(&category.id) {
            return Err(AnalysisError::CategoryIdCollision {
                id: category.id,
                existing: owner.clone(),
                name: category.name,
            });
        }
        self.validate_shape(&category)?;

        self.by_id.insert(category.id, category.name.clone());
        self.categories.insert(category.name.clone(), category);
        Ok(true)
    }

    fn validate_shape(&self, category: &Category) -> AnalysisResult<()> {
        match (&category.selection, category.parents.as_slice()) {
            (Some(_), []) => Ok(()),
            (None, parents) if parents.len() >= 2 => {
                let ids = parents
                    .iter()
                    .map(|parent| Ok(self.get(parent)?.id))
                    .collect::<AnalysisResult<Vec<_>>>()?;
                let sum = sum_parent_ids(&category.name, ids)?;
                if sum != category.id {
                    return Err(AnalysisError::config(format!(
                        "combined category '{}' has id {} but its parents sum to {sum}",
                        category.name, category.id
                    )));
                }
                Ok(())
            }
            _ => Err(AnalysisError::config(format!(
                "category '{}' needs either a selection or at least two parents",
                category.name
            ))),
        }
    }

    /// Point a leaf category at another categorizer without touching its id or name.
    pub fn rebind_selection(&mut self, name: &str, selection: impl Into<String>) -> AnalysisResult<()> {
        let category = self
            .categories
            .get_mut(name)
            .ok_or_else(|| AnalysisError::UnknownCategory(name.to_string()))?;
        if category.is_combined() {
            return Err(AnalysisError::config(format!(
                "combined category '{name}' has no selection to rebind"
            )));
        }
        category.selection = Some(selection.into());
        Ok(())
    }

    pub fn get(&self, name: &str) -> AnalysisResult<&Category> {
        self.categories
            .get(name)
            .ok_or_else(|| AnalysisError::UnknownCategory(name.to_string()))
    }

    pub fn get_by_id(&self, id: u64) -> Option<&Category> {
        self.by_id.get(&id).and_then(|name| self.categories.get(name))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.categories.contains_key(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Category> {
        self.categories.values()
    }

    pub fn len(&self) -> usize {
        self.categories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.categories.is_empty()
    }

    /// Per-category membership, in declaration order.
    pub fn memberships(
        &self,
        registry: &CategorizerRegistry,
        ctx: &CategorizerContext<'_>,
    ) -> AnalysisResult<IndexMap<&str, Vec<bool>>> {
        let n = ctx.num_events();
        let mut out: IndexMap<&str, Vec<bool>> = IndexMap::with_capacity(self.categories.len());
        for category in self.categories.values() {
            let membership = match &category.selection {
                Some(selection) => registry.evaluate(selection, ctx)?,
                None => {
                    let mut acc = vec![true; n];
                    for parent in &category.parents {
                        let parent_mask = out
                            .get(parent.as_str())
                            .ok_or_else(|| AnalysisError::UnknownCategory(parent.clone()))?;
                        for (slot, member) in acc.iter_mut().zip(parent_mask) {
                            *slot &= *member;
                        }
                    }
                    acc
                }
            };
            out.insert(category.name.as_str(), membership);
        }
        Ok(out)
    }

    /// Ragged `Int64` column listing, per event, the ids of every category the event belongs to.
    pub fn assign_category_ids(
        &self,
        registry: &CategorizerRegistry,
        ctx: &CategorizerContext<'_>,
    ) -> AnalysisResult<Column> {
        let memberships = self.memberships(registry, ctx)?;
        let mut ids: Vec<Vec<Value>> = vec![Vec::new(); ctx.num_events()];
        for (name, membership) in &memberships {
            let id = category_id_value(&self.categories[*name])?;
            for (event, _) in membership.iter().enumerate().filter(|(_, m)| **m) {
                ids[event].push(Value::Int64(id));
            }
        }
        Ok(Column::Ragged(ids))
    }
}

/// Id of a combined category: the sum of its parents' ids.
pub(crate) fn sum_parent_ids(name: &str, ids: impl IntoIterator<Item = u64>) -> AnalysisResult<u64> {
    ids.into_iter()
        .try_fold(0u64, u64::checked_add)
        .ok_or_else(|| AnalysisError::config(format!("parent ids of category '{name}' overflow when summed")))
}

/// Category ids are written to an `Int64` column.
fn category_id_value(category: &Category) -> AnalysisResult<i64> {
    i64::try_from(category.id).map_err(|_| {
        AnalysisError::config(format!(
            "id {} of category '{}' does not fit in an Int64 column",
            category.id, category.name
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::selection::mask_from;

    struct Fixed(&'static str, Vec<bool>);

    impl Categorizer for Fixed {
        fn name(&self) -> &str {
            self.0
        }

        fn evaluate(&self, _ctx: &CategorizerContext<'_>) -> AnalysisResult<Mask> {
            Ok(mask_from(self.1.clone()))
        }
    }

    fn setup() -> (CategoryTable, CategorizerRegistry) {
        let mut registry = CategorizerRegistry::new();
        registry.register(Fixed("is_a", vec![true, true, false])).unwrap();
        registry.register(Fixed("is_b", vec![true, false, true])).unwrap();
        let mut table = CategoryTable::new();
        table.add_category(Category::leaf(1, "a", "is_a")).unwrap();
        table.add_category(Category::leaf(10, "b", "is_b")).unwrap();
        (table, registry)
    }

    #[test]
    fn ids_follow_declaration_order() {
        let (table, registry) = setup();
        let batch = RecordBatch::new(3);
        let ctx = CategorizerContext::Production { batch: &batch };
        let ids = table.assign_category_ids(&registry, &ctx).unwrap();
        assert_eq!(ids, Column::ragged(vec![vec![1_i64, 10], vec![1], vec![10]]));
    }

    #[test]
    fn combined_membership_is_and_of_parents() {
        let (mut table, registry) = setup();
        table
            .add_category(Category {
                id: 11,
                name: "a__b".into(),
                selection: None,
                label: None,
                parents: vec!["a".into(), "b".into()],
            })
            .unwrap();
        let batch = RecordBatch::new(3);
        let ctx = CategorizerContext::Production { batch: &batch };
        let m = table.memberships(&registry, &ctx).unwrap();
        assert_eq!(m["a__b"], vec![true, false, false]);
    }

    #[test]
    fn redeclaration_rules() {
        let (mut table, _) = setup();
        assert!(!table.add_category(Category::leaf(1, "a", "is_a")).unwrap());
        assert!(matches!(
            table.add_category(Category::leaf(2, "a", "is_a")),
            Err(AnalysisError::DuplicateCategory { .. })
        ));
        assert!(matches!(
            table.add_category(Category::leaf(10, "c", "is_c")),
            Err(AnalysisError::CategoryIdCollision { id: 10, .. })
        ));
        assert!(table.add_category(Category::leaf(0, "zero", "is_a")).is_err());
        assert_eq!(table.len(), 2);
        assert_eq!(table.get_by_id(10).map(|c| c.name.as_str()), Some("b"));
    }

    #[test]
    fn combined_ids_must_sum_parents() {
        let (mut table, _) = setup();
        let err = table
            .add_category(Category {
                id: 12,
                name: "a__b".into(),
                selection: None,
                label: None,
                parents: vec!["a".into(), "b".into()],
            })
            .unwrap_err();
        assert!(matches!(err, AnalysisError::InvalidConfig { .. }));
    }

    #[test]
    fn oversized_ids_are_rejected() {
        let (mut table, _) = setup();
        let err = table
            .add_category(Category::leaf(u64::MAX, "huge", "is_a"))
            .unwrap_err();
        assert!(matches!(err, AnalysisError::InvalidConfig { .. }), "{err}");
        assert!(!table.contains("huge"));

        let max = i64::MAX as u64;
        table.add_category(Category::leaf(max, "big", "is_a")).unwrap();
        let err = table
            .add_category(Category {
                id: max.wrapping_add(1),
                name: "a__big".into(),
                selection: None,
                label: None,
                parents: vec!["a".into(), "big".into()],
            })
            .unwrap_err();
        assert!(matches!(err, AnalysisError::InvalidConfig { .. }), "{err}");
        assert!(sum_parent_ids("x", [u64::MAX, 1]).is_err());
        assert_eq!(sum_parent_ids("x", [2, 3]).unwrap(), 5);
    }

    #[test]
    fn rebinding_keeps_identity() {
        let (mut table, mut registry) = setup();
        registry.register(Fixed("is_a_late", vec![false, false, true])).unwrap();
        table.rebind_selection("a", "is_a_late").unwrap();
        let a = table.get("a").unwrap();
        assert_eq!((a.id, a.selection.as_deref()), (1, Some("is_a_late")));

        let batch = RecordBatch::new(3);
        let ctx = CategorizerContext::Production { batch: &batch };
        assert_eq!(table.memberships(&registry, &ctx).unwrap()["a"], vec![false, false, true]);

        let old = registry
            .rebind("is_b", Arc::new(Fixed("is_b", vec![false; 3])))
            .unwrap();
        assert_eq!(old.name(), "is_b");
        assert!(registry.rebind("nope", old).is_err());
    }

    #[test]
    fn unknown_categorizer_is_reported() {
        let (mut table, registry) = setup();
        table.add_category(Category::leaf(100, "c", "is_c")).unwrap();
        let batch = RecordBatch::new(3);
        let ctx = CategorizerContext::Production { batch: &batch };
        assert!(matches!(
            table.assign_category_ids(&registry, &ctx),
            Err(AnalysisError::UnknownCategorizer(name)) if name == "is_c"
        ));
    }
}
