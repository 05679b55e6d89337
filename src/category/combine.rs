use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::AnalysisResult;

use super::{sum_parent_ids, Category, CategoryTable};

/// Mutually exclusive leaf categories combined as one axis of the cartesian product.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryGroup {
    pub name: String,
    pub categories: Vec<String>,
    /// Also combine "nothing from this group", so combinations over fewer groups are created.
    #[serde(default = "default_include_none")]
    pub include_none: bool,
}

fn default_include_none() -> bool {
    true
}

impl CategoryGroup {
    pub fn new<S: Into<String>>(name: impl Into<String>, categories: impl IntoIterator<Item = S>) -> Self {
        Self {
            name: name.into(),
            categories: categories.into_iter().map(Into::into).collect(),
            include_none: true,
        }
    }

    /// Require exactly one category of this group in every combination.
    pub fn required(mut self) -> Self {
        self.include_none = false;
        self
    }
}

type NameFn = Box<dyn Fn(&[&Category]) -> String + Send + Sync>;
type LabelFn = Box<dyn Fn(&[&Category]) -> Option<String> + Send + Sync>;
type SkipFn = Box<dyn Fn(&[&Category]) -> bool + Send + Sync>;

/// Pluggable naming, labelling and veto rules for derived categories.
///
/// Every callback receives the real parents of one combination in group order.
pub struct CombinationPolicy {
    name_fn: NameFn,
    label_fn: LabelFn,
    skip_fn: SkipFn,
}

impl fmt::Debug for CombinationPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CombinationPolicy").finish_non_exhaustive()
    }
}

impl Default for CombinationPolicy {
    fn default() -> Self {
        Self {
            name_fn: Box::new(|parents: &[&Category]| {
                parents
                    .iter()
                    .map(|c| c.name.as_str())
                    .collect::<Vec<_>>()
                    .join("__")
            }),
            label_fn: Box::new(|parents: &[&Category]| {
                Some(
                    parents
                        .iter()
                        .map(|c| c.display_label())
                        .collect::<Vec<_>>()
                        .join("\n"),
                )
            }),
            skip_fn: Box::new(|_: &[&Category]| false),
        }
    }
}

impl CombinationPolicy {
    pub fn with_name_fn(mut self, f: impl Fn(&[&Category]) -> String + Send + Sync + 'static) -> Self {
        self.name_fn = Box::new(f);
        self
    }

    pub fn with_label_fn(
        mut self,
        f: impl Fn(&[&Category]) -> Option<String> + Send + Sync + 'static,
    ) -> Self {
        self.label_fn = Box::new(f);
        self
    }

    pub fn with_skip_fn(mut self, f: impl Fn(&[&Category]) -> bool + Send + Sync + 'static) -> Self {
        self.skip_fn = Box::new(f);
        self
    }
}

/// Derive intersection categories from the cartesian product of `groups`.
///
/// Each combination of at least two real parents becomes a category with
/// `id = sum(parent ids)` whose membership is the AND of its parents. Already existing identical
/// combinations are left alone. Returns the number of newly created categories; on error the
/// table is left unchanged.
pub fn create_category_combinations(
    table: &mut CategoryTable,
    groups: &[CategoryGroup],
    policy: &CombinationPolicy,
) -> AnalysisResult<usize> {
    let mut slots: Vec<Vec<Option<&Category>>> = Vec::with_capacity(groups.len());
    for group in groups {
        let mut options = Vec::with_capacity(group.categories.len() + 1);
        if group.include_none {
            options.push(None);
        }
        for name in &group.categories {
            options.push(Some(table.get(name)?));
        }
        slots.push(options);
    }

    let mut derived = Vec::new();
    for combination in cartesian(&slots) {
        let parents: Vec<&Category> = combination.into_iter().flatten().collect();
        if parents.len() < 2 || (policy.skip_fn)(&parents) {
            continue;
        }
        let name = (policy.name_fn)(&parents);
        derived.push(Category {
            id: sum_parent_ids(&name, parents.iter().map(|c| c.id))?,
            name,
            selection: None,
            label: (policy.label_fn)(&parents),
            parents: parents.iter().map(|c| c.name.clone()).collect(),
        });
    }

    let mut staged = table.clone();
    let mut created = 0;
    for category in derived {
        if staged.add_category(category)? {
            created += 1;
        }
    }
    *table = staged;

    debug!(groups = groups.len(), created, "created category combinations");
    Ok(created)
}

/// All picks of one option per slot, first slot varying slowest.
fn cartesian<T: Copy>(slots: &[Vec<T>]) -> Vec<Vec<T>> {
    slots.iter().fold(vec![Vec::new()], |acc, options| {
        acc.iter()
            .flat_map(|prefix| {
                options.iter().map(move |option| {
                    let mut next = prefix.clone();
                    next.push(*option);
                    next
                })
            })
            .collect()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AnalysisError;

    fn table() -> CategoryTable {
        let mut table = CategoryTable::new();
        for (id, name) in [(10, "2e"), (20, "2mu"), (100, "0j"), (200, "2j"), (1000, "os")] {
            table
                .add_category(Category::leaf(id, name, format!("cat_{name}")))
                .unwrap();
        }
        table
    }

    fn groups() -> Vec<CategoryGroup> {
        vec![
            CategoryGroup::new("lepton", ["2e", "2mu"]),
            CategoryGroup::new("jets", ["0j", "2j"]),
            CategoryGroup::new("charge", ["os"]),
        ]
    }

    #[test]
    fn combinations_sum_ids_and_join_names() {
        let mut table = table();
        let created = create_category_combinations(&mut table, &groups(), &CombinationPolicy::default())
            .unwrap();
        // pairs: 2*2 + 2*1 + 2*1 = 8, triples: 2*2*1 = 4
        assert_eq!(created, 12);

        let c = table.get("2mu__2j__os").unwrap();
        assert_eq!(c.id, 20 + 200 + 1000);
        assert_eq!(c.parents, vec!["2mu", "2j", "os"]);
        assert_eq!(c.label.as_deref(), Some("2mu\n2j\nos"));
        assert!(table.get("2e__os").is_ok());
        assert!(table.get("2e").unwrap().parents.is_empty());
    }

    #[test]
    fn repeated_creation_is_idempotent() {
        let mut table = table();
        let policy = CombinationPolicy::default();
        create_category_combinations(&mut table, &groups(), &policy).unwrap();
        let len = table.len();
        assert_eq!(create_category_combinations(&mut table, &groups(), &policy).unwrap(), 0);
        assert_eq!(table.len(), len);
    }

    #[test]
    fn skip_and_custom_naming() {
        let mut table = table();
        let policy = CombinationPolicy::default()
            .with_name_fn(|parents| {
                parents.iter().map(|c| c.name.as_str()).collect::<Vec<_>>().join("_")
            })
            .with_label_fn(|_| None)
            .with_skip_fn(|parents| parents.iter().any(|c| c.name == "0j"));
        let groups = vec![
            CategoryGroup::new("lepton", ["2e", "2mu"]).required(),
            CategoryGroup::new("jets", ["0j", "2j"]).required(),
        ];
        assert_eq!(create_category_combinations(&mut table, &groups, &policy).unwrap(), 2);
        assert!(table.get("2e_2j").unwrap().label.is_none());
        assert!(table.get("2e_0j").is_err());
    }

    #[test]
    fn id_collisions_abort_without_partial_writes() {
        let mut table = table();
        // 2e + 0j = 110 collides with this leaf
        table.add_category(Category::leaf(110, "taken", "cat_taken")).unwrap();
        let before = table.clone();
        let err = create_category_combinations(&mut table, &groups(), &CombinationPolicy::default())
            .unwrap_err();
        assert!(matches!(err, AnalysisError::CategoryIdCollision { id: 110, .. }));
        assert_eq!(table, before);
    }

    #[test]
    fn overflowing_id_sums_are_rejected() {
        let mut table = CategoryTable::new();
        let max = i64::MAX as u64;
        for (id, name) in [(max, "x"), (max - 1, "y"), (max - 2, "z")] {
            table.add_category(Category::leaf(id, name, format!("cat_{name}"))).unwrap();
        }
        let before = table.clone();
        let groups = vec![
            CategoryGroup::new("gx", ["x"]).required(),
            CategoryGroup::new("gy", ["y"]).required(),
            CategoryGroup::new("gz", ["z"]).required(),
        ];
        let err = create_category_combinations(&mut table, &groups, &CombinationPolicy::default())
            .unwrap_err();
        assert!(matches!(err, AnalysisError::InvalidConfig { .. }), "{err}");
        assert!(err.to_string().contains("x__y__z"), "{err}");
        assert_eq!(table, before);
    }

    #[test]
    fn unknown_group_members_fail() {
        let mut table = table();
        let groups = vec![CategoryGroup::new("x", ["2e", "missing"])];
        assert!(matches!(
            create_category_combinations(&mut table, &groups, &CombinationPolicy::default()),
            Err(AnalysisError::UnknownCategory(_))
        ));
    }
}
