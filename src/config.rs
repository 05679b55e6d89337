//! Analysis configuration: the mutable declaration context shared by setup routines.
//!
//! Setup happens single-threaded before any batch runs. Declaration routines receive
//! `&mut AnalysisConfig` and own disjoint parts of it (categories, shifts, weights). Routines that
//! must run at most once per configuration go through [`AnalysisConfig::call_once`], which records
//! a marker in [`AnalysisConfig::applied_markers`].

use std::collections::BTreeSet;
use std::fs;
use std::path::Path;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::category::{
    create_category_combinations, Category, CategorizerRegistry, CategoryGroup, CategoryTable,
    CombinationPolicy,
};
use crate::error::{AnalysisError, AnalysisResult};
use crate::execution::ExecutionOptions;
use crate::shift::{AliasStage, Shift, ShiftKind, ShiftRegistry};
use crate::stats::{standard_weights, GroupBy, WeightExpr};

/// Weight column name mapped to the shift sources that vary it.
pub type WeightDeclarations = IndexMap<String, Vec<String>>;

#[derive(Debug, Clone)]
pub struct AnalysisConfig {
    pub name: String,
    pub categories: CategoryTable,
    pub categorizers: CategorizerRegistry,
    pub shifts: ShiftRegistry,
    /// Weights multiplied into `event_weight` for every dataset.
    pub event_weights: WeightDeclarations,
    /// Additional weights per dataset name; missing columns are tolerated at runtime.
    pub dataset_weights: IndexMap<String, WeightDeclarations>,
    /// Process name to process id.
    pub process_ids: IndexMap<String, i64>,
    /// Weight expressions booked by the statistics accumulator.
    pub stat_weights: IndexMap<String, WeightExpr>,
    /// Groupings used by the statistics accumulator.
    pub stat_groups: Vec<GroupBy>,
    pub execution: ExecutionOptions,
    applied: BTreeSet<String>,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self::new("default")
    }
}

impl AnalysisConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            categories: CategoryTable::new(),
            categorizers: CategorizerRegistry::new(),
            shifts: ShiftRegistry::new(),
            event_weights: IndexMap::new(),
            dataset_weights: IndexMap::new(),
            process_ids: IndexMap::new(),
            stat_weights: standard_weights(),
            stat_groups: vec![GroupBy::process()],
            execution: ExecutionOptions::default(),
            applied: BTreeSet::new(),
        }
    }

    /// Run `declare` unless `marker` was already applied. Returns whether it ran.
    ///
    /// The marker is recorded before `declare` runs so nested calls with the same marker are
    /// no-ops; it is removed again if `declare` fails.
    pub fn call_once<F>(&mut self, marker: &str, declare: F) -> AnalysisResult<bool>
    where
        F: FnOnce(&mut Self) -> AnalysisResult<()>,
    {
        if !self.applied.insert(marker.to_string()) {
            debug!(config = %self.name, marker, "declaration already applied");
            return Ok(false);
        }
        if let Err(e) = declare(self) {
            self.applied.remove(marker);
            return Err(e);
        }
        Ok(true)
    }

    pub fn applied_markers(&self) -> &BTreeSet<String> {
        &self.applied
    }

    pub fn is_applied(&self, marker: &str) -> bool {
        self.applied.contains(marker)
    }

    pub fn add_category(&mut self, category: Category) -> AnalysisResult<bool> {
        self.categories.add_category(category)
    }

    /// Derive combined categories; see [`create_category_combinations`].
    pub fn add_category_combinations(
        &mut self,
        groups: &[CategoryGroup],
        policy: &CombinationPolicy,
    ) -> AnalysisResult<usize> {
        create_category_combinations(&mut self.categories, groups, policy)
    }

    pub fn add_process(&mut self, name: impl Into<String>, id: i64) -> AnalysisResult<()> {
        let name = name.into();
        if let Some((owner, _)) = self.process_ids.iter().find(|(n, pid)| **pid == id && **n != name) {
            return Err(AnalysisError::config(format!(
                "process id {id} of '{name}' is already used by '{owner}'"
            )));
        }
        match self.process_ids.get(&name) {
            Some(existing) if *existing != id => Err(AnalysisError::config(format!(
                "process '{name}' already has id {existing}"
            ))),
            _ => {
                self.process_ids.insert(name, id);
                Ok(())
            }
        }
    }

    pub fn process_id(&self, name: &str) -> AnalysisResult<i64> {
        self.process_ids
            .get(name)
            .copied()
            .ok_or_else(|| AnalysisError::config(format!("unknown process '{name}'")))
    }

    /// Declare a weight column that enters `event_weight` for every dataset.
    pub fn add_event_weight<S: AsRef<str>>(
        &mut self,
        column: impl Into<String>,
        shift_sources: impl IntoIterator<Item = S>,
    ) -> AnalysisResult<()> {
        let sources = self.known_sources(shift_sources)?;
        self.event_weights.insert(column.into(), sources);
        Ok(())
    }

    /// Declare a weight column that only applies to `dataset`.
    pub fn add_dataset_weight<S: AsRef<str>>(
        &mut self,
        dataset: impl Into<String>,
        column: impl Into<String>,
        shift_sources: impl IntoIterator<Item = S>,
    ) -> AnalysisResult<()> {
        let sources = self.known_sources(shift_sources)?;
        self.dataset_weights
            .entry(dataset.into())
            .or_default()
            .insert(column.into(), sources);
        Ok(())
    }

    fn known_sources<S: AsRef<str>>(
        &self,
        sources: impl IntoIterator<Item = S>,
    ) -> AnalysisResult<Vec<String>> {
        sources
            .into_iter()
            .map(|s| {
                let s = s.as_ref();
                self.shifts.shifts_for_sources([s])?;
                Ok(s.to_string())
            })
            .collect()
    }

    /// Weight declarations that apply to `dataset`, global ones first.
    pub fn weights_for_dataset(&self, dataset: Option<&str>) -> (&WeightDeclarations, Option<&WeightDeclarations>) {
        (
            &self.event_weights,
            dataset.and_then(|d| self.dataset_weights.get(d)),
        )
    }

    pub fn shift(&self, name: &str) -> AnalysisResult<&Shift> {
        self.shifts.get(name)
    }

    /// Apply a parsed configuration file on top of this configuration.
    ///
    /// Either the whole file is applied or, on error, the configuration is left unchanged.
    pub fn apply_file(&mut self, file: ConfigFile) -> AnalysisResult<()> {
        let mut staged = self.clone();
        staged.apply_file_in_place(file)?;
        *self = staged;
        Ok(())
    }

    fn apply_file_in_place(&mut self, file: ConfigFile) -> AnalysisResult<()> {
        if let Some(name) = file.name {
            self.name = name;
        }
        for shift in &file.shifts {
            self.shifts
                .add_shift_pair(&shift.source, shift.up_id, shift.down_id, shift.kind, &shift.tag_refs())?;
            if !shift.aliases.is_empty() {
                self.shifts.add_aliases(&shift.source, &shift.aliases, AliasStage::Column)?;
            }
            if !shift.selection_dependent_aliases.is_empty() {
                self.shifts.add_aliases(
                    &shift.source,
                    &shift.selection_dependent_aliases,
                    AliasStage::SelectionDependent,
                )?;
            }
        }
        for (name, id) in file.processes {
            self.add_process(name, id)?;
        }
        for category in file.categories {
            self.add_category(category)?;
        }
        if !file.category_groups.is_empty() {
            self.add_category_combinations(&file.category_groups, &CombinationPolicy::default())?;
        }
        for (column, sources) in file.event_weights {
            self.add_event_weight(column, sources)?;
        }
        for (dataset, weights) in file.dataset_weights {
            for (column, sources) in weights {
                self.add_dataset_weight(dataset.clone(), column, sources)?;
            }
        }
        if let Some(weights) = file.stat_weights {
            self.stat_weights = weights;
        }
        if let Some(groups) = file.stat_groups {
            self.stat_groups = groups;
        }
        if let Some(execution) = file.execution {
            self.execution = execution;
        }
        debug!(
            config = %self.name,
            categories = self.categories.len(),
            shifts = self.shifts.iter().count(),
            "applied configuration file"
        );
        Ok(())
    }

    pub fn from_json_str(input: &str) -> AnalysisResult<Self> {
        let file: ConfigFile = serde_json::from_str(input)?;
        let mut config = Self::default();
        config.apply_file(file)?;
        Ok(config)
    }

    pub fn from_json_path(path: impl AsRef<Path>) -> AnalysisResult<Self> {
        Self::from_json_str(&fs::read_to_string(path)?)
    }
}

/// Up/down shift pair as declared in a configuration file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShiftDecl {
    pub source: String,
    pub up_id: u64,
    pub down_id: u64,
    #[serde(default)]
    pub kind: ShiftKind,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub aliases: IndexMap<String, String>,
    #[serde(default)]
    pub selection_dependent_aliases: IndexMap<String, String>,
}

impl ShiftDecl {
    fn tag_refs(&self) -> Vec<&str> {
        self.tags.iter().map(String::as_str).collect()
    }
}

/// JSON configuration file.
///
/// ```json
/// {
///   "name": "run2_2017",
///   "shifts": [{"source": "jec_Total", "up_id": 5000, "down_id": 5001,
///               "selection_dependent_aliases": {"Jet.pt": "Jet.pt_{name}"}}],
///   "processes": {"tt": 7},
///   "categories": [{"id": 30, "name": "2e", "selection": "catid_selection_2e"}],
///   "event_weights": {"normalization_weight": [], "pu_weight": []}
/// }
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigFile {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub shifts: Vec<ShiftDecl>,
    #[serde(default)]
    pub processes: IndexMap<String, i64>,
    #[serde(default)]
    pub categories: Vec<Category>,
    #[serde(default)]
    pub category_groups: Vec<CategoryGroup>,
    #[serde(default)]
    pub event_weights: WeightDeclarations,
    #[serde(default)]
    pub dataset_weights: IndexMap<String, WeightDeclarations>,
    #[serde(default)]
    pub stat_weights: Option<IndexMap<String, WeightExpr>>,
    #[serde(default)]
    pub stat_groups: Option<Vec<GroupBy>>,
    #[serde(default)]
    pub execution: Option<ExecutionOptions>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn call_once_runs_a_declaration_exactly_once() {
        let mut config = AnalysisConfig::new("test");
        let declare = |cfg: &mut AnalysisConfig| -> AnalysisResult<()> {
            cfg.add_category(Category::leaf(1, "incl", "catid_incl"))?;
            Ok(())
        };
        assert!(config.call_once("add_categories", declare).unwrap());
        assert!(!config.call_once("add_categories", declare).unwrap());
        assert_eq!(config.categories.len(), 1);
        assert!(config.applied_markers().contains("add_categories"));
    }

    #[test]
    fn failed_declaration_can_be_retried() {
        let mut config = AnalysisConfig::new("test");
        let err = config
            .call_once("broken", |_| Err(AnalysisError::config("boom")))
            .unwrap_err();
        assert!(matches!(err, AnalysisError::InvalidConfig { .. }));
        assert!(!config.is_applied("broken"));
        assert!(config.call_once("broken", |_| Ok(())).unwrap());
    }

    #[test]
    fn weights_require_declared_shift_sources() {
        let mut config = AnalysisConfig::new("test");
        config
            .shifts
            .add_shift_pair("minbias_xs", 7, 8, ShiftKind::Shape, &[])
            .unwrap();
        config.add_event_weight("pu_weight", ["minbias_xs"]).unwrap();
        config
            .add_event_weight("normalization_weight", Vec::<String>::new())
            .unwrap();
        assert!(matches!(
            config.add_event_weight("e_sf", ["e_sf"]),
            Err(AnalysisError::UnknownShift(_))
        ));
        config.add_dataset_weight("tt_sl", "top_pt_weight", Vec::<String>::new()).unwrap();

        let (global, dataset) = config.weights_for_dataset(Some("tt_sl"));
        assert_eq!(global.keys().collect::<Vec<_>>(), vec!["pu_weight", "normalization_weight"]);
        assert!(dataset.is_some_and(|w| w.contains_key("top_pt_weight")));
        assert!(config.weights_for_dataset(Some("dy")).1.is_none());
    }

    #[test]
    fn process_ids_are_unique() {
        let mut config = AnalysisConfig::new("test");
        config.add_process("tt", 7).unwrap();
        config.add_process("tt", 7).unwrap();
        assert!(config.add_process("tt", 8).is_err());
        assert!(config.add_process("dy", 7).is_err());
        assert_eq!(config.process_id("tt").unwrap(), 7);
    }

    #[test]
    fn json_file_declares_everything() {
        let input = r#"{
            "name": "run2_2017",
            "shifts": [
                {"source": "jec_Total", "up_id": 5000, "down_id": 5001,
                 "selection_dependent_aliases": {"Jet.pt": "Jet.pt_{name}"}},
                {"source": "minbias_xs", "up_id": 7, "down_id": 8,
                 "aliases": {"pu_weight": "pu_weight_{name}"}}
            ],
            "processes": {"tt": 7},
            "categories": [
                {"id": 30, "name": "2e", "selection": "catid_selection_2e"},
                {"id": 40, "name": "2mu", "selection": "catid_selection_2mu"},
                {"id": 100, "name": "2j", "selection": "cat_2j", "label": "2 jets"}
            ],
            "category_groups": [
                {"name": "lepton", "categories": ["2e", "2mu"]},
                {"name": "jets", "categories": ["2j"]}
            ],
            "event_weights": {"pu_weight": ["minbias_xs"]},
            "stat_groups": [{"name": "process", "column": "process_id"}]
        }"#;
        let config = AnalysisConfig::from_json_str(input).unwrap();
        assert_eq!(config.name, "run2_2017");
        assert_eq!(
            config
                .shifts
                .resolve_column("jec_Total_down", "Jet.pt", AliasStage::SelectionDependent)
                .unwrap(),
            "Jet.pt_jec_Total_down"
        );
        assert_eq!(config.categories.get("2mu__2j").unwrap().id, 140);
        assert_eq!(config.process_id("tt").unwrap(), 7);
        assert_eq!(config.event_weights["pu_weight"], vec!["minbias_xs"]);
        assert_eq!(config.stat_weights.len(), 4);
    }

    #[test]
    fn failed_file_leaves_configuration_unchanged() {
        let mut config = AnalysisConfig::new("base");
        config.add_category(Category::leaf(30, "inclusive", "catid_incl")).unwrap();
        let file: ConfigFile = serde_json::from_str(
            r#"{
                "name": "renamed",
                "shifts": [{"source": "jec_Total", "up_id": 5000, "down_id": 5001}],
                "processes": {"tt": 7},
                "categories": [{"id": 30, "name": "2e", "selection": "catid_selection_2e"}]
            }"#,
        )
        .unwrap();

        let err = config.apply_file(file.clone()).unwrap_err();
        assert!(matches!(err, AnalysisError::CategoryIdCollision { id: 30, .. }));
        assert_eq!(config.name, "base");
        assert!(config.shift("jec_Total_up").is_err());
        assert!(config.process_id("tt").is_err());
        assert_eq!(config.categories.len(), 1);

        // nothing half-declared blocks a corrected retry
        let mut fixed = file;
        fixed.categories[0].id = 31;
        config.apply_file(fixed).unwrap();
        assert_eq!(config.name, "renamed");
        assert_eq!(config.shift("jec_Total_up").unwrap().id, 5000);
    }

    #[test]
    fn unknown_fields_are_rejected() {
        assert!(matches!(
            AnalysisConfig::from_json_str(r#"{"categoriez": []}"#),
            Err(AnalysisError::Json(_))
        ));
    }
}
