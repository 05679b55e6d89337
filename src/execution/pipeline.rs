use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;
use tracing::debug;

use crate::category::{CategorizerContext, CategorizerRegistry, CategoryTable, CATEGORY_IDS};
use crate::config::AnalysisConfig;
use crate::error::AnalysisResult;
use crate::processing::reduce_events;
use crate::production::Producer;
use crate::selection::{SelectionPipeline, SelectionResult};
use crate::shift::{AliasStage, Shift};
use crate::stats::{standard_weights, GroupBy, StatsAccumulator, WeightExpr};
use crate::types::RecordBatch;

/// Everything needed to process one batch for one shift.
///
/// Per batch: column aliases of the shift → producers (in order) → selection-dependent
/// aliases → selection → `category_ids` in selection context → statistics. Nothing here is
/// mutated while batches run, so one pipeline is shared by all workers.
#[derive(Clone)]
pub struct AnalysisPipeline {
    producers: Vec<Arc<dyn Producer>>,
    selection: SelectionPipeline,
    categories: CategoryTable,
    categorizers: CategorizerRegistry,
    weights: IndexMap<String, WeightExpr>,
    groups: Vec<GroupBy>,
    shift: Shift,
}

impl fmt::Debug for AnalysisPipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AnalysisPipeline")
            .field(
                "producers",
                &self.producers.iter().map(|p| p.name()).collect::<Vec<_>>(),
            )
            .field("selection", &self.selection)
            .field("categories", &self.categories.len())
            .field("weights", &self.weights.keys().collect::<Vec<_>>())
            .field("shift", &self.shift.name)
            .finish()
    }
}

impl AnalysisPipeline {
    /// A pipeline booking the standard weights grouped by process, without categories.
    pub fn new(selection: SelectionPipeline, shift: Shift) -> Self {
        Self {
            producers: Vec::new(),
            selection,
            categories: CategoryTable::new(),
            categorizers: CategorizerRegistry::new(),
            weights: standard_weights(),
            groups: vec![GroupBy::process()],
            shift,
        }
    }

    /// Take categories, statistics bookkeeping and the named shift from `config`.
    pub fn from_config(config: &AnalysisConfig, selection: SelectionPipeline, shift: &str) -> AnalysisResult<Self> {
        Ok(Self::new(selection, config.shift(shift)?.clone())
            .with_categories(config.categories.clone(), config.categorizers.clone())
            .with_weights(config.stat_weights.clone())
            .with_groups(config.stat_groups.clone()))
    }

    /// Run `producer` before the selection.
    pub fn with_producer(mut self, producer: impl Producer + 'static) -> Self {
        self.producers.push(Arc::new(producer));
        self
    }

    pub fn with_categories(mut self, categories: CategoryTable, categorizers: CategorizerRegistry) -> Self {
        self.categories = categories;
        self.categorizers = categorizers;
        self
    }

    pub fn with_weights(mut self, weights: IndexMap<String, WeightExpr>) -> Self {
        self.weights = weights;
        self
    }

    pub fn with_groups(mut self, groups: Vec<GroupBy>) -> Self {
        self.groups = groups;
        self
    }

    pub fn shift(&self) -> &Shift {
        &self.shift
    }

    /// Process one batch. Any error is fatal for this batch only.
    pub fn process(&self, batch: &RecordBatch) -> AnalysisResult<BatchOutput> {
        let mut current = self.shift.apply_aliases(batch, AliasStage::Column)?;
        for producer in &self.producers {
            let uses = producer.uses();
            current.require_columns(producer.name(), uses.iter().map(String::as_str))?;
            current = producer.produce(&current)?;
        }

        let current = self.shift.apply_aliases(&current, AliasStage::SelectionDependent)?;
        let (mut events, results) = self.selection.run(&current)?;

        if !self.categories.is_empty() {
            let ctx = CategorizerContext::Selection {
                batch: &events,
                results: &results,
            };
            let ids = self.categories.assign_category_ids(&self.categorizers, &ctx)?;
            events = events.with_column(CATEGORY_IDS, ids)?;
        }

        let mask = results.event_mask(events.num_events());
        let stats = StatsAccumulator::from_batch(&events, &mask, &self.weights, &self.groups, &self.shift)?;
        debug!(
            selection = self.selection.name(),
            shift = %self.shift.name,
            events = events.num_events(),
            selected = mask.iter().filter(|m| **m).count(),
            "batch processed"
        );

        Ok(BatchOutput { events, results, stats })
    }
}

/// Result of processing one batch.
#[derive(Debug, Clone)]
pub struct BatchOutput {
    /// All events of the batch with the columns written by producers, selectors and
    /// `category_ids`.
    pub events: RecordBatch,
    pub results: SelectionResult,
    /// Statistics of this batch alone.
    pub stats: StatsAccumulator,
}

impl BatchOutput {
    pub fn selected_events(&self) -> usize {
        self.results
            .event_mask(self.events.num_events())
            .iter()
            .filter(|m| **m)
            .count()
    }

    /// Selected events with their retained objects only.
    pub fn reduce(&self) -> AnalysisResult<RecordBatch> {
        reduce_events(&self.events, &self.results)
    }
}
