use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use tracing::debug;

use crate::error::{AnalysisError, AnalysisResult};
use crate::registry::{TransformKind, TransformRegistry, TransformSpec};
use crate::types::RecordBatch;

use super::SelectionResult;

/// A named selection step.
///
/// A selector declares the columns it reads (`uses`) and writes (`produces`), and returns an
/// updated batch together with its partial [`SelectionResult`]. The input batch is never
/// modified.
pub trait Selector: Send + Sync {
    fn name(&self) -> &str;

    fn uses(&self) -> BTreeSet<String>;

    fn produces(&self) -> BTreeSet<String> {
        BTreeSet::new()
    }

    fn select(&self, batch: &RecordBatch) -> AnalysisResult<(RecordBatch, SelectionResult)>;

    /// Registry declaration for this selector.
    fn spec(&self) -> TransformSpec {
        TransformSpec::new(self.name(), TransformKind::Selector)
            .uses(self.uses())
            .produces(self.produces())
    }
}

/// Adapter turning a closure into a [`Selector`] that only contributes a result.
pub struct FnSelector<F> {
    name: String,
    uses: BTreeSet<String>,
    func: F,
}

impl<F> FnSelector<F>
where
    F: Fn(&RecordBatch) -> AnalysisResult<SelectionResult> + Send + Sync,
{
    pub fn new<S: Into<String>>(
        name: impl Into<String>,
        uses: impl IntoIterator<Item = S>,
        func: F,
    ) -> Self {
        Self {
            name: name.into(),
            uses: uses.into_iter().map(Into::into).collect(),
            func,
        }
    }
}

impl<F> Selector for FnSelector<F>
where
    F: Fn(&RecordBatch) -> AnalysisResult<SelectionResult> + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn uses(&self) -> BTreeSet<String> {
        self.uses.clone()
    }

    fn select(&self, batch: &RecordBatch) -> AnalysisResult<(RecordBatch, SelectionResult)> {
        Ok((batch.clone(), (self.func)(batch)?))
    }
}

/// Ordered list of selectors run against one batch.
///
/// Each step is checked for its declared input columns right before it runs, so a step may rely
/// on columns written by earlier steps. The first failing step aborts the whole batch.
#[derive(Clone)]
pub struct SelectionPipeline {
    name: String,
    selectors: Vec<Arc<dyn Selector>>,
}

impl fmt::Debug for SelectionPipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SelectionPipeline")
            .field("name", &self.name)
            .field(
                "selectors",
                &self.selectors.iter().map(|s| s.name()).collect::<Vec<_>>(),
            )
            .finish()
    }
}

impl SelectionPipeline {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            selectors: Vec::new(),
        }
    }

    pub fn with_selector(mut self, selector: impl Selector + 'static) -> Self {
        self.selectors.push(Arc::new(selector));
        self
    }

    pub fn push(&mut self, selector: Arc<dyn Selector>) {
        self.selectors.push(selector);
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn step_names(&self) -> impl Iterator<Item = &str> {
        self.selectors.iter().map(|s| s.name())
    }

    /// Registry holding every selector plus the pipeline itself as their dependent.
    pub fn registry(&self) -> AnalysisResult<TransformRegistry> {
        let mut registry = TransformRegistry::new();
        for selector in &self.selectors {
            registry.register(selector.spec())?;
        }
        registry.register(
            TransformSpec::new(self.name.clone(), TransformKind::Selector)
                .depends_on(self.selectors.iter().map(|s| s.name().to_string())),
        )?;
        Ok(registry)
    }

    /// Run every step and return the updated batch plus the merged, finalized result.
    pub fn run(&self, batch: &RecordBatch) -> AnalysisResult<(RecordBatch, SelectionResult)> {
        let n = batch.num_events();
        let mut current = batch.clone();
        let mut results = SelectionResult::new();

        for selector in &self.selectors {
            let uses = selector.uses();
            current.require_columns(selector.name(), uses.iter().map(String::as_str))?;

            let (next, partial) = selector.select(&current)?;
            if next.num_events() != n {
                return Err(AnalysisError::LengthMismatch {
                    column: format!("{}:<batch>", selector.name()),
                    expected: n,
                    actual: next.num_events(),
                });
            }
            partial.validate_len(n)?;
            debug!(
                pipeline = %self.name,
                step = selector.name(),
                steps = partial.steps.len(),
                "selection step finished"
            );

            results.merge_in(partial)?;
            current = next;
        }

        results.finalize(n)?;
        Ok((current, results))
    }
}
