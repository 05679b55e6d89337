//! Selection results and the step executor.
//!
//! A [`SelectionResult`] bundles, for one batch:
//!
//! - `steps`: named per-event masks whose AND is the event decision
//! - `objects`: retained object indices per `collection` / `subcollection`
//! - `aux`: free-form auxiliary columns (right-hand side wins on merge)
//!
//! Results of independent steps are folded with [`SelectionResult::merge`]. Step and object keys
//! must be disjoint across merged results; aux keys should be step-scoped because merge order
//! decides which value survives a collision.
//!
//! Null mask entries are never errors: every reduction treats them as `false`.

mod executor;
mod indices;
mod objects;

use indexmap::IndexMap;
use indexmap::map::Entry;

use crate::error::{AnalysisError, AnalysisResult, CollisionKind};
use crate::types::Column;

pub use executor::{FnSelector, SelectionPipeline, Selector};
pub use indices::{masked_sorted_indices, SortOrder};
pub use objects::{JetSelector, LeptonSelector, ObjectCuts};

/// Per-event boolean outcome; `None` is an undefined outcome and resolves to `false`.
pub type Mask = Vec<Option<bool>>;

/// Per-event lists of retained object indices.
pub type IndexLists = Vec<Vec<usize>>;

/// Replace undefined entries with `false`.
pub fn fill_none(mask: &[Option<bool>]) -> Vec<bool> {
    mask.iter().map(|v| v.unwrap_or(false)).collect()
}

/// Wrap a plain boolean vector as a [`Mask`].
pub fn mask_from(values: impl IntoIterator<Item = bool>) -> Mask {
    values.into_iter().map(Some).collect()
}

/// Logical AND across masks of length `len`, with undefined entries treated as `false`.
///
/// With no masks every event passes.
pub fn reduce_and<'a>(len: usize, masks: impl IntoIterator<Item = &'a Mask>) -> Vec<bool> {
    let mut out = vec![true; len];
    for mask in masks {
        for (i, slot) in out.iter_mut().enumerate() {
            *slot = *slot && mask.get(i).copied().flatten().unwrap_or(false);
        }
    }
    out
}

/// Mergeable outcome of one or more selection steps on a single batch.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SelectionResult {
    pub steps: IndexMap<String, Mask>,
    pub objects: IndexMap<String, IndexMap<String, IndexLists>>,
    pub aux: IndexMap<String, Column>,
    /// Final per-event decision, set by [`Self::finalize`].
    pub event: Option<Vec<bool>>,
}

impl SelectionResult {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_step(mut self, name: impl Into<String>, mask: Mask) -> Self {
        self.steps.insert(name.into(), mask);
        self
    }

    pub fn with_objects(
        mut self,
        collection: impl Into<String>,
        subcollection: impl Into<String>,
        indices: IndexLists,
    ) -> Self {
        self.objects
            .entry(collection.into())
            .or_default()
            .insert(subcollection.into(), indices);
        self
    }

    pub fn with_aux(mut self, key: impl Into<String>, value: Column) -> Self {
        self.aux.insert(key.into(), value);
        self
    }

    /// Combine two results.
    ///
    /// Step names and object `collection/subcollection` keys must not collide; aux keys are
    /// shallow-merged with `other` taking precedence. The operation is associative. A previously
    /// finalized decision is dropped since the merged steps invalidate it.
    pub fn merge(mut self, other: SelectionResult) -> AnalysisResult<Self> {
        for (name, mask) in other.steps {
            match self.steps.entry(name) {
                Entry::Occupied(e) => {
                    return Err(AnalysisError::KeyCollision {
                        kind: CollisionKind::Step,
                        key: e.key().clone(),
                    });
                }
                Entry::Vacant(e) => {
                    e.insert(mask);
                }
            }
        }

        for (collection, subs) in other.objects {
            let target = self.objects.entry(collection.clone()).or_default();
            for (sub, indices) in subs {
                match target.entry(sub) {
                    Entry::Occupied(e) => {
                        return Err(AnalysisError::KeyCollision {
                            kind: CollisionKind::Object,
                            key: format!("{collection}.{}", e.key()),
                        });
                    }
                    Entry::Vacant(e) => {
                        e.insert(indices);
                    }
                }
            }
        }

        self.aux.extend(other.aux);
        self.event = None;
        Ok(self)
    }

    /// Fold any number of results with [`Self::merge`], starting from an empty result.
    pub fn try_sum(results: impl IntoIterator<Item = SelectionResult>) -> AnalysisResult<Self> {
        results
            .into_iter()
            .try_fold(Self::new(), |acc, next| acc.merge(next))
    }

    /// In-place variant of [`Self::merge`].
    pub fn merge_in(&mut self, other: SelectionResult) -> AnalysisResult<()> {
        let merged = std::mem::take(self).merge(other)?;
        *self = merged;
        Ok(())
    }

    /// Fail-closed AND over all steps for a batch of `len` events.
    pub fn event_mask(&self, len: usize) -> Vec<bool> {
        match &self.event {
            Some(event) => event.clone(),
            None => reduce_and(len, self.steps.values()),
        }
    }

    /// Compute and store the final decision. Fails if any step or index list is misaligned.
    pub fn finalize(&mut self, len: usize) -> AnalysisResult<&[bool]> {
        self.validate_len(len)?;
        let event = self.event.insert(reduce_and(len, self.steps.values()));
        Ok(event.as_slice())
    }

    /// Check that every mask and index list covers exactly `len` events.
    pub fn validate_len(&self, len: usize) -> AnalysisResult<()> {
        let mismatch = |column: String, actual: usize| AnalysisError::LengthMismatch {
            column,
            expected: len,
            actual,
        };
        for (name, mask) in &self.steps {
            if mask.len() != len {
                return Err(mismatch(format!("steps.{name}"), mask.len()));
            }
        }
        for (collection, subs) in &self.objects {
            for (sub, indices) in subs {
                if indices.len() != len {
                    return Err(mismatch(format!("objects.{collection}.{sub}"), indices.len()));
                }
            }
        }
        for (key, column) in &self.aux {
            if column.len() != len {
                return Err(mismatch(format!("aux.{key}"), column.len()));
            }
        }
        Ok(())
    }

    /// Retained indices for `collection.subcollection`, if present.
    pub fn object_indices(&self, collection: &str, subcollection: &str) -> Option<&IndexLists> {
        self.objects.get(collection)?.get(subcollection)
    }

    /// Per-event number of retained objects for `collection.subcollection`.
    pub fn num_objects(&self, collection: &str, subcollection: &str) -> Option<Vec<usize>> {
        self.object_indices(collection, subcollection)
            .map(|lists| lists.iter().map(Vec::len).collect())
    }
}
