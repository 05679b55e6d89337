//! Systematic shifts and column alias resolution.
//!
//! Every non-nominal shift exists as an `up`/`down` pair named `<source>_up` / `<source>_down`.
//! Alias patterns declared for a source are expanded per direction (`{name}` becomes the full
//! shift name, `{direction}` the direction) and stored as literal `source column -> target column`
//! renames on the shift. Resolving a column for the nominal shift is the identity.

use std::collections::BTreeSet;
use std::fmt;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::error::{AnalysisError, AnalysisResult, CollisionKind};
use crate::types::RecordBatch;

/// Name of the single identity shift.
pub const NOMINAL: &str = "nominal";

/// Direction of a systematic variation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Up,
    Down,
}

impl Direction {
    pub const BOTH: [Direction; 2] = [Direction::Up, Direction::Down];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Up => "up",
            Self::Down => "down",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a shift affects the analysis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ShiftKind {
    Nominal,
    #[default]
    Shape,
    Rate,
}

impl ShiftKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Nominal => "nominal",
            Self::Shape => "shape",
            Self::Rate => "rate",
        }
    }
}

/// Which alias table applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AliasStage {
    /// Aliases consulted by producers after the selection is finalized.
    Column,
    /// Aliases that change inputs of the selection itself (e.g. shifted jet kinematics).
    SelectionDependent,
}

/// `"<source>_<direction>"`.
pub fn join_name(source: &str, direction: Direction) -> String {
    format!("{source}_{direction}")
}

/// Inverse of [`join_name`]; the nominal shift has no direction.
pub fn split_name(name: &str) -> AnalysisResult<(&str, Option<Direction>)> {
    if name == NOMINAL {
        return Ok((NOMINAL, None));
    }
    if let Some(source) = name.strip_suffix("_up") {
        return Ok((source, Some(Direction::Up)));
    }
    if let Some(source) = name.strip_suffix("_down") {
        return Ok((source, Some(Direction::Down)));
    }
    Err(AnalysisError::config(format!(
        "shift name '{name}' must be 'nominal' or end with '_up'/'_down'"
    )))
}

/// One directional shift instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Shift {
    pub name: String,
    pub id: u64,
    pub kind: ShiftKind,
    /// Stem shared by the up/down pair (`"nominal"` for the nominal shift).
    pub source: String,
    pub direction: Option<Direction>,
    pub tags: BTreeSet<String>,
    pub column_aliases: IndexMap<String, String>,
    pub column_aliases_selection_dependent: IndexMap<String, String>,
}

impl Shift {
    pub fn is_nominal(&self) -> bool {
        self.direction.is_none()
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.contains(tag)
    }

    pub fn aliases(&self, stage: AliasStage) -> &IndexMap<String, String> {
        match stage {
            AliasStage::Column => &self.column_aliases,
            AliasStage::SelectionDependent => &self.column_aliases_selection_dependent,
        }
    }

    fn aliases_mut(&mut self, stage: AliasStage) -> &mut IndexMap<String, String> {
        match stage {
            AliasStage::Column => &mut self.column_aliases,
            AliasStage::SelectionDependent => &mut self.column_aliases_selection_dependent,
        }
    }

    /// Column to read instead of `column` under this shift.
    pub fn resolve<'a>(&'a self, column: &'a str, stage: AliasStage) -> &'a str {
        self.aliases(stage)
            .get(column)
            .map(String::as_str)
            .unwrap_or(column)
    }

    /// A batch in which every aliased column of `stage` holds the values of its target column,
    /// so transforms reading the nominal names see the shifted values.
    ///
    /// An alias whose target is absent is a [`AnalysisError::MissingColumn`] if the nominal
    /// column is present (the shifted variant was never produced) and is skipped if neither is
    /// present. The nominal shift returns the batch unchanged.
    pub fn apply_aliases(&self, batch: &RecordBatch, stage: AliasStage) -> AnalysisResult<RecordBatch> {
        let mut out = batch.clone();
        if self.is_nominal() {
            return Ok(out);
        }
        for (source, target) in self.aliases(stage) {
            match batch.column(target) {
                Some(column) => out = out.with_column(source.clone(), column.clone())?,
                None if batch.has_column(source) => {
                    return Err(AnalysisError::missing(self.name.as_str(), target.as_str()));
                }
                None => {}
            }
        }
        Ok(out)
    }

    /// Substitute `{name}`, `{direction}`, `{source}`, `{id}` and `{type}` in `pattern`.
    pub fn format_pattern(&self, pattern: &str) -> AnalysisResult<String> {
        let mut out = String::with_capacity(pattern.len() + self.name.len());
        let mut rest = pattern;
        while let Some(start) = rest.find('{') {
            out.push_str(&rest[..start]);
            let after = &rest[start + 1..];
            let end = after.find('}').ok_or_else(|| {
                AnalysisError::config(format!("unterminated placeholder in alias pattern '{pattern}'"))
            })?;
            let token = &after[..end];
            match token {
                "name" => out.push_str(&self.name),
                "direction" => out.push_str(self.direction.map_or("", |d| d.as_str())),
                "source" => out.push_str(&self.source),
                "id" => out.push_str(&self.id.to_string()),
                "type" => out.push_str(self.kind.as_str()),
                other => {
                    return Err(AnalysisError::config(format!(
                        "unknown placeholder '{{{other}}}' in alias pattern '{pattern}'"
                    )));
                }
            }
            rest = &after[end + 1..];
        }
        out.push_str(rest);
        Ok(out)
    }
}

/// Registry of all shifts of a configuration. Always contains the nominal shift with id 0.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ShiftRegistry {
    shifts: IndexMap<String, Shift>,
}

impl Default for ShiftRegistry {
    fn default() -> Self {
        let nominal = Shift {
            name: NOMINAL.to_string(),
            id: 0,
            kind: ShiftKind::Nominal,
            source: NOMINAL.to_string(),
            direction: None,
            tags: BTreeSet::new(),
            column_aliases: IndexMap::new(),
            column_aliases_selection_dependent: IndexMap::new(),
        };
        Self {
            shifts: IndexMap::from([(NOMINAL.to_string(), nominal)]),
        }
    }
}

impl ShiftRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare one directional shift. Only reachable through [`Self::add_shift_pair`] so that
    /// every source has both directions.
    ///
    /// Re-declaring an existing shift with the same id and kind is a no-op; any other reuse of a
    /// name or id is a [`AnalysisError::KeyCollision`].
    pub(crate) fn add_shift<S: Into<String>>(
        &mut self,
        name: &str,
        id: u64,
        kind: ShiftKind,
        tags: impl IntoIterator<Item = S>,
    ) -> AnalysisResult<&Shift> {
        let (source, direction) = split_name(name)?;
        if direction.is_none() {
            return Err(AnalysisError::config("the nominal shift is predefined"));
        }

        if let Some(existing) = self.shifts.get(name) {
            if existing.id == id && existing.kind == kind {
                return Ok(&self.shifts[name]);
            }
            return Err(AnalysisError::KeyCollision {
                kind: CollisionKind::Shift,
                key: name.to_string(),
            });
        }
        if let Some(owner) = self.shifts.values().find(|s| s.id == id) {
            return Err(AnalysisError::KeyCollision {
                kind: CollisionKind::Shift,
                key: format!("id {id} ({})", owner.name),
            });
        }

        let shift = Shift {
            name: name.to_string(),
            id,
            kind,
            source: source.to_string(),
            direction,
            tags: tags.into_iter().map(Into::into).collect(),
            column_aliases: IndexMap::new(),
            column_aliases_selection_dependent: IndexMap::new(),
        };
        self.shifts.insert(name.to_string(), shift);
        Ok(&self.shifts[name])
    }

    /// Declare `<source>_up` with `up_id` and `<source>_down` with `down_id`.
    ///
    /// Either both directions are added or, on error, neither.
    pub fn add_shift_pair(
        &mut self,
        source: &str,
        up_id: u64,
        down_id: u64,
        kind: ShiftKind,
        tags: &[&str],
    ) -> AnalysisResult<()> {
        if up_id == down_id {
            return Err(AnalysisError::KeyCollision {
                kind: CollisionKind::Shift,
                key: format!("id {up_id} ({source})"),
            });
        }
        let mut staged = self.clone();
        staged.add_shift(&join_name(source, Direction::Up), up_id, kind, tags.iter().copied())?;
        staged.add_shift(&join_name(source, Direction::Down), down_id, kind, tags.iter().copied())?;
        *self = staged;
        Ok(())
    }

    /// Register alias patterns for both directions of `source`.
    ///
    /// Patterns are formatted per direction and extend the existing alias table. Mapping a source
    /// column that already has a different target in the same shift is an
    /// [`AnalysisError::AliasConflict`]; repeating an identical mapping is a no-op. Nothing is
    /// written unless both directions validate.
    pub fn add_aliases<K: AsRef<str>, V: AsRef<str>>(
        &mut self,
        source: &str,
        aliases: impl IntoIterator<Item = (K, V)>,
        stage: AliasStage,
    ) -> AnalysisResult<()> {
        let aliases: Vec<(K, V)> = aliases.into_iter().collect();
        let mut staged: Vec<(String, Vec<(String, String)>)> = Vec::with_capacity(2);

        for direction in Direction::BOTH {
            let name = join_name(source, direction);
            let shift = self.get(&name)?;
            let mut formatted = Vec::with_capacity(aliases.len());
            for (pattern, replacement) in &aliases {
                let from = shift.format_pattern(pattern.as_ref())?;
                let to = shift.format_pattern(replacement.as_ref())?;
                let pending = formatted.iter().find(|(f, _): &&(String, String)| *f == from);
                let existing = shift.aliases(stage).get(&from).or(pending.map(|(_, t)| t));
                if let Some(existing) = existing {
                    if *existing != to {
                        return Err(AnalysisError::AliasConflict {
                            shift: name,
                            source_column: from,
                            existing: existing.clone(),
                            replacement: to,
                        });
                    }
                }
                formatted.push((from, to));
            }
            staged.push((name, formatted));
        }

        for (name, formatted) in staged {
            if let Some(shift) = self.shifts.get_mut(&name) {
                shift.aliases_mut(stage).extend(formatted);
            }
        }
        Ok(())
    }

    pub fn get(&self, name: &str) -> AnalysisResult<&Shift> {
        self.shifts
            .get(name)
            .ok_or_else(|| AnalysisError::UnknownShift(name.to_string()))
    }

    pub fn nominal(&self) -> &Shift {
        &self.shifts[NOMINAL]
    }

    pub fn by_id(&self, id: u64) -> Option<&Shift> {
        self.shifts.values().find(|s| s.id == id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Shift> {
        self.shifts.values()
    }

    /// Distinct shift sources (excluding nominal) in declaration order.
    pub fn sources(&self) -> Vec<&str> {
        let mut out: Vec<&str> = Vec::new();
        for shift in self.shifts.values().filter(|s| !s.is_nominal()) {
            if !out.contains(&shift.source.as_str()) {
                out.push(&shift.source);
            }
        }
        out
    }

    /// Up and down shifts for each source, in the given order.
    pub fn shifts_for_sources<'a>(
        &self,
        sources: impl IntoIterator<Item = &'a str>,
    ) -> AnalysisResult<Vec<&Shift>> {
        let mut out = Vec::new();
        for source in sources {
            for direction in Direction::BOTH {
                out.push(self.get(&join_name(source, direction))?);
            }
        }
        Ok(out)
    }

    /// Column name a consumer must read instead of `column` under `shift`.
    pub fn resolve_column(&self, shift: &str, column: &str, stage: AliasStage) -> AnalysisResult<String> {
        Ok(self.get(shift)?.resolve(column, stage).to_string())
    }
}
