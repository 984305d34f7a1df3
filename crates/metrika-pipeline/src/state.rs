//! Pipeline state and the existing-entries oracle boundary.

use serde::{Deserialize, Serialize};

use metrika_schema::{DefinitionId, SchemaIndex};

use crate::entry::ResolvedEntry;
use crate::error::IdentifierValue;

/// Read-only lookup for existing metric entries, keyed by the metric's
/// primary identifier field value.
///
/// Implementations are pure reads; returned trees are owned by the caller
/// from then on (the resolver splices them into the working tree and fixes
/// up the parent pointer, so sharing structure with the store would leak
/// mutations).
pub trait ExistingEntries {
    fn find_by_primary_identifier(
        &self,
        metric: DefinitionId,
        value: &IdentifierValue,
    ) -> Vec<ResolvedEntry>;
}

/// Oracle with no entries; for fresh accounts and tests.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoExistingEntries;

impl ExistingEntries for NoExistingEntries {
    fn find_by_primary_identifier(
        &self,
        _metric: DefinitionId,
        _value: &IdentifierValue,
    ) -> Vec<ResolvedEntry> {
        Vec::new()
    }
}

/// In-memory oracle over explicitly registered trees.
#[derive(Debug, Clone, Default)]
pub struct InMemoryEntries {
    entries: Vec<(DefinitionId, IdentifierValue, ResolvedEntry)>,
}

impl InMemoryEntries {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(
        &mut self,
        metric: DefinitionId,
        identifier: IdentifierValue,
        tree: ResolvedEntry,
    ) {
        self.entries.push((metric, identifier, tree));
    }
}

impl ExistingEntries for InMemoryEntries {
    fn find_by_primary_identifier(
        &self,
        metric: DefinitionId,
        value: &IdentifierValue,
    ) -> Vec<ResolvedEntry> {
        self.entries
            .iter()
            .filter(|(m, id, _)| *m == metric && id == value)
            .map(|(_, _, tree)| tree.clone())
            .collect()
    }
}

/// Everything a pipeline run reads but never writes: the schema index, the
/// oracle, and the acting user.
pub struct PipelineContext<'a> {
    pub schema: &'a SchemaIndex,
    pub existing: &'a dyn ExistingEntries,
    pub user_id: i64,
}

/// The working tree plus the three hierarchy vectors, precomputed from the
/// root definition and the root entry's subdivision. The vectors are
/// read-only for the duration of the run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineState {
    pub root: ResolvedEntry,
    /// Root definition's parent chain codes, outermost first.
    pub division: Vec<String>,
    /// Root subdivision split on `/`; trailing empty tokens dropped.
    pub subdivision: Vec<String>,
    /// `division ++ subdivision`.
    pub path: Vec<String>,
}

impl PipelineState {
    /// Render one of the vectors the way formulas see it: `/`-joined.
    pub fn rendered(&self, vector: metrika_formula::HierarchyVector) -> String {
        use metrika_formula::HierarchyVector;
        let tokens = match vector {
            HierarchyVector::Division => &self.division,
            HierarchyVector::Subdivision => &self.subdivision,
            HierarchyVector::Path => &self.path,
        };
        tokens.join("/")
    }
}

/// Split a root subdivision into its vector: `/`-separated tokens, interior
/// empties preserved, trailing empties dropped.
pub fn split_subdivision(subdivision: Option<&str>) -> Vec<String> {
    let Some(subdivision) = subdivision else {
        return Vec::new();
    };
    let mut tokens: Vec<String> = subdivision.split('/').map(str::to_string).collect();
    while tokens.last().is_some_and(String::is_empty) {
        tokens.pop();
    }
    tokens
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subdivision_splitting() {
        assert_eq!(split_subdivision(None), Vec::<String>::new());
        assert_eq!(split_subdivision(Some("TFG/coding")), vec!["TFG", "coding"]);
        assert_eq!(split_subdivision(Some("TFG/")), vec!["TFG"]);
        assert_eq!(split_subdivision(Some("TFG//x")), vec!["TFG", "", "x"]);
        assert_eq!(split_subdivision(Some("")), Vec::<String>::new());
    }
}
