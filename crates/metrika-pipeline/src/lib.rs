//! Entry creation pipeline.
//!
//! A deterministic, atomic, tree-shaped transformation from loosely
//! structured user input to a validated, persist-ready tree of typed
//! entries:
//!
//! ```text
//! MetricEntryInput
//!     │  build_tree                (provisional ids, normalized timestamps)
//!     ▼
//! ResolvedEntry tree
//!     │  populate_from_subdivision (hierarchy-only formula fields)
//!     │  convert_to_instances     (placeholder -> existing entry trees)
//!     │  apply_formulas           (remaining formula fields)
//!     │  validate_cardinality     ([min, max] per field per metric node)
//!     ▼
//! PipelineState ── flatten ──▶ Vec<EntryRow>
//! ```
//!
//! Each run is a pure function of `(input, context, user)` modulo reads
//! through the [`ExistingEntries`] oracle; the first failing step rejects
//! the whole input and no partial tree escapes.

pub mod access;
pub mod builder;
pub mod cardinality;
pub mod entry;
pub mod error;
pub mod formulas;
pub mod hierarchy;
pub mod input;
pub mod resolve;
pub mod rows;
pub mod state;

pub use access::NodeRef;
pub use builder::build_tree;
pub use cardinality::validate_cardinality;
pub use entry::{
    midnight, AttributeEntry, AttributeValue, Entry, IdAllocator, MetricEntryMarker,
    ResolvedEntry, ScalarValue,
};
pub use error::{IdentifierValue, PipelineError};
pub use formulas::apply_formulas;
pub use hierarchy::populate_from_subdivision;
pub use input::{AttributeValueInput, FieldInput, MetricEntryInput};
pub use resolve::convert_to_instances;
pub use rows::{flatten, AttributeRow, EntryRow};
pub use state::{
    split_subdivision, ExistingEntries, InMemoryEntries, NoExistingEntries, PipelineContext,
    PipelineState,
};

/// Run every pipeline step in order. The first error aborts the run; on
/// success the returned state holds the complete validated tree.
pub fn run_pipeline(
    input: &MetricEntryInput,
    ctx: &PipelineContext<'_>,
) -> Result<PipelineState, PipelineError> {
    let mut ids = IdAllocator::new();
    let mut state = build_tree(input, ctx, &mut ids)?;
    populate_from_subdivision(&mut state, ctx, &mut ids)?;
    convert_to_instances(&mut state, ctx)?;
    apply_formulas(&mut state, ctx, &mut ids)?;
    validate_cardinality(&state, ctx)?;
    tracing::debug!(definition = %input.definition, "pipeline run complete");
    Ok(state)
}
