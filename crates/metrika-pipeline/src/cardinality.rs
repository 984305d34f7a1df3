//! Step 5: enforce `[min_instances, max_instances]` per field per metric node.

use crate::entry::ResolvedEntry;
use crate::error::PipelineError;
use crate::state::{PipelineContext, PipelineState};

pub fn validate_cardinality(
    state: &PipelineState,
    ctx: &PipelineContext<'_>,
) -> Result<(), PipelineError> {
    check_node(&state.root, ctx)
}

fn check_node(node: &ResolvedEntry, ctx: &PipelineContext<'_>) -> Result<(), PipelineError> {
    if node.is_metric() {
        for field_id in ctx.schema.metric_fields(node.entry.definition) {
            let Some(field) = ctx.schema.field(*field_id) else {
                continue;
            };
            let actual = node.children_for_field(field.id).count();
            let below = actual < field.min_instances as usize;
            let above = field
                .max_instances
                .is_some_and(|max| actual > max as usize);
            if below || above {
                return Err(PipelineError::Cardinality {
                    field: field.id,
                    field_name: field.name.clone(),
                    min: field.min_instances,
                    max: field.max_instances,
                    actual,
                });
            }
        }
    }

    for child in &node.children {
        check_node(child, ctx)?;
    }
    Ok(())
}
