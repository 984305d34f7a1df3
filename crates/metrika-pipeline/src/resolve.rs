//! Step 3: replace identifier placeholders with existing entry trees.
//!
//! Children tagged with a metric-based field arrive here either as inline
//! subtrees (left alone) or as attribute placeholders carrying a scalar
//! identifier. Placeholders are looked up through the oracle by the base
//! metric's primary identifier field; exactly one match replaces the child
//! in place, anything else aborts the run.

use crate::entry::ResolvedEntry;
use crate::error::{IdentifierValue, PipelineError};
use crate::state::{PipelineContext, PipelineState};

pub fn convert_to_instances(
    state: &mut PipelineState,
    ctx: &PipelineContext<'_>,
) -> Result<(), PipelineError> {
    resolve_node(&mut state.root, ctx)
}

fn resolve_node(
    node: &mut ResolvedEntry,
    ctx: &PipelineContext<'_>,
) -> Result<(), PipelineError> {
    let parent_id = node.entry.id;

    for child in &mut node.children {
        if let Some(field_id) = child.field {
            let Some(field) = ctx.schema.field(field_id) else {
                continue;
            };
            let Some(base) = ctx.schema.field_base(field) else {
                continue;
            };

            if base.primary_identifier_field().is_some()
                && child.metric.is_none()
                && child.attribute.is_some()
            {
                let identifier = child
                    .attribute
                    .as_ref()
                    .and_then(|attr| identifier_of(attr))
                    .ok_or_else(|| {
                        PipelineError::formula(
                            field.id,
                            &field.name,
                            "",
                            "reference placeholder carries no identifier value",
                        )
                    })?;

                let mut matches = ctx
                    .existing
                    .find_by_primary_identifier(base.id, &identifier);
                if matches.len() != 1 {
                    return Err(PipelineError::InstanceResolution {
                        field: field.id,
                        field_name: field.name.clone(),
                        metric_definition: base.code.clone(),
                        identifier,
                        match_count: matches.len(),
                    });
                }
                let resolved = matches.remove(0);

                // Splice in place: the field slot stays; entry, marker and
                // children come from the resolved instance, reparented under
                // the current node.
                child.entry = resolved.entry;
                child.entry.parent_entry = Some(parent_id);
                child.metric = resolved.metric;
                child.attribute = None;
                child.children = resolved.children;
            }
        }

        resolve_node(child, ctx)?;
    }
    Ok(())
}

fn identifier_of(attribute: &crate::entry::AttributeEntry) -> Option<IdentifierValue> {
    if let Some(value) = attribute.value.value_int {
        return Some(IdentifierValue::Int { value });
    }
    attribute
        .value
        .value_string
        .clone()
        .map(|value| IdentifierValue::Str { value })
}
