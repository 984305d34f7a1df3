//! Step 1: build the initial working tree from a [`MetricEntryInput`].
//!
//! Provisional ids are assigned left-to-right, depth-first; every node gets
//! the root's timestamp, normalized to local midnight.

use metrika_schema::{Definition, DefinitionKind};

use crate::entry::{
    midnight, AttributeEntry, AttributeValue, Entry, IdAllocator, MetricEntryMarker, ResolvedEntry,
};
use crate::error::PipelineError;
use crate::input::{AttributeValueInput, MetricEntryInput};
use crate::state::{split_subdivision, PipelineContext, PipelineState};

pub fn build_tree(
    input: &MetricEntryInput,
    ctx: &PipelineContext<'_>,
    ids: &mut IdAllocator,
) -> Result<PipelineState, PipelineError> {
    let definition = lookup_metric(ctx, &input.definition)?;
    let timestamp = midnight(input.timestamp);

    let root = build_metric_node(input, definition, None, None, timestamp, None, ctx, ids)?;

    let division = ctx
        .schema
        .division_of(definition.id)
        .map_err(|err| PipelineError::schema_lookup(&input.definition, err.to_string()))?;
    let subdivision = split_subdivision(input.subdivision.as_deref());
    let mut path = division.clone();
    path.extend(subdivision.iter().cloned());

    Ok(PipelineState {
        root,
        division,
        subdivision,
        path,
    })
}

fn lookup_metric<'a>(
    ctx: &PipelineContext<'a>,
    code: &str,
) -> Result<&'a Definition, PipelineError> {
    let definition = ctx
        .schema
        .definition_by_code(code)
        .ok_or_else(|| PipelineError::schema_lookup(code, format!("unknown definition `{code}`")))?;
    if !definition.is_metric() {
        return Err(PipelineError::schema_lookup(
            code,
            format!("definition `{code}` is not a metric"),
        ));
    }
    Ok(definition)
}

#[allow(clippy::too_many_arguments)]
fn build_metric_node(
    input: &MetricEntryInput,
    definition: &Definition,
    parent_id: Option<i64>,
    field_slot: Option<metrika_schema::FieldId>,
    timestamp: chrono::NaiveDateTime,
    inherited_subdivision: Option<&str>,
    ctx: &PipelineContext<'_>,
    ids: &mut IdAllocator,
) -> Result<ResolvedEntry, PipelineError> {
    let id = ids.next_builder();
    let subdivision = input
        .subdivision
        .clone()
        .or_else(|| inherited_subdivision.map(str::to_string));

    let mut node = ResolvedEntry {
        entry: Entry {
            id,
            definition: definition.id,
            parent_entry: parent_id,
            timestamp,
            subdivision: subdivision.clone(),
            comments: input.comments.clone(),
        },
        metric: Some(MetricEntryMarker),
        attribute: None,
        field: field_slot,
        children: Vec::new(),
    };

    for field_input in &input.fields {
        let field = ctx
            .schema
            .field_by_name(definition.id, &field_input.field)
            .ok_or_else(|| {
                PipelineError::schema_lookup(
                    &field_input.field,
                    format!(
                        "unknown field `{}` on metric `{}`",
                        field_input.field, definition.code
                    ),
                )
            })?;
        let base = ctx.schema.field_base(field).ok_or_else(|| {
            PipelineError::schema_lookup(
                &field.name,
                format!("field `{}` has a dangling base definition", field.name),
            )
        })?;

        for value in &field_input.values {
            match base.kind {
                DefinitionKind::Attribute { .. } => {
                    let child = attribute_child(
                        value,
                        field.id,
                        base.id,
                        id,
                        timestamp,
                        subdivision.as_deref(),
                        ids,
                    )
                    .map_err(|message| {
                        PipelineError::formula(field.id, &field.name, "", message)
                    })?;
                    node.children.push(child);
                }
                DefinitionKind::Metric { .. } => {
                    if let Some(child_input) = &value.child {
                        let child_definition = lookup_metric(ctx, &child_input.definition)?;
                        if child_definition.id != base.id {
                            return Err(PipelineError::formula(
                                field.id,
                                &field.name,
                                "",
                                format!(
                                    "field `{}` expects `{}`, got `{}`",
                                    field.name, base.code, child_definition.code
                                ),
                            ));
                        }
                        let child = build_metric_node(
                            child_input,
                            child_definition,
                            Some(id),
                            Some(field.id),
                            timestamp,
                            subdivision.as_deref(),
                            ctx,
                            ids,
                        )?;
                        node.children.push(child);
                    } else if let Some(placeholder) = identifier_placeholder(value) {
                        // Scalar reference to an existing entry; the instance
                        // resolver replaces this placeholder.
                        node.children.push(ResolvedEntry {
                            entry: Entry {
                                id: ids.next_builder(),
                                definition: base.id,
                                parent_entry: Some(id),
                                timestamp,
                                subdivision: value
                                    .subdivision
                                    .clone()
                                    .or_else(|| subdivision.clone()),
                                comments: None,
                            },
                            metric: None,
                            attribute: Some(AttributeEntry {
                                field: field.id,
                                value: placeholder,
                            }),
                            field: Some(field.id),
                            children: Vec::new(),
                        });
                    } else {
                        return Err(PipelineError::formula(
                            field.id,
                            &field.name,
                            "",
                            format!(
                                "field `{}` needs an identifier or an inline `{}` entry",
                                field.name, base.code
                            ),
                        ));
                    }
                }
            }
        }
    }

    for child_input in &input.children {
        let child_definition = lookup_metric(ctx, &child_input.definition)?;
        let child = build_metric_node(
            child_input,
            child_definition,
            Some(id),
            None,
            timestamp,
            subdivision.as_deref(),
            ctx,
            ids,
        )?;
        node.children.push(child);
    }

    Ok(node)
}

/// Build an attribute child from the first present typed column.
fn attribute_child(
    value: &AttributeValueInput,
    field: metrika_schema::FieldId,
    base_definition: metrika_schema::DefinitionId,
    parent_id: i64,
    timestamp: chrono::NaiveDateTime,
    parent_subdivision: Option<&str>,
    ids: &mut IdAllocator,
) -> Result<ResolvedEntry, String> {
    let column = first_present_column(value)
        .ok_or_else(|| "no value column populated for attribute field".to_string())?;

    Ok(ResolvedEntry {
        entry: Entry {
            id: ids.next_builder(),
            definition: base_definition,
            parent_entry: Some(parent_id),
            timestamp,
            subdivision: value
                .subdivision
                .clone()
                .or_else(|| parent_subdivision.map(str::to_string)),
            comments: None,
        },
        metric: None,
        attribute: Some(AttributeEntry {
            field,
            value: column,
        }),
        field: Some(field),
        children: Vec::new(),
    })
}

/// The first present column, in the fixed order
/// `int, float, string, bool, timestamp, hierarchy`.
fn first_present_column(value: &AttributeValueInput) -> Option<AttributeValue> {
    if let Some(v) = value.value_int {
        return Some(AttributeValue::int(v));
    }
    if let Some(v) = value.value_float {
        return Some(AttributeValue::float(v));
    }
    if let Some(v) = &value.value_string {
        return Some(AttributeValue::string(v.clone()));
    }
    if let Some(v) = value.value_bool {
        return Some(AttributeValue::boolean(v));
    }
    if let Some(v) = value.value_timestamp {
        return Some(AttributeValue::timestamp(v));
    }
    if let Some(v) = &value.value_hierarchy {
        return Some(AttributeValue::hierarchy(v.clone()));
    }
    None
}

/// Scalar identifier placeholder for metric-based fields: `int` or `string`.
fn identifier_placeholder(value: &AttributeValueInput) -> Option<AttributeValue> {
    if let Some(v) = value.value_int {
        return Some(AttributeValue::int(v));
    }
    if let Some(v) = &value.value_string {
        return Some(AttributeValue::string(v.clone()));
    }
    None
}
