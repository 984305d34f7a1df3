//! Step 4: evaluate non-hierarchy formula fields and write their results
//! into typed attribute children.
//!
//! Nodes are visited depth-first, root first. Within a metric, input fields
//! come before formula fields and each group keeps declaration order; every
//! completed formula also lands in the node's scratch map so a later formula
//! in the same node can reference it by name.

use std::collections::HashMap;

use metrika_formula::{
    evaluate_str, hierarchy_only, EvalContext, EvalOptions, EvalValue, HierarchyVector,
};
use metrika_schema::{Datatype, DefinitionKind, Field};

use crate::access::NodeRef;
use crate::entry::{AttributeEntry, AttributeValue, Entry, IdAllocator, ResolvedEntry};
use crate::error::PipelineError;
use crate::state::{PipelineContext, PipelineState};

pub fn apply_formulas(
    state: &mut PipelineState,
    ctx: &PipelineContext<'_>,
    ids: &mut IdAllocator,
) -> Result<(), PipelineError> {
    let mut paths: Vec<Vec<usize>> = Vec::new();
    collect_metric_paths(&state.root, &mut Vec::new(), &mut paths);

    for path in paths {
        apply_node_formulas(state, &path, ctx, ids)?;
    }
    Ok(())
}

/// Child-index paths of all metric nodes, in depth-first pre-order.
fn collect_metric_paths(
    node: &ResolvedEntry,
    prefix: &mut Vec<usize>,
    out: &mut Vec<Vec<usize>>,
) {
    if node.is_metric() {
        out.push(prefix.clone());
    }
    for (i, child) in node.children.iter().enumerate() {
        prefix.push(i);
        collect_metric_paths(child, prefix, out);
        prefix.pop();
    }
}

fn node_at<'a>(root: &'a ResolvedEntry, path: &[usize]) -> &'a ResolvedEntry {
    let mut node = root;
    for &i in path {
        node = &node.children[i];
    }
    node
}

fn node_at_mut<'a>(root: &'a mut ResolvedEntry, path: &[usize]) -> &'a mut ResolvedEntry {
    let mut node = root;
    for &i in path {
        node = &mut node.children[i];
    }
    node
}

fn apply_node_formulas(
    state: &mut PipelineState,
    path: &[usize],
    ctx: &PipelineContext<'_>,
    ids: &mut IdAllocator,
) -> Result<(), PipelineError> {
    // Evaluate against the immutable tree first, then write the collected
    // results; the scratch map is what makes earlier results visible to
    // later formulas in the same node.
    let mut writes: Vec<(metrika_schema::FieldId, AttributeValue)> = Vec::new();
    {
        let node = node_at(&state.root, path);
        let parent = path
            .split_last()
            .map(|(_, head)| node_at(&state.root, head));

        let ordered = partitioned_fields(ctx, node.entry.definition);
        let mut scratch: HashMap<String, EvalValue<NodeRef<'_>>> = HashMap::new();

        for field in ordered {
            if !field.is_formula() {
                continue;
            }
            let Some(formula) = field.formula.as_deref() else {
                continue;
            };
            if hierarchy_only(formula).is_some() {
                // Materialized by the hierarchy populator.
                continue;
            }

            let base = ctx.schema.field_base(field).ok_or_else(|| {
                PipelineError::schema_lookup(
                    &field.name,
                    format!("field `{}` has a dangling base definition", field.name),
                )
            })?;
            let DefinitionKind::Attribute { datatype } = base.kind else {
                return Err(PipelineError::formula(
                    field.id,
                    &field.name,
                    formula,
                    "formula fields must have an attribute base",
                ));
            };

            let mut eval_ctx = EvalContext::new(EvalOptions::entry());
            eval_ctx.bind("self", EvalValue::Entry(NodeRef::new(node, ctx.schema)));
            eval_ctx.bind(
                "parent",
                match parent {
                    Some(parent) => EvalValue::Entry(NodeRef::new(parent, ctx.schema)),
                    None => EvalValue::Null,
                },
            );
            eval_ctx.bind(
                "root",
                EvalValue::Entry(NodeRef::new(&state.root, ctx.schema)),
            );
            for vector in [
                HierarchyVector::Path,
                HierarchyVector::Division,
                HierarchyVector::Subdivision,
            ] {
                eval_ctx.bind(vector.to_string(), EvalValue::Str(state.rendered(vector)));
            }
            for (name, value) in &scratch {
                eval_ctx.bind(name.clone(), value.clone());
            }

            let value = evaluate_str(formula, &eval_ctx).map_err(|err| {
                PipelineError::formula(field.id, &field.name, formula, err.message)
            })?;

            let column = match &value {
                EvalValue::Num(n) => column_from_number(datatype, *n),
                EvalValue::Str(s) => column_from_string(datatype, s),
                EvalValue::Bool(b) => column_from_bool(datatype, *b),
                EvalValue::Null => Err("formula evaluated to null".to_string()),
                _ => Err("formula must produce a single value".to_string()),
            }
            .map_err(|message| {
                PipelineError::formula(field.id, &field.name, formula, message)
            })?;

            scratch.insert(field.name.clone(), value);
            writes.push((field.id, column));
        }
    }

    let node = node_at_mut(&mut state.root, path);
    for (field_id, column) in writes {
        let existing = node
            .children
            .iter_mut()
            .find(|child| child.field == Some(field_id) && child.attribute.is_some());
        match existing {
            Some(child) => {
                if let Some(attribute) = child.attribute.as_mut() {
                    attribute.value = column;
                }
            }
            None => {
                let base_definition = ctx
                    .schema
                    .field(field_id)
                    .map(|f| f.base_definition)
                    .unwrap_or(node.entry.definition);
                node.children.push(ResolvedEntry {
                    entry: Entry {
                        id: ids.next_formula(),
                        definition: base_definition,
                        parent_entry: Some(node.entry.id),
                        timestamp: node.entry.timestamp,
                        subdivision: node.entry.subdivision.clone(),
                        comments: None,
                    },
                    metric: None,
                    attribute: Some(AttributeEntry {
                        field: field_id,
                        value: column,
                    }),
                    field: Some(field_id),
                    children: Vec::new(),
                });
            }
        }
    }
    Ok(())
}

/// A metric's fields with input mode first, then formula mode; declaration
/// order preserved within each group (stable partition).
fn partitioned_fields<'a>(
    ctx: &PipelineContext<'a>,
    metric: metrika_schema::DefinitionId,
) -> Vec<&'a Field> {
    let fields: Vec<&Field> = ctx
        .schema
        .metric_fields(metric)
        .iter()
        .filter_map(|id| ctx.schema.field(*id))
        .collect();
    let (inputs, formulas): (Vec<&Field>, Vec<&Field>) =
        fields.into_iter().partition(|field| !field.is_formula());
    inputs.into_iter().chain(formulas).collect()
}

fn column_from_number(datatype: Datatype, n: f64) -> Result<AttributeValue, String> {
    match datatype {
        Datatype::Int => Ok(AttributeValue::int(n.floor() as i64)),
        Datatype::Float => Ok(AttributeValue::float(n)),
        Datatype::String => Ok(AttributeValue::string(n.to_string())),
        Datatype::Hierarchy => Ok(AttributeValue::hierarchy(n.to_string())),
        Datatype::Bool | Datatype::Timestamp => Err(format!(
            "cannot store a number into a `{datatype}` field"
        )),
    }
}

fn column_from_string(datatype: Datatype, s: &str) -> Result<AttributeValue, String> {
    AttributeValue::from_text(datatype, s)
}

fn column_from_bool(datatype: Datatype, b: bool) -> Result<AttributeValue, String> {
    match datatype {
        Datatype::Bool => Ok(AttributeValue::boolean(b)),
        Datatype::String => Ok(AttributeValue::string(if b { "true" } else { "false" })),
        other => Err(format!("cannot store a bool into a `{other}` field")),
    }
}
