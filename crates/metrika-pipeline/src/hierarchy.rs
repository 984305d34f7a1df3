//! Step 2: materialize hierarchy-only formula fields.
//!
//! Fields whose formula body is exactly `subdivision[i]`, `division[i]` or
//! `path[i]` are populated here rather than by the formula applier, because
//! the produced string may still need to be *resolved* against existing
//! metric instances in the next step.

use metrika_formula::{hierarchy_only, HierarchyVector};
use metrika_schema::DefinitionKind;

use crate::entry::{AttributeEntry, AttributeValue, Entry, IdAllocator, ResolvedEntry};
use crate::error::PipelineError;
use crate::state::{PipelineContext, PipelineState};

pub fn populate_from_subdivision(
    state: &mut PipelineState,
    ctx: &PipelineContext<'_>,
    ids: &mut IdAllocator,
) -> Result<(), PipelineError> {
    let vectors = Vectors {
        division: state.division.clone(),
        subdivision: state.subdivision.clone(),
        path: state.path.clone(),
    };
    populate_node(&mut state.root, &vectors, ctx, ids)
}

struct Vectors {
    division: Vec<String>,
    subdivision: Vec<String>,
    path: Vec<String>,
}

impl Vectors {
    fn get(&self, vector: HierarchyVector) -> &[String] {
        match vector {
            HierarchyVector::Division => &self.division,
            HierarchyVector::Subdivision => &self.subdivision,
            HierarchyVector::Path => &self.path,
        }
    }
}

fn populate_node(
    node: &mut ResolvedEntry,
    vectors: &Vectors,
    ctx: &PipelineContext<'_>,
    ids: &mut IdAllocator,
) -> Result<(), PipelineError> {
    if node.is_metric() {
        for field_id in ctx.schema.metric_fields(node.entry.definition) {
            let Some(field) = ctx.schema.field(*field_id) else {
                continue;
            };
            if !field.is_formula() {
                continue;
            }
            let Some(formula) = field.formula.as_deref() else {
                continue;
            };
            let Some((vector, index)) = hierarchy_only(formula) else {
                continue;
            };

            let tokens = vectors.get(vector);
            let Some(token) = tokens.get(index) else {
                return Err(PipelineError::Subdivision {
                    field: field.id,
                    field_name: field.name.clone(),
                    formula: formula.to_string(),
                    message: format!(
                        "index {index} out of range: `{vector}` has {} tokens",
                        tokens.len()
                    ),
                });
            };

            let base = ctx.schema.field_base(field).ok_or_else(|| {
                PipelineError::schema_lookup(
                    &field.name,
                    format!("field `{}` has a dangling base definition", field.name),
                )
            })?;
            let value = match base.kind {
                DefinitionKind::Attribute { datatype } => {
                    AttributeValue::from_text(datatype, token).map_err(|message| {
                        PipelineError::Subdivision {
                            field: field.id,
                            field_name: field.name.clone(),
                            formula: formula.to_string(),
                            message,
                        }
                    })?
                }
                // Metric-based fields get a string placeholder; the instance
                // resolver looks it up by primary identifier.
                DefinitionKind::Metric { .. } => AttributeValue::string(token.clone()),
            };

            let existing = node
                .children
                .iter_mut()
                .find(|child| child.field == Some(field.id) && child.attribute.is_some());
            match existing {
                Some(child) => {
                    if let Some(attribute) = child.attribute.as_mut() {
                        attribute.value = value;
                    }
                }
                None => {
                    node.children.push(ResolvedEntry {
                        entry: Entry {
                            id: ids.next_hierarchy(),
                            definition: base.id,
                            parent_entry: Some(node.entry.id),
                            timestamp: node.entry.timestamp,
                            subdivision: node.entry.subdivision.clone(),
                            comments: None,
                        },
                        metric: None,
                        attribute: Some(AttributeEntry {
                            field: field.id,
                            value,
                        }),
                        field: Some(field.id),
                        children: Vec::new(),
                    });
                }
            }
        }
    }

    for child in &mut node.children {
        populate_node(child, vectors, ctx, ids)?;
    }
    Ok(())
}
