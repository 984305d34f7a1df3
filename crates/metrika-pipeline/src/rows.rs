//! Flattening the working tree into persist-ready logical rows.
//!
//! Each node becomes one `entries` row plus, depending on its
//! specialization, a `metric_entries` marker or an `attribute_entries`
//! payload. Depth-first order captures child ordering; the persistence layer
//! maps provisional ids to physical ids and owns transactional atomicity.

use serde::{Deserialize, Serialize};

use metrika_schema::FieldId;

use crate::entry::{AttributeValue, Entry, ResolvedEntry};
use crate::state::PipelineState;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributeRow {
    pub field: FieldId,
    #[serde(flatten)]
    pub value: AttributeValue,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntryRow {
    pub user_id: i64,
    pub entry: Entry,
    /// `true` adds a `metric_entries` row for this entry.
    pub metric: bool,
    /// `Some` adds an `attribute_entries` row for this entry.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attribute: Option<AttributeRow>,
}

/// Flatten a completed pipeline state into rows, depth-first.
pub fn flatten(state: &PipelineState, user_id: i64) -> Vec<EntryRow> {
    let mut rows = Vec::new();
    flatten_node(&state.root, user_id, &mut rows);
    rows
}

fn flatten_node(node: &ResolvedEntry, user_id: i64, rows: &mut Vec<EntryRow>) {
    rows.push(EntryRow {
        user_id,
        entry: node.entry.clone(),
        metric: node.metric.is_some(),
        attribute: node.attribute.as_ref().map(|attr| AttributeRow {
            field: attr.field,
            value: attr.value.clone(),
        }),
    });
    for child in &node.children {
        flatten_node(child, user_id, rows);
    }
}
