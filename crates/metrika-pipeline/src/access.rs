//! Formula-engine access to working-tree nodes.

use metrika_formula::{EntryAccess, EvalError, EvalValue};
use metrika_schema::SchemaIndex;

use crate::entry::{ResolvedEntry, ScalarValue};

/// Cheap handle pairing a tree node with the schema index, so the evaluator
/// can navigate fields by name.
#[derive(Debug, Clone, Copy)]
pub struct NodeRef<'a> {
    pub node: &'a ResolvedEntry,
    pub schema: &'a SchemaIndex,
}

impl<'a> NodeRef<'a> {
    pub fn new(node: &'a ResolvedEntry, schema: &'a SchemaIndex) -> Self {
        Self { node, schema }
    }
}

impl PartialEq for NodeRef<'_> {
    fn eq(&self, other: &Self) -> bool {
        std::ptr::eq(self.node, other.node)
    }
}

fn scalar_to_eval<'a>(scalar: ScalarValue) -> EvalValue<NodeRef<'a>> {
    match scalar {
        ScalarValue::Int { value } => EvalValue::Num(value as f64),
        ScalarValue::Float { value } => EvalValue::Num(value),
        ScalarValue::Str { value } => EvalValue::Str(value),
        ScalarValue::Bool { value } => EvalValue::Bool(value),
        ScalarValue::Timestamp { value } => {
            EvalValue::Str(value.format("%Y-%m-%d %H:%M:%S").to_string())
        }
        ScalarValue::Hierarchy { value } => EvalValue::Str(value),
    }
}

impl<'a> EntryAccess for NodeRef<'a> {
    /// Field navigation per the engine contract: collect the children tagged
    /// with the named field; all-attribute children yield their typed values,
    /// all-metric children yield entry references, a length-1 list collapses
    /// to a scalar, and anything mixed or missing is null.
    fn get_field(&self, name: &str) -> Result<EvalValue<Self>, EvalError> {
        if self.node.metric.is_none() {
            // Attribute nodes have no fields; navigation short-circuits.
            return Ok(EvalValue::Null);
        }
        let Some(field) = self.schema.field_by_name(self.node.entry.definition, name) else {
            return Ok(EvalValue::Null);
        };

        let tagged: Vec<&ResolvedEntry> = self.node.children_for_field(field.id).collect();
        if tagged.is_empty() {
            return Ok(EvalValue::Null);
        }

        if tagged.iter().all(|child| child.attribute.is_some()) {
            let mut nums: Vec<f64> = Vec::new();
            let mut strs: Vec<String> = Vec::new();
            let mut bools: Vec<bool> = Vec::new();
            for child in &tagged {
                let scalar = child
                    .attribute
                    .as_ref()
                    .and_then(|attr| attr.value.get());
                match scalar.map(scalar_to_eval) {
                    Some(EvalValue::Num(n)) => nums.push(n),
                    Some(EvalValue::Str(s)) => strs.push(s),
                    Some(EvalValue::Bool(b)) => bools.push(b),
                    _ => return Ok(EvalValue::Null),
                }
            }
            let value = match (nums.is_empty(), strs.is_empty(), bools.is_empty()) {
                (false, true, true) => EvalValue::NumList(nums),
                (true, false, true) => EvalValue::StrList(strs),
                (true, true, false) => EvalValue::BoolList(bools),
                _ => return Ok(EvalValue::Null),
            };
            return Ok(value.collapsed());
        }

        if tagged.iter().all(|child| child.metric.is_some()) {
            let refs: Vec<NodeRef<'a>> = tagged
                .into_iter()
                .map(|child| NodeRef::new(child, self.schema))
                .collect();
            return Ok(EvalValue::EntryList(refs).collapsed());
        }

        Ok(EvalValue::Null)
    }

    /// Sum of `value_int` over `time_type` children whose subdivision is the
    /// base letter or nested under it; `0` when the field or children are
    /// absent.
    fn time(&self, base: &str) -> Result<EvalValue<Self>, EvalError> {
        let Some(field) = self
            .schema
            .field_by_name(self.node.entry.definition, "time_type")
        else {
            return Ok(EvalValue::Num(0.0));
        };

        let nested = format!("{base}/");
        let sum: i64 = self
            .node
            .children_for_field(field.id)
            .filter(|child| {
                child
                    .entry
                    .subdivision
                    .as_deref()
                    .is_some_and(|s| s == base || s.starts_with(&nested))
            })
            .filter_map(|child| child.attribute.as_ref().and_then(|attr| attr.value.value_int))
            .sum();
        Ok(EvalValue::Num(sum as f64))
    }

    fn subdivision(&self) -> Option<String> {
        self.node.entry.subdivision.clone()
    }
}
