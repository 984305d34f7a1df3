//! Pipeline error taxonomy.
//!
//! The first error aborts the whole run; callers never see a partial tree.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use metrika_schema::FieldId;

/// Scalar identifier used to resolve references to existing metric entries.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "tag", rename_all = "snake_case")]
pub enum IdentifierValue {
    Int { value: i64 },
    Str { value: String },
}

impl std::fmt::Display for IdentifierValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IdentifierValue::Int { value } => write!(f, "{value}"),
            IdentifierValue::Str { value } => write!(f, "\"{value}\""),
        }
    }
}

fn bound(max: &Option<u32>) -> String {
    match max {
        Some(max) => max.to_string(),
        None => "unbounded".to_string(),
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum PipelineError {
    /// A hierarchy-only formula indexed past the end of its vector.
    #[error("field `{field_name}`: formula `{formula}`: {message}")]
    Subdivision {
        field: FieldId,
        field_name: String,
        formula: String,
        message: String,
    },

    /// An existing-entry reference matched zero or more than one entry.
    #[error(
        "field `{field_name}`: reference {identifier} to `{metric_definition}` matched {match_count} entries"
    )]
    InstanceResolution {
        field: FieldId,
        field_name: String,
        metric_definition: String,
        identifier: IdentifierValue,
        match_count: usize,
    },

    /// Formula evaluation failed, or a schema lookup failed during tree
    /// construction (`field` is absent in that case).
    #[error("field `{field_name}`: formula `{formula}`: {message}")]
    Formula {
        field: Option<FieldId>,
        field_name: String,
        formula: String,
        message: String,
        details: Option<String>,
    },

    /// A field's instance count fell outside its declared cardinality.
    #[error(
        "field `{field_name}`: expected between {min} and {} instances, got {actual}",
        bound(.max)
    )]
    Cardinality {
        field: FieldId,
        field_name: String,
        min: u32,
        max: Option<u32>,
        actual: usize,
    },
}

impl PipelineError {
    /// Schema-lookup failure during tree construction; reuses the formula
    /// error kind, with no formula body attached.
    pub(crate) fn schema_lookup(name: impl Into<String>, message: impl Into<String>) -> Self {
        PipelineError::Formula {
            field: None,
            field_name: name.into(),
            formula: String::new(),
            message: message.into(),
            details: None,
        }
    }

    pub(crate) fn formula(
        field: FieldId,
        field_name: impl Into<String>,
        formula: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        PipelineError::Formula {
            field: Some(field),
            field_name: field_name.into(),
            formula: formula.into(),
            message: message.into(),
            details: None,
        }
    }
}
