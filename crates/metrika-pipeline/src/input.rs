//! User-facing input shape consumed by the tree builder.
//!
//! Adapters (the single-line parser, the timing-block parser) produce these;
//! the pipeline never sees raw text. Definitions and fields are referenced by
//! code/name here and resolved against the schema index during tree building.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

/// Input for one metric entry, recursively containing its field values and
/// (legacy) child entries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricEntryInput {
    /// Definition code, e.g. `EST`.
    pub definition: String,
    pub timestamp: NaiveDateTime,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subdivision: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comments: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub fields: Vec<FieldInput>,
    /// Additional child metric subtrees with no field slot. Adapters prefer
    /// field-inlined metric children; this survives for older callers.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<MetricEntryInput>,
}

impl MetricEntryInput {
    pub fn new(definition: impl Into<String>, timestamp: NaiveDateTime) -> Self {
        Self {
            definition: definition.into(),
            timestamp,
            subdivision: None,
            comments: None,
            fields: vec![],
            children: vec![],
        }
    }
}

/// Values for one field of the entry, in input order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldInput {
    /// Field name within the entry's metric.
    pub field: String,
    pub values: Vec<AttributeValueInput>,
}

/// One value for a field: either a typed scalar (first present column wins,
/// in the order `int, float, string, bool, timestamp, hierarchy`), or an
/// inline nested entry when the field's base is a metric.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AttributeValueInput {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value_int: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value_float: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value_string: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value_bool: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value_timestamp: Option<NaiveDateTime>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value_hierarchy: Option<String>,
    /// Per-value subdivision; falls back to the parent entry's subdivision.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subdivision: Option<String>,
    /// Inline nested entry for metric-based fields.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub child: Option<Box<MetricEntryInput>>,
}

impl AttributeValueInput {
    pub fn int(value: i64) -> Self {
        Self {
            value_int: Some(value),
            ..Self::default()
        }
    }

    pub fn float(value: f64) -> Self {
        Self {
            value_float: Some(value),
            ..Self::default()
        }
    }

    pub fn string(value: impl Into<String>) -> Self {
        Self {
            value_string: Some(value.into()),
            ..Self::default()
        }
    }

    pub fn boolean(value: bool) -> Self {
        Self {
            value_bool: Some(value),
            ..Self::default()
        }
    }

    pub fn hierarchy(value: impl Into<String>) -> Self {
        Self {
            value_hierarchy: Some(value.into()),
            ..Self::default()
        }
    }

    pub fn nested(child: MetricEntryInput) -> Self {
        Self {
            child: Some(Box::new(child)),
            ..Self::default()
        }
    }

    pub fn with_subdivision(mut self, subdivision: impl Into<String>) -> Self {
        self.subdivision = Some(subdivision.into());
        self
    }
}
