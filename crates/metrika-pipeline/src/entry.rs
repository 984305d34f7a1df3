//! Entry entities and the working tree.

use chrono::{NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};

use metrika_schema::{Datatype, DefinitionId, FieldId};

/// A single entry row. `id` is provisional during the pipeline (see
/// [`IdAllocator`]); the persistence layer replaces it at insert time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entry {
    pub id: i64,
    pub definition: DefinitionId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_entry: Option<i64>,
    /// Always normalized to the start of its day.
    pub timestamp: NaiveDateTime,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subdivision: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comments: Option<String>,
}

/// Normalize a timestamp to local midnight of its day.
pub fn midnight(timestamp: NaiveDateTime) -> NaiveDateTime {
    timestamp.date().and_time(NaiveTime::MIN)
}

/// Marker for entries that represent a metric instance; flattens into the
/// `metric_entries` table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct MetricEntryMarker;

/// Attribute specialization: the field it instantiates plus exactly one
/// populated typed value column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributeEntry {
    pub field: FieldId,
    pub value: AttributeValue,
}

/// The typed-column value model of the `attribute_entries` table. Exactly one
/// column is populated per attribute entry.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AttributeValue {
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
}

/// A scalar read out of (or written into) an attribute value column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "tag", rename_all = "snake_case")]
pub enum ScalarValue {
    Int { value: i64 },
    Float { value: f64 },
    Str { value: String },
    Bool { value: bool },
    Timestamp { value: NaiveDateTime },
    Hierarchy { value: String },
}

impl AttributeValue {
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

    pub fn timestamp(value: NaiveDateTime) -> Self {
        Self {
            value_timestamp: Some(value),
            ..Self::default()
        }
    }

    pub fn hierarchy(value: impl Into<String>) -> Self {
        Self {
            value_hierarchy: Some(value.into()),
            ..Self::default()
        }
    }

    /// The single populated column, in the fixed priority
    /// `int, float, string, bool, timestamp, hierarchy`.
    pub fn get(&self) -> Option<ScalarValue> {
        if let Some(value) = self.value_int {
            return Some(ScalarValue::Int { value });
        }
        if let Some(value) = self.value_float {
            return Some(ScalarValue::Float { value });
        }
        if let Some(value) = &self.value_string {
            return Some(ScalarValue::Str {
                value: value.clone(),
            });
        }
        if let Some(value) = self.value_bool {
            return Some(ScalarValue::Bool { value });
        }
        if let Some(value) = self.value_timestamp {
            return Some(ScalarValue::Timestamp { value });
        }
        if let Some(value) = &self.value_hierarchy {
            return Some(ScalarValue::Hierarchy {
                value: value.clone(),
            });
        }
        None
    }

    /// Parse a raw hierarchy token into the column matching `datatype`.
    pub fn from_text(datatype: Datatype, text: &str) -> Result<Self, String> {
        match datatype {
            Datatype::Int => text
                .parse::<i64>()
                .map(Self::int)
                .map_err(|_| format!("`{text}` is not an int")),
            Datatype::Float => text
                .parse::<f64>()
                .map(Self::float)
                .map_err(|_| format!("`{text}` is not a float")),
            Datatype::String => Ok(Self::string(text)),
            Datatype::Bool => match text {
                "true" => Ok(Self::boolean(true)),
                "false" => Ok(Self::boolean(false)),
                _ => Err(format!("`{text}` is not a bool")),
            },
            Datatype::Timestamp => NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S")
                .map(Self::timestamp)
                .or_else(|_| {
                    text.parse::<chrono::NaiveDate>()
                        .map(|d| Self::timestamp(d.and_time(NaiveTime::MIN)))
                })
                .map_err(|_| format!("`{text}` is not a timestamp")),
            Datatype::Hierarchy => Ok(Self::hierarchy(text)),
        }
    }
}

// ============================================================================
// The working tree
// ============================================================================

/// A node of the pipeline's working tree: the entry, at most one of the two
/// specializations, the field slot it occupies in its parent (none for the
/// root and legacy children), and its ordered children.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedEntry {
    pub entry: Entry,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metric: Option<MetricEntryMarker>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attribute: Option<AttributeEntry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field: Option<FieldId>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<ResolvedEntry>,
}

impl ResolvedEntry {
    pub fn is_metric(&self) -> bool {
        self.metric.is_some()
    }

    /// Children occupying the given field slot, in tree order.
    pub fn children_for_field(&self, field: FieldId) -> impl Iterator<Item = &ResolvedEntry> {
        self.children
            .iter()
            .filter(move |child| child.field == Some(field))
    }
}

// ============================================================================
// Provisional IDs
// ============================================================================

/// Provisional entry IDs for a single pipeline run.
///
/// Three disjoint counters keep the provenance of every node observable and
/// make collisions impossible: the tree builder counts up from 1, the
/// hierarchy populator down from -1000, the formula applier down from -2000.
/// The persistence layer replaces all of them atomically at insert time.
#[derive(Debug)]
pub struct IdAllocator {
    builder: i64,
    hierarchy: i64,
    formula: i64,
}

impl IdAllocator {
    pub fn new() -> Self {
        Self {
            builder: 1,
            hierarchy: -1000,
            formula: -2000,
        }
    }

    pub fn next_builder(&mut self) -> i64 {
        let id = self.builder;
        self.builder += 1;
        id
    }

    pub fn next_hierarchy(&mut self) -> i64 {
        let id = self.hierarchy;
        self.hierarchy -= 1;
        id
    }

    pub fn next_formula(&mut self) -> i64 {
        let id = self.formula;
        self.formula -= 1;
        id
    }
}

impl Default for IdAllocator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn column_priority_is_fixed() {
        let mut value = AttributeValue::int(3);
        value.value_string = Some("shadowed".to_string());
        assert_eq!(value.get(), Some(ScalarValue::Int { value: 3 }));
    }

    #[test]
    fn from_text_respects_datatype() {
        assert_eq!(
            AttributeValue::from_text(Datatype::Int, "42").unwrap(),
            AttributeValue::int(42)
        );
        assert_eq!(
            AttributeValue::from_text(Datatype::Hierarchy, "TFG/coding").unwrap(),
            AttributeValue::hierarchy("TFG/coding")
        );
        assert!(AttributeValue::from_text(Datatype::Int, "TFG").is_err());
    }

    #[test]
    fn id_counters_are_disjoint() {
        let mut ids = IdAllocator::new();
        assert_eq!(ids.next_builder(), 1);
        assert_eq!(ids.next_builder(), 2);
        assert_eq!(ids.next_hierarchy(), -1000);
        assert_eq!(ids.next_hierarchy(), -1001);
        assert_eq!(ids.next_formula(), -2000);
    }
}
