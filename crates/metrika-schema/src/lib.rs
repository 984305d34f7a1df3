//! Schema model for the Metrika metrics platform.
//!
//! Users describe their metrics as a graph of **definitions**: a definition is
//! either an *attribute* (a typed leaf value) or a *metric* (a record with
//! named **fields**, each field referencing another definition as its base).
//! The entry pipeline and both expression languages consume this model through
//! the [`SchemaIndex`], which holds the lookup tables built once per run:
//!
//! - `definition id -> Definition`
//! - `field id -> Field`
//! - `metric id -> field ids` in declaration order
//! - `definition code -> definition id`
//!
//! The index is immutable for the duration of a pipeline run; all accessors
//! take `&self`.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::str::FromStr;

pub mod validate;

pub use validate::SchemaError;

// ============================================================================
// Identifiers
// ============================================================================

/// Compact definition ID (stable identity; the `code` is the mutable name).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(transparent)]
pub struct DefinitionId(u32);

impl DefinitionId {
    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    pub const fn raw(self) -> u32 {
        self.0
    }
}

/// Compact field ID, unique across the whole schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(transparent)]
pub struct FieldId(u32);

impl FieldId {
    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    pub const fn raw(self) -> u32 {
        self.0
    }
}

// ============================================================================
// Datatypes
// ============================================================================

/// Attribute datatypes, matching the typed-column persistence contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Datatype {
    Int,
    Float,
    String,
    Bool,
    Timestamp,
    /// A `/`-separated hierarchy token string (e.g. `"TFG/coding"`).
    Hierarchy,
}

impl Datatype {
    /// `true` for the datatypes a primary identifier field may carry.
    pub fn is_identifier(self) -> bool {
        matches!(self, Datatype::Int | Datatype::String)
    }
}

impl std::fmt::Display for Datatype {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Datatype::Int => "int",
            Datatype::Float => "float",
            Datatype::String => "string",
            Datatype::Bool => "bool",
            Datatype::Timestamp => "timestamp",
            Datatype::Hierarchy => "hierarchy_string",
        };
        write!(f, "{name}")
    }
}

impl FromStr for Datatype {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "int" => Ok(Datatype::Int),
            "float" => Ok(Datatype::Float),
            "string" => Ok(Datatype::String),
            "bool" => Ok(Datatype::Bool),
            "timestamp" => Ok(Datatype::Timestamp),
            "hierarchy_string" => Ok(Datatype::Hierarchy),
            other => Err(format!("unknown datatype `{other}`")),
        }
    }
}

// ============================================================================
// Definitions
// ============================================================================

/// The two kinds of definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "tag", rename_all = "snake_case")]
pub enum DefinitionKind {
    Attribute {
        datatype: Datatype,
    },
    Metric {
        /// The scalar field used to resolve textual references to existing
        /// entries of this metric. Must pass [`validate`] checks: input mode,
        /// `int`/`string` base, cardinality `(1,1)`.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        primary_identifier_field: Option<FieldId>,
    },
}

/// A schema definition: either an attribute or a metric.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Definition {
    pub id: DefinitionId,
    /// Human-readable code, unique across the schema (e.g. `EST`, `TIM`).
    pub code: String,
    pub display_name: String,
    pub kind: DefinitionKind,
    /// Schema-level parent chain; produces the `division` vector for entries
    /// rooted at this definition.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_definition: Option<DefinitionId>,
}

impl Definition {
    pub fn is_metric(&self) -> bool {
        matches!(self.kind, DefinitionKind::Metric { .. })
    }

    pub fn is_attribute(&self) -> bool {
        matches!(self.kind, DefinitionKind::Attribute { .. })
    }

    pub fn datatype(&self) -> Option<Datatype> {
        match self.kind {
            DefinitionKind::Attribute { datatype } => Some(datatype),
            DefinitionKind::Metric { .. } => None,
        }
    }

    pub fn primary_identifier_field(&self) -> Option<FieldId> {
        match self.kind {
            DefinitionKind::Metric {
                primary_identifier_field,
            } => primary_identifier_field,
            DefinitionKind::Attribute { .. } => None,
        }
    }
}

// ============================================================================
// Fields
// ============================================================================

/// How a field's values come into existence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InputMode {
    /// Values arrive from user input.
    Input,
    /// The single value is computed by the field's formula.
    Formula,
}

/// A field slot within a metric definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Field {
    pub id: FieldId,
    /// The metric definition this field belongs to.
    pub metric: DefinitionId,
    /// Unique within the metric.
    pub name: String,
    /// The field's semantic type: an attribute or another metric.
    pub base_definition: DefinitionId,
    pub min_instances: u32,
    /// `None` means unbounded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_instances: Option<u32>,
    pub input_mode: InputMode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub formula: Option<String>,
}

impl Field {
    pub fn is_formula(&self) -> bool {
        self.input_mode == InputMode::Formula
    }

    /// `(min, max)` with `None` meaning unbounded.
    pub fn cardinality(&self) -> (u32, Option<u32>) {
        (self.min_instances, self.max_instances)
    }
}

// ============================================================================
// Schema index
// ============================================================================

/// Immutable lookup tables over a user's schema, built once per pipeline run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SchemaIndex {
    definitions: HashMap<DefinitionId, Definition>,
    fields: HashMap<FieldId, Field>,
    /// Field ids per metric, in declaration order.
    fields_by_metric: HashMap<DefinitionId, Vec<FieldId>>,
    code_to_definition: HashMap<String, DefinitionId>,
}

impl SchemaIndex {
    /// Build and validate an index from flat definition and field lists.
    ///
    /// Field declaration order within each metric is the order fields appear
    /// in `fields`; the pipeline and the formula applier depend on it.
    pub fn build(
        definitions: Vec<Definition>,
        fields: Vec<Field>,
    ) -> Result<Self, SchemaError> {
        let mut index = SchemaIndex::default();

        for definition in definitions {
            if index.definitions.contains_key(&definition.id) {
                return Err(SchemaError::DuplicateDefinition {
                    code: definition.code,
                });
            }
            if index
                .code_to_definition
                .insert(definition.code.clone(), definition.id)
                .is_some()
            {
                return Err(SchemaError::DuplicateDefinition {
                    code: definition.code,
                });
            }
            index.definitions.insert(definition.id, definition);
        }

        for field in fields {
            if index.fields.contains_key(&field.id) {
                return Err(SchemaError::DuplicateField {
                    metric: index.code_of(field.metric),
                    name: field.name,
                });
            }
            index
                .fields_by_metric
                .entry(field.metric)
                .or_default()
                .push(field.id);
            index.fields.insert(field.id, field);
        }

        validate::validate(&index)?;
        Ok(index)
    }

    pub fn definition(&self, id: DefinitionId) -> Option<&Definition> {
        self.definitions.get(&id)
    }

    pub fn definition_by_code(&self, code: &str) -> Option<&Definition> {
        self.code_to_definition
            .get(code)
            .and_then(|id| self.definitions.get(id))
    }

    pub fn field(&self, id: FieldId) -> Option<&Field> {
        self.fields.get(&id)
    }

    /// Field ids of a metric, in declaration order. Empty for attributes and
    /// unknown ids.
    pub fn metric_fields(&self, metric: DefinitionId) -> &[FieldId] {
        self.fields_by_metric
            .get(&metric)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// The definition a field references as its semantic type.
    pub fn field_base(&self, field: &Field) -> Option<&Definition> {
        self.definition(field.base_definition)
    }

    pub fn field_by_name(&self, metric: DefinitionId, name: &str) -> Option<&Field> {
        self.metric_fields(metric)
            .iter()
            .filter_map(|id| self.fields.get(id))
            .find(|f| f.name == name)
    }

    pub fn definitions(&self) -> impl Iterator<Item = &Definition> {
        self.definitions.values()
    }

    pub fn fields(&self) -> impl Iterator<Item = &Field> {
        self.fields.values()
    }

    /// The definition's parent chain rendered as codes, outermost ancestor
    /// first and the definition itself last.
    ///
    /// Errors on a `parent_definition` cycle or a dangling parent id.
    pub fn division_of(&self, id: DefinitionId) -> Result<Vec<String>, SchemaError> {
        let mut chain = Vec::new();
        let mut seen = std::collections::HashSet::new();
        let mut cursor = Some(id);

        while let Some(current) = cursor {
            if !seen.insert(current) {
                return Err(SchemaError::ParentCycle {
                    code: self.code_of(id),
                });
            }
            let definition =
                self.definitions
                    .get(&current)
                    .ok_or_else(|| SchemaError::UnknownDefinition {
                        code: format!("#{}", current.raw()),
                    })?;
            chain.push(definition.code.clone());
            cursor = definition.parent_definition;
        }

        chain.reverse();
        Ok(chain)
    }

    fn code_of(&self, id: DefinitionId) -> String {
        self.definitions
            .get(&id)
            .map(|d| d.code.clone())
            .unwrap_or_else(|| format!("#{}", id.raw()))
    }
}
