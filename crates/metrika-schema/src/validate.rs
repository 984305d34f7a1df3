//! Schema invariant checks, run once when a [`SchemaIndex`](crate::SchemaIndex)
//! is built.
//!
//! The pipeline assumes these hold and does not re-check them per entry:
//!
//! - field names are unique within their metric
//! - every field's `base_definition` resolves, and fields hang off metrics
//! - `input_mode = formula` implies `max_instances = 1` and a non-empty formula
//! - a metric's primary identifier field is an input field with a scalar
//!   (`int` or `string`) attribute base and cardinality `(1, 1)`
//! - `parent_definition` chains are acyclic

use thiserror::Error;

use crate::{DefinitionKind, InputMode, SchemaIndex};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchemaError {
    #[error("unknown definition `{code}`")]
    UnknownDefinition { code: String },

    #[error("duplicate definition code `{code}`")]
    DuplicateDefinition { code: String },

    #[error("duplicate field `{name}` on metric `{metric}`")]
    DuplicateField { metric: String, name: String },

    #[error("field `{name}` belongs to `{code}`, which is not a metric")]
    FieldOnNonMetric { code: String, name: String },

    #[error("field `{name}` on `{metric}`: base definition does not resolve")]
    DanglingBase { metric: String, name: String },

    #[error("formula field `{name}` on `{metric}` must have max_instances = 1")]
    FormulaFieldCardinality { metric: String, name: String },

    #[error("formula field `{name}` on `{metric}` has no formula body")]
    FormulaFieldWithoutFormula { metric: String, name: String },

    #[error("field `{name}` on `{metric}`: min_instances {min} exceeds max_instances {max}")]
    InvertedCardinality {
        metric: String,
        name: String,
        min: u32,
        max: u32,
    },

    #[error("metric `{metric}`: primary identifier field does not resolve")]
    DanglingPrimaryIdentifier { metric: String },

    #[error("metric `{metric}`: primary identifier field `{name}` {reason}")]
    InvalidPrimaryIdentifier {
        metric: String,
        name: String,
        reason: String,
    },

    #[error("definition `{code}`: parent_definition chain contains a cycle")]
    ParentCycle { code: String },
}

pub(crate) fn validate(index: &SchemaIndex) -> Result<(), SchemaError> {
    for definition in index.definitions() {
        // Acyclic parent chains; `division_of` reports the cycle itself.
        index.division_of(definition.id)?;

        let field_ids = index.metric_fields(definition.id);
        if !field_ids.is_empty() && !definition.is_metric() {
            let first = index
                .field(field_ids[0])
                .map(|f| f.name.clone())
                .unwrap_or_default();
            return Err(SchemaError::FieldOnNonMetric {
                code: definition.code.clone(),
                name: first,
            });
        }

        let mut seen_names = std::collections::HashSet::new();
        for field in field_ids.iter().filter_map(|id| index.field(*id)) {
            if !seen_names.insert(field.name.as_str()) {
                return Err(SchemaError::DuplicateField {
                    metric: definition.code.clone(),
                    name: field.name.clone(),
                });
            }

            if index.field_base(field).is_none() {
                return Err(SchemaError::DanglingBase {
                    metric: definition.code.clone(),
                    name: field.name.clone(),
                });
            }

            if let Some(max) = field.max_instances {
                if field.min_instances > max {
                    return Err(SchemaError::InvertedCardinality {
                        metric: definition.code.clone(),
                        name: field.name.clone(),
                        min: field.min_instances,
                        max,
                    });
                }
            }

            if field.input_mode == InputMode::Formula {
                if field.max_instances != Some(1) {
                    return Err(SchemaError::FormulaFieldCardinality {
                        metric: definition.code.clone(),
                        name: field.name.clone(),
                    });
                }
                if field.formula.as_deref().map_or(true, |f| f.trim().is_empty()) {
                    return Err(SchemaError::FormulaFieldWithoutFormula {
                        metric: definition.code.clone(),
                        name: field.name.clone(),
                    });
                }
            }
        }

        if let DefinitionKind::Metric {
            primary_identifier_field: Some(pif),
        } = definition.kind
        {
            let field = index
                .field(pif)
                .ok_or_else(|| SchemaError::DanglingPrimaryIdentifier {
                    metric: definition.code.clone(),
                })?;
            let invalid = |reason: &str| SchemaError::InvalidPrimaryIdentifier {
                metric: definition.code.clone(),
                name: field.name.clone(),
                reason: reason.to_string(),
            };
            if field.metric != definition.id {
                return Err(invalid("belongs to a different metric"));
            }
            if field.input_mode != InputMode::Input {
                return Err(invalid("must be an input field"));
            }
            if field.cardinality() != (1, Some(1)) {
                return Err(invalid("must have cardinality (1, 1)"));
            }
            let scalar = index
                .field_base(field)
                .and_then(|base| base.datatype())
                .map_or(false, |dt| dt.is_identifier());
            if !scalar {
                return Err(invalid("must have an `int` or `string` attribute base"));
            }
        }
    }

    Ok(())
}
