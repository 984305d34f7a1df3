//! Shared header-line grammar: `DEF_CODE[":"SUBDIV] ";" attr_pairs [";" tag_pairs]`.
//!
//! Attribute pairs are `key:value`, comma-separated; keys name fields of the
//! header's metric and values are typed by the field's base datatype. Keys
//! that do not name a field are skipped with a warning. Tag pairs share the
//! `key:value` shape and are carried opaquely (the core has no tag entities;
//! they land in the produced entry's comments).

use metrika_pipeline::{AttributeValueInput, FieldInput};
use metrika_schema::{Datatype, Definition, DefinitionKind, SchemaIndex};

use crate::error::ParseError;

#[derive(Debug, Clone, PartialEq)]
pub struct Header {
    pub code: String,
    pub subdivision: Option<String>,
    /// Raw `key:value` attribute pairs, in input order.
    pub attrs: Vec<(String, String)>,
    pub tags: Vec<(String, String)>,
}

/// The definition code of a header line, for registry dispatch.
pub fn definition_code(line: &str) -> &str {
    let head = line.split(';').next().unwrap_or("");
    head.split(':').next().unwrap_or("").trim()
}

fn is_code(s: &str) -> bool {
    !s.is_empty() && s.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

pub fn parse_header(line_no: usize, line: &str) -> Result<Header, ParseError> {
    let mut segments = line.split(';');
    let head = segments.next().unwrap_or("").trim();

    let (code, subdivision) = match head.split_once(':') {
        Some((code, subdivision)) => (code.trim(), Some(subdivision.trim())),
        None => (head, None),
    };
    if !is_code(code) {
        return Err(ParseError::new(
            line_no,
            format!("malformed definition code `{code}`"),
            line,
        ));
    }
    if subdivision.is_some_and(str::is_empty) {
        return Err(ParseError::new(line_no, "empty subdivision", line));
    }

    let attrs = match segments.next() {
        Some(text) => parse_pairs(line_no, text, "attribute")?,
        None => Vec::new(),
    };
    let tags = match segments.next() {
        Some(text) => parse_pairs(line_no, text, "tag")?,
        None => Vec::new(),
    };
    if let Some(extra) = segments.next() {
        return Err(ParseError::new(
            line_no,
            "too many `;` segments in header",
            extra,
        ));
    }

    Ok(Header {
        code: code.to_string(),
        subdivision: subdivision.map(str::to_string),
        attrs,
        tags,
    })
}

/// Parse comma-separated `key:value` pairs; an empty segment yields none.
pub fn parse_pairs(
    line_no: usize,
    text: &str,
    what: &str,
) -> Result<Vec<(String, String)>, ParseError> {
    let text = text.trim();
    if text.is_empty() {
        return Ok(Vec::new());
    }
    let mut pairs = Vec::new();
    for part in text.split(',') {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }
        let Some((key, value)) = part.split_once(':') else {
            return Err(ParseError::new(
                line_no,
                format!("{what} pair missing `:`"),
                part,
            ));
        };
        let key = key.trim();
        let value = value.trim();
        if key.is_empty() || value.is_empty() {
            return Err(ParseError::new(
                line_no,
                format!("{what} pair needs a key and a value"),
                part,
            ));
        }
        pairs.push((key.to_string(), value.to_string()));
    }
    Ok(pairs)
}

/// Parse a raw attribute value into the column its field expects.
///
/// Attribute-based fields parse by datatype; metric-based fields produce a
/// scalar identifier placeholder (`int` if the text parses, else `string`).
pub fn typed_value(
    base_kind: &DefinitionKind,
    text: &str,
) -> Result<AttributeValueInput, String> {
    match base_kind {
        DefinitionKind::Attribute { datatype } => match datatype {
            Datatype::Int => text
                .parse::<i64>()
                .map(AttributeValueInput::int)
                .map_err(|_| format!("`{text}` is not an int")),
            Datatype::Float => text
                .parse::<f64>()
                .map(AttributeValueInput::float)
                .map_err(|_| format!("`{text}` is not a float")),
            Datatype::String => Ok(AttributeValueInput::string(text)),
            Datatype::Bool => match text {
                "true" => Ok(AttributeValueInput::boolean(true)),
                "false" => Ok(AttributeValueInput::boolean(false)),
                _ => Err(format!("`{text}` is not a bool")),
            },
            Datatype::Timestamp => {
                chrono::NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S")
                    .or_else(|_| {
                        text.parse::<chrono::NaiveDate>()
                            .map(|d| d.and_time(chrono::NaiveTime::MIN))
                    })
                    .map(|ts| AttributeValueInput {
                        value_timestamp: Some(ts),
                        ..AttributeValueInput::default()
                    })
                    .map_err(|_| format!("`{text}` is not a timestamp"))
            }
            Datatype::Hierarchy => Ok(AttributeValueInput::hierarchy(text)),
        },
        DefinitionKind::Metric { .. } => Ok(match text.parse::<i64>() {
            Ok(id) => AttributeValueInput::int(id),
            Err(_) => AttributeValueInput::string(text),
        }),
    }
}

/// Render tag pairs into the comments text carried on the produced input.
pub fn render_tags(tags: &[(String, String)]) -> Option<String> {
    if tags.is_empty() {
        return None;
    }
    Some(
        tags.iter()
            .map(|(k, v)| format!("{k}:{v}"))
            .collect::<Vec<_>>()
            .join(", "),
    )
}

/// Turn raw pairs into single-valued field inputs against `definition`,
/// skipping keys that do not name one of its fields.
pub fn field_inputs_from_pairs(
    line_no: usize,
    pairs: &[(String, String)],
    definition: &Definition,
    schema: &SchemaIndex,
) -> Result<Vec<FieldInput>, ParseError> {
    let mut inputs = Vec::new();
    for (key, value) in pairs {
        let Some(field) = schema.field_by_name(definition.id, key) else {
            tracing::warn!(
                metric = %definition.code,
                key = %key,
                "skipping header key that names no field"
            );
            continue;
        };
        let base = schema.field_base(field).ok_or_else(|| {
            ParseError::new(
                line_no,
                format!("field `{key}` has a dangling base definition"),
                key.as_str(),
            )
        })?;
        let value = typed_value(&base.kind, value).map_err(|message| {
            ParseError::new(line_no, format!("field `{key}`: {message}"), value.as_str())
        })?;
        inputs.push(FieldInput {
            field: field.name.clone(),
            values: vec![value],
        });
    }
    Ok(inputs)
}
