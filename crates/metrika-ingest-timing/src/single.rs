//! The single-line adapter: one header-shaped line, one entry input.

use chrono::NaiveDateTime;

use metrika_pipeline::MetricEntryInput;
use metrika_schema::{Definition, SchemaIndex};

use crate::error::ParseError;
use crate::header;

/// Parse `DEF_CODE[:SUBDIV];key:value,...[;tags]` into one entry input.
pub fn parse_single_line(
    line_no: usize,
    line: &str,
    schema: &SchemaIndex,
    definition: &Definition,
    timestamp: NaiveDateTime,
) -> Result<MetricEntryInput, ParseError> {
    let parsed = header::parse_header(line_no, line)?;
    let fields =
        header::field_inputs_from_pairs(line_no, &parsed.attrs, definition, schema)?;

    let mut input = MetricEntryInput::new(&definition.code, timestamp);
    input.subdivision = parsed.subdivision;
    input.comments = header::render_tags(&parsed.tags);
    input.fields = fields;
    Ok(input)
}
