//! Input adapters turning raw text blocks into [`MetricEntryInput`]s.
//!
//! Two adapters share a header grammar:
//!
//! - the **single-line parser** handles `DEF_CODE[:SUBDIV];key:value,...`
//!   blocks with one effective line, and
//! - the **timing-block parser** handles multi-line blocks whose header
//!   names a *timing-capable* metric (one with at least one field based on
//!   the `TIM` metric), each further line being
//!   `HHMM-HHMM tokens [| overrides] [| tags]`.
//!
//! [`parse_block`] is the registry: it inspects the block and the schema and
//! dispatches to the right adapter. Lines starting with `#` are comments;
//! blank lines are ignored. Any validation failure rejects the whole block.

mod error;
mod header;
mod single;
mod timing;

pub use error::ParseError;
pub use single::parse_single_line;
pub use timing::{parse_timing_block, parse_time_tokens, TimingLine};

use chrono::NaiveDateTime;

use metrika_pipeline::MetricEntryInput;
use metrika_schema::{Definition, Field, SchemaIndex};

/// Conventional code of the timing metric.
pub const TIM_CODE: &str = "TIM";

/// Lines that take part in parsing: non-blank, non-comment, paired with
/// their 1-based line numbers.
fn effective_lines(text: &str) -> Vec<(usize, &str)> {
    text.lines()
        .enumerate()
        .map(|(i, line)| (i + 1, line.trim()))
        .filter(|(_, line)| !line.is_empty() && !line.starts_with('#'))
        .collect()
}

/// The first field of `definition` whose base is the `TIM` metric, if any.
pub fn timing_field<'a>(schema: &'a SchemaIndex, definition: &Definition) -> Option<&'a Field> {
    schema
        .metric_fields(definition.id)
        .iter()
        .filter_map(|id| schema.field(*id))
        .find(|field| {
            schema
                .field_base(field)
                .is_some_and(|base| base.is_metric() && base.code == TIM_CODE)
        })
}

/// Parse a raw input block, dispatching between the single-line and the
/// timing-block adapters.
///
/// The timing parser handles the block iff it has more than one effective
/// line **and** the referenced definition is timing-capable; everything else
/// goes through the single-line adapter, which requires exactly one line.
pub fn parse_block(
    text: &str,
    schema: &SchemaIndex,
    timestamp: NaiveDateTime,
) -> Result<Vec<MetricEntryInput>, ParseError> {
    let lines = effective_lines(text);
    let Some((header_no, header)) = lines.first().copied() else {
        return Err(ParseError::new(1, "empty input block", ""));
    };

    let code = header::definition_code(header);
    let definition = schema
        .definition_by_code(code)
        .ok_or_else(|| ParseError::new(header_no, format!("unknown definition `{code}`"), header))?;

    if lines.len() > 1 && timing_field(schema, definition).is_some() {
        return parse_timing_block(&lines, schema, definition, timestamp);
    }

    if let Some((line_no, line)) = lines.get(1) {
        return Err(ParseError::new(
            *line_no,
            format!("definition `{code}` is not timing-capable; expected a single line"),
            *line,
        ));
    }
    parse_single_line(header_no, header, schema, definition, timestamp).map(|input| vec![input])
}
