//! The timing-block parser.
//!
//! Each line after the header covers one time range and its per-base minute
//! allocation:
//!
//! ```text
//! EST:TFG/research;adv:7,project:paper
//! 1400-1500 t30m/thk15m5n10
//! 1515-1600 t40 | project:slides | mood:tired
//! ```
//!
//! produces one parent `EST` input per line, each containing the header
//! attributes (line overrides replacing them by field identity) and a nested
//! `TIM` input carrying `time_init`, `time_end`, `duration` and one
//! `time_type` value per distinct base, subdivision-tagged with the base.
//!
//! Validation: minutes below 60, strictly positive durations, lines in
//! non-overlapping ascending order, token sum within the duration, and no
//! stray residue anywhere in the token run. Any failure rejects the block.

use chrono::NaiveDateTime;
use nom::{
    bytes::complete::take_while_m_n,
    character::complete::{alpha1, char as pchar, digit1},
    combinator::{all_consuming, map_res, opt, recognize},
    multi::{many1, separated_list1},
    sequence::{separated_pair, tuple},
    IResult,
};

use metrika_pipeline::{AttributeValueInput, FieldInput, MetricEntryInput};
use metrika_schema::{Definition, SchemaIndex};

use crate::error::ParseError;
use crate::header::{self, Header};
use crate::timing_field;

/// One parsed timing line, before it is turned into entry inputs.
#[derive(Debug, Clone, PartialEq)]
pub struct TimingLine {
    /// Minutes since the day's midnight; hours above 23 encode next-day
    /// crossings.
    pub time_init: i64,
    pub time_end: i64,
    /// Aggregated minutes per distinct base, in first-appearance order.
    pub tokens: Vec<(String, i64)>,
    pub overrides: Vec<(String, String)>,
    pub tags: Vec<(String, String)>,
}

impl TimingLine {
    pub fn duration(&self) -> i64 {
        self.time_end - self.time_init
    }
}

fn two_digits(input: &str) -> IResult<&str, i64> {
    map_res(
        take_while_m_n(2, 2, |c: char| c.is_ascii_digit()),
        str::parse::<i64>,
    )(input)
}

/// `HHMM` as minutes since midnight; minutes must stay below 60, hours may
/// exceed 23.
fn clock(input: &str) -> IResult<&str, i64> {
    map_res(
        tuple((two_digits, two_digits)),
        |(hours, minutes)| -> Result<i64, String> {
            if minutes >= 60 {
                return Err(format!("minutes {minutes} out of range"));
            }
            Ok(hours * 60 + minutes)
        },
    )(input)
}

fn time_range(input: &str) -> IResult<&str, (i64, i64)> {
    separated_pair(clock, pchar('-'), clock)(input)
}

/// One `letters digits` token. A `/` may separate tokens; within the letter
/// run it separates hierarchy segments of the base (`m/thk`).
fn time_token(input: &str) -> IResult<&str, (String, i64)> {
    let (input, _) = opt(pchar('/'))(input)?;
    let (input, letters) = recognize(separated_list1(pchar('/'), alpha1))(input)?;
    let (input, minutes) = map_res(digit1, str::parse::<i64>)(input)?;
    Ok((input, (letters.to_lowercase(), minutes)))
}

/// Scan a token run, rejecting any residue, and aggregate repeated bases.
pub fn parse_time_tokens(text: &str) -> Result<Vec<(String, i64)>, String> {
    let text = text.trim();
    let (_, raw) = all_consuming(many1(time_token))(text)
        .map_err(|_| format!("invalid time tokens `{text}`"))?;

    let mut aggregated: Vec<(String, i64)> = Vec::new();
    for (base, minutes) in raw {
        match aggregated.iter_mut().find(|(b, _)| *b == base) {
            Some((_, total)) => *total += minutes,
            None => aggregated.push((base, minutes)),
        }
    }
    Ok(aggregated)
}

fn parse_timing_line(line_no: usize, line: &str) -> Result<TimingLine, ParseError> {
    let mut segments = line.split('|');
    let body = segments.next().unwrap_or("").trim();
    let overrides = match segments.next() {
        Some(text) => header::parse_pairs(line_no, text, "override")?,
        None => Vec::new(),
    };
    let tags = match segments.next() {
        Some(text) => header::parse_pairs(line_no, text, "tag")?,
        None => Vec::new(),
    };
    if segments.next().is_some() {
        return Err(ParseError::new(line_no, "too many `|` segments", line));
    }

    let Some((range_text, token_text)) = body.split_once(char::is_whitespace) else {
        return Err(ParseError::new(
            line_no,
            "expected `HHMM-HHMM tokens`",
            body,
        ));
    };
    let (_, (time_init, time_end)) = all_consuming(time_range)(range_text.trim())
        .map_err(|_| {
            ParseError::new(line_no, "malformed time range", range_text.trim())
        })?;
    if time_end <= time_init {
        return Err(ParseError::new(
            line_no,
            "time range must end after it starts",
            range_text.trim(),
        ));
    }

    let tokens = parse_time_tokens(token_text)
        .map_err(|message| ParseError::new(line_no, message, token_text.trim()))?;

    let total: i64 = tokens.iter().map(|(_, minutes)| minutes).sum();
    let duration = time_end - time_init;
    if total > duration {
        return Err(ParseError::new(
            line_no,
            format!("token minutes {total} exceed the {duration} minute duration"),
            token_text.trim(),
        ));
    }

    Ok(TimingLine {
        time_init,
        time_end,
        tokens,
        overrides,
        tags,
    })
}

/// Parse the lines of a timing block into one parent input per timing line.
///
/// `lines` are the block's effective lines including the header; the header
/// has already identified `definition` as timing-capable.
pub fn parse_timing_block(
    lines: &[(usize, &str)],
    schema: &SchemaIndex,
    definition: &Definition,
    timestamp: NaiveDateTime,
) -> Result<Vec<MetricEntryInput>, ParseError> {
    let (header_no, header_line) = lines[0];
    let header = header::parse_header(header_no, header_line)?;

    let tim_field = timing_field(schema, definition).ok_or_else(|| {
        ParseError::new(
            header_no,
            format!("definition `{}` has no TIM field", definition.code),
            header_line,
        )
    })?;
    let tim_definition = schema.field_base(tim_field).ok_or_else(|| {
        ParseError::new(
            header_no,
            format!("field `{}` has a dangling base definition", tim_field.name),
            header_line,
        )
    })?;

    let mut inputs = Vec::new();
    let mut previous_end: Option<i64> = None;

    for (line_no, line) in &lines[1..] {
        let timing = parse_timing_line(*line_no, line)?;
        if previous_end.is_some_and(|end| timing.time_init < end) {
            return Err(ParseError::new(
                *line_no,
                "timing lines must be in non-overlapping ascending order",
                *line,
            ));
        }
        previous_end = Some(timing.time_end);

        inputs.push(build_parent_input(
            *line_no,
            &header,
            &timing,
            schema,
            definition,
            tim_field.name.as_str(),
            tim_definition,
            timestamp,
        )?);
    }

    if inputs.is_empty() {
        return Err(ParseError::new(
            header_no,
            "timing block has no timing lines",
            header_line,
        ));
    }
    Ok(inputs)
}

#[allow(clippy::too_many_arguments)]
fn build_parent_input(
    line_no: usize,
    header: &Header,
    timing: &TimingLine,
    schema: &SchemaIndex,
    definition: &Definition,
    tim_field_name: &str,
    tim_definition: &Definition,
    timestamp: NaiveDateTime,
) -> Result<MetricEntryInput, ParseError> {
    // Line overrides replace header pairs by field identity; override-only
    // keys are appended in line order.
    let mut pairs: Vec<(String, String)> = header.attrs.clone();
    for (key, value) in &timing.overrides {
        match pairs.iter_mut().find(|(k, _)| k == key) {
            Some((_, existing)) => *existing = value.clone(),
            None => pairs.push((key.clone(), value.clone())),
        }
    }

    let mut fields = header::field_inputs_from_pairs(line_no, &pairs, definition, schema)?;

    let mut tim_input = MetricEntryInput::new(&tim_definition.code, timestamp);
    for (name, value) in [
        ("time_init", timing.time_init),
        ("time_end", timing.time_end),
        ("duration", timing.duration()),
    ] {
        if schema.field_by_name(tim_definition.id, name).is_some() {
            tim_input.fields.push(FieldInput {
                field: name.to_string(),
                values: vec![AttributeValueInput::int(value)],
            });
        }
    }
    if schema
        .field_by_name(tim_definition.id, "time_type")
        .is_some()
    {
        tim_input.fields.push(FieldInput {
            field: "time_type".to_string(),
            values: timing
                .tokens
                .iter()
                .map(|(base, minutes)| {
                    AttributeValueInput::int(*minutes).with_subdivision(base.clone())
                })
                .collect(),
        });
    }

    fields.push(FieldInput {
        field: tim_field_name.to_string(),
        values: vec![AttributeValueInput::nested(tim_input)],
    });

    let mut tags = header.tags.clone();
    tags.extend(timing.tags.iter().cloned());

    let mut input = MetricEntryInput::new(&definition.code, timestamp);
    input.subdivision = header.subdivision.clone();
    input.comments = header::render_tags(&tags);
    input.fields = fields;
    Ok(input)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_runs_aggregate_repeated_bases() {
        assert_eq!(
            parse_time_tokens("t30m/thk15m5n10").unwrap(),
            vec![
                ("t".to_string(), 30),
                ("m/thk".to_string(), 15),
                ("m".to_string(), 5),
                ("n".to_string(), 10),
            ]
        );
        assert_eq!(
            parse_time_tokens("t10t20").unwrap(),
            vec![("t".to_string(), 30)]
        );
        // `/` between tokens is a separator.
        assert_eq!(
            parse_time_tokens("t10/m5").unwrap(),
            vec![("t".to_string(), 10), ("m".to_string(), 5)]
        );
        // Letters are lowercased.
        assert_eq!(
            parse_time_tokens("T10").unwrap(),
            vec![("t".to_string(), 10)]
        );
    }

    #[test]
    fn unknown_bases_are_legal_in_the_stream() {
        assert_eq!(
            parse_time_tokens("x15t10").unwrap(),
            vec![("x".to_string(), 15), ("t".to_string(), 10)]
        );
    }

    #[test]
    fn stray_residue_is_rejected() {
        assert!(parse_time_tokens("").is_err());
        assert!(parse_time_tokens("30").is_err());
        assert!(parse_time_tokens("t30!m5").is_err());
        assert!(parse_time_tokens("t30 m5").is_err());
        assert!(parse_time_tokens("t").is_err());
    }

    #[test]
    fn clock_arithmetic() {
        let line = parse_timing_line(2, "1400-1500 t30").unwrap();
        assert_eq!(line.time_init, 14 * 60);
        assert_eq!(line.time_end, 15 * 60);
        assert_eq!(line.duration(), 60);

        // Hours past 23 encode next-day crossings.
        let line = parse_timing_line(2, "2330-2505 t30").unwrap();
        assert_eq!(line.duration(), 95);
    }

    #[test]
    fn invalid_lines() {
        // Reversed range.
        assert!(parse_timing_line(2, "1500-1400 t30").is_err());
        // Zero duration.
        assert!(parse_timing_line(2, "1400-1400 t30").is_err());
        // Minutes out of range.
        assert!(parse_timing_line(2, "1470-1500 t30").is_err());
        // Token sum exceeding the duration.
        assert!(parse_timing_line(2, "1400-1430 t40").is_err());
        // Missing tokens.
        assert!(parse_timing_line(2, "1400-1500").is_err());
    }

    #[test]
    fn overrides_and_tags_split_on_pipes() {
        let line =
            parse_timing_line(2, "1400-1500 t60 | project:slides | mood:tired").unwrap();
        assert_eq!(
            line.overrides,
            vec![("project".to_string(), "slides".to_string())]
        );
        assert_eq!(line.tags, vec![("mood".to_string(), "tired".to_string())]);
    }
}
