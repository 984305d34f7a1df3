//! Line-oriented parser for `WIDGET ... END` definitions.

use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WidgetParseError {
    #[error("parse error on line {line}: {message}")]
    Line { line: usize, message: String },
}

fn err(line: usize, message: impl Into<String>) -> WidgetParseError {
    WidgetParseError::Line {
        line,
        message: message.into(),
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WidgetDef {
    pub name: String,
    pub dataset: Dataset,
    pub fields: Vec<WidgetField>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dataset {
    pub alias: String,
    pub definition_code: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WidgetFieldType {
    Int,
    Float,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WidgetField {
    pub label: String,
    pub ty: WidgetFieldType,
    pub expr: String,
}

/// `"LABEL": (int|float) = EXPR`
fn field_line_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"^"([^"]+)"\s*:\s*(int|float)\s*=\s*(.+)$"#).expect("field line regex")
    })
}

/// `alias = DEF_CODE` with an optional legacy `FROM PERIOD` suffix that is
/// accepted and ignored; the effective period always comes from the caller.
fn parse_dataset(line_no: usize, line: &str) -> Result<Dataset, WidgetParseError> {
    let (alias, rest) = line
        .split_once('=')
        .ok_or_else(|| err(line_no, "dataset line expects `alias = DEF_CODE`"))?;
    let alias = alias.trim();
    if alias.is_empty() || !alias.chars().all(|c| c.is_alphanumeric() || c == '_') {
        return Err(err(line_no, format!("malformed dataset alias `{alias}`")));
    }

    let mut parts = rest.trim().split_whitespace();
    let code = parts
        .next()
        .ok_or_else(|| err(line_no, "dataset line is missing a definition code"))?;
    if !code.chars().all(|c| c.is_alphanumeric() || c == '_') {
        return Err(err(line_no, format!("malformed definition code `{code}`")));
    }
    match parts.next() {
        None => {}
        Some("FROM") => {
            if parts.next().is_none() {
                return Err(err(line_no, "`FROM` without a period"));
            }
        }
        Some(extra) => {
            return Err(err(line_no, format!("unexpected `{extra}` on dataset line")));
        }
    }

    Ok(Dataset {
        alias: alias.to_string(),
        definition_code: code.to_string(),
    })
}

pub fn parse_widget(text: &str) -> Result<WidgetDef, WidgetParseError> {
    let mut lines = text
        .lines()
        .enumerate()
        .map(|(i, line)| (i + 1, line.trim()))
        .filter(|(_, line)| !line.is_empty());

    let (line_no, header) = lines
        .next()
        .ok_or_else(|| err(1, "empty widget source"))?;
    let name = header
        .strip_prefix("WIDGET")
        .map(str::trim)
        .and_then(|rest| rest.strip_prefix('"'))
        .and_then(|rest| rest.strip_suffix('"'))
        .filter(|name| !name.is_empty())
        .ok_or_else(|| err(line_no, "expected `WIDGET \"name\"`"))?;

    let (line_no, dataset_line) = lines
        .next()
        .ok_or_else(|| err(line_no, "missing dataset line"))?;
    let dataset = parse_dataset(line_no, dataset_line)?;

    let mut fields = Vec::new();
    let mut saw_end = false;
    let mut last_line = line_no;
    for (line_no, line) in lines {
        last_line = line_no;
        if line == "END" {
            saw_end = true;
            break;
        }
        let captures = field_line_re()
            .captures(line)
            .ok_or_else(|| err(line_no, format!("unrecognized widget line: {line}")))?;
        let ty = match &captures[2] {
            "int" => WidgetFieldType::Int,
            _ => WidgetFieldType::Float,
        };
        fields.push(WidgetField {
            label: captures[1].to_string(),
            ty,
            expr: captures[3].trim().to_string(),
        });
    }

    if !saw_end {
        return Err(err(last_line, "missing `END`"));
    }
    if fields.is_empty() {
        return Err(err(last_line, "widget declares no computed fields"));
    }

    Ok(WidgetDef {
        name: name.to_string(),
        dataset,
        fields,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const SOURCE: &str = r#"
WIDGET "Productivity"
tims = TIM
"productive_time": int = sum(tims.time("t"))
"productivity": float = sum(tims.time("t")) / sum(tims.duration)
END
"#;

    #[test]
    fn parses_a_complete_widget() {
        let widget = parse_widget(SOURCE).unwrap();
        assert_eq!(widget.name, "Productivity");
        assert_eq!(widget.dataset.alias, "tims");
        assert_eq!(widget.dataset.definition_code, "TIM");
        assert_eq!(widget.fields.len(), 2);
        assert_eq!(widget.fields[0].label, "productive_time");
        assert_eq!(widget.fields[0].ty, WidgetFieldType::Int);
        assert_eq!(widget.fields[1].ty, WidgetFieldType::Float);
        assert_eq!(
            widget.fields[1].expr,
            "sum(tims.time(\"t\")) / sum(tims.duration)"
        );
    }

    #[test]
    fn widget_defs_round_trip_through_json() {
        // Widgets are persisted definitions; the serde shape is the contract.
        let widget = parse_widget(SOURCE).unwrap();
        let json = serde_json::to_string(&widget).unwrap();
        let restored: WidgetDef = serde_json::from_str(&json).unwrap();
        assert_eq!(widget, restored);
    }

    #[test]
    fn legacy_from_period_suffix_is_ignored() {
        let widget = parse_widget(
            "WIDGET \"W\"\ntims = TIM FROM WEEK\n\"n\": int = count(tims)\nEND\n",
        )
        .unwrap();
        assert_eq!(widget.dataset.definition_code, "TIM");
    }

    #[test]
    fn missing_end_is_reported() {
        let err = parse_widget("WIDGET \"W\"\ntims = TIM\n\"n\": int = count(tims)\n")
            .unwrap_err();
        let WidgetParseError::Line { message, .. } = err;
        assert!(message.contains("END"));
    }

    #[test]
    fn missing_fields_are_reported() {
        let err = parse_widget("WIDGET \"W\"\ntims = TIM\nEND\n").unwrap_err();
        let WidgetParseError::Line { message, .. } = err;
        assert!(message.contains("no computed fields"));
    }

    #[test]
    fn malformed_lines_carry_their_line_number() {
        let err =
            parse_widget("WIDGET \"W\"\ntims = TIM\n\"n\" int = count(tims)\nEND\n").unwrap_err();
        assert_eq!(
            err,
            WidgetParseError::Line {
                line: 3,
                message: "unrecognized widget line: \"n\" int = count(tims)".into()
            }
        );

        assert!(parse_widget("WIDGET W\ntims = TIM\n\"n\": int = 1\nEND").is_err());
        assert!(parse_widget("WIDGET \"W\"\ntims TIM\n\"n\": int = 1\nEND").is_err());
    }
}
