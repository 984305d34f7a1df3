//! Loaded entries, the loader boundary, and period ranges.

use std::collections::HashMap;
use std::str::FromStr;

use chrono::{Datelike, Days, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

/// A scalar as the loader hands it over, already flattened out of the typed
/// columns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "tag", rename_all = "snake_case")]
pub enum LoadedScalar {
    Int { value: i64 },
    Float { value: f64 },
    Str { value: String },
    Bool { value: bool },
}

impl LoadedScalar {
    /// Numeric coercion for `alias.field` projections. Numeric strings
    /// coerce; anything else drops out of the projection silently.
    pub fn as_number(&self) -> Option<f64> {
        match self {
            LoadedScalar::Int { value } => Some(*value as f64),
            LoadedScalar::Float { value } => Some(*value),
            LoadedScalar::Str { value } => value.trim().parse::<f64>().ok(),
            LoadedScalar::Bool { value } => Some(if *value { 1.0 } else { 0.0 }),
        }
    }
}

/// Flattened form of a persisted entry, as loaded for widget evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoadedEntry {
    pub id: i64,
    pub definition_code: String,
    pub timestamp: NaiveDateTime,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subdivision: Option<String>,
    /// Field name to scalar value.
    #[serde(default)]
    pub attributes: HashMap<String, LoadedScalar>,
    /// For TIM entries: subdivision prefix to summed minutes.
    #[serde(default)]
    pub time_values: HashMap<String, i64>,
}

/// Period tags resolved against an anchor date's local calendar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Period {
    Day,
    Week,
    Month,
    Year,
}

impl Period {
    /// Half-open `[start, end)` date range containing `anchor`. Weeks start
    /// on Monday.
    pub fn range(self, anchor: NaiveDate) -> (NaiveDate, NaiveDate) {
        match self {
            Period::Day => (anchor, add_days(anchor, 1)),
            Period::Week => {
                let monday = anchor
                    .checked_sub_days(Days::new(
                        anchor.weekday().num_days_from_monday() as u64
                    ))
                    .unwrap_or(anchor);
                (monday, add_days(monday, 7))
            }
            Period::Month => {
                let first = first_of_month(anchor.year(), anchor.month());
                let next = if anchor.month() == 12 {
                    first_of_month(anchor.year() + 1, 1)
                } else {
                    first_of_month(anchor.year(), anchor.month() + 1)
                };
                (first, next)
            }
            Period::Year => (
                first_of_month(anchor.year(), 1),
                first_of_month(anchor.year() + 1, 1),
            ),
        }
    }
}

fn add_days(date: NaiveDate, days: u64) -> NaiveDate {
    date.checked_add_days(Days::new(days)).unwrap_or(date)
}

fn first_of_month(year: i32, month: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(year, month, 1).unwrap_or(NaiveDate::MIN)
}

impl FromStr for Period {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "DAY" | "TODAY" => Ok(Period::Day),
            "WEEK" => Ok(Period::Week),
            "MONTH" => Ok(Period::Month),
            "YEAR" => Ok(Period::Year),
            other => Err(format!("unknown period `{other}`")),
        }
    }
}

/// What the loader needs to resolve a widget's dataset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WidgetQuery {
    pub user_id: i64,
    pub anchor_date: NaiveDate,
    pub period: Period,
}

/// External boundary to the persistence layer.
pub trait EntryLoader {
    fn load_entries_for_widget(
        &self,
        definition_code: &str,
        query: &WidgetQuery,
    ) -> Vec<LoadedEntry>;
}

/// In-memory loader over explicitly registered entries; applies the same
/// user / definition / period filtering a persistence-backed loader would.
#[derive(Debug, Clone, Default)]
pub struct InMemoryLoader {
    entries: Vec<(i64, LoadedEntry)>,
}

impl InMemoryLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, user_id: i64, entry: LoadedEntry) {
        self.entries.push((user_id, entry));
    }
}

impl EntryLoader for InMemoryLoader {
    fn load_entries_for_widget(
        &self,
        definition_code: &str,
        query: &WidgetQuery,
    ) -> Vec<LoadedEntry> {
        let (start, end) = query.period.range(query.anchor_date);
        self.entries
            .iter()
            .filter(|(user_id, entry)| {
                *user_id == query.user_id
                    && entry.definition_code == definition_code
                    && entry.timestamp.date() >= start
                    && entry.timestamp.date() < end
            })
            .map(|(_, entry)| entry.clone())
            .collect()
    }
}
