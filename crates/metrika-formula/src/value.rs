//! Runtime value domain and the entry-access seam.

use thiserror::Error;

/// An evaluation failure; the caller attaches the field and formula when it
/// wraps this into its own error taxonomy.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct EvalError {
    pub message: String,
}

impl EvalError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// How the evaluator reads entries, on either side of the engine.
///
/// The entry pipeline implements this for its resolved tree nodes; the widget
/// evaluator implements it for the whole-collection handle bound to the
/// dataset alias. Implementations are cheap handles (references plus context)
/// and are cloned freely during evaluation.
pub trait EntryAccess: Clone {
    /// `.field` navigation on this entry.
    ///
    /// For tree nodes this returns the typed values (or entry references) of
    /// the children tagged with the field, collapsing a length-1 list to a
    /// scalar; for a collection handle it returns the per-entry numeric
    /// projection of the named attribute.
    fn get_field(&self, name: &str) -> Result<EvalValue<Self>, EvalError>;

    /// `time(base)`: the summed `value_int` of `time_type` children whose
    /// subdivision is `base` or starts with `base + "/"`. Collection handles
    /// return a per-entry list instead of a single sum.
    fn time(&self, base: &str) -> Result<EvalValue<Self>, EvalError>;

    /// The entry's subdivision, for `where(subdivision in "prefix")`.
    fn subdivision(&self) -> Option<String>;
}

/// Everything an expression can produce at runtime. Closed set; list values
/// are homogeneous.
#[derive(Debug, Clone, PartialEq)]
pub enum EvalValue<E: EntryAccess> {
    Null,
    Num(f64),
    Str(String),
    Bool(bool),
    NumList(Vec<f64>),
    StrList(Vec<String>),
    BoolList(Vec<bool>),
    Entry(E),
    EntryList(Vec<E>),
}

impl<E: EntryAccess> EvalValue<E> {
    /// Collapse a length-1 list to its scalar, per the field-navigation rules.
    pub fn collapsed(self) -> Self {
        match self {
            EvalValue::NumList(v) if v.len() == 1 => EvalValue::Num(v[0]),
            EvalValue::StrList(mut v) if v.len() == 1 => EvalValue::Str(v.remove(0)),
            EvalValue::BoolList(v) if v.len() == 1 => EvalValue::Bool(v[0]),
            EvalValue::EntryList(mut v) if v.len() == 1 => EvalValue::Entry(v.remove(0)),
            other => other,
        }
    }

    pub fn is_list(&self) -> bool {
        matches!(
            self,
            EvalValue::NumList(_)
                | EvalValue::StrList(_)
                | EvalValue::BoolList(_)
                | EvalValue::EntryList(_)
        )
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            EvalValue::Null => "null",
            EvalValue::Num(_) => "number",
            EvalValue::Str(_) => "string",
            EvalValue::Bool(_) => "bool",
            EvalValue::NumList(_) => "number list",
            EvalValue::StrList(_) => "string list",
            EvalValue::BoolList(_) => "bool list",
            EvalValue::Entry(_) => "entry",
            EvalValue::EntryList(_) => "entry list",
        }
    }
}
