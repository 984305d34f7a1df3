//! Widget evaluation over a loaded collection.

use metrika_formula::{
    evaluate_str, EntryAccess, EvalContext, EvalError, EvalOptions, EvalValue,
};
use serde::{Deserialize, Serialize};

use crate::loaded::{EntryLoader, LoadedEntry, WidgetQuery};
use crate::parse::{WidgetDef, WidgetFieldType};

/// Engine-side view of one loaded entry. The dataset alias binds to the
/// list of these, so `alias.field` distributes into a flat numeric
/// projection (non-numeric values silently drop), `alias.time(base)` yields
/// one sum per entry, and `count(alias)` counts the collection.
#[derive(Debug, Clone, Copy)]
pub struct CollectionHandle<'a> {
    entry: &'a LoadedEntry,
}

impl<'a> CollectionHandle<'a> {
    pub fn bind_all(entries: &'a [LoadedEntry]) -> EvalValue<Self> {
        EvalValue::EntryList(entries.iter().map(|entry| Self { entry }).collect())
    }
}

impl PartialEq for CollectionHandle<'_> {
    fn eq(&self, other: &Self) -> bool {
        std::ptr::eq(self.entry, other.entry)
    }
}

impl EntryAccess for CollectionHandle<'_> {
    /// Numeric coercion of the named attribute; null (dropped from the
    /// projection) when the attribute is absent or non-numeric.
    fn get_field(&self, name: &str) -> Result<EvalValue<Self>, EvalError> {
        Ok(self
            .entry
            .attributes
            .get(name)
            .and_then(|scalar| scalar.as_number())
            .map_or(EvalValue::Null, EvalValue::Num))
    }

    fn time(&self, base: &str) -> Result<EvalValue<Self>, EvalError> {
        let nested = format!("{base}/");
        let sum: i64 = self
            .entry
            .time_values
            .iter()
            .filter(|(key, _)| *key == base || key.starts_with(&nested))
            .map(|(_, minutes)| *minutes)
            .sum();
        Ok(EvalValue::Num(sum as f64))
    }

    fn subdivision(&self) -> Option<String> {
        self.entry.subdivision.clone()
    }
}

/// Per-widget evaluation result: one entry per computed field, in
/// declaration order. Field errors are isolated; siblings still evaluate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WidgetOutput {
    pub name: String,
    pub fields: Vec<(String, Result<f64, String>)>,
}

impl WidgetOutput {
    /// The successfully computed `label -> number` pairs.
    pub fn values(&self) -> Vec<(String, f64)> {
        self.fields
            .iter()
            .filter_map(|(label, result)| {
                result.as_ref().ok().map(|n| (label.clone(), *n))
            })
            .collect()
    }
}

/// Evaluate every computed field of `def` against the loaded collection.
pub fn evaluate_widget(def: &WidgetDef, entries: &[LoadedEntry]) -> WidgetOutput {
    let mut ctx = EvalContext::new(EvalOptions::widget());
    ctx.bind(def.dataset.alias.clone(), CollectionHandle::bind_all(entries));

    let fields = def
        .fields
        .iter()
        .map(|field| {
            let result = evaluate_str(&field.expr, &ctx)
                .and_then(|value| match value {
                    EvalValue::Num(n) => Ok(n),
                    other => Err(EvalError::new(format!(
                        "widget field must produce a number, got {}",
                        other.type_name()
                    ))),
                })
                .map(|n| match field.ty {
                    WidgetFieldType::Int => n.floor(),
                    WidgetFieldType::Float => n,
                })
                .map_err(|err| err.message);
            (field.label.clone(), result)
        })
        .collect();

    WidgetOutput {
        name: def.name.clone(),
        fields,
    }
}

/// Resolve the widget's dataset through the loader, then evaluate.
pub fn run_widget(
    def: &WidgetDef,
    loader: &dyn EntryLoader,
    query: &WidgetQuery,
) -> WidgetOutput {
    let entries = loader.load_entries_for_widget(&def.dataset.definition_code, query);
    evaluate_widget(def, &entries)
}
