//! Widget DSL: read-only numeric summaries over loaded entry collections.
//!
//! A widget is a persisted `WIDGET ... END` definition:
//!
//! ```text
//! WIDGET "Productivity"
//! tims = TIM
//! "productive_time": int = sum(tims.time("t"))
//! "productivity": float = sum(tims.time("t")) / sum(tims.duration)
//! END
//! ```
//!
//! The dataset alias binds a flat collection of [`LoadedEntry`]s fetched by
//! the external [`EntryLoader`] for the caller's anchor date and period.
//! Expressions run on the shared formula engine in widget mode: empty
//! aggregates yield `0`, and arithmetic over collection-shaped values is
//! rejected until aggregated. Each computed field is isolated; one field's
//! error never hides its siblings.

pub mod eval;
pub mod loaded;
pub mod parse;

pub use eval::{evaluate_widget, run_widget, CollectionHandle, WidgetOutput};
pub use loaded::{EntryLoader, InMemoryLoader, LoadedEntry, LoadedScalar, Period, WidgetQuery};
pub use parse::{parse_widget, Dataset, WidgetDef, WidgetField, WidgetFieldType, WidgetParseError};
