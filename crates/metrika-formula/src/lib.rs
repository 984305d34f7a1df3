//! Shared expression engine for the Metrika DSLs.
//!
//! One tokenizer/parser/evaluator serves both surface languages:
//!
//! - **entry formulas**, evaluated per-entry during creation with `self`,
//!   `parent`, `root` and the hierarchy vectors bound, and
//! - **widget expressions**, evaluated over a loaded entry collection with
//!   the dataset alias bound.
//!
//! The difference between the two modes is only the set of bindings and a
//! pair of [`EvalOptions`] flags (empty-aggregate behavior, list arithmetic).
//! Entries enter the engine through the [`EntryAccess`] trait so the engine
//! stays independent of how entries are represented on either side.

pub mod eval;
pub mod parse;
pub mod token;
pub mod value;

pub use eval::{evaluate, evaluate_str, EvalContext, EvalOptions};
pub use parse::{parse, BinOp, Expr};
pub use token::{tokenize, Token};
pub use value::{EntryAccess, EvalError, EvalValue};

use serde::{Deserialize, Serialize};

/// The three hierarchy vectors a hierarchy-only formula may index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HierarchyVector {
    Division,
    Subdivision,
    Path,
}

impl std::fmt::Display for HierarchyVector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            HierarchyVector::Division => "division",
            HierarchyVector::Subdivision => "subdivision",
            HierarchyVector::Path => "path",
        };
        write!(f, "{name}")
    }
}

/// Detect a *hierarchy-only* formula: a body that is exactly
/// `subdivision[N]`, `division[N]` or `path[N]` after trimming.
///
/// These are materialized by the hierarchy populator before instance
/// resolution rather than by the formula applier, so the produced string can
/// still be resolved against existing metric instances.
pub fn hierarchy_only(formula: &str) -> Option<(HierarchyVector, usize)> {
    let body = formula.trim();
    // `subdivision` must be tried before `division`, which is a suffix of it.
    for (name, vector) in [
        ("subdivision", HierarchyVector::Subdivision),
        ("division", HierarchyVector::Division),
        ("path", HierarchyVector::Path),
    ] {
        let Some(rest) = body.strip_prefix(name) else {
            continue;
        };
        let Some(inner) = rest.strip_prefix('[').and_then(|r| r.strip_suffix(']')) else {
            continue;
        };
        if !inner.is_empty() && inner.bytes().all(|b| b.is_ascii_digit()) {
            return inner.parse().ok().map(|index| (vector, index));
        }
    }
    None
}
