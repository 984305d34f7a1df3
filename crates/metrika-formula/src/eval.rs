//! Expression evaluator.
//!
//! Evaluation is a pure function of the parsed expression, the bindings in
//! the [`EvalContext`], and whatever the [`EntryAccess`] handles read; the
//! engine itself has no observable side effects.

use std::collections::HashMap;

use crate::parse::{parse, BinOp, Expr};
use crate::value::{EntryAccess, EvalError, EvalValue};

/// The letters `time(base)` accepts.
pub const TIME_BASES: [&str; 4] = ["t", "m", "p", "n"];

/// Mode flags distinguishing entry-formula evaluation from widget evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EvalOptions {
    /// Aggregating an empty list yields `0` instead of erroring.
    pub empty_aggregate_is_zero: bool,
    /// Permit broadcasting arithmetic over lists. Widget evaluation turns
    /// this off: collection-shaped operands must be aggregated first.
    pub allow_list_arithmetic: bool,
}

impl EvalOptions {
    /// Entry-formula mode: strict aggregates, list broadcasting allowed.
    pub fn entry() -> Self {
        Self {
            empty_aggregate_is_zero: false,
            allow_list_arithmetic: true,
        }
    }

    /// Widget mode: empty aggregates are `0`, arithmetic is scalar-only.
    pub fn widget() -> Self {
        Self {
            empty_aggregate_is_zero: true,
            allow_list_arithmetic: false,
        }
    }
}

/// Name bindings visible to an evaluation.
///
/// Entry mode binds `self`, `parent`, `root`, the rendered hierarchy vectors
/// (`path`, `division`, `subdivision`) and the per-node scratch map of
/// already-computed formula fields. Widget mode binds the dataset alias.
#[derive(Debug, Clone)]
pub struct EvalContext<E: EntryAccess> {
    bindings: HashMap<String, EvalValue<E>>,
    options: EvalOptions,
}

impl<E: EntryAccess> EvalContext<E> {
    pub fn new(options: EvalOptions) -> Self {
        Self {
            bindings: HashMap::new(),
            options,
        }
    }

    pub fn bind(&mut self, name: impl Into<String>, value: EvalValue<E>) -> &mut Self {
        self.bindings.insert(name.into(), value);
        self
    }

    pub fn binding(&self, name: &str) -> Option<&EvalValue<E>> {
        self.bindings.get(name)
    }

    pub fn options(&self) -> EvalOptions {
        self.options
    }
}

/// Tokenize, parse and evaluate a formula body.
pub fn evaluate_str<E: EntryAccess>(
    formula: &str,
    ctx: &EvalContext<E>,
) -> Result<EvalValue<E>, EvalError> {
    let expr = parse(formula)?;
    evaluate(&expr, ctx)
}

pub fn evaluate<E: EntryAccess>(
    expr: &Expr,
    ctx: &EvalContext<E>,
) -> Result<EvalValue<E>, EvalError> {
    match expr {
        Expr::Number { value } => Ok(EvalValue::Num(*value)),
        Expr::Str { value } => Ok(EvalValue::Str(value.clone())),
        Expr::Ident { name } => ctx
            .binding(name)
            .cloned()
            .ok_or_else(|| EvalError::new(format!("unknown identifier `{name}`"))),
        Expr::Neg { expr } => negate(evaluate(expr, ctx)?),
        Expr::Binary { op, lhs, rhs } => {
            let lhs = evaluate(lhs, ctx)?;
            let rhs = evaluate(rhs, ctx)?;
            binary(*op, lhs, rhs, ctx.options())
        }
        Expr::Call { function, args } => {
            if args.len() != 1 {
                return Err(EvalError::new(format!(
                    "{function}() expects exactly one argument, got {}",
                    args.len()
                )));
            }
            let value = evaluate(&args[0], ctx)?;
            aggregate(function, value, ctx.options())
        }
        Expr::Field { base, field } => {
            let base = evaluate(base, ctx)?;
            navigate_field(base, field)
        }
        Expr::Method { base, method, args } => {
            let base = evaluate(base, ctx)?;
            invoke_method(base, method, args, ctx)
        }
        Expr::Where { base, prefix } => {
            let base = evaluate(base, ctx)?;
            filter_where(base, prefix)
        }
        Expr::Index { base, index } => {
            let base = evaluate(base, ctx)?;
            let index = evaluate(index, ctx)?;
            index_value(base, index)
        }
    }
}

fn negate<E: EntryAccess>(value: EvalValue<E>) -> Result<EvalValue<E>, EvalError> {
    match value {
        EvalValue::Num(n) => Ok(EvalValue::Num(-n)),
        EvalValue::NumList(v) => Ok(EvalValue::NumList(v.into_iter().map(|n| -n).collect())),
        other => Err(EvalError::new(format!(
            "cannot negate {}",
            other.type_name()
        ))),
    }
}

fn apply_op(op: BinOp, a: f64, b: f64) -> Result<f64, EvalError> {
    match op {
        BinOp::Add => Ok(a + b),
        BinOp::Sub => Ok(a - b),
        BinOp::Mul => Ok(a * b),
        BinOp::Div => {
            if b == 0.0 {
                Err(EvalError::new("division by zero"))
            } else {
                Ok(a / b)
            }
        }
        BinOp::FloorDiv => {
            if b == 0.0 {
                Err(EvalError::new("division by zero"))
            } else {
                Ok((a / b).floor())
            }
        }
        BinOp::Mod => {
            if b == 0.0 {
                Err(EvalError::new("modulo by zero"))
            } else {
                Ok(a % b)
            }
        }
        BinOp::Pow => Ok(a.powf(b)),
        BinOp::Eq => unreachable!("equality is handled before numeric dispatch"),
    }
}

fn binary<E: EntryAccess>(
    op: BinOp,
    lhs: EvalValue<E>,
    rhs: EvalValue<E>,
    options: EvalOptions,
) -> Result<EvalValue<E>, EvalError> {
    if op == BinOp::Eq {
        return match (lhs, rhs) {
            (EvalValue::Num(a), EvalValue::Num(b)) => Ok(EvalValue::Bool(a == b)),
            (EvalValue::Str(a), EvalValue::Str(b)) => Ok(EvalValue::Bool(a == b)),
            (EvalValue::Bool(a), EvalValue::Bool(b)) => Ok(EvalValue::Bool(a == b)),
            (a, b) => Err(EvalError::new(format!(
                "cannot compare {} == {}",
                a.type_name(),
                b.type_name()
            ))),
        };
    }

    match (lhs, rhs) {
        (EvalValue::Num(a), EvalValue::Num(b)) => Ok(EvalValue::Num(apply_op(op, a, b)?)),
        (EvalValue::Num(a), EvalValue::NumList(v)) => {
            require_list_arithmetic(options)?;
            Ok(EvalValue::NumList(
                v.into_iter()
                    .map(|b| apply_op(op, a, b))
                    .collect::<Result<_, _>>()?,
            ))
        }
        (EvalValue::NumList(v), EvalValue::Num(b)) => {
            require_list_arithmetic(options)?;
            Ok(EvalValue::NumList(
                v.into_iter()
                    .map(|a| apply_op(op, a, b))
                    .collect::<Result<_, _>>()?,
            ))
        }
        (EvalValue::NumList(a), EvalValue::NumList(b)) => {
            require_list_arithmetic(options)?;
            if a.len() != b.len() {
                return Err(EvalError::new(format!(
                    "list length mismatch in arithmetic: {} vs {}",
                    a.len(),
                    b.len()
                )));
            }
            Ok(EvalValue::NumList(
                a.into_iter()
                    .zip(b)
                    .map(|(a, b)| apply_op(op, a, b))
                    .collect::<Result<_, _>>()?,
            ))
        }
        (a, b) => Err(EvalError::new(format!(
            "arithmetic requires numbers, got {} {op} {}",
            a.type_name(),
            b.type_name()
        ))),
    }
}

fn require_list_arithmetic(options: EvalOptions) -> Result<(), EvalError> {
    if options.allow_list_arithmetic {
        Ok(())
    } else {
        Err(EvalError::new(
            "arithmetic over collection values is not allowed; aggregate with sum/avg/count first",
        ))
    }
}

fn aggregate<E: EntryAccess>(
    function: &str,
    value: EvalValue<E>,
    options: EvalOptions,
) -> Result<EvalValue<E>, EvalError> {
    if !matches!(function, "sum" | "avg" | "min" | "max" | "count") {
        return Err(EvalError::new(format!("unknown function `{function}`")));
    }

    // `count` works on any list shape (and coerces scalars to one element).
    if function == "count" {
        let count = match value {
            EvalValue::Null => 0,
            EvalValue::NumList(v) => v.len(),
            EvalValue::StrList(v) => v.len(),
            EvalValue::BoolList(v) => v.len(),
            EvalValue::EntryList(v) => v.len(),
            _ => 1,
        };
        return Ok(EvalValue::Num(count as f64));
    }

    let nums: Vec<f64> = match value {
        EvalValue::Num(n) => vec![n],
        EvalValue::NumList(v) => v,
        EvalValue::Null => vec![],
        other => {
            return Err(EvalError::new(format!(
                "{function}() requires numbers, got {}",
                other.type_name()
            )));
        }
    };

    if nums.is_empty() {
        if options.empty_aggregate_is_zero {
            return Ok(EvalValue::Num(0.0));
        }
        return Err(EvalError::new(format!(
            "{function}() over an empty list"
        )));
    }

    let result = match function {
        "sum" => nums.iter().sum(),
        "avg" => nums.iter().sum::<f64>() / nums.len() as f64,
        "min" => nums.iter().copied().fold(f64::INFINITY, f64::min),
        _ => nums.iter().copied().fold(f64::NEG_INFINITY, f64::max),
    };
    Ok(EvalValue::Num(result))
}

fn navigate_field<E: EntryAccess>(
    base: EvalValue<E>,
    field: &str,
) -> Result<EvalValue<E>, EvalError> {
    match base {
        // Attribute parents have no fields; navigation short-circuits to null.
        EvalValue::Null => Ok(EvalValue::Null),
        EvalValue::Entry(entry) => entry.get_field(field),
        EvalValue::EntryList(entries) => distribute_field(entries, field),
        other => Err(EvalError::new(format!(
            "cannot navigate `.{field}` on {}",
            other.type_name()
        ))),
    }
}

/// `.field` over a list of entries: distribute, then flatten one level.
/// Null contributions are dropped; the remainder must be of one kind.
fn distribute_field<E: EntryAccess>(
    entries: Vec<E>,
    field: &str,
) -> Result<EvalValue<E>, EvalError> {
    let mut nums: Vec<f64> = Vec::new();
    let mut strs: Vec<String> = Vec::new();
    let mut bools: Vec<bool> = Vec::new();
    let mut refs: Vec<E> = Vec::new();

    for entry in entries {
        match entry.get_field(field)? {
            EvalValue::Null => {}
            EvalValue::Num(n) => nums.push(n),
            EvalValue::NumList(v) => nums.extend(v),
            EvalValue::Str(s) => strs.push(s),
            EvalValue::StrList(v) => strs.extend(v),
            EvalValue::Bool(b) => bools.push(b),
            EvalValue::BoolList(v) => bools.extend(v),
            EvalValue::Entry(e) => refs.push(e),
            EvalValue::EntryList(v) => refs.extend(v),
        }
    }

    let populated = [
        !nums.is_empty(),
        !strs.is_empty(),
        !bools.is_empty(),
        !refs.is_empty(),
    ]
    .iter()
    .filter(|p| **p)
    .count();
    if populated > 1 {
        return Err(EvalError::new(format!(
            "mixed value types for field `{field}` across entries"
        )));
    }

    if !nums.is_empty() {
        Ok(EvalValue::NumList(nums))
    } else if !strs.is_empty() {
        Ok(EvalValue::StrList(strs))
    } else if !bools.is_empty() {
        Ok(EvalValue::BoolList(bools))
    } else if !refs.is_empty() {
        Ok(EvalValue::EntryList(refs))
    } else {
        Ok(EvalValue::Null)
    }
}

fn invoke_method<E: EntryAccess>(
    base: EvalValue<E>,
    method: &str,
    args: &[Expr],
    ctx: &EvalContext<E>,
) -> Result<EvalValue<E>, EvalError> {
    if method != "time" {
        return Err(EvalError::new(format!("unknown method `{method}`")));
    }
    if args.len() != 1 {
        return Err(EvalError::new(format!(
            "time() expects exactly one argument, got {}",
            args.len()
        )));
    }
    let arg = evaluate(&args[0], ctx)?;
    let EvalValue::Str(time_base) = arg else {
        return Err(EvalError::new(format!(
            "time() expects a string base, got {}",
            arg.type_name()
        )));
    };
    if !TIME_BASES.contains(&time_base.as_str()) {
        return Err(EvalError::new(format!(
            "unknown time base `{time_base}` (expected one of t, m, p, n)"
        )));
    }

    match base {
        EvalValue::Entry(entry) => entry.time(&time_base),
        // In collection context the call distributes, one sum per entry.
        EvalValue::EntryList(entries) => {
            let mut sums = Vec::with_capacity(entries.len());
            for entry in entries {
                match entry.time(&time_base)? {
                    EvalValue::Num(n) => sums.push(n),
                    EvalValue::NumList(v) => sums.extend(v),
                    other => {
                        return Err(EvalError::new(format!(
                            "time() produced {}",
                            other.type_name()
                        )));
                    }
                }
            }
            Ok(EvalValue::NumList(sums))
        }
        other => Err(EvalError::new(format!(
            "time() requires an entry, got {}",
            other.type_name()
        ))),
    }
}

fn filter_where<E: EntryAccess>(
    base: EvalValue<E>,
    prefix: &str,
) -> Result<EvalValue<E>, EvalError> {
    let entries = match base {
        EvalValue::Entry(entry) => vec![entry],
        EvalValue::EntryList(entries) => entries,
        other => {
            return Err(EvalError::new(format!(
                "where() requires entries, got {}",
                other.type_name()
            )));
        }
    };

    let nested = format!("{prefix}/");
    let kept = entries
        .into_iter()
        .filter(|entry| {
            entry
                .subdivision()
                .map_or(false, |s| s == prefix || s.starts_with(&nested))
        })
        .collect();
    Ok(EvalValue::EntryList(kept))
}

fn index_value<E: EntryAccess>(
    base: EvalValue<E>,
    index: EvalValue<E>,
) -> Result<EvalValue<E>, EvalError> {
    let EvalValue::Num(raw) = index else {
        return Err(EvalError::new(format!(
            "index must be a number, got {}",
            index.type_name()
        )));
    };
    if raw < 0.0 || raw.fract() != 0.0 {
        return Err(EvalError::new(format!(
            "index must be a non-negative integer, got {raw}"
        )));
    }
    let i = raw as usize;

    let out_of_range = |len: usize| {
        EvalError::new(format!("index {i} out of range (length {len})"))
    };

    match base {
        // Strings index their `/`-separated hierarchy tokens.
        EvalValue::Str(s) => {
            let tokens: Vec<&str> = s.split('/').collect();
            tokens
                .get(i)
                .map(|t| EvalValue::Str((*t).to_string()))
                .ok_or_else(|| out_of_range(tokens.len()))
        }
        EvalValue::NumList(v) => v
            .get(i)
            .map(|n| EvalValue::Num(*n))
            .ok_or_else(|| out_of_range(v.len())),
        EvalValue::StrList(v) => {
            let len = v.len();
            v.into_iter()
                .nth(i)
                .map(EvalValue::Str)
                .ok_or_else(|| out_of_range(len))
        }
        EvalValue::BoolList(v) => v
            .get(i)
            .map(|b| EvalValue::Bool(*b))
            .ok_or_else(|| out_of_range(v.len())),
        EvalValue::EntryList(v) => {
            let len = v.len();
            v.into_iter()
                .nth(i)
                .map(EvalValue::Entry)
                .ok_or_else(|| out_of_range(len))
        }
        other => Err(EvalError::new(format!(
            "cannot index into {}",
            other.type_name()
        ))),
    }
}
