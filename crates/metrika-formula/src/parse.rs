//! Recursive-descent parser for the formula DSL.
//!
//! Precedence, lowest to highest:
//!
//! 1. equality (`==`)
//! 2. additive (`+` `-`)
//! 3. multiplicative (`*` `/` `%` `//`)
//! 4. power (`^`), which is **left-associative**, unlike mathematical
//!    convention: `2 ^ 3 ^ 2` parses as `(2 ^ 3) ^ 2`
//! 5. unary minus
//! 6. postfix: `.field`, `.method(args)`, `.where(pred)`, `[index]`
//! 7. primary: literals, identifiers, aggregate calls, parentheses
//!
//! `where(...)` is parsed specially: the tokens between its parentheses are
//! captured verbatim and must form the single supported predicate
//! `subdivision in "prefix"`.

use serde::{Deserialize, Serialize};

use crate::token::{tokenize, Token};
use crate::value::EvalError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    /// `//`, floored division.
    FloorDiv,
    Mod,
    Pow,
    Eq,
}

impl std::fmt::Display for BinOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let symbol = match self {
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::Mul => "*",
            BinOp::Div => "/",
            BinOp::FloorDiv => "//",
            BinOp::Mod => "%",
            BinOp::Pow => "^",
            BinOp::Eq => "==",
        };
        write!(f, "{symbol}")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "tag", rename_all = "snake_case")]
pub enum Expr {
    Number {
        value: f64,
    },
    /// String literal, quotes stripped.
    Str {
        value: String,
    },
    Ident {
        name: String,
    },
    Neg {
        expr: Box<Expr>,
    },
    Binary {
        op: BinOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    /// Aggregate invocation: `sum(...)`, `avg(...)`, `min(...)`, `max(...)`,
    /// `count(...)`.
    Call {
        function: String,
        args: Vec<Expr>,
    },
    /// `.field` navigation.
    Field {
        base: Box<Expr>,
        field: String,
    },
    /// `.method(args)` invocation; `time` is the only method the MVP defines.
    Method {
        base: Box<Expr>,
        method: String,
        args: Vec<Expr>,
    },
    /// `.where(subdivision in "prefix")`.
    Where {
        base: Box<Expr>,
        prefix: String,
    },
    /// `base[index]`.
    Index {
        base: Box<Expr>,
        index: Box<Expr>,
    },
}

impl Expr {
    fn precedence(&self) -> u8 {
        match self {
            Expr::Binary { op: BinOp::Eq, .. } => 1,
            Expr::Binary {
                op: BinOp::Add | BinOp::Sub,
                ..
            } => 2,
            Expr::Binary {
                op: BinOp::Mul | BinOp::Div | BinOp::FloorDiv | BinOp::Mod,
                ..
            } => 3,
            Expr::Binary {
                op: BinOp::Pow, ..
            } => 4,
            Expr::Neg { .. } => 5,
            _ => 6,
        }
    }

    fn fmt_child(
        &self,
        f: &mut std::fmt::Formatter<'_>,
        parent_precedence: u8,
    ) -> std::fmt::Result {
        if self.precedence() < parent_precedence {
            write!(f, "({self})")
        } else {
            write!(f, "{self}")
        }
    }
}

/// Canonical rendering; `parse(expr.to_string())` reproduces the tree.
///
/// Left-associative operators only need parentheses around right children
/// of equal precedence, so `(a - b) - c` prints as `a - b - c` while
/// `a - (b - c)` keeps its parentheses.
impl std::fmt::Display for Expr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Expr::Number { value } => write!(f, "{value}"),
            Expr::Str { value } => write!(f, "\"{value}\""),
            Expr::Ident { name } => write!(f, "{name}"),
            Expr::Neg { expr } => {
                write!(f, "-")?;
                expr.fmt_child(f, self.precedence())
            }
            Expr::Binary { op, lhs, rhs } => {
                lhs.fmt_child(f, self.precedence())?;
                write!(f, " {op} ")?;
                rhs.fmt_child(f, self.precedence() + 1)
            }
            Expr::Call { function, args } => {
                write!(f, "{function}(")?;
                for (i, arg) in args.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{arg}")?;
                }
                write!(f, ")")
            }
            Expr::Field { base, field } => {
                base.fmt_child(f, self.precedence())?;
                write!(f, ".{field}")
            }
            Expr::Method { base, method, args } => {
                base.fmt_child(f, self.precedence())?;
                write!(f, ".{method}(")?;
                for (i, arg) in args.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{arg}")?;
                }
                write!(f, ")")
            }
            Expr::Where { base, prefix } => {
                base.fmt_child(f, self.precedence())?;
                write!(f, ".where(subdivision in \"{prefix}\")")
            }
            Expr::Index { base, index } => {
                base.fmt_child(f, self.precedence())?;
                write!(f, "[{index}]")
            }
        }
    }
}

/// Tokenize and parse a complete formula body.
pub fn parse(input: &str) -> Result<Expr, EvalError> {
    let tokens = tokenize(input)?;
    parse_tokens(&tokens)
}

/// Parse a complete expression from pre-lexed tokens; trailing tokens error.
pub fn parse_tokens(tokens: &[Token]) -> Result<Expr, EvalError> {
    let mut cursor = Cursor { tokens, pos: 0 };
    let expr = cursor.equality()?;
    match cursor.peek() {
        None => Ok(expr),
        Some(tok) => Err(EvalError::new(format!(
            "unexpected {} after expression",
            tok.describe()
        ))),
    }
}

struct Cursor<'a> {
    tokens: &'a [Token],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn peek(&self) -> Option<&'a Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<&'a Token> {
        let tok = self.tokens.get(self.pos);
        if tok.is_some() {
            self.pos += 1;
        }
        tok
    }

    fn eat(&mut self, expected: &Token) -> bool {
        if self.peek() == Some(expected) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, expected: &Token) -> Result<(), EvalError> {
        if self.eat(expected) {
            Ok(())
        } else {
            Err(match self.peek() {
                Some(tok) => EvalError::new(format!(
                    "expected {}, found {}",
                    expected.describe(),
                    tok.describe()
                )),
                None => EvalError::new(format!(
                    "expected {}, found end of formula",
                    expected.describe()
                )),
            })
        }
    }

    fn equality(&mut self) -> Result<Expr, EvalError> {
        let mut lhs = self.additive()?;
        while self.eat(&Token::EqEq) {
            let rhs = self.additive()?;
            lhs = Expr::Binary {
                op: BinOp::Eq,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
        Ok(lhs)
    }

    fn additive(&mut self) -> Result<Expr, EvalError> {
        let mut lhs = self.multiplicative()?;
        loop {
            let op = match self.peek() {
                Some(Token::Plus) => BinOp::Add,
                Some(Token::Minus) => BinOp::Sub,
                _ => break,
            };
            self.pos += 1;
            let rhs = self.multiplicative()?;
            lhs = Expr::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
        Ok(lhs)
    }

    fn multiplicative(&mut self) -> Result<Expr, EvalError> {
        let mut lhs = self.power()?;
        loop {
            let op = match self.peek() {
                Some(Token::Star) => BinOp::Mul,
                Some(Token::Slash) => BinOp::Div,
                Some(Token::SlashSlash) => BinOp::FloorDiv,
                Some(Token::Percent) => BinOp::Mod,
                _ => break,
            };
            self.pos += 1;
            let rhs = self.power()?;
            lhs = Expr::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
        Ok(lhs)
    }

    fn power(&mut self) -> Result<Expr, EvalError> {
        let mut lhs = self.unary()?;
        while self.eat(&Token::Caret) {
            let rhs = self.unary()?;
            lhs = Expr::Binary {
                op: BinOp::Pow,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
        Ok(lhs)
    }

    fn unary(&mut self) -> Result<Expr, EvalError> {
        if self.eat(&Token::Minus) {
            let expr = self.unary()?;
            return Ok(Expr::Neg {
                expr: Box::new(expr),
            });
        }
        self.postfix()
    }

    fn postfix(&mut self) -> Result<Expr, EvalError> {
        let mut base = self.primary()?;
        loop {
            if self.eat(&Token::Dot) {
                let name = match self.next() {
                    Some(Token::Ident(name)) => name.clone(),
                    Some(tok) => {
                        return Err(EvalError::new(format!(
                            "expected a name after `.`, found {}",
                            tok.describe()
                        )));
                    }
                    None => {
                        return Err(EvalError::new("expected a name after `.`"));
                    }
                };

                if name == "where" && self.peek() == Some(&Token::LParen) {
                    self.pos += 1;
                    let prefix = self.where_predicate()?;
                    base = Expr::Where {
                        base: Box::new(base),
                        prefix,
                    };
                } else if self.eat(&Token::LParen) {
                    let args = self.arguments()?;
                    base = Expr::Method {
                        base: Box::new(base),
                        method: name,
                        args,
                    };
                } else {
                    base = Expr::Field {
                        base: Box::new(base),
                        field: name,
                    };
                }
            } else if self.eat(&Token::LBracket) {
                let index = self.equality()?;
                self.expect(&Token::RBracket)?;
                base = Expr::Index {
                    base: Box::new(base),
                    index: Box::new(index),
                };
            } else {
                break;
            }
        }
        Ok(base)
    }

    /// Capture the tokens up to the matching `)` and parse the single
    /// supported predicate form: `subdivision in "prefix"`.
    fn where_predicate(&mut self) -> Result<String, EvalError> {
        let start = self.pos;
        let mut depth = 1usize;
        while depth > 0 {
            match self.next() {
                Some(Token::LParen) => depth += 1,
                Some(Token::RParen) => depth -= 1,
                Some(_) => {}
                None => return Err(EvalError::new("unclosed `(` in where()")),
            }
        }
        let captured = &self.tokens[start..self.pos - 1];

        match captured {
            [Token::Ident(field), Token::Ident(kw), literal @ Token::Str(_)]
                if field == "subdivision" && kw == "in" =>
            {
                let prefix = literal
                    .string_content()
                    .ok_or_else(|| EvalError::new("malformed string literal in where()"))?;
                Ok(prefix.to_string())
            }
            _ => Err(EvalError::new(
                "unsupported where() predicate; expected `subdivision in \"prefix\"`",
            )),
        }
    }

    fn arguments(&mut self) -> Result<Vec<Expr>, EvalError> {
        let mut args = Vec::new();
        if self.eat(&Token::RParen) {
            return Ok(args);
        }
        loop {
            args.push(self.equality()?);
            if self.eat(&Token::Comma) {
                continue;
            }
            self.expect(&Token::RParen)?;
            break;
        }
        Ok(args)
    }

    fn primary(&mut self) -> Result<Expr, EvalError> {
        match self.next() {
            Some(Token::Number(value)) => Ok(Expr::Number { value: *value }),
            Some(tok @ Token::Str(_)) => {
                let value = tok
                    .string_content()
                    .ok_or_else(|| EvalError::new("malformed string literal"))?;
                Ok(Expr::Str {
                    value: value.to_string(),
                })
            }
            Some(Token::Ident(name)) => {
                if self.eat(&Token::LParen) {
                    let args = self.arguments()?;
                    Ok(Expr::Call {
                        function: name.clone(),
                        args,
                    })
                } else {
                    Ok(Expr::Ident { name: name.clone() })
                }
            }
            Some(Token::LParen) => {
                let expr = self.equality()?;
                self.expect(&Token::RParen)?;
                Ok(expr)
            }
            Some(tok) => Err(EvalError::new(format!(
                "unexpected {} at start of expression",
                tok.describe()
            ))),
            None => Err(EvalError::new("empty formula")),
        }
    }
}
