//! Restricted arithmetic over a record slice.
//!
//! ```text
//! expr    := term (('+' | '-') term)*
//! term    := unary (('*' | '/') unary)*
//! unary   := '-' unary | primary
//! primary := NUMBER | 'COUNT' '(' ')' | ('SUM' | 'AVG') '(' FIELD ')' | '(' expr ')'
//! ```
//!
//! Formulas are parsed into an [`Expr`] tree and evaluated against the
//! records; nothing else is ever executed. Trees deeper than [`MAX_DEPTH`]
//! (nesting plus chained operators) are rejected at parse time.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;
use thiserror::Error;

use crate::transform::{aggregate, extract_numbers, AggregationKind};

static TOKEN_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:(?P<num>\d+(?:\.\d+)?|\.\d+)|(?P<ident>[A-Za-z_][A-Za-z0-9_.]*)|(?P<sym>[-+*/()]))")
        .unwrap()
});

/// Deepest expression tree the parser will build.
pub const MAX_DEPTH: usize = 256;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum FormulaError {
    #[error("unexpected '{found}' at position {position}")]
    UnexpectedToken { position: usize, found: String },
    #[error("unexpected end of formula")]
    UnexpectedEnd,
    #[error("unknown function: {0}")]
    UnknownFunction(String),
    #[error("formula result is not a finite number")]
    NonFinite,
    #[error("formula nests deeper than {} levels", MAX_DEPTH)]
    TooDeep,
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(f64),
    Ident(String),
    Symbol(char),
}

#[derive(Debug, Clone, PartialEq)]
struct Spanned {
    token: Token,
    position: usize,
    text: String,
}

fn tokenize(source: &str) -> Result<Vec<Spanned>, FormulaError> {
    let mut tokens = Vec::new();
    let mut position = 0;
    while position < source.len() {
        let rest = &source[position..];
        let trimmed = rest.trim_start();
        position += rest.len() - trimmed.len();
        if trimmed.is_empty() {
            break;
        }
        let caps = TOKEN_RE.captures(trimmed).ok_or_else(|| FormulaError::UnexpectedToken {
            position,
            found: trimmed.chars().next().map(String::from).unwrap_or_default(),
        })?;
        let text = caps.get(0).map_or("", |m| m.as_str()).to_string();
        let token = if let Some(num) = caps.name("num") {
            let value = num.as_str().parse::<f64>().map_err(|_| FormulaError::UnexpectedToken {
                position,
                found: text.clone(),
            })?;
            Token::Number(value)
        } else if let Some(ident) = caps.name("ident") {
            Token::Ident(ident.as_str().to_string())
        } else {
            Token::Symbol(text.chars().next().unwrap_or(' '))
        };
        let len = text.len();
        tokens.push(Spanned { token, position, text });
        position += len;
    }
    Ok(tokens)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Number(f64),
    Count,
    Sum(String),
    Avg(String),
    Neg(Box<Expr>),
    Binary {
        op: BinaryOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
}

impl Expr {
    fn eval(&self, records: &[Value]) -> f64 {
        match self {
            Expr::Number(n) => *n,
            Expr::Count => records.len() as f64,
            Expr::Sum(field) => aggregate(&extract_numbers(records, field), AggregationKind::Sum),
            Expr::Avg(field) => aggregate(&extract_numbers(records, field), AggregationKind::Average),
            Expr::Neg(inner) => -inner.eval(records),
            Expr::Binary { op, lhs, rhs } => {
                let (l, r) = (lhs.eval(records), rhs.eval(records));
                match op {
                    BinaryOp::Add => l + r,
                    BinaryOp::Sub => l - r,
                    BinaryOp::Mul => l * r,
                    BinaryOp::Div => l / r,
                }
            }
        }
    }
}

struct Parser {
    tokens: Vec<Spanned>,
    pos: usize,
    depth: usize,
}

impl Parser {
    fn new(tokens: Vec<Spanned>) -> Self {
        Self { tokens, pos: 0, depth: 0 }
    }

    /// Callers undo this with `self.depth -= 1` once the nested parse returns.
    fn enter(&mut self) -> Result<(), FormulaError> {
        if self.depth >= MAX_DEPTH {
            return Err(FormulaError::TooDeep);
        }
        self.depth += 1;
        Ok(())
    }

    fn peek(&self) -> Option<&Spanned> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Result<Spanned, FormulaError> {
        let token = self.tokens.get(self.pos).cloned().ok_or(FormulaError::UnexpectedEnd)?;
        self.pos += 1;
        Ok(token)
    }

    fn peek_symbol(&self) -> Option<char> {
        match self.peek() {
            Some(Spanned { token: Token::Symbol(c), .. }) => Some(*c),
            _ => None,
        }
    }

    fn expect_symbol(&mut self, expected: char) -> Result<(), FormulaError> {
        let token = self.next()?;
        match token.token {
            Token::Symbol(c) if c == expected => Ok(()),
            _ => Err(unexpected(&token)),
        }
    }

    fn expr(&mut self) -> Result<Expr, FormulaError> {
        let mut lhs = self.term()?;
        let mut chained = 0;
        while let Some(op) = self.peek_symbol().and_then(|c| match c {
            '+' => Some(BinaryOp::Add),
            '-' => Some(BinaryOp::Sub),
            _ => None,
        }) {
            self.pos += 1;
            self.enter()?;
            chained += 1;
            let rhs = self.term()?;
            lhs = Expr::Binary { op, lhs: Box::new(lhs), rhs: Box::new(rhs) };
        }
        self.depth -= chained;
        Ok(lhs)
    }

    fn term(&mut self) -> Result<Expr, FormulaError> {
        let mut lhs = self.unary()?;
        let mut chained = 0;
        while let Some(op) = self.peek_symbol().and_then(|c| match c {
            '*' => Some(BinaryOp::Mul),
            '/' => Some(BinaryOp::Div),
            _ => None,
        }) {
            self.pos += 1;
            self.enter()?;
            chained += 1;
            let rhs = self.unary()?;
            lhs = Expr::Binary { op, lhs: Box::new(lhs), rhs: Box::new(rhs) };
        }
        self.depth -= chained;
        Ok(lhs)
    }

    fn unary(&mut self) -> Result<Expr, FormulaError> {
        if self.peek_symbol() == Some('-') {
            self.pos += 1;
            self.enter()?;
            let inner = self.unary()?;
            self.depth -= 1;
            return Ok(Expr::Neg(Box::new(inner)));
        }
        self.primary()
    }

    fn primary(&mut self) -> Result<Expr, FormulaError> {
        let token = self.next()?;
        match token.token {
            Token::Number(n) => Ok(Expr::Number(n)),
            Token::Symbol('(') => {
                self.enter()?;
                let inner = self.expr()?;
                self.depth -= 1;
                self.expect_symbol(')')?;
                Ok(inner)
            }
            Token::Ident(ref name) => self.call(name, &token),
            Token::Symbol(_) => Err(unexpected(&token)),
        }
    }

    fn call(&mut self, name: &str, at: &Spanned) -> Result<Expr, FormulaError> {
        if self.peek_symbol() != Some('(') {
            return Err(unexpected(at));
        }
        let build: fn(String) -> Expr = match name {
            "COUNT" => {
                self.pos += 1;
                self.expect_symbol(')')?;
                return Ok(Expr::Count);
            }
            "SUM" => Expr::Sum,
            "AVG" => Expr::Avg,
            other => return Err(FormulaError::UnknownFunction(other.to_string())),
        };
        self.pos += 1;
        let arg = self.next()?;
        let field = match arg.token {
            Token::Ident(field) => field,
            _ => return Err(unexpected(&arg)),
        };
        self.expect_symbol(')')?;
        Ok(build(field))
    }
}

fn unexpected(token: &Spanned) -> FormulaError {
    FormulaError::UnexpectedToken {
        position: token.position,
        found: token.text.clone(),
    }
}

/// A parsed formula, reusable across record slices.
#[derive(Debug, Clone, PartialEq)]
pub struct Formula {
    source: String,
    expr: Expr,
}

impl Formula {
    pub fn parse(source: &str) -> Result<Self, FormulaError> {
        let mut parser = Parser::new(tokenize(source)?);
        let expr = parser.expr()?;
        if let Some(extra) = parser.peek() {
            return Err(unexpected(extra));
        }
        Ok(Self {
            source: source.to_string(),
            expr,
        })
    }

    pub fn evaluate(&self, records: &[Value]) -> Result<f64, FormulaError> {
        let value = self.expr.eval(records);
        if value.is_finite() {
            Ok(value)
        } else {
            Err(FormulaError::NonFinite)
        }
    }

    pub fn expr(&self) -> &Expr {
        &self.expr
    }

    pub fn source(&self) -> &str {
        &self.source
    }
}

impl std::fmt::Display for Formula {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.source)
    }
}

/// Parse and evaluate in one step. Any failure is logged and yields 0.
pub fn evaluate_formula(formula: &str, records: &[Value]) -> f64 {
    match Formula::parse(formula).and_then(|f| f.evaluate(records)) {
        Ok(value) => value,
        Err(e) => {
            log::warn!("Formula '{formula}' could not be evaluated: {e}");
            0.0
        }
    }
}
