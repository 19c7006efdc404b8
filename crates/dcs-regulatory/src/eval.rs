//! # Sandboxed Expression Evaluation
//!
//! A fixed-grammar evaluator for applicability and phase-in rules. Not a
//! host-language eval facility: expressions are lexed, parsed into an AST,
//! and walked against an explicitly provided context.
//!
//! ## Grammar
//!
//! ```text
//! expr        := or
//! or          := and ("or" and)*
//! and         := unary ("and" unary)*
//! unary       := "not" unary | comparison
//! comparison  := additive ((==|!=|<|<=|>|>=|in) additive)*   -- chained
//! additive    := term ((+|-) term)*
//! term        := factor ((*|/) factor)*
//! factor      := "-" factor | primary
//! primary     := number | string | true | false | attribute | "(" expr ")"
//! attribute   := ident ("." ident)*
//! ```
//!
//! ## Whitelist
//!
//! The only root symbol is `company`; the only reachable attributes are the
//! fields of [`CompanyContext`]. Any other symbol or attribute is an
//! [`EvalError::UnknownSymbol`] — a first-class error, never a silent
//! `undefined`. Calls, indexing, and deeper attribute traversal do not parse.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Attribute names reachable under the `company` root.
pub const WHITELISTED_ATTRIBUTES: &[&str] = &[
    "employees",
    "turnover",
    "listed_status",
    "reporting_year",
    "reporting_year_start",
    "reporting_year_end",
    "jurisdictions",
];

/// The whitelisted bag of company-profile fields rules may reference.
///
/// Optional fields model incomplete profiles: referencing a missing value is
/// an evaluation error, which callers treat as "rule not applicable" with an
/// explicit reason rather than a silent default.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CompanyContext {
    /// Headcount.
    pub employees: Option<i64>,
    /// Annual turnover.
    pub turnover: Option<f64>,
    /// Whether the company is listed on a regulated market.
    pub listed_status: Option<bool>,
    /// Reporting year the run covers.
    pub reporting_year: Option<i64>,
    /// ISO date the reporting year starts.
    pub reporting_year_start: Option<String>,
    /// ISO date the reporting year ends.
    pub reporting_year_end: Option<String>,
    /// Jurisdiction codes the company operates in.
    #[serde(default)]
    pub jurisdictions: Vec<String>,
}

/// Evaluation failures.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EvalError {
    /// The expression does not lex.
    #[error("unexpected character {0:?} at offset {1}")]
    UnexpectedChar(char, usize),

    /// The expression does not parse.
    #[error("parse error: {0}")]
    Parse(String),

    /// A symbol outside the whitelist was referenced.
    #[error("unknown symbol: {0}")]
    UnknownSymbol(String),

    /// A whitelisted symbol has no value in the provided context.
    #[error("missing value in context: {0}")]
    MissingValue(String),

    /// Operand types do not support the requested operation.
    #[error("type error: {0}")]
    Type(String),

    /// Division by zero.
    #[error("division by zero")]
    DivisionByZero,

    /// The expression did not evaluate to a boolean.
    #[error("expression must evaluate to a boolean, got {0}")]
    NotBoolean(String),
}

// ── Values ──────────────────────────────────────────────────────────────────

/// Runtime value of a sub-expression.
#[derive(Debug, Clone, PartialEq)]
enum Value {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    List(Vec<String>),
}

impl Value {
    fn type_name(&self) -> &'static str {
        match self {
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Str(_) => "string",
            Value::List(_) => "list",
        }
    }

    fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }
}

// ── Lexer ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Int(i64),
    Float(f64),
    Str(String),
    LParen,
    RParen,
    Dot,
    Plus,
    Minus,
    Star,
    Slash,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
    Not,
    In,
    True,
    False,
}

fn lex(input: &str) -> Result<Vec<Token>, EvalError> {
    let chars: Vec<char> = input.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            ' ' | '\t' | '\n' | '\r' => i += 1,
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            '.' => {
                tokens.push(Token::Dot);
                i += 1;
            }
            '+' => {
                tokens.push(Token::Plus);
                i += 1;
            }
            '-' => {
                tokens.push(Token::Minus);
                i += 1;
            }
            '*' => {
                tokens.push(Token::Star);
                i += 1;
            }
            '/' => {
                tokens.push(Token::Slash);
                i += 1;
            }
            '=' => {
                if chars.get(i + 1) == Some(&'=') {
                    tokens.push(Token::Eq);
                    i += 2;
                } else {
                    return Err(EvalError::UnexpectedChar('=', i));
                }
            }
            '!' => {
                if chars.get(i + 1) == Some(&'=') {
                    tokens.push(Token::Ne);
                    i += 2;
                } else {
                    return Err(EvalError::UnexpectedChar('!', i));
                }
            }
            '<' => {
                if chars.get(i + 1) == Some(&'=') {
                    tokens.push(Token::Le);
                    i += 2;
                } else {
                    tokens.push(Token::Lt);
                    i += 1;
                }
            }
            '>' => {
                if chars.get(i + 1) == Some(&'=') {
                    tokens.push(Token::Ge);
                    i += 2;
                } else {
                    tokens.push(Token::Gt);
                    i += 1;
                }
            }
            '\'' | '"' => {
                let quote = c;
                let mut s = String::new();
                i += 1;
                loop {
                    match chars.get(i) {
                        Some(&ch) if ch == quote => {
                            i += 1;
                            break;
                        }
                        Some(&ch) => {
                            s.push(ch);
                            i += 1;
                        }
                        None => return Err(EvalError::Parse("unterminated string".to_string())),
                    }
                }
                tokens.push(Token::Str(s));
            }
            '0'..='9' => {
                let start = i;
                let mut saw_dot = false;
                while i < chars.len()
                    && (chars[i].is_ascii_digit() || (chars[i] == '.' && !saw_dot))
                {
                    // A dot only joins the number when followed by a digit;
                    // otherwise it is attribute access after a literal, which
                    // the parser rejects.
                    if chars[i] == '.' {
                        if chars.get(i + 1).map(|c| c.is_ascii_digit()) != Some(true) {
                            break;
                        }
                        saw_dot = true;
                    }
                    i += 1;
                }
                let text: String = chars[start..i].iter().collect();
                if saw_dot {
                    let f = text
                        .parse::<f64>()
                        .map_err(|e| EvalError::Parse(format!("bad number {text:?}: {e}")))?;
                    tokens.push(Token::Float(f));
                } else {
                    let n = text
                        .parse::<i64>()
                        .map_err(|e| EvalError::Parse(format!("bad number {text:?}: {e}")))?;
                    tokens.push(Token::Int(n));
                }
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_alphanumeric() || chars[i] == '_') {
                    i += 1;
                }
                let word: String = chars[start..i].iter().collect();
                tokens.push(match word.as_str() {
                    "and" => Token::And,
                    "or" => Token::Or,
                    "not" => Token::Not,
                    "in" => Token::In,
                    "true" | "True" => Token::True,
                    "false" | "False" => Token::False,
                    _ => Token::Ident(word),
                });
            }
            other => return Err(EvalError::UnexpectedChar(other, i)),
        }
    }

    Ok(tokens)
}

// ── Parser ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq)]
enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    In,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
}

#[derive(Debug, Clone, PartialEq)]
enum Expr {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    /// `company.<attribute>` access.
    Attr(String, String),
    Not(Box<Expr>),
    Neg(Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Bin(BinOp, Box<Expr>, Box<Expr>),
    /// Chained comparison, e.g. `2024 <= y < 2028`.
    Compare(Box<Expr>, Vec<(CmpOp, Expr)>),
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let t = self.tokens.get(self.pos).cloned();
        if t.is_some() {
            self.pos += 1;
        }
        t
    }

    fn expect(&mut self, token: &Token, what: &str) -> Result<(), EvalError> {
        match self.next() {
            Some(ref t) if t == token => Ok(()),
            other => Err(EvalError::Parse(format!("expected {what}, got {other:?}"))),
        }
    }

    fn parse_expr(&mut self) -> Result<Expr, EvalError> {
        self.parse_or()
    }

    fn parse_or(&mut self) -> Result<Expr, EvalError> {
        let mut lhs = self.parse_and()?;
        while self.peek() == Some(&Token::Or) {
            self.next();
            let rhs = self.parse_and()?;
            lhs = Expr::Or(Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_and(&mut self) -> Result<Expr, EvalError> {
        let mut lhs = self.parse_unary()?;
        while self.peek() == Some(&Token::And) {
            self.next();
            let rhs = self.parse_unary()?;
            lhs = Expr::And(Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_unary(&mut self) -> Result<Expr, EvalError> {
        if self.peek() == Some(&Token::Not) {
            self.next();
            let inner = self.parse_unary()?;
            return Ok(Expr::Not(Box::new(inner)));
        }
        self.parse_comparison()
    }

    fn parse_comparison(&mut self) -> Result<Expr, EvalError> {
        let first = self.parse_additive()?;
        let mut rest = Vec::new();
        loop {
            let op = match self.peek() {
                Some(Token::Eq) => CmpOp::Eq,
                Some(Token::Ne) => CmpOp::Ne,
                Some(Token::Lt) => CmpOp::Lt,
                Some(Token::Le) => CmpOp::Le,
                Some(Token::Gt) => CmpOp::Gt,
                Some(Token::Ge) => CmpOp::Ge,
                Some(Token::In) => CmpOp::In,
                _ => break,
            };
            self.next();
            let rhs = self.parse_additive()?;
            rest.push((op, rhs));
        }
        if rest.is_empty() {
            Ok(first)
        } else {
            Ok(Expr::Compare(Box::new(first), rest))
        }
    }

    fn parse_additive(&mut self) -> Result<Expr, EvalError> {
        let mut lhs = self.parse_term()?;
        loop {
            let op = match self.peek() {
                Some(Token::Plus) => BinOp::Add,
                Some(Token::Minus) => BinOp::Sub,
                _ => break,
            };
            self.next();
            let rhs = self.parse_term()?;
            lhs = Expr::Bin(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_term(&mut self) -> Result<Expr, EvalError> {
        let mut lhs = self.parse_factor()?;
        loop {
            let op = match self.peek() {
                Some(Token::Star) => BinOp::Mul,
                Some(Token::Slash) => BinOp::Div,
                _ => break,
            };
            self.next();
            let rhs = self.parse_factor()?;
            lhs = Expr::Bin(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_factor(&mut self) -> Result<Expr, EvalError> {
        if self.peek() == Some(&Token::Minus) {
            self.next();
            let inner = self.parse_factor()?;
            return Ok(Expr::Neg(Box::new(inner)));
        }
        self.parse_primary()
    }

    fn parse_primary(&mut self) -> Result<Expr, EvalError> {
        match self.next() {
            Some(Token::Int(n)) => Ok(Expr::Int(n)),
            Some(Token::Float(f)) => Ok(Expr::Float(f)),
            Some(Token::Str(s)) => Ok(Expr::Str(s)),
            Some(Token::True) => Ok(Expr::Bool(true)),
            Some(Token::False) => Ok(Expr::Bool(false)),
            Some(Token::LParen) => {
                let inner = self.parse_expr()?;
                self.expect(&Token::RParen, "closing parenthesis")?;
                Ok(inner)
            }
            Some(Token::Ident(root)) => {
                // Only `root.attribute` is representable; deeper traversal
                // and bare roots do not produce a value.
                if self.peek() == Some(&Token::Dot) {
                    self.next();
                    match self.next() {
                        Some(Token::Ident(attr)) => {
                            if self.peek() == Some(&Token::Dot) {
                                return Err(EvalError::Parse(format!(
                                    "attribute traversal beyond {root}.{attr} is not allowed"
                                )));
                            }
                            Ok(Expr::Attr(root, attr))
                        }
                        other => Err(EvalError::Parse(format!(
                            "expected attribute name after '.', got {other:?}"
                        ))),
                    }
                } else {
                    Err(EvalError::UnknownSymbol(root))
                }
            }
            other => Err(EvalError::Parse(format!("unexpected token: {other:?}"))),
        }
    }
}

fn parse(input: &str) -> Result<Expr, EvalError> {
    let tokens = lex(input)?;
    if tokens.is_empty() {
        return Err(EvalError::Parse("empty expression".to_string()));
    }
    let mut parser = Parser { tokens, pos: 0 };
    let expr = parser.parse_expr()?;
    if parser.pos != parser.tokens.len() {
        return Err(EvalError::Parse(format!(
            "trailing tokens after expression at position {}",
            parser.pos
        )));
    }
    Ok(expr)
}

// ── Static validation ───────────────────────────────────────────────────────

/// Statically validate an expression: it must parse and reference only
/// whitelisted symbols. Used at bundle-load time so a bad rule is rejected
/// before it can reach a run.
pub fn validate(input: &str) -> Result<(), EvalError> {
    let expr = parse(input)?;
    check_symbols(&expr)
}

fn check_symbols(expr: &Expr) -> Result<(), EvalError> {
    match expr {
        Expr::Attr(root, attr) => {
            if root != "company" {
                return Err(EvalError::UnknownSymbol(root.clone()));
            }
            if !WHITELISTED_ATTRIBUTES.contains(&attr.as_str()) {
                return Err(EvalError::UnknownSymbol(format!("company.{attr}")));
            }
            Ok(())
        }
        Expr::Bool(_) | Expr::Int(_) | Expr::Float(_) | Expr::Str(_) => Ok(()),
        Expr::Not(inner) | Expr::Neg(inner) => check_symbols(inner),
        Expr::And(a, b) | Expr::Or(a, b) | Expr::Bin(_, a, b) => {
            check_symbols(a)?;
            check_symbols(b)
        }
        Expr::Compare(first, rest) => {
            check_symbols(first)?;
            for (_, e) in rest {
                check_symbols(e)?;
            }
            Ok(())
        }
    }
}

// ── Evaluation ──────────────────────────────────────────────────────────────

/// Evaluate an expression against the company context.
///
/// The result must be a boolean; any other final type is an error.
pub fn evaluate(input: &str, context: &CompanyContext) -> Result<bool, EvalError> {
    let expr = parse(input)?;
    check_symbols(&expr)?;
    match eval_expr(&expr, context)? {
        Value::Bool(b) => Ok(b),
        other => Err(EvalError::NotBoolean(other.type_name().to_string())),
    }
}

fn resolve_attr(attr: &str, context: &CompanyContext) -> Result<Value, EvalError> {
    let missing = || EvalError::MissingValue(format!("company.{attr}"));
    match attr {
        "employees" => context.employees.map(Value::Int).ok_or_else(missing),
        "turnover" => context.turnover.map(Value::Float).ok_or_else(missing),
        "listed_status" => context.listed_status.map(Value::Bool).ok_or_else(missing),
        "reporting_year" => context.reporting_year.map(Value::Int).ok_or_else(missing),
        "reporting_year_start" => context
            .reporting_year_start
            .clone()
            .map(Value::Str)
            .ok_or_else(missing),
        "reporting_year_end" => context
            .reporting_year_end
            .clone()
            .map(Value::Str)
            .ok_or_else(missing),
        "jurisdictions" => Ok(Value::List(context.jurisdictions.clone())),
        other => Err(EvalError::UnknownSymbol(format!("company.{other}"))),
    }
}

fn eval_expr(expr: &Expr, context: &CompanyContext) -> Result<Value, EvalError> {
    match expr {
        Expr::Bool(b) => Ok(Value::Bool(*b)),
        Expr::Int(n) => Ok(Value::Int(*n)),
        Expr::Float(f) => Ok(Value::Float(*f)),
        Expr::Str(s) => Ok(Value::Str(s.clone())),
        Expr::Attr(_, attr) => resolve_attr(attr, context),
        Expr::Not(inner) => match eval_expr(inner, context)? {
            Value::Bool(b) => Ok(Value::Bool(!b)),
            other => Err(EvalError::Type(format!(
                "'not' requires a boolean, got {}",
                other.type_name()
            ))),
        },
        Expr::Neg(inner) => match eval_expr(inner, context)? {
            Value::Int(n) => Ok(Value::Int(-n)),
            Value::Float(f) => Ok(Value::Float(-f)),
            other => Err(EvalError::Type(format!(
                "unary '-' requires a number, got {}",
                other.type_name()
            ))),
        },
        Expr::And(a, b) => {
            let lhs = eval_bool(a, context)?;
            if !lhs {
                return Ok(Value::Bool(false));
            }
            Ok(Value::Bool(eval_bool(b, context)?))
        }
        Expr::Or(a, b) => {
            let lhs = eval_bool(a, context)?;
            if lhs {
                return Ok(Value::Bool(true));
            }
            Ok(Value::Bool(eval_bool(b, context)?))
        }
        Expr::Bin(op, a, b) => eval_binary(*op, a, b, context),
        Expr::Compare(first, rest) => {
            let mut left = eval_expr(first, context)?;
            for (op, rhs_expr) in rest {
                let right = eval_expr(rhs_expr, context)?;
                if !compare(*op, &left, &right)? {
                    return Ok(Value::Bool(false));
                }
                left = right;
            }
            Ok(Value::Bool(true))
        }
    }
}

fn eval_bool(expr: &Expr, context: &CompanyContext) -> Result<bool, EvalError> {
    match eval_expr(expr, context)? {
        Value::Bool(b) => Ok(b),
        other => Err(EvalError::Type(format!(
            "boolean operand required, got {}",
            other.type_name()
        ))),
    }
}

fn eval_binary(
    op: BinOp,
    a: &Expr,
    b: &Expr,
    context: &CompanyContext,
) -> Result<Value, EvalError> {
    let lhs = eval_expr(a, context)?;
    let rhs = eval_expr(b, context)?;
    match (&lhs, &rhs) {
        (Value::Int(x), Value::Int(y)) => match op {
            BinOp::Add => Ok(Value::Int(x + y)),
            BinOp::Sub => Ok(Value::Int(x - y)),
            BinOp::Mul => Ok(Value::Int(x * y)),
            BinOp::Div => {
                if *y == 0 {
                    Err(EvalError::DivisionByZero)
                } else {
                    Ok(Value::Float(*x as f64 / *y as f64))
                }
            }
        },
        _ => {
            let (x, y) = match (lhs.as_f64(), rhs.as_f64()) {
                (Some(x), Some(y)) => (x, y),
                _ => {
                    return Err(EvalError::Type(format!(
                        "arithmetic requires numbers, got {} and {}",
                        lhs.type_name(),
                        rhs.type_name()
                    )))
                }
            };
            match op {
                BinOp::Add => Ok(Value::Float(x + y)),
                BinOp::Sub => Ok(Value::Float(x - y)),
                BinOp::Mul => Ok(Value::Float(x * y)),
                BinOp::Div => {
                    if y == 0.0 {
                        Err(EvalError::DivisionByZero)
                    } else {
                        Ok(Value::Float(x / y))
                    }
                }
            }
        }
    }
}

fn compare(op: CmpOp, left: &Value, right: &Value) -> Result<bool, EvalError> {
    if op == CmpOp::In {
        return match (left, right) {
            (Value::Str(needle), Value::List(haystack)) => {
                Ok(haystack.iter().any(|item| item == needle))
            }
            _ => Err(EvalError::Type(format!(
                "'in' requires string in list, got {} in {}",
                left.type_name(),
                right.type_name()
            ))),
        };
    }

    // Numeric comparison across int/float.
    if let (Some(x), Some(y)) = (left.as_f64(), right.as_f64()) {
        return Ok(match op {
            CmpOp::Eq => x == y,
            CmpOp::Ne => x != y,
            CmpOp::Lt => x < y,
            CmpOp::Le => x <= y,
            CmpOp::Gt => x > y,
            CmpOp::Ge => x >= y,
            CmpOp::In => unreachable!(),
        });
    }

    match (left, right) {
        (Value::Str(a), Value::Str(b)) => Ok(match op {
            CmpOp::Eq => a == b,
            CmpOp::Ne => a != b,
            CmpOp::Lt => a < b,
            CmpOp::Le => a <= b,
            CmpOp::Gt => a > b,
            CmpOp::Ge => a >= b,
            CmpOp::In => unreachable!(),
        }),
        (Value::Bool(a), Value::Bool(b)) => match op {
            CmpOp::Eq => Ok(a == b),
            CmpOp::Ne => Ok(a != b),
            _ => Err(EvalError::Type(
                "booleans support only == and !=".to_string(),
            )),
        },
        // Equality across unrelated types is defined (false) rather than an
        // error, so `company.listed_status == true` on a complete context
        // and mixed-type rules behave predictably.
        _ if op == CmpOp::Eq => Ok(false),
        _ if op == CmpOp::Ne => Ok(true),
        _ => Err(EvalError::Type(format!(
            "cannot order {} against {}",
            left.type_name(),
            right.type_name()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context() -> CompanyContext {
        CompanyContext {
            employees: Some(750),
            turnover: Some(45_000_000.0),
            listed_status: Some(true),
            reporting_year: Some(2026),
            reporting_year_start: Some("2026-01-01".to_string()),
            reporting_year_end: Some("2026-12-31".to_string()),
            jurisdictions: vec!["EU".to_string(), "DE".to_string()],
        }
    }

    #[test]
    fn comparisons_over_whitelisted_fields() {
        let ctx = context();
        assert!(evaluate("company.employees > 500", &ctx).unwrap());
        assert!(!evaluate("company.employees > 1000", &ctx).unwrap());
        assert!(evaluate("company.turnover >= 40000000", &ctx).unwrap());
        assert!(evaluate("company.listed_status == true", &ctx).unwrap());
        assert!(evaluate("company.reporting_year == 2026", &ctx).unwrap());
    }

    #[test]
    fn boolean_connectives() {
        let ctx = context();
        assert!(evaluate(
            "company.employees > 500 and company.listed_status",
            &ctx
        )
        .unwrap());
        assert!(evaluate(
            "company.employees > 10000 or company.turnover > 1000000",
            &ctx
        )
        .unwrap());
        assert!(evaluate("not (company.employees > 1000)", &ctx).unwrap());
    }

    #[test]
    fn arithmetic_inside_comparisons() {
        let ctx = context();
        assert!(evaluate("company.employees + 250 >= 1000", &ctx).unwrap());
        assert!(evaluate("company.turnover / 1000000 >= 45", &ctx).unwrap());
        assert!(evaluate("company.employees * 2 == 1500", &ctx).unwrap());
        assert!(evaluate("-company.employees < 0", &ctx).unwrap());
    }

    #[test]
    fn chained_comparison() {
        let ctx = context();
        assert!(evaluate("2024 <= company.reporting_year < 2028", &ctx).unwrap());
        assert!(!evaluate("2027 <= company.reporting_year < 2030", &ctx).unwrap());
    }

    #[test]
    fn membership_over_jurisdictions() {
        let ctx = context();
        assert!(evaluate("'EU' in company.jurisdictions", &ctx).unwrap());
        assert!(!evaluate("'US' in company.jurisdictions", &ctx).unwrap());
    }

    #[test]
    fn unknown_symbol_is_first_class_error() {
        let ctx = context();
        assert_eq!(
            evaluate("revenue > 10", &ctx),
            Err(EvalError::UnknownSymbol("revenue".to_string()))
        );
        assert_eq!(
            evaluate("company.secret > 10", &ctx),
            Err(EvalError::UnknownSymbol("company.secret".to_string()))
        );
        assert_eq!(
            evaluate("other.employees > 10", &ctx),
            Err(EvalError::UnknownSymbol("other".to_string()))
        );
    }

    #[test]
    fn missing_context_value_is_an_error() {
        let ctx = CompanyContext::default();
        assert_eq!(
            evaluate("company.employees > 10", &ctx),
            Err(EvalError::MissingValue("company.employees".to_string()))
        );
    }

    #[test]
    fn deep_attribute_traversal_rejected() {
        assert!(matches!(
            validate("company.jurisdictions.first == 'EU'"),
            Err(EvalError::Parse(_))
        ));
    }

    #[test]
    fn calls_do_not_parse() {
        assert!(validate("company.employees()").is_err());
        assert!(validate("len(company.jurisdictions) > 0").is_err());
    }

    #[test]
    fn division_by_zero_is_an_error() {
        let ctx = context();
        assert_eq!(
            evaluate("company.employees / 0 > 1", &ctx),
            Err(EvalError::DivisionByZero)
        );
    }

    #[test]
    fn non_boolean_result_rejected() {
        let ctx = context();
        assert!(matches!(
            evaluate("company.employees + 1", &ctx),
            Err(EvalError::NotBoolean(_))
        ));
    }

    #[test]
    fn validate_accepts_rules_without_context() {
        assert!(validate("company.employees > 250 and company.listed_status").is_ok());
        assert!(validate("'EU' in company.jurisdictions").is_ok());
    }

    #[test]
    fn python_style_bool_literals_accepted() {
        let ctx = context();
        assert!(evaluate("company.listed_status == True", &ctx).unwrap());
        assert!(!evaluate("company.listed_status == False", &ctx).unwrap());
    }

    #[test]
    fn trailing_tokens_rejected() {
        assert!(matches!(
            validate("company.employees > 10 company"),
            Err(EvalError::Parse(_))
        ));
    }

    #[test]
    fn short_circuit_avoids_missing_values() {
        // `and` short-circuits, so the missing turnover is never resolved.
        let ctx = CompanyContext {
            employees: Some(10),
            ..CompanyContext::default()
        };
        assert!(!evaluate(
            "company.employees > 100 and company.turnover > 1000",
            &ctx
        )
        .unwrap());
    }
}
