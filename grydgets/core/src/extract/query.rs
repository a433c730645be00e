//! A small jq-style query language
//!
//! # Supported syntax
//!
//! ```text
//! .                   identity
//! .key  ."odd key"    object field (missing -> null)
//! .[n]  .[-1]         array index (out of range -> null)
//! .[]                 iterate array elements / object values
//! a | b               pipe every output of a into b
//! a , b               outputs of a followed by outputs of b
//! a == b (!= < <= > >=)
//! length keys first last tostring tonumber not
//! select(cond)
//! "str" 12 true false null
//! ( ... )
//! ```
//!
//! Every expression is a generator: it maps one input to zero or more
//! outputs. [`run_query`] returns the first output.

use std::cmp::Ordering;

use serde_json::Value;

use crate::error::ExtractionError;

// ============================================================================
// Lexer
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Dot,
    Ident(String),
    Str(String),
    Num(f64),
    LBracket,
    RBracket,
    LParen,
    RParen,
    Pipe,
    Comma,
    Op(CmpOp),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

fn lex(src: &str) -> Result<Vec<Token>, ExtractionError> {
    let err = |msg: String| ExtractionError::Query(msg);
    let chars: Vec<char> = src.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            ' ' | '\t' | '\n' | '\r' => i += 1,
            '.' => {
                tokens.push(Token::Dot);
                i += 1;
            }
            '[' => {
                tokens.push(Token::LBracket);
                i += 1;
            }
            ']' => {
                tokens.push(Token::RBracket);
                i += 1;
            }
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            '|' => {
                tokens.push(Token::Pipe);
                i += 1;
            }
            ',' => {
                tokens.push(Token::Comma);
                i += 1;
            }
            '=' | '!' | '<' | '>' => {
                let next_eq = chars.get(i + 1) == Some(&'=');
                let op = match (c, next_eq) {
                    ('=', true) => CmpOp::Eq,
                    ('!', true) => CmpOp::Ne,
                    ('<', true) => CmpOp::Le,
                    ('>', true) => CmpOp::Ge,
                    ('<', false) => CmpOp::Lt,
                    ('>', false) => CmpOp::Gt,
                    _ => return Err(err(format!("unexpected '{c}' at {i}"))),
                };
                tokens.push(Token::Op(op));
                i += if next_eq { 2 } else { 1 };
            }
            '"' => {
                let mut s = String::new();
                i += 1;
                loop {
                    match chars.get(i) {
                        None => return Err(err("unterminated string".into())),
                        Some('"') => {
                            i += 1;
                            break;
                        }
                        Some('\\') => {
                            match chars.get(i + 1) {
                                Some('n') => s.push('\n'),
                                Some('t') => s.push('\t'),
                                Some(&other) => s.push(other),
                                None => return Err(err("unterminated string".into())),
                            }
                            i += 2;
                        }
                        Some(&other) => {
                            s.push(other);
                            i += 1;
                        }
                    }
                }
                tokens.push(Token::Str(s));
            }
            c if c.is_ascii_digit()
                || (c == '-' && chars.get(i + 1).is_some_and(char::is_ascii_digit)) =>
            {
                let start = i;
                i += 1;
                while chars.get(i).is_some_and(|c| c.is_ascii_digit() || *c == '.') {
                    i += 1;
                }
                let text: String = chars[start..i].iter().collect();
                let n = text
                    .parse::<f64>()
                    .map_err(|_| err(format!("bad number '{text}'")))?;
                tokens.push(Token::Num(n));
            }
            c if c.is_alphabetic() || c == '_' => {
                let start = i;
                while chars.get(i).is_some_and(|c| c.is_alphanumeric() || *c == '_') {
                    i += 1;
                }
                tokens.push(Token::Ident(chars[start..i].iter().collect()));
            }
            other => return Err(err(format!("unexpected '{other}' at {i}"))),
        }
    }
    Ok(tokens)
}

// ============================================================================
// Parser
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
enum Expr {
    Identity,
    Field(Box<Expr>, String),
    Index(Box<Expr>, i64),
    Iterate(Box<Expr>),
    Literal(Value),
    Pipe(Box<Expr>, Box<Expr>),
    Comma(Box<Expr>, Box<Expr>),
    Compare(Box<Expr>, CmpOp, Box<Expr>),
    Select(Box<Expr>),
    Builtin(Builtin),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Builtin {
    Length,
    Keys,
    First,
    Last,
    ToString,
    ToNumber,
    Not,
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn peek_at(&self, offset: usize) -> Option<&Token> {
        self.tokens.get(self.pos + offset)
    }

    fn next(&mut self) -> Option<Token> {
        let tok = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        tok
    }

    fn expect(&mut self, want: &Token) -> Result<(), ExtractionError> {
        match self.next() {
            Some(ref t) if t == want => Ok(()),
            other => Err(ExtractionError::Query(format!(
                "expected {want:?}, found {other:?}"
            ))),
        }
    }

    fn pipe(&mut self) -> Result<Expr, ExtractionError> {
        let mut lhs = self.comma()?;
        while self.peek() == Some(&Token::Pipe) {
            self.pos += 1;
            let rhs = self.comma()?;
            lhs = Expr::Pipe(Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn comma(&mut self) -> Result<Expr, ExtractionError> {
        let mut lhs = self.compare()?;
        while self.peek() == Some(&Token::Comma) {
            self.pos += 1;
            let rhs = self.compare()?;
            lhs = Expr::Comma(Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn compare(&mut self) -> Result<Expr, ExtractionError> {
        let lhs = self.postfix()?;
        if let Some(Token::Op(op)) = self.peek().cloned() {
            self.pos += 1;
            let rhs = self.postfix()?;
            return Ok(Expr::Compare(Box::new(lhs), op, Box::new(rhs)));
        }
        Ok(lhs)
    }

    fn postfix(&mut self) -> Result<Expr, ExtractionError> {
        let mut expr = self.primary()?;
        loop {
            match (self.peek(), self.peek_at(1)) {
                (Some(Token::Dot), Some(Token::Ident(_) | Token::Str(_))) => {
                    self.pos += 1;
                    let name = self.field_name()?;
                    expr = Expr::Field(Box::new(expr), name);
                }
                (Some(Token::Dot), Some(Token::LBracket)) => {
                    self.pos += 2;
                    expr = self.bracket(expr)?;
                }
                (Some(Token::LBracket), _) => {
                    self.pos += 1;
                    expr = self.bracket(expr)?;
                }
                _ => return Ok(expr),
            }
        }
    }

    fn field_name(&mut self) -> Result<String, ExtractionError> {
        match self.next() {
            Some(Token::Ident(s) | Token::Str(s)) => Ok(s),
            other => Err(ExtractionError::Query(format!(
                "expected field name, found {other:?}"
            ))),
        }
    }

    /// Parse what follows an opening `[`
    fn bracket(&mut self, base: Expr) -> Result<Expr, ExtractionError> {
        let expr = match self.next() {
            Some(Token::RBracket) => return Ok(Expr::Iterate(Box::new(base))),
            Some(Token::Num(n)) if n.fract() == 0.0 => Expr::Index(Box::new(base), n as i64),
            Some(Token::Str(s)) => Expr::Field(Box::new(base), s),
            other => {
                return Err(ExtractionError::Query(format!(
                    "unsupported index {other:?}"
                )))
            }
        };
        self.expect(&Token::RBracket)?;
        Ok(expr)
    }

    fn primary(&mut self) -> Result<Expr, ExtractionError> {
        match self.next() {
            Some(Token::Dot) => match self.peek() {
                Some(Token::Ident(_) | Token::Str(_)) => {
                    let name = self.field_name()?;
                    Ok(Expr::Field(Box::new(Expr::Identity), name))
                }
                Some(Token::LBracket) => {
                    self.pos += 1;
                    self.bracket(Expr::Identity)
                }
                _ => Ok(Expr::Identity),
            },
            Some(Token::Str(s)) => Ok(Expr::Literal(Value::String(s))),
            Some(Token::Num(n)) => Ok(Expr::Literal(number(n))),
            Some(Token::LParen) => {
                let inner = self.pipe()?;
                self.expect(&Token::RParen)?;
                Ok(inner)
            }
            Some(Token::Ident(name)) => self.call(&name),
            other => Err(ExtractionError::Query(format!(
                "unexpected token {other:?}"
            ))),
        }
    }

    fn call(&mut self, name: &str) -> Result<Expr, ExtractionError> {
        let builtin = match name {
            "true" => return Ok(Expr::Literal(Value::Bool(true))),
            "false" => return Ok(Expr::Literal(Value::Bool(false))),
            "null" => return Ok(Expr::Literal(Value::Null)),
            "select" => {
                self.expect(&Token::LParen)?;
                let cond = self.pipe()?;
                self.expect(&Token::RParen)?;
                return Ok(Expr::Select(Box::new(cond)));
            }
            "length" => Builtin::Length,
            "keys" => Builtin::Keys,
            "first" => Builtin::First,
            "last" => Builtin::Last,
            "tostring" => Builtin::ToString,
            "tonumber" => Builtin::ToNumber,
            "not" => Builtin::Not,
            other => {
                return Err(ExtractionError::Query(format!(
                    "unknown function '{other}'"
                )))
            }
        };
        Ok(Expr::Builtin(builtin))
    }
}

fn compile(src: &str) -> Result<Expr, ExtractionError> {
    let mut parser = Parser {
        tokens: lex(src)?,
        pos: 0,
    };
    let expr = parser.pipe()?;
    if let Some(tok) = parser.peek() {
        return Err(ExtractionError::Query(format!("trailing input at {tok:?}")));
    }
    Ok(expr)
}

// ============================================================================
// Evaluation
// ============================================================================

fn number(n: f64) -> Value {
    if n.fract() == 0.0 && n.abs() < 9.0e15 {
        Value::from(n as i64)
    } else {
        serde_json::Number::from_f64(n).map_or(Value::Null, Value::Number)
    }
}

fn truthy(v: &Value) -> bool {
    !matches!(v, Value::Null | Value::Bool(false))
}

fn rank(v: &Value) -> u8 {
    match v {
        Value::Null => 0,
        Value::Bool(false) => 1,
        Value::Bool(true) => 2,
        Value::Number(_) => 3,
        Value::String(_) => 4,
        Value::Array(_) => 5,
        Value::Object(_) => 6,
    }
}

fn order(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => {
            let (x, y) = (x.as_f64().unwrap_or(0.0), y.as_f64().unwrap_or(0.0));
            x.partial_cmp(&y).unwrap_or(Ordering::Equal)
        }
        (Value::String(x), Value::String(y)) => x.cmp(y),
        (Value::Array(_), Value::Array(_)) | (Value::Object(_), Value::Object(_)) => {
            if a == b {
                Ordering::Equal
            } else {
                a.to_string().cmp(&b.to_string())
            }
        }
        _ => rank(a).cmp(&rank(b)),
    }
}

fn index_array(items: &[Value], index: i64) -> Value {
    let len = i64::try_from(items.len()).unwrap_or(i64::MAX);
    let i = if index < 0 { len + index } else { index };
    usize::try_from(i)
        .ok()
        .and_then(|i| items.get(i))
        .cloned()
        .unwrap_or(Value::Null)
}

fn eval(expr: &Expr, input: &Value) -> Result<Vec<Value>, ExtractionError> {
    Ok(match expr {
        Expr::Identity => vec![input.clone()],
        Expr::Literal(v) => vec![v.clone()],
        Expr::Field(base, key) => eval(base, input)?
            .into_iter()
            .map(|v| match v {
                Value::Object(map) => Ok(map.get(key).cloned().unwrap_or(Value::Null)),
                Value::Null => Ok(Value::Null),
                other => Err(ExtractionError::NotIndexable {
                    kind: super::kind_name(&other),
                    with: format!("key '{key}'"),
                }),
            })
            .collect::<Result<_, _>>()?,
        Expr::Index(base, index) => eval(base, input)?
            .into_iter()
            .map(|v| match v {
                Value::Array(items) => Ok(index_array(&items, *index)),
                Value::Null => Ok(Value::Null),
                other => Err(ExtractionError::NotIndexable {
                    kind: super::kind_name(&other),
                    with: format!("index {index}"),
                }),
            })
            .collect::<Result<_, _>>()?,
        Expr::Iterate(base) => {
            let mut out = Vec::new();
            for v in eval(base, input)? {
                match v {
                    Value::Array(items) => out.extend(items),
                    Value::Object(map) => out.extend(map.into_iter().map(|(_, v)| v)),
                    other => {
                        return Err(ExtractionError::NotIndexable {
                            kind: super::kind_name(&other),
                            with: "[]".into(),
                        })
                    }
                }
            }
            out
        }
        Expr::Pipe(lhs, rhs) => {
            let mut out = Vec::new();
            for v in eval(lhs, input)? {
                out.extend(eval(rhs, &v)?);
            }
            out
        }
        Expr::Comma(lhs, rhs) => {
            let mut out = eval(lhs, input)?;
            out.extend(eval(rhs, input)?);
            out
        }
        Expr::Compare(lhs, op, rhs) => {
            let rights = eval(rhs, input)?;
            let mut out = Vec::new();
            for l in eval(lhs, input)? {
                for r in &rights {
                    let ord = order(&l, r);
                    let result = match op {
                        CmpOp::Eq => ord == Ordering::Equal,
                        CmpOp::Ne => ord != Ordering::Equal,
                        CmpOp::Lt => ord == Ordering::Less,
                        CmpOp::Le => ord != Ordering::Greater,
                        CmpOp::Gt => ord == Ordering::Greater,
                        CmpOp::Ge => ord != Ordering::Less,
                    };
                    out.push(Value::Bool(result));
                }
            }
            out
        }
        Expr::Select(cond) => {
            if eval(cond, input)?.iter().any(truthy) {
                vec![input.clone()]
            } else {
                Vec::new()
            }
        }
        Expr::Builtin(builtin) => vec![apply_builtin(*builtin, input)?],
    })
}

fn apply_builtin(builtin: Builtin, input: &Value) -> Result<Value, ExtractionError> {
    let unsupported = |name: &str| {
        ExtractionError::Query(format!("{} has no {name}", super::kind_name(input)))
    };
    Ok(match builtin {
        Builtin::Length => match input {
            Value::Null => Value::from(0),
            Value::String(s) => Value::from(s.chars().count()),
            Value::Array(a) => Value::from(a.len()),
            Value::Object(o) => Value::from(o.len()),
            Value::Number(n) => number(n.as_f64().unwrap_or(0.0).abs()),
            Value::Bool(_) => return Err(unsupported("length")),
        },
        Builtin::Keys => match input {
            Value::Object(o) => {
                let mut keys: Vec<&String> = o.keys().collect();
                keys.sort();
                Value::from(keys.into_iter().cloned().collect::<Vec<_>>())
            }
            Value::Array(a) => Value::from((0..a.len()).collect::<Vec<_>>()),
            _ => return Err(unsupported("keys")),
        },
        Builtin::First => match input {
            Value::Array(a) => index_array(a, 0),
            Value::Null => Value::Null,
            _ => return Err(unsupported("first")),
        },
        Builtin::Last => match input {
            Value::Array(a) => index_array(a, -1),
            Value::Null => Value::Null,
            _ => return Err(unsupported("last")),
        },
        Builtin::ToString => match input {
            Value::String(_) => input.clone(),
            other => Value::String(other.to_string()),
        },
        Builtin::ToNumber => match input {
            Value::Number(_) => input.clone(),
            Value::String(s) => number(
                s.trim()
                    .parse::<f64>()
                    .map_err(|_| ExtractionError::Query(format!("cannot parse '{s}' as number")))?,
            ),
            _ => return Err(unsupported("tonumber")),
        },
        Builtin::Not => Value::Bool(!truthy(input)),
    })
}

/// Check that `query` parses
pub fn validate_query(query: &str) -> Result<(), ExtractionError> {
    compile(query).map(|_| ())
}

/// Evaluate `query` against `data`, returning its first output
pub fn run_query(data: &Value, query: &str) -> Result<Value, ExtractionError> {
    let expr = compile(query)?;
    eval(&expr, data)?
        .into_iter()
        .next()
        .ok_or(ExtractionError::NoResult)
}
