//! A deliberately small where-clause dialect for [`super::MemoryEngine`].
//!
//! Supported grammar:
//!
//! ```text
//! filter  := clause ( AND clause )*
//! clause  := field op literal | field IS [NOT] NULL
//! op      := = | <> | != | < | <= | > | >=
//! literal := number | 'text'
//! ```
//!
//! Field names are matched case-insensitively and may be wrapped in double
//! quotes. Comparisons against null values never match.

use std::cmp::Ordering;

use crate::engine::{EngineError, EngineErrorKind, RawField};
use crate::value::Value;

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Word(String),
    Ident(String),
    Text(String),
    Number(f64),
    Op(&'static str),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Op {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    IsNull,
    IsNotNull,
}

#[derive(Debug, Clone, PartialEq)]
enum Literal {
    Number(f64),
    Text(String),
    None,
}

#[derive(Debug, Clone, PartialEq)]
struct Clause {
    column: usize,
    op: Op,
    literal: Literal,
}

/// A parsed where clause bound to column positions.
#[derive(Debug, Clone, PartialEq, Default)]
pub(crate) struct Filter {
    clauses: Vec<Clause>,
}

fn invalid(filter: &str, reason: impl AsRef<str>) -> EngineError {
    EngineError::new(
        EngineErrorKind::InvalidFilter,
        format!("Invalid where clause '{filter}': {}", reason.as_ref()),
    )
}

fn tokenize(filter: &str) -> Result<Vec<Token>, EngineError> {
    let chars: Vec<char> = filter.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        if c.is_whitespace() {
            i += 1;
        } else if c == '\'' {
            let mut text = String::new();
            i += 1;
            loop {
                match chars.get(i) {
                    None => return Err(invalid(filter, "unterminated string literal")),
                    Some('\'') if chars.get(i + 1) == Some(&'\'') => {
                        text.push('\'');
                        i += 2;
                    },
                    Some('\'') => {
                        i += 1;
                        break;
                    },
                    Some(ch) => {
                        text.push(*ch);
                        i += 1;
                    },
                }
            }
            tokens.push(Token::Text(text));
        } else if c == '"' {
            let start = i + 1;
            let end = chars[start..]
                .iter()
                .position(|ch| *ch == '"')
                .ok_or_else(|| invalid(filter, "unterminated quoted field name"))?;
            tokens.push(Token::Ident(chars[start..start + end].iter().collect()));
            i = start + end + 1;
        } else if c.is_ascii_digit()
            || ((c == '-' || c == '.') && chars.get(i + 1).is_some_and(char::is_ascii_digit))
        {
            let start = i;
            i += 1;
            while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                i += 1;
            }
            let raw: String = chars[start..i].iter().collect();
            let number = raw
                .parse::<f64>()
                .map_err(|_| invalid(filter, format!("bad number '{raw}'")))?;
            tokens.push(Token::Number(number));
        } else if "<>=!".contains(c) {
            let next = chars.get(i + 1).copied();
            let (op, width) = match (c, next) {
                ('<', Some('=')) => ("<=", 2),
                ('>', Some('=')) => (">=", 2),
                ('<', Some('>')) => ("<>", 2),
                ('!', Some('=')) => ("!=", 2),
                ('<', _) => ("<", 1),
                ('>', _) => (">", 1),
                ('=', _) => ("=", 1),
                _ => return Err(invalid(filter, format!("unexpected '{c}'"))),
            };
            tokens.push(Token::Op(op));
            i += width;
        } else if c.is_alphanumeric() || c == '_' {
            let start = i;
            while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_') {
                i += 1;
            }
            tokens.push(Token::Word(chars[start..i].iter().collect()));
        } else {
            return Err(invalid(filter, format!("unexpected '{c}'")));
        }
    }

    Ok(tokens)
}

fn is_keyword(token: Option<&Token>, keyword: &str) -> bool {
    matches!(token, Some(Token::Word(w)) if w.eq_ignore_ascii_case(keyword))
}

/// Parses `filter` against the table's fields.
pub(crate) fn parse(filter: &str, fields: &[RawField]) -> Result<Filter, EngineError> {
    let tokens = tokenize(filter)?;
    if tokens.is_empty() {
        return Ok(Filter::default());
    }

    let mut clauses = Vec::new();
    let mut pos = 0;
    loop {
        let name = match tokens.get(pos) {
            Some(Token::Word(w) | Token::Ident(w)) => w,
            _ => return Err(invalid(filter, "expected a field name")),
        };
        let column = fields
            .iter()
            .position(|f| f.name.eq_ignore_ascii_case(name))
            .ok_or_else(|| invalid(filter, format!("unknown field '{name}'")))?;
        pos += 1;

        let (op, literal) = if is_keyword(tokens.get(pos), "IS") {
            pos += 1;
            let negated = is_keyword(tokens.get(pos), "NOT");
            if negated {
                pos += 1;
            }
            if !is_keyword(tokens.get(pos), "NULL") {
                return Err(invalid(filter, "expected NULL after IS"));
            }
            pos += 1;
            let op = if negated { Op::IsNotNull } else { Op::IsNull };
            (op, Literal::None)
        } else {
            let op = match tokens.get(pos) {
                Some(Token::Op("=")) => Op::Eq,
                Some(Token::Op("<>" | "!=")) => Op::Ne,
                Some(Token::Op("<")) => Op::Lt,
                Some(Token::Op("<=")) => Op::Le,
                Some(Token::Op(">")) => Op::Gt,
                Some(Token::Op(">=")) => Op::Ge,
                _ => return Err(invalid(filter, "expected a comparison operator")),
            };
            pos += 1;
            let literal = match tokens.get(pos) {
                Some(Token::Number(n)) => Literal::Number(*n),
                Some(Token::Text(t)) => Literal::Text(t.clone()),
                _ => return Err(invalid(filter, "expected a literal")),
            };
            pos += 1;
            (op, literal)
        };

        clauses.push(Clause {
            column,
            op,
            literal,
        });

        if pos == tokens.len() {
            break;
        }
        if !is_keyword(tokens.get(pos), "AND") {
            return Err(invalid(filter, "expected AND between conditions"));
        }
        pos += 1;
    }

    Ok(Filter { clauses })
}

impl Filter {
    /// Returns `true` when the full row satisfies every clause.
    pub(crate) fn matches(&self, row: &[Value]) -> bool {
        self.clauses.iter().all(|clause| clause.matches(row))
    }
}

impl Clause {
    fn matches(&self, row: &[Value]) -> bool {
        let value = row.get(self.column).unwrap_or(&Value::Null);
        match self.op {
            Op::IsNull => value.is_null(),
            Op::IsNotNull => !value.is_null(),
            op => compare(value, &self.literal).is_some_and(|ordering| match op {
                Op::Eq => ordering == Ordering::Equal,
                Op::Ne => ordering != Ordering::Equal,
                Op::Lt => ordering == Ordering::Less,
                Op::Le => ordering != Ordering::Greater,
                Op::Gt => ordering == Ordering::Greater,
                Op::Ge => ordering != Ordering::Less,
                Op::IsNull | Op::IsNotNull => false,
            }),
        }
    }
}

fn compare(value: &Value, literal: &Literal) -> Option<Ordering> {
    match (value, literal) {
        (Value::Integer(_) | Value::Double(_), Literal::Number(n)) => value.as_f64()?.partial_cmp(n),
        (Value::Text(s), Literal::Text(t)) => Some(s.as_str().cmp(t.as_str())),
        (Value::Date(d), Literal::Text(t)) => {
            Some(d.format("%Y-%m-%d %H:%M:%S").to_string().as_str().cmp(t.as_str()))
        },
        _ => None,
    }
}
