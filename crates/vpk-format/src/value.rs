//! Type coercion for loosely-typed string maps (config files, header fields).

use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;

/// A value recovered from its textual form.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum TypedValue {
    Integer(i64),
    Float(f64),
    Boolean(bool),
    List(Vec<TypedValue>),
    Dict(BTreeMap<String, TypedValue>),
    String(String),
}

impl TypedValue {
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            TypedValue::Integer(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            TypedValue::Float(v) => Some(*v),
            TypedValue::Integer(v) => Some(*v as f64),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            TypedValue::Boolean(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            TypedValue::String(v) => Some(v),
            _ => None,
        }
    }
}

impl fmt::Display for TypedValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypedValue::Integer(v) => write!(f, "{}", v),
            TypedValue::Float(v) => write!(f, "{:?}", v),
            TypedValue::Boolean(v) => write!(f, "{}", v),
            TypedValue::String(v) => f.write_str(v),
            TypedValue::List(items) => {
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    item.fmt_literal(f)?;
                }
                f.write_str("]")
            }
            TypedValue::Dict(map) => {
                f.write_str("{")?;
                for (i, (key, value)) in map.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{:?}: ", key)?;
                    value.fmt_literal(f)?;
                }
                f.write_str("}")
            }
        }
    }
}

impl TypedValue {
    fn fmt_literal(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypedValue::String(v) => write!(f, "{:?}", v),
            other => fmt::Display::fmt(other, f),
        }
    }
}

/// Recover the most specific type `raw` represents.
///
/// Tried in order: integer, float (needs a `.` or an exponent), boolean
/// (`true`/`false`/`yes`/`no`, any case), list or dict literal, plain string.
/// A bracketed value that does not parse as a literal stays a string.
pub fn parse_value(raw: &str) -> TypedValue {
    let trimmed = raw.trim();

    if let Some(v) = parse_integer(trimmed) {
        return TypedValue::Integer(v);
    }
    if let Some(v) = parse_float(trimmed) {
        return TypedValue::Float(v);
    }
    if let Some(v) = parse_boolean(trimmed) {
        return TypedValue::Boolean(v);
    }
    let bracketed = (trimmed.starts_with('[') && trimmed.ends_with(']'))
        || (trimmed.starts_with('{') && trimmed.ends_with('}'));
    if bracketed {
        if let Some(v) = LiteralParser::new(trimmed).parse_all() {
            return v;
        }
    }
    TypedValue::String(raw.to_string())
}

/// Apply [`parse_value`] to every value of `raw`.
pub fn match_dict(raw: &BTreeMap<String, String>) -> BTreeMap<String, TypedValue> {
    raw.iter()
        .map(|(key, value)| (key.clone(), parse_value(value)))
        .collect()
}

fn parse_integer(s: &str) -> Option<i64> {
    s.parse::<i64>().ok()
}

fn parse_float(s: &str) -> Option<f64> {
    let numeric = !s.is_empty()
        && s.bytes()
            .all(|b| b.is_ascii_digit() || matches!(b, b'.' | b'e' | b'E' | b'+' | b'-'));
    let marked = s.contains('.') || s.contains('e') || s.contains('E');
    if numeric && marked {
        s.parse::<f64>().ok()
    } else {
        None
    }
}

fn parse_boolean(s: &str) -> Option<bool> {
    match s.to_ascii_lowercase().as_str() {
        "true" | "yes" => Some(true),
        "false" | "no" => Some(false),
        _ => None,
    }
}

struct LiteralParser<'a> {
    input: &'a str,
    pos: usize,
}

impl<'a> LiteralParser<'a> {
    fn new(input: &'a str) -> Self {
        Self { input, pos: 0 }
    }

    fn parse_all(mut self) -> Option<TypedValue> {
        let value = self.value()?;
        self.skip_ws();
        (self.pos == self.input.len()).then_some(value)
    }

    fn peek(&self) -> Option<char> {
        self.input[self.pos..].chars().next()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += c.len_utf8();
        Some(c)
    }

    fn skip_ws(&mut self) {
        while let Some(c) = self.peek().filter(|c| c.is_whitespace()) {
            self.pos += c.len_utf8();
        }
    }

    fn eat(&mut self, expected: char) -> bool {
        self.skip_ws();
        if self.peek() == Some(expected) {
            self.pos += expected.len_utf8();
            true
        } else {
            false
        }
    }

    fn value(&mut self) -> Option<TypedValue> {
        self.skip_ws();
        match self.peek()? {
            '[' => self.list(),
            '{' => self.dict(),
            '"' | '\'' => self.string().map(TypedValue::String),
            _ => self.scalar(),
        }
    }

    fn list(&mut self) -> Option<TypedValue> {
        self.bump();
        let mut items = Vec::new();
        loop {
            if self.eat(']') {
                return Some(TypedValue::List(items));
            }
            items.push(self.value()?);
            if !self.eat(',') {
                return self.eat(']').then_some(TypedValue::List(items));
            }
        }
    }

    fn dict(&mut self) -> Option<TypedValue> {
        self.bump();
        let mut map = BTreeMap::new();
        loop {
            if self.eat('}') {
                return Some(TypedValue::Dict(map));
            }
            let key = match self.value()? {
                TypedValue::String(s) => s,
                other => other.to_string(),
            };
            if !self.eat(':') {
                return None;
            }
            map.insert(key, self.value()?);
            if !self.eat(',') {
                return self.eat('}').then_some(TypedValue::Dict(map));
            }
        }
    }

    fn string(&mut self) -> Option<String> {
        let quote = self.bump()?;
        let mut out = String::new();
        loop {
            match self.bump()? {
                '\\' => match self.bump()? {
                    'n' => out.push('\n'),
                    't' => out.push('\t'),
                    'r' => out.push('\r'),
                    other => out.push(other),
                },
                c if c == quote => return Some(out),
                c => out.push(c),
            }
        }
    }

    fn scalar(&mut self) -> Option<TypedValue> {
        let start = self.pos;
        while let Some(c) = self
            .peek()
            .filter(|c| !matches!(c, ',' | ']' | '}' | ':') && !c.is_whitespace())
        {
            self.pos += c.len_utf8();
        }
        let token = &self.input[start..self.pos];
        if let Some(v) = parse_integer(token) {
            return Some(TypedValue::Integer(v));
        }
        if let Some(v) = parse_float(token) {
            return Some(TypedValue::Float(v));
        }
        match token {
            "True" | "true" => Some(TypedValue::Boolean(true)),
            "False" | "false" => Some(TypedValue::Boolean(false)),
            _ => None,
        }
    }
}
