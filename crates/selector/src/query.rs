//! JSONPath query selector.
//!
//! Accepts the kubectl "relaxed" forms (`{.status.token}`, `.status.token`,
//! `status.token`, `$.status.token`) and supports:
//! - member access: `.name`, `['name']`, `["name"]`
//! - wildcards: `.*`, `[*]`
//! - indexes and slices: `[0]`, `[-1]`, `[1:3]`, `[:2]`
//! - unions: `['a','b']`, `[0,2]`
//! - recursive descent: `..name`, `..[0]`, `..*`
//! - filters: `[?(@.type=="Ready")]`, `[?(@.port > 8000)]`, `[?(@.name)]`
//!
//! Expressions are compiled once in [`QuerySelector::new`]; evaluation must
//! match exactly one node.

use dynres_core::document;
use dynres_core::Document;
use serde_json::Value;
use tracing::trace;

use crate::SelectorError;

#[derive(Debug, Clone, PartialEq)]
enum UnionKey {
    Name(String),
    Index(i64),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CmpOp { Eq, Ne, Lt, Le, Gt, Ge }

#[derive(Debug, Clone, PartialEq)]
struct Filter {
    /// Relative path below `@`.
    path: Vec<String>,
    /// `None` tests for existence.
    cmp: Option<(CmpOp, Value)>,
}

#[derive(Debug, Clone, PartialEq)]
enum Select {
    Name(String),
    Wildcard,
    Index(i64),
    Slice(Option<i64>, Option<i64>),
    Union(Vec<UnionKey>),
    Filter(Filter),
}

#[derive(Debug, Clone, PartialEq)]
struct Step {
    /// `..` recursive descent: apply to the node and every descendant.
    descend: bool,
    select: Select,
}

#[derive(Debug, Clone)]
pub struct QuerySelector {
    expression: String,
    steps: Vec<Step>,
}

impl QuerySelector {
    pub fn new(expression: &str) -> Result<Self, SelectorError> {
        let steps = Parser::new(&relax(expression)).parse().map_err(|reason| SelectorError::InvalidExpression {
            dialect: "jsonPath",
            expression: expression.to_string(),
            reason,
        })?;
        Ok(Self { expression: expression.to_string(), steps })
    }

    pub fn expression(&self) -> &str { &self.expression }

    /// All nodes matched by the query, in document order.
    pub fn find<'a>(&self, source: &'a Document) -> Vec<&'a Value> {
        let mut current = vec![source];
        for step in &self.steps {
            let mut next = Vec::new();
            for node in current {
                if step.descend {
                    visit(node, &mut |n| apply(&step.select, n, &mut next));
                } else {
                    apply(&step.select, node, &mut next);
                }
            }
            current = next;
        }
        current
    }

    pub fn resolve(&self, source: &Document) -> Result<String, SelectorError> {
        let found = self.find(source);
        trace!(expression = %self.expression, matches = found.len(), "jsonpath evaluated");
        match found.as_slice() {
            [] => Err(SelectorError::NoResult { expression: self.expression.clone() }),
            [one] => Ok(document::render_canonical(one)),
            many => Err(SelectorError::Ambiguous { expression: self.expression.clone(), count: many.len() }),
        }
    }
}

/// Normalize kubectl relaxed syntax to a `$`-less path starting with `.` or `[`.
fn relax(expression: &str) -> String {
    let mut s = expression.trim();
    if let Some(inner) = s.strip_prefix('{').and_then(|r| r.strip_suffix('}')) {
        s = inner.trim();
    }
    let s = s.strip_prefix('$').unwrap_or(s);
    if s.is_empty() || s.starts_with('.') || s.starts_with('[') {
        s.to_string()
    } else {
        format!(".{s}")
    }
}

/// Preorder walk over `node` and all of its descendants.
fn visit<'a>(node: &'a Value, f: &mut dyn FnMut(&'a Value)) {
    f(node);
    match node {
        Value::Object(map) => {
            for v in map.values() { visit(v, f); }
        }
        Value::Array(arr) => {
            for v in arr { visit(v, f); }
        }
        _ => {}
    }
}

fn index_of(len: usize, i: i64) -> Option<usize> {
    let len = i64::try_from(len).ok()?;
    let idx = if i < 0 { len + i } else { i };
    if (0..len).contains(&idx) { usize::try_from(idx).ok() } else { None }
}

fn apply<'a>(select: &Select, node: &'a Value, out: &mut Vec<&'a Value>) {
    match select {
        Select::Name(key) => {
            if let Some(v) = node.as_object().and_then(|m| m.get(key)) { out.push(v); }
        }
        Select::Wildcard => match node {
            Value::Object(map) => out.extend(map.values()),
            Value::Array(arr) => out.extend(arr.iter()),
            _ => {}
        },
        Select::Index(i) => {
            if let Some(arr) = node.as_array() {
                if let Some(v) = index_of(arr.len(), *i).and_then(|idx| arr.get(idx)) { out.push(v); }
            }
        }
        Select::Slice(start, end) => {
            if let Some(arr) = node.as_array() {
                let len = i64::try_from(arr.len()).unwrap_or(i64::MAX);
                let clamp = |b: i64| if b < 0 { (len + b).max(0) } else { b.min(len) };
                let from = start.map(clamp).unwrap_or(0);
                let to = end.map(clamp).unwrap_or(len);
                for i in from..to {
                    if let Some(v) = usize::try_from(i).ok().and_then(|idx| arr.get(idx)) { out.push(v); }
                }
            }
        }
        Select::Union(keys) => {
            for key in keys {
                match key {
                    UnionKey::Name(n) => apply(&Select::Name(n.clone()), node, out),
                    UnionKey::Index(i) => apply(&Select::Index(*i), node, out),
                }
            }
        }
        Select::Filter(filter) => {
            let children: Box<dyn Iterator<Item = &'a Value> + 'a> = match node {
                Value::Array(arr) => Box::new(arr.iter()),
                Value::Object(map) => Box::new(map.values()),
                _ => return,
            };
            out.extend(children.filter(|c| filter.matches(c)));
        }
    }
}

impl Filter {
    fn matches(&self, candidate: &Value) -> bool {
        let found = self.path.iter().try_fold(candidate, |cur, seg| cur.as_object()?.get(seg));
        match (&self.cmp, found) {
            (None, found) => found.is_some(),
            (Some(_), None) => false,
            (Some((op, lit)), Some(v)) => compare(*op, v, lit),
        }
    }
}

fn compare(op: CmpOp, left: &Value, right: &Value) -> bool {
    use std::cmp::Ordering;
    let ord: Option<Ordering> = match (left, right) {
        (Value::Number(a), Value::Number(b)) => a.as_f64().zip(b.as_f64()).and_then(|(a, b)| a.partial_cmp(&b)),
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        (a, b) if a == b => Some(Ordering::Equal),
        _ => None,
    };
    match op {
        CmpOp::Eq => ord == Some(Ordering::Equal),
        CmpOp::Ne => ord != Some(Ordering::Equal),
        CmpOp::Lt => ord == Some(Ordering::Less),
        CmpOp::Le => matches!(ord, Some(Ordering::Less | Ordering::Equal)),
        CmpOp::Gt => ord == Some(Ordering::Greater),
        CmpOp::Ge => matches!(ord, Some(Ordering::Greater | Ordering::Equal)),
    }
}

struct Parser {
    chars: Vec<char>,
    pos: usize,
}

type ParseResult<T> = Result<T, String>;

impl Parser {
    fn new(input: &str) -> Self { Self { chars: input.chars().collect(), pos: 0 } }

    fn peek(&self) -> Option<char> { self.chars.get(self.pos).copied() }

    fn peek_at(&self, offset: usize) -> Option<char> { self.chars.get(self.pos + offset).copied() }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += 1;
        Some(c)
    }

    fn skip_ws(&mut self) {
        while self.peek().is_some_and(char::is_whitespace) { self.pos += 1; }
    }

    fn expect(&mut self, want: char) -> ParseResult<()> {
        match self.bump() {
            Some(c) if c == want => Ok(()),
            Some(c) => Err(format!("expected '{want}' at position {}, found '{c}'", self.pos - 1)),
            None => Err(format!("expected '{want}', found end of expression")),
        }
    }

    fn parse(mut self) -> ParseResult<Vec<Step>> {
        let mut steps = Vec::new();
        while let Some(c) = self.peek() {
            let step = match c {
                '.' if self.peek_at(1) == Some('.') => {
                    self.pos += 2;
                    let select = if self.peek() == Some('[') { self.bracket()? } else { self.member()? };
                    Step { descend: true, select }
                }
                '.' => {
                    self.pos += 1;
                    Step { descend: false, select: self.member()? }
                }
                '[' => Step { descend: false, select: self.bracket()? },
                other => return Err(format!("unexpected '{other}' at position {}", self.pos)),
            };
            steps.push(step);
        }
        Ok(steps)
    }

    /// Member after a dot: `*` or a bare name.
    fn member(&mut self) -> ParseResult<Select> {
        if self.peek() == Some('*') {
            self.pos += 1;
            return Ok(Select::Wildcard);
        }
        let name = self.bare_name();
        if name.is_empty() {
            return Err(format!("expected a field name at position {}", self.pos));
        }
        Ok(Select::Name(name))
    }

    fn bare_name(&mut self) -> String {
        let mut name = String::new();
        while let Some(c) = self.peek() {
            if matches!(c, '.' | '[' | ']' | '(' | ')' | '{' | '}' | '=' | '!' | '<' | '>' | ',') || c.is_whitespace() { break; }
            name.push(c);
            self.pos += 1;
        }
        name
    }

    fn bracket(&mut self) -> ParseResult<Select> {
        self.expect('[')?;
        self.skip_ws();
        let select = match self.peek() {
            Some('*') => {
                self.pos += 1;
                Select::Wildcard
            }
            Some('?') => {
                self.pos += 1;
                Select::Filter(self.filter()?)
            }
            Some('\'' | '"') => {
                let mut names = vec![self.quoted()?];
                self.skip_ws();
                while self.peek() == Some(',') {
                    self.pos += 1;
                    self.skip_ws();
                    names.push(self.quoted()?);
                    self.skip_ws();
                }
                if names.len() == 1 {
                    Select::Name(names.remove(0))
                } else {
                    Select::Union(names.into_iter().map(UnionKey::Name).collect())
                }
            }
            Some(_) => self.index_like()?,
            None => return Err("unterminated '['".to_string()),
        };
        self.skip_ws();
        self.expect(']')?;
        Ok(select)
    }

    /// `n`, `n:m`, `:m`, `n:` or `a,b,c`.
    fn index_like(&mut self) -> ParseResult<Select> {
        let first = self.opt_int()?;
        self.skip_ws();
        match self.peek() {
            Some(':') => {
                self.pos += 1;
                self.skip_ws();
                let end = self.opt_int()?;
                Ok(Select::Slice(first, end))
            }
            Some(',') => {
                let mut keys = vec![UnionKey::Index(first.ok_or("expected an index before ','")?)];
                while self.peek() == Some(',') {
                    self.pos += 1;
                    self.skip_ws();
                    keys.push(UnionKey::Index(self.opt_int()?.ok_or("expected an index after ','")?));
                    self.skip_ws();
                }
                Ok(Select::Union(keys))
            }
            _ => first.map(Select::Index).ok_or_else(|| format!("expected an index at position {}", self.pos)),
        }
    }

    fn opt_int(&mut self) -> ParseResult<Option<i64>> {
        let start = self.pos;
        if self.peek() == Some('-') { self.pos += 1; }
        while self.peek().is_some_and(|c| c.is_ascii_digit()) { self.pos += 1; }
        let text: String = self.chars[start..self.pos].iter().collect();
        if text.is_empty() { return Ok(None); }
        text.parse::<i64>().map(Some).map_err(|_| format!("invalid index '{text}'"))
    }

    fn quoted(&mut self) -> ParseResult<String> {
        let quote = match self.bump() {
            Some(q @ ('\'' | '"')) => q,
            _ => return Err(format!("expected a quoted string at position {}", self.pos.saturating_sub(1))),
        };
        let mut out = String::new();
        loop {
            match self.bump() {
                Some('\\') => match self.bump() {
                    Some(c) => out.push(c),
                    None => return Err("unterminated escape".to_string()),
                },
                Some(c) if c == quote => return Ok(out),
                Some(c) => out.push(c),
                None => return Err("unterminated string".to_string()),
            }
        }
    }

    /// `(@.a.b)` or `(@.a.b <op> literal)`, after the `?`.
    fn filter(&mut self) -> ParseResult<Filter> {
        self.expect('(')?;
        self.skip_ws();
        self.expect('@')?;
        let mut path = Vec::new();
        loop {
            match self.peek() {
                Some('.') => {
                    self.pos += 1;
                    let name = self.bare_name();
                    if name.is_empty() { return Err("expected a field name after '@.'".to_string()); }
                    path.push(name);
                }
                Some('[') => {
                    self.pos += 1;
                    self.skip_ws();
                    path.push(self.quoted()?);
                    self.skip_ws();
                    self.expect(']')?;
                }
                _ => break,
            }
        }
        self.skip_ws();
        let cmp = match self.peek() {
            Some(')') => None,
            Some(_) => {
                let op = self.operator()?;
                self.skip_ws();
                Some((op, self.literal()?))
            }
            None => return Err("unterminated filter".to_string()),
        };
        self.skip_ws();
        self.expect(')')?;
        Ok(Filter { path, cmp })
    }

    fn operator(&mut self) -> ParseResult<CmpOp> {
        let two: String = [self.peek(), self.peek_at(1)].iter().flatten().collect();
        let (op, len) = match two.as_str() {
            "==" => (CmpOp::Eq, 2),
            "!=" => (CmpOp::Ne, 2),
            "<=" => (CmpOp::Le, 2),
            ">=" => (CmpOp::Ge, 2),
            s if s.starts_with('<') => (CmpOp::Lt, 1),
            s if s.starts_with('>') => (CmpOp::Gt, 1),
            _ => return Err(format!("expected a comparison operator at position {}", self.pos)),
        };
        self.pos += len;
        Ok(op)
    }

    /// Digits, sign, decimal point and exponent; validated by serde_json.
    fn number(&mut self) -> String {
        let mut out = String::new();
        while let Some(c) = self.peek() {
            if !(c.is_ascii_digit() || matches!(c, '-' | '+' | '.' | 'e' | 'E')) { break; }
            out.push(c);
            self.pos += 1;
        }
        out
    }

    fn literal(&mut self) -> ParseResult<Value> {
        match self.peek() {
            Some('\'' | '"') => Ok(Value::String(self.quoted()?)),
            Some(c) if c.is_ascii_digit() || c == '-' => {
                let word = self.number();
                serde_json::from_str::<serde_json::Number>(&word)
                    .map(Value::Number)
                    .map_err(|_| format!("invalid number literal '{word}'"))
            }
            _ => {
                let word = self.bare_name();
                match word.as_str() {
                    "true" => Ok(Value::Bool(true)),
                    "false" => Ok(Value::Bool(false)),
                    "null" => Ok(Value::Null),
                    _ => Err(format!("invalid literal '{word}'")),
                }
            }
        }
    }
}
