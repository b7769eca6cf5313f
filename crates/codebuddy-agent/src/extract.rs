//! Turns free-form model output into candidate tool invocations.
//!
//! Two strategies run in precedence order. The pattern strategy finds
//! `tool_name(key=value, ...)` spans anywhere in the text; the heuristic
//! strategy only runs when the pattern strategy finds nothing at all and
//! reads `tool_name value value ...` lines. Text matching neither is a plain
//! conversational reply.

use codebuddy_core::{Arguments, Invocation, ToolSchema, fold_key};
use codebuddy_tools::ToolCatalog;
use regex::Regex;
use serde_json::{Number, Value};
use std::ops::Range;
use std::sync::LazyLock;

static CALL_START: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b([A-Za-z_][A-Za-z0-9_]*)\(").expect("valid call regex")
});

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    Pattern,
    Heuristic,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub invocation: Invocation,
    pub strategy: Strategy,
    /// Byte range of the source text the candidate came from.
    pub span: Range<usize>,
    /// Positional values with no parameter left to receive them.
    pub dropped: Vec<Value>,
}

/// Lazy, single-pass sequence of candidates in text order.
pub struct Extractor<'a, C: ?Sized> {
    text: &'a str,
    catalog: &'a C,
    state: State,
}

enum State {
    Pattern { pos: usize, found: bool },
    Heuristic { offset: usize },
    Done,
}

pub fn extract<'a, C>(text: &'a str, catalog: &'a C) -> Extractor<'a, C>
where
    C: ToolCatalog + ?Sized,
{
    Extractor {
        text,
        catalog,
        state: State::Pattern {
            pos: 0,
            found: false,
        },
    }
}

impl<C> Iterator for Extractor<'_, C>
where
    C: ToolCatalog + ?Sized,
{
    type Item = Candidate;

    fn next(&mut self) -> Option<Candidate> {
        loop {
            match self.state {
                State::Pattern { pos, found } => {
                    if let Some(candidate) = pattern_match(self.text, pos, self.catalog) {
                        self.state = State::Pattern {
                            pos: candidate.span.end.max(pos + 1),
                            found: true,
                        };
                        return Some(candidate);
                    }
                    self.state = if found {
                        State::Done
                    } else {
                        State::Heuristic { offset: 0 }
                    };
                }
                State::Heuristic { offset } => {
                    if offset >= self.text.len() {
                        self.state = State::Done;
                        continue;
                    }
                    let end = self.text[offset..]
                        .find('\n')
                        .map_or(self.text.len(), |idx| offset + idx);
                    self.state = State::Heuristic { offset: end + 1 };
                    let line = &self.text[offset..end];
                    if let Some((invocation, dropped)) = heuristic_match(line, self.catalog) {
                        return Some(Candidate {
                            invocation,
                            strategy: Strategy::Heuristic,
                            span: offset..end,
                            dropped,
                        });
                    }
                }
                State::Done => return None,
            }
        }
    }
}

/// Registered name for `name`, matched exactly and then case-insensitively.
fn known_tool<C: ToolCatalog + ?Sized>(catalog: &C, name: &str) -> Option<String> {
    if catalog.contains(name) {
        return Some(name.to_string());
    }
    let lower = name.to_ascii_lowercase();
    catalog.contains(&lower).then_some(lower)
}

/// First `known_tool(...)` span starting at or after byte `from`.
pub fn pattern_match<C>(text: &str, from: usize, catalog: &C) -> Option<Candidate>
where
    C: ToolCatalog + ?Sized,
{
    let mut pos = from;
    while pos < text.len() {
        let caps = CALL_START.captures_at(text, pos)?;
        let (whole, name) = (caps.get(0)?, caps.get(1)?);
        let Some(tool) = known_tool(catalog, name.as_str()) else {
            pos = name.end();
            continue;
        };
        let mut scanner = Scanner::new(text, whole.end());
        let raw = scanner.call_arguments();
        let schema = catalog.schema(&tool)?;
        let (arguments, dropped) = assemble(schema, raw);
        return Some(Candidate {
            invocation: Invocation::new(tool, arguments),
            strategy: Strategy::Pattern,
            span: name.start()..scanner.pos,
            dropped,
        });
    }
    None
}

/// `tool_name value value ...` on a single line. Positional values fill the
/// required parameters in declaration order (the optional ones when nothing
/// is required); the last slot absorbs the rest of the line.
pub fn heuristic_match<C>(line: &str, catalog: &C) -> Option<(Invocation, Vec<Value>)>
where
    C: ToolCatalog + ?Sized,
{
    let trimmed = line.trim();
    if trimmed.starts_with("```") {
        return None;
    }
    let body = trimmed.trim_start_matches(['-', '*', '>', '$', '`', ' ', '\t']);
    let head_end = body.find(char::is_whitespace).unwrap_or(body.len());
    let head = body[..head_end].trim_end_matches([':', '`']);
    let tool = known_tool(catalog, head)?;
    let schema = catalog.schema(&tool)?;
    let rest = body[head_end..].trim().trim_end_matches('`');

    let required: Vec<&str> = schema.required_names();
    let slots: Vec<&str> = if required.is_empty() {
        schema
            .params
            .iter()
            .map(|p| p.name.as_str())
            .collect()
    } else {
        required
    };

    let mut arguments = Arguments::new();
    let mut dropped = Vec::new();
    let mut filled = 0;
    for token in tokenize(rest) {
        if let Some((key, value)) = named_token(token.raw) {
            arguments.insert(key.to_string(), Value::String(unquote(value).to_string()));
            continue;
        }
        if filled >= slots.len() {
            dropped.push(Value::String(unquote(token.raw).to_string()));
            continue;
        }
        let slot = slots[filled];
        filled += 1;
        if filled == slots.len() {
            let remainder = rest[token.start..].trim();
            arguments.insert(slot.to_string(), Value::String(unquote(remainder).to_string()));
            break;
        }
        arguments.insert(slot.to_string(), Value::String(unquote(token.raw).to_string()));
    }
    Some((Invocation::new(tool, arguments), dropped))
}

#[derive(Debug, Clone, PartialEq)]
struct RawArgument {
    key: Option<String>,
    value: Value,
}

/// Named values keep their spelling (the normalizer folds them later);
/// positional values go to unfilled parameters, required ones first.
fn assemble(schema: &ToolSchema, raw: Vec<RawArgument>) -> (Arguments, Vec<Value>) {
    let mut arguments = Arguments::new();
    let mut positional = Vec::new();
    for arg in raw {
        match arg.key {
            Some(key) => {
                arguments.insert(key, arg.value);
            }
            None => positional.push(arg.value),
        }
    }
    if positional.is_empty() {
        return (arguments, Vec::new());
    }

    let supplied = |name: &str| {
        arguments.keys().any(|key| {
            let folded = fold_key(key);
            folded == fold_key(name) || schema.aliases.get(&folded).is_some_and(|c| c == name)
        })
    };
    let open: Vec<String> = schema
        .params
        .iter()
        .filter(|p| p.required)
        .chain(schema.params.iter().filter(|p| !p.required))
        .filter(|p| !supplied(&p.name))
        .map(|p| p.name.clone())
        .collect();

    let mut values = positional.into_iter();
    for name in open {
        match values.next() {
            Some(value) => {
                arguments.insert(name, value);
            }
            None => break,
        }
    }
    (arguments, values.collect())
}

struct Scanner<'a> {
    text: &'a str,
    pos: usize,
}

impl<'a> Scanner<'a> {
    fn new(text: &'a str, pos: usize) -> Self {
        Self { text, pos }
    }

    fn rest(&self) -> &'a str {
        &self.text[self.pos..]
    }

    fn peek(&self) -> Option<char> {
        self.rest().chars().next()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += c.len_utf8();
        Some(c)
    }

    fn skip_whitespace(&mut self) {
        while self.peek().is_some_and(char::is_whitespace) {
            self.bump();
        }
    }

    fn skip_inline_whitespace(&mut self) {
        while self.peek().is_some_and(|c| c == ' ' || c == '\t') {
            self.bump();
        }
    }

    /// Arguments up to the closing `)`. A missing `)` closes at end of text.
    fn call_arguments(&mut self) -> Vec<RawArgument> {
        let mut args = Vec::new();
        loop {
            self.skip_whitespace();
            match self.peek() {
                None => break,
                Some(')') => {
                    self.bump();
                    break;
                }
                Some(',') => {
                    self.bump();
                    continue;
                }
                Some(_) => {}
            }
            let before = self.pos;
            let key = self.key();
            self.skip_inline_whitespace();
            let value = self.value(&[',', ')']);
            args.push(RawArgument { key, value });
            if self.pos == before {
                self.bump();
            }
        }
        args
    }

    /// `identifier =` or `identifier:`; rewinds when neither follows.
    fn key(&mut self) -> Option<String> {
        let start = self.pos;
        while self
            .peek()
            .is_some_and(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        {
            self.bump();
        }
        let ident = &self.text[start..self.pos];
        self.skip_inline_whitespace();
        let rest = self.rest();
        let is_assign = (rest.starts_with('=') && !rest.starts_with("=="))
            || (rest.starts_with(':') && !rest.starts_with("://"));
        if ident.is_empty() || ident.starts_with(|c: char| c.is_ascii_digit()) || !is_assign {
            self.pos = start;
            return None;
        }
        self.bump();
        Some(ident.to_string())
    }

    fn value(&mut self, terminators: &[char]) -> Value {
        let rest = self.rest();
        if rest.starts_with("\"\"\"") || rest.starts_with("'''") {
            return Value::String(self.triple_quoted());
        }
        match self.peek() {
            Some(q @ ('"' | '\'')) => {
                self.bump();
                Value::String(self.quoted(q))
            }
            Some('[') => {
                self.bump();
                self.list()
            }
            _ => self.bare(terminators),
        }
    }

    /// Closes at the matching quote, or at end of line when unbalanced.
    fn quoted(&mut self, quote: char) -> String {
        let mut out = String::new();
        while let Some(c) = self.peek() {
            match c {
                '\n' => break,
                '\\' => {
                    self.bump();
                    match self.peek() {
                        None | Some('\n') => out.push('\\'),
                        Some(next) => {
                            self.bump();
                            push_escape(&mut out, next);
                        }
                    }
                }
                c if c == quote => {
                    self.bump();
                    break;
                }
                c => {
                    out.push(c);
                    self.bump();
                }
            }
        }
        out
    }

    /// An unterminated triple quote runs to end of text.
    fn triple_quoted(&mut self) -> String {
        let delimiter = &self.rest()[..3];
        self.pos += 3;
        let mut out = String::new();
        while let Some(c) = self.peek() {
            if self.rest().starts_with(delimiter) {
                self.pos += 3;
                break;
            }
            self.bump();
            if c == '\\'
                && let Some(next) = self.bump()
            {
                push_escape(&mut out, next);
                continue;
            }
            out.push(c);
        }
        out
    }

    fn list(&mut self) -> Value {
        let mut items = Vec::new();
        loop {
            self.skip_whitespace();
            match self.peek() {
                None => break,
                Some(']') => {
                    self.bump();
                    break;
                }
                Some(',') => {
                    self.bump();
                    continue;
                }
                Some(_) => {}
            }
            let before = self.pos;
            items.push(self.value(&[',', ']', ')']));
            if self.pos == before {
                break;
            }
        }
        Value::Array(items)
    }

    fn bare(&mut self, terminators: &[char]) -> Value {
        let start = self.pos;
        while self
            .peek()
            .is_some_and(|c| c != '\n' && !terminators.contains(&c))
        {
            self.bump();
        }
        scalar(self.text[start..self.pos].trim())
    }
}

fn push_escape(out: &mut String, c: char) {
    match c {
        'n' => out.push('\n'),
        't' => out.push('\t'),
        'r' => out.push('\r'),
        '0' => out.push('\0'),
        '\\' | '"' | '\'' => out.push(c),
        other => {
            out.push('\\');
            out.push(other);
        }
    }
}

/// Unquoted literal: booleans (either case), null/None, numbers, else text.
fn scalar(raw: &str) -> Value {
    match raw.to_ascii_lowercase().as_str() {
        "true" => return Value::Bool(true),
        "false" => return Value::Bool(false),
        "null" | "none" => return Value::Null,
        _ => {}
    }
    if let Ok(int) = raw.parse::<i64>() {
        return Value::Number(int.into());
    }
    if let Ok(float) = raw.parse::<f64>()
        && let Some(number) = Number::from_f64(float)
    {
        return Value::Number(number);
    }
    Value::String(raw.to_string())
}

struct Token<'a> {
    start: usize,
    raw: &'a str,
}

/// Whitespace-separated tokens; quoted runs keep their spaces.
fn tokenize(line: &str) -> Vec<Token<'_>> {
    let mut tokens = Vec::new();
    let mut chars = line.char_indices().peekable();
    while let Some(&(start, c)) = chars.peek() {
        if c.is_whitespace() {
            chars.next();
            continue;
        }
        let mut end = line.len();
        let mut quote: Option<char> = None;
        while let Some(&(idx, c)) = chars.peek() {
            match quote {
                Some(q) if c == q => quote = None,
                Some(_) => {}
                None if c == '"' || c == '\'' => quote = Some(c),
                None if c.is_whitespace() => {
                    end = idx;
                    break;
                }
                None => {}
            }
            chars.next();
        }
        tokens.push(Token {
            start,
            raw: &line[start..end],
        });
    }
    tokens
}

fn named_token(raw: &str) -> Option<(&str, &str)> {
    let (key, value) = raw.split_once('=')?;
    let valid_key = !key.is_empty()
        && key.starts_with(|c: char| c.is_ascii_alphabetic() || c == '_')
        && key.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    valid_key.then_some((key, value))
}

fn unquote(raw: &str) -> &str {
    for q in ['"', '\''] {
        if raw.len() >= 2
            && raw.starts_with(q)
            && raw.ends_with(q)
            && !raw[1..raw.len() - 1].contains(q)
        {
            return &raw[1..raw.len() - 1];
        }
    }
    raw
}
