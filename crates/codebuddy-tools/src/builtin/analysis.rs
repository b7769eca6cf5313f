//! Static checks over Python sources. Blocks are found by indentation, so
//! none of these need an interpreter; `check_syntax` covers parse errors.

use super::str_arg;
use crate::ToolContext;
use anyhow::{Result, bail};
use codebuddy_core::Arguments;
use regex::Regex;
use std::fs;
use std::path::Path;
use std::sync::LazyLock;

const MAX_LINE_CHARS: usize = 100;
const MAX_FUNCTION_LINES: usize = 50;
const MAX_FUNCTION_ARGS: usize = 5;

static DEF_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\s*)(?:async\s+)?def\s+([A-Za-z_][A-Za-z0-9_]*)\s*\(").expect("valid def regex")
});
static CLASS_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*class\s+[A-Za-z_]").expect("valid class regex"));
static BRANCH_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*(?:if|elif|while|for|except|with|async\s+for|async\s+with)\b")
        .expect("valid branch regex")
});
static BOOL_OP: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(?:and|or)\b").expect("valid boolean regex"));
static BARE_EXCEPT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*except\s*:").expect("valid except regex"));
static TODO_COMMENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)#.*\b(?:todo|fixme|hack|xxx)\b").expect("valid todo regex"));
static PRINT_CALL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\bprint\s*\(").expect("valid print regex"));
static HARDCODED_SECRET: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)\b\w*(?:password|secret|key|token)\s*=\s*["'][^"']+["']"#)
        .expect("valid secret regex")
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Severity {
    Error,
    Warning,
    Info,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Finding {
    line: usize,
    severity: Severity,
    message: String,
}

impl Finding {
    fn new(line: usize, severity: Severity, message: impl Into<String>) -> Self {
        Self {
            line,
            severity,
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct PyFunction {
    name: String,
    line: usize,
    length: usize,
    args: usize,
    complexity: usize,
}

fn load_python(ctx: &ToolContext, args: &Arguments) -> Result<(String, String)> {
    let path = str_arg(args, "filepath")?;
    let is_python = Path::new(path)
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("py"));
    if !is_python {
        bail!("not a Python file: {path}");
    }
    let full = ctx.resolve(path);
    if !full.is_file() {
        bail!("file not found: {path}");
    }
    Ok((path.to_string(), fs::read_to_string(full)?))
}

/// The code part of a line: string literal bodies blanked, comment dropped.
fn code_part(line: &str) -> String {
    let mut out = String::with_capacity(line.len());
    let mut quote: Option<char> = None;
    let mut escaped = false;
    for ch in line.chars() {
        match quote {
            Some(q) => {
                if escaped {
                    escaped = false;
                } else if ch == '\\' {
                    escaped = true;
                } else if ch == q {
                    quote = None;
                    out.push(ch);
                }
            }
            None => match ch {
                '#' => break,
                '"' | '\'' => {
                    quote = Some(ch);
                    out.push(ch);
                }
                _ => out.push(ch),
            },
        }
    }
    out
}

fn indent_of(line: &str) -> usize {
    line.len() - line.trim_start().len()
}

fn is_code_line(line: &str) -> bool {
    let trimmed = line.trim_start();
    !trimmed.is_empty() && !trimmed.starts_with('#')
}

fn decision_points(line: &str) -> usize {
    let code = code_part(line);
    usize::from(BRANCH_LINE.is_match(&code)) + BOOL_OP.find_iter(&code).count()
}

/// Positional parameters in a signature. `*args`, `**kwargs` and keyword-only
/// parameters are not counted.
fn count_params(signature: &str) -> usize {
    let mut depth = 0usize;
    let mut current = String::new();
    let mut params = Vec::new();
    for ch in signature.chars() {
        match ch {
            '(' | '[' | '{' => {
                depth += 1;
                current.push(ch);
            }
            ')' | ']' | '}' => {
                depth = depth.saturating_sub(1);
                current.push(ch);
            }
            ',' if depth == 0 => params.push(std::mem::take(&mut current)),
            _ => current.push(ch),
        }
    }
    params.push(current);
    params
        .iter()
        .map(|p| p.trim())
        .filter(|p| !p.is_empty())
        .take_while(|p| !p.starts_with('*'))
        .filter(|p| *p != "/")
        .count()
}

/// Text between the opening parenthesis on `lines[start]` and its match,
/// plus the index of the line holding the closing parenthesis.
fn signature(lines: &[&str], start: usize, open: usize) -> (String, usize) {
    let mut depth = 0usize;
    let mut text = String::new();
    for (idx, line) in lines.iter().enumerate().skip(start) {
        let code = code_part(line);
        let from = if idx == start { open } else { 0 };
        for ch in code.chars().skip(from) {
            match ch {
                '(' => {
                    depth += 1;
                    if depth == 1 {
                        continue;
                    }
                }
                ')' => {
                    depth = depth.saturating_sub(1);
                    if depth == 0 {
                        return (text, idx);
                    }
                }
                _ => {}
            }
            text.push(ch);
        }
        text.push(' ');
    }
    (text, lines.len().saturating_sub(1))
}

fn functions(source: &str) -> Vec<PyFunction> {
    let lines: Vec<&str> = source.lines().collect();
    let mut found = Vec::new();
    for (idx, line) in lines.iter().enumerate() {
        let Some(caps) = DEF_LINE.captures(line) else {
            continue;
        };
        let indent = caps[1].len();
        let open = line[..caps.get(0).map_or(0, |m| m.end())].chars().count() - 1;
        let (params, sig_end) = signature(&lines, idx, open);

        let mut end = sig_end;
        for (body_idx, body) in lines.iter().enumerate().skip(sig_end + 1) {
            if !is_code_line(body) {
                continue;
            }
            if indent_of(body) <= indent {
                break;
            }
            end = body_idx;
        }
        let complexity = 1 + lines[idx..=end].iter().map(|l| decision_points(l)).sum::<usize>();
        found.push(PyFunction {
            name: caps[2].to_string(),
            line: idx + 1,
            length: end - idx,
            args: count_params(&params),
            complexity,
        });
    }
    found
}

fn lint_source(source: &str) -> Vec<Finding> {
    let mut findings = Vec::new();
    for func in functions(source) {
        if func.length > MAX_FUNCTION_LINES {
            findings.push(Finding::new(
                func.line,
                Severity::Warning,
                format!(
                    "function '{}' is {} lines long (consider breaking it down)",
                    func.name, func.length
                ),
            ));
        }
        if func.args > MAX_FUNCTION_ARGS {
            findings.push(Finding::new(
                func.line,
                Severity::Warning,
                format!("function '{}' takes {} arguments (consider fewer)", func.name, func.args),
            ));
        }
    }
    for (idx, line) in source.lines().enumerate() {
        let number = idx + 1;
        let code = code_part(line);
        let width = line.chars().count();
        if width > MAX_LINE_CHARS {
            findings.push(Finding::new(
                number,
                Severity::Info,
                format!("line too long ({width} characters, max {MAX_LINE_CHARS})"),
            ));
        }
        if BARE_EXCEPT.is_match(&code) {
            findings.push(Finding::new(
                number,
                Severity::Warning,
                "bare 'except:' clause (name the exception type)",
            ));
        }
        if TODO_COMMENT.is_match(line) {
            findings.push(Finding::new(number, Severity::Info, "TODO/FIXME comment"));
        }
        if PRINT_CALL.is_match(&code) && !code.trim_start().starts_with("def ") {
            findings.push(Finding::new(
                number,
                Severity::Info,
                "print call (consider logging)",
            ));
        }
        if HARDCODED_SECRET.is_match(line) {
            findings.push(Finding::new(
                number,
                Severity::Error,
                "possible hardcoded secret",
            ));
        }
    }
    findings.sort_by_key(|f| (f.severity, f.line));
    findings
}

pub(super) fn python_lint(ctx: &ToolContext, args: &Arguments) -> Result<String> {
    let (path, source) = load_python(ctx, args)?;
    let findings = lint_source(&source);
    if findings.is_empty() {
        return Ok(format!("No lint issues in {path}"));
    }
    let count = |severity: Severity| findings.iter().filter(|f| f.severity == severity).count();
    let mut out = format!("Lint results for {path}\n");
    for (severity, label) in [
        (Severity::Error, "errors"),
        (Severity::Warning, "warnings"),
        (Severity::Info, "info"),
    ] {
        if count(severity) == 0 {
            continue;
        }
        out.push_str(&format!("{label}:\n"));
        for finding in findings.iter().filter(|f| f.severity == severity) {
            out.push_str(&format!("  line {}: {}\n", finding.line, finding.message));
        }
    }
    out.push_str(&format!(
        "summary: {} errors, {} warnings, {} info ({} total)",
        count(Severity::Error),
        count(Severity::Warning),
        count(Severity::Info),
        findings.len()
    ));
    Ok(out)
}

#[derive(Debug, Clone, PartialEq)]
struct Metrics {
    total_lines: usize,
    code_lines: usize,
    comment_lines: usize,
    blank_lines: usize,
    classes: usize,
    complexity: usize,
    functions: Vec<PyFunction>,
}

impl Metrics {
    fn measure(source: &str) -> Self {
        let lines: Vec<&str> = source.lines().collect();
        let blank_lines = lines.iter().filter(|l| l.trim().is_empty()).count();
        let comment_lines = lines.iter().filter(|l| l.trim_start().starts_with('#')).count();
        Self {
            total_lines: lines.len(),
            code_lines: lines.len() - blank_lines - comment_lines,
            comment_lines,
            blank_lines,
            classes: lines.iter().filter(|l| CLASS_LINE.is_match(l)).count(),
            complexity: 1 + lines.iter().map(|l| decision_points(l)).sum::<usize>(),
            functions: functions(source),
        }
    }

    fn longest_function(&self) -> usize {
        self.functions.iter().map(|f| f.length).max().unwrap_or(0)
    }

    fn average_function(&self) -> f64 {
        if self.functions.is_empty() {
            return 0.0;
        }
        self.functions.iter().map(|f| f.length).sum::<usize>() as f64 / self.functions.len() as f64
    }

    fn suggestions(&self) -> Vec<(u32, &'static str)> {
        let mut out = Vec::new();
        if self.complexity > 20 {
            out.push((20, "break down complex branching"));
        }
        if self.longest_function() > MAX_FUNCTION_LINES {
            out.push((15, "split long functions"));
        }
        if self.average_function() > 30.0 {
            out.push((10, "functions are generally too long"));
        }
        out
    }

    fn score(&self) -> u32 {
        100 - self.suggestions().iter().map(|(penalty, _)| penalty).sum::<u32>()
    }
}

fn complexity_label(complexity: usize) -> &'static str {
    match complexity {
        0..=5 => "low",
        6..=10 => "moderate",
        _ => "high",
    }
}

pub(super) fn analyze_complexity(ctx: &ToolContext, args: &Arguments) -> Result<String> {
    let (path, source) = load_python(ctx, args)?;
    let metrics = Metrics::measure(&source);
    let mut out = format!("Complexity of {path}\n");
    out.push_str(&format!(
        "  lines: {} total, {} code, {} comment, {} blank\n",
        metrics.total_lines, metrics.code_lines, metrics.comment_lines, metrics.blank_lines
    ));
    out.push_str(&format!(
        "  functions: {}, classes: {}\n",
        metrics.functions.len(),
        metrics.classes
    ));
    out.push_str(&format!("  cyclomatic complexity: {}\n", metrics.complexity));
    if !metrics.functions.is_empty() {
        out.push_str(&format!(
            "  function length: {:.1} average, {} longest\n",
            metrics.average_function(),
            metrics.longest_function()
        ));
        out.push_str("functions:\n");
        for func in &metrics.functions {
            out.push_str(&format!(
                "  {} (line {}): {} lines, complexity {} ({})\n",
                func.name,
                func.line,
                func.length,
                func.complexity,
                complexity_label(func.complexity)
            ));
        }
    }
    out.push_str(&format!("quality score: {}/100", metrics.score()));
    for (_, hint) in metrics.suggestions() {
        out.push_str(&format!("\n  - {hint}"));
    }
    Ok(out)
}

struct SecurityPattern {
    regex: Regex,
    severity: Severity,
    message: &'static str,
}

static SECURITY_PATTERNS: LazyLock<Vec<SecurityPattern>> = LazyLock::new(|| {
    [
        (r#"execute\s*\(\s*["'].*%.*["']"#, Severity::Error, "possible SQL injection (string formatting in query)"),
        (r"cursor\.execute\s*\(.*\+", Severity::Error, "SQL query built by concatenation"),
        (r"os\.system\s*\(.*\+", Severity::Error, "shell command built by concatenation"),
        (r"subprocess\.(?:call|run|Popen)\s*\(.*shell\s*=\s*True", Severity::Error, "subprocess with shell=True"),
        (r"\beval\s*\(", Severity::Error, "eval() executes arbitrary code"),
        (r"\bexec\s*\(", Severity::Error, "exec() executes arbitrary code"),
        (r"pickle\.loads?\s*\(", Severity::Warning, "pickle deserialization can execute code"),
        (r#"\b\w*(?:password|secret|api_key|token)\s*=\s*["'][^"']{8,}["']"#, Severity::Warning, "hardcoded secret"),
        (r"^\s*import\s+random\b", Severity::Warning, "random is not cryptographically secure"),
        (r#"http://[^"'\s]+"#, Severity::Warning, "plain HTTP URL"),
        (r"\bdebug\s*=\s*True", Severity::Warning, "debug mode enabled"),
    ]
    .into_iter()
    .map(|(pattern, severity, message)| SecurityPattern {
        regex: Regex::new(&format!("(?i){pattern}")).expect("valid security pattern"),
        severity,
        message,
    })
    .collect()
});

pub(super) fn security_scan(ctx: &ToolContext, args: &Arguments) -> Result<String> {
    let (path, source) = load_python(ctx, args)?;
    let mut hits = Vec::new();
    for (idx, line) in source.lines().enumerate() {
        if line.trim_start().starts_with('#') {
            continue;
        }
        for pattern in SECURITY_PATTERNS.iter() {
            if pattern.regex.is_match(line) {
                hits.push(Finding::new(idx + 1, pattern.severity, pattern.message));
            }
        }
    }
    if hits.is_empty() {
        return Ok(format!("No security findings in {path}"));
    }
    hits.sort_by_key(|f| (f.severity, f.line));
    let high = hits.iter().filter(|f| f.severity == Severity::Error).count();
    let mut out = format!(
        "Security scan of {path}: {} findings ({high} high, {} medium)\n",
        hits.len(),
        hits.len() - high
    );
    for hit in &hits {
        let level = if hit.severity == Severity::Error { "high" } else { "medium" };
        out.push_str(&format!("  line {} [{level}]: {}\n", hit.line, hit.message));
    }
    Ok(out.trim_end().to_string())
}
