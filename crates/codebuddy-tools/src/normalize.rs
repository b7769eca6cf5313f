use codebuddy_core::{Arguments, ParamType, ToolSchema, fold_key};
use serde_json::{Number, Value};

/// Generic aliases shared by every tool, keyed by folded name. The first
/// candidate the tool actually declares wins, so `path` lands on `filepath`
/// for file tools and on `folderpath` for folder tools.
const SHARED_ALIASES: &[(&str, &[&str])] = &[
    ("path", &["filepath", "folderpath", "directory"]),
    ("file", &["filepath", "files"]),
    ("filename", &["filepath"]),
    ("fname", &["filepath"]),
    ("script", &["filepath"]),
    ("scriptpath", &["filepath"]),
    ("folder", &["folderpath", "directory"]),
    ("foldername", &["folderpath", "directory"]),
    ("directory", &["folderpath"]),
    ("directoryname", &["folderpath", "directory"]),
    ("directorypath", &["folderpath", "directory"]),
    ("dir", &["directory", "folderpath"]),
    ("dirpath", &["directory", "folderpath"]),
    ("cmd", &["command"]),
    ("shellcommand", &["command"]),
    ("code", &["content"]),
    ("text", &["content"]),
    ("body", &["content"]),
    ("data", &["content"]),
    ("filecontent", &["content"]),
    ("contents", &["content"]),
    ("msg", &["message"]),
    ("commitmessage", &["message"]),
    ("limit", &["count"]),
    ("n", &["count"]),
    ("num", &["count"]),
    ("maxcount", &["count"]),
    ("branchname", &["name", "branch"]),
    ("paths", &["files"]),
];

#[derive(Debug, Clone, PartialEq)]
pub struct Normalized {
    pub arguments: Arguments,
    pub warnings: Vec<String>,
}

/// Maps raw keys onto the schema's canonical names and coerces values to
/// the declared types. Unknown keys are dropped with a warning. Applying it
/// to its own output is a no-op.
pub fn normalize_arguments(schema: &ToolSchema, raw: &Arguments) -> Normalized {
    let mut arguments = Arguments::new();
    let mut warnings = Vec::new();
    let mut aliased = Vec::new();

    // Exact (folded) names first so they always beat an alias for the same slot.
    for (key, value) in raw {
        let folded = fold_key(key);
        match schema.param_by_folded(&folded) {
            Some(spec) => {
                arguments.insert(spec.name.clone(), coerce(value, spec.kind));
            }
            None => aliased.push((key, folded, value)),
        }
    }

    for (key, folded, value) in aliased {
        let Some(canonical) = resolve_alias(schema, &folded) else {
            warnings.push(format!("dropped unknown parameter '{key}'"));
            continue;
        };
        if arguments.contains_key(&canonical) {
            warnings.push(format!("ignored '{key}': '{canonical}' is already set"));
            continue;
        }
        let kind = schema
            .param(&canonical)
            .map(|spec| spec.kind)
            .unwrap_or(ParamType::String);
        arguments.insert(canonical, coerce(value, kind));
    }

    Normalized {
        arguments,
        warnings,
    }
}

fn resolve_alias(schema: &ToolSchema, folded: &str) -> Option<String> {
    if let Some(canonical) = schema.aliases.get(folded)
        && schema.param(canonical).is_some()
    {
        return Some(canonical.clone());
    }
    SHARED_ALIASES
        .iter()
        .find(|(alias, _)| *alias == folded)
        .and_then(|(_, candidates)| candidates.iter().find(|c| schema.param(c).is_some()))
        .map(|candidate| candidate.to_string())
}

fn coerce(value: &Value, kind: ParamType) -> Value {
    match (kind, value) {
        (ParamType::String, Value::String(_) | Value::Null) => value.clone(),
        (ParamType::String, Value::Array(items)) => Value::String(
            items
                .iter()
                .map(|item| match item {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                })
                .collect::<Vec<_>>()
                .join(" "),
        ),
        (ParamType::String, other) => Value::String(other.to_string()),
        (ParamType::Integer, Value::String(s)) => s
            .trim()
            .parse::<i64>()
            .map(Value::from)
            .unwrap_or_else(|_| value.clone()),
        (ParamType::Integer, Value::Number(n)) => match n.as_f64() {
            Some(f) if n.as_i64().is_none() && f.fract() == 0.0 => Value::from(f as i64),
            _ => value.clone(),
        },
        (ParamType::Number, Value::String(s)) => s
            .trim()
            .parse::<f64>()
            .ok()
            .and_then(Number::from_f64)
            .map(Value::Number)
            .unwrap_or_else(|| value.clone()),
        (ParamType::Boolean, Value::String(s)) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "yes" | "1" => Value::Bool(true),
            "false" | "no" | "0" => Value::Bool(false),
            _ => value.clone(),
        },
        _ => value.clone(),
    }
}
