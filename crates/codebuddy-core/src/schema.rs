use crate::Arguments;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Declared type of a tool parameter. Drives coercion in the normalizer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamType {
    String,
    Integer,
    Number,
    Boolean,
}

impl std::fmt::Display for ParamType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::String => write!(f, "string"),
            Self::Integer => write!(f, "integer"),
            Self::Number => write!(f, "number"),
            Self::Boolean => write!(f, "boolean"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParamSpec {
    pub name: String,
    pub kind: ParamType,
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
    pub description: String,
}

/// How a successful call affects the path named by one of its parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TouchKind {
    Written,
    Deleted,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Touch {
    pub param: String,
    pub kind: TouchKind,
}

/// Explicit parameter contract for a registered tool.
///
/// Parameters keep declaration order; positional values found by the
/// extractor are mapped onto the required parameters in that order.
/// Aliases are stored folded (see [`fold_key`]).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolSchema {
    pub params: Vec<ParamSpec>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub aliases: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub touches: Option<Touch>,
}

impl ToolSchema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn required(mut self, name: &str, kind: ParamType, description: &str) -> Self {
        self.params.push(ParamSpec {
            name: name.to_string(),
            kind,
            required: true,
            default: None,
            description: description.to_string(),
        });
        self
    }

    pub fn optional(
        mut self,
        name: &str,
        kind: ParamType,
        default: Option<Value>,
        description: &str,
    ) -> Self {
        self.params.push(ParamSpec {
            name: name.to_string(),
            kind,
            required: false,
            default,
            description: description.to_string(),
        });
        self
    }

    pub fn alias(mut self, alias: &str, canonical: &str) -> Self {
        self.aliases.insert(fold_key(alias), canonical.to_string());
        self
    }

    pub fn touches(mut self, param: &str, kind: TouchKind) -> Self {
        self.touches = Some(Touch {
            param: param.to_string(),
            kind,
        });
        self
    }

    pub fn param(&self, name: &str) -> Option<&ParamSpec> {
        self.params.iter().find(|p| p.name == name)
    }

    /// Finds the canonical parameter whose folded name equals `folded`.
    pub fn param_by_folded(&self, folded: &str) -> Option<&ParamSpec> {
        self.params.iter().find(|p| fold_key(&p.name) == folded)
    }

    pub fn required_names(&self) -> Vec<&str> {
        self.params
            .iter()
            .filter(|p| p.required)
            .map(|p| p.name.as_str())
            .collect()
    }

    /// Fills absent optional parameters that carry a default.
    pub fn apply_defaults(&self, args: &mut Arguments) {
        for spec in &self.params {
            if spec.required || args.contains_key(&spec.name) {
                continue;
            }
            if let Some(default) = &spec.default {
                args.insert(spec.name.clone(), default.clone());
            }
        }
    }

    /// Required parameters that are absent, null, or blank strings.
    pub fn missing_required(&self, args: &Arguments) -> Vec<String> {
        self.params
            .iter()
            .filter(|spec| spec.required)
            .filter(|spec| match args.get(&spec.name) {
                None | Some(Value::Null) => true,
                Some(Value::String(s)) => s.trim().is_empty(),
                Some(_) => false,
            })
            .map(|spec| spec.name.clone())
            .collect()
    }

    /// `name(param, param?=default)` rendering used in the model prompt.
    pub fn signature(&self, tool_name: &str) -> String {
        let params = self
            .params
            .iter()
            .map(|p| match (&p.required, &p.default) {
                (true, _) => p.name.clone(),
                (false, Some(default)) => format!("{}?={}", p.name, default),
                (false, None) => format!("{}?", p.name),
            })
            .collect::<Vec<_>>()
            .join(", ");
        format!("{tool_name}({params})")
    }
}

/// Case- and separator-insensitive form of a parameter key:
/// `filePath`, `FILE_PATH` and `file-path` all fold to `filepath`.
pub fn fold_key(key: &str) -> String {
    key.chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_lowercase())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn commit_schema() -> ToolSchema {
        ToolSchema::new()
            .required("message", ParamType::String, "commit message")
            .optional("all", ParamType::Boolean, Some(json!(false)), "stage tracked files")
            .alias("msg", "message")
    }

    #[test]
    fn fold_key_ignores_case_and_separators() {
        assert_eq!(fold_key("filePath"), "filepath");
        assert_eq!(fold_key("FILE_PATH"), "filepath");
        assert_eq!(fold_key("file-path"), "filepath");
        assert_eq!(fold_key(" folder path "), "folderpath");
    }

    #[test]
    fn missing_required_treats_blank_strings_as_absent() {
        let schema = commit_schema();
        let mut args = Arguments::new();
        assert_eq!(schema.missing_required(&args), vec!["message".to_string()]);
        args.insert("message".to_string(), json!("   "));
        assert_eq!(schema.missing_required(&args), vec!["message".to_string()]);
        args.insert("message".to_string(), json!("add parser"));
        assert!(schema.missing_required(&args).is_empty());
    }

    #[test]
    fn apply_defaults_only_fills_absent_optionals() {
        let schema = commit_schema();
        let mut args = Arguments::new();
        args.insert("message".to_string(), json!("x"));
        schema.apply_defaults(&mut args);
        assert_eq!(args.get("all"), Some(&json!(false)));

        args.insert("all".to_string(), json!(true));
        schema.apply_defaults(&mut args);
        assert_eq!(args.get("all"), Some(&json!(true)));
    }

    #[test]
    fn signature_marks_optional_parameters() {
        assert_eq!(
            commit_schema().signature("git_commit"),
            "git_commit(message, all?=false)"
        );
    }
}
