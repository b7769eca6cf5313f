use regex::Regex;
use serde_json::Value;
use std::path::{Component, Path};

mod approval;
mod risk;

pub use approval::{
    ApprovalGate, ApprovalRequest, ApprovalState, ConsolePrompter, DenyAllPrompter, Prompter,
    StdioPrompter, interpret_response,
};
pub use risk::{Environment, FsEnvironment, RiskClassifier, RiskRule};

#[derive(thiserror::Error, Debug)]
pub enum PolicyError {
    #[error("path escapes the workspace")]
    PathTraversal,
    #[error("secret path denied")]
    SecretPath,
    #[error("invalid command rule `{pattern}`: {message}")]
    InvalidCommandRule { pattern: String, message: String },
}

/// Lexical path checks shared by the risk rules. Nothing here touches disk.
pub fn check_path(path: &str, secret_paths: &[String]) -> Result<(), PolicyError> {
    let candidate = Path::new(path);
    if candidate.is_absolute() || escapes_root(candidate) {
        return Err(PolicyError::PathTraversal);
    }
    let hits_secret = candidate.components().any(|component| match component {
        Component::Normal(part) => {
            let part = part.to_string_lossy();
            secret_paths.iter().any(|secret| part.eq_ignore_ascii_case(secret))
        }
        _ => false,
    });
    if hits_secret {
        return Err(PolicyError::SecretPath);
    }
    Ok(())
}

fn escapes_root(path: &Path) -> bool {
    let mut depth: i64 = 0;
    for component in path.components() {
        match component {
            Component::ParentDir => {
                depth -= 1;
                if depth < 0 {
                    return true;
                }
            }
            Component::Normal(_) => depth += 1,
            _ => {}
        }
    }
    false
}

/// Masks credential-looking values before anything leaves the process
/// (audit log, telemetry).
#[derive(Debug, Clone)]
pub struct Redactor {
    secret_regex: Regex,
    secret_key: Regex,
}

impl Redactor {
    pub fn new() -> Self {
        Self {
            secret_regex: Regex::new(r"(?i)(api[_-]?key|secret|token|password)\s*[:=]\s*[^\s]+")
                .expect("valid regex"),
            secret_key: Regex::new(r"(?i)^(api[_-]?key|secret|token|password|passwd)$")
                .expect("valid regex"),
        }
    }

    pub fn redact(&self, text: &str) -> String {
        self.secret_regex
            .replace_all(text, "$1=REDACTED")
            .to_string()
    }

    pub fn redact_value(&self, value: &Value) -> Value {
        match value {
            Value::String(s) => Value::String(self.redact(s)),
            Value::Array(items) => Value::Array(items.iter().map(|v| self.redact_value(v)).collect()),
            Value::Object(map) => Value::Object(
                map.iter()
                    .map(|(k, v)| {
                        let v = if self.secret_key.is_match(k) {
                            Value::String("REDACTED".to_string())
                        } else {
                            self.redact_value(v)
                        };
                        (k.clone(), v)
                    })
                    .collect(),
            ),
            other => other.clone(),
        }
    }
}

impl Default for Redactor {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn secrets() -> Vec<String> {
        vec![".ssh".to_string(), ".aws".to_string()]
    }

    #[test]
    fn denies_traversal_and_secret_dirs() {
        assert!(matches!(
            check_path("../outside", &secrets()),
            Err(PolicyError::PathTraversal)
        ));
        assert!(matches!(
            check_path("/etc/passwd", &secrets()),
            Err(PolicyError::PathTraversal)
        ));
        assert!(matches!(
            check_path(".ssh/id_rsa", &secrets()),
            Err(PolicyError::SecretPath)
        ));
        assert!(check_path("src/../notes.txt", &secrets()).is_ok());
        assert!(check_path("docs/aws-notes.md", &secrets()).is_ok());
    }

    #[test]
    fn redacts_common_secret_patterns() {
        let redactor = Redactor::new();
        let out = redactor.redact("api_key=abcd1234 token: xyz password = secret");
        assert!(out.contains("api_key=REDACTED"));
        assert!(out.contains("token=REDACTED"));
        assert!(out.contains("password=REDACTED"));
    }

    #[test]
    fn redacts_nested_json_values_and_secret_keys() {
        let redactor = Redactor::new();
        let out = redactor.redact_value(&json!({
            "filepath": ".env",
            "content": "API_KEY=sk-123\nDEBUG=1",
            "token": "abc",
            "nested": [{"password": "hunter2"}],
        }));
        assert_eq!(out["filepath"], ".env");
        assert_eq!(out["content"], "API_KEY=REDACTED\nDEBUG=1");
        assert_eq!(out["token"], "REDACTED");
        assert_eq!(out["nested"][0]["password"], "REDACTED");
    }
}
