use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use uuid::Uuid;

mod schema;

pub use schema::{ParamSpec, ParamType, ToolSchema, Touch, TouchKind, fold_key};

pub type Result<T> = anyhow::Result<T>;

/// Canonical argument mapping carried by an [`Invocation`].
pub type Arguments = Map<String, Value>;

pub const CANCELLED_BY_USER: &str = "cancelled by user";

pub fn runtime_dir(workspace: &Path) -> PathBuf {
    workspace.join(".codebuddy")
}

/// Danger level of a single invocation. Ordering is meaningful:
/// `Safe < Low < Medium < High < Critical`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskTier {
    Safe,
    Low,
    Medium,
    High,
    Critical,
}

impl RiskTier {
    pub const ALL: &'static [RiskTier] = &[
        RiskTier::Safe,
        RiskTier::Low,
        RiskTier::Medium,
        RiskTier::High,
        RiskTier::Critical,
    ];

    /// Every tier above `Safe` blocks on user consent.
    pub fn requires_confirmation(self) -> bool {
        self != RiskTier::Safe
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Safe => "SAFE",
            Self::Low => "LOW",
            Self::Medium => "MEDIUM",
            Self::High => "HIGH",
            Self::Critical => "CRITICAL",
        }
    }
}

impl std::fmt::Display for RiskTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

impl std::str::FromStr for RiskTier {
    type Err = anyhow::Error;
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "safe" => Ok(Self::Safe),
            "low" => Ok(Self::Low),
            "medium" => Ok(Self::Medium),
            "high" => Ok(Self::High),
            "critical" => Ok(Self::Critical),
            other => Err(anyhow::anyhow!(
                "invalid risk tier '{}' (expected safe|low|medium|high|critical)",
                other
            )),
        }
    }
}

/// A structured tool call. Produced by extraction, rewritten in place by
/// normalization and reference resolution, consumed once by dispatch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Invocation {
    pub tool_name: String,
    pub arguments: Arguments,
}

impl Invocation {
    pub fn new(tool_name: impl Into<String>, arguments: Arguments) -> Self {
        Self {
            tool_name: tool_name.into(),
            arguments,
        }
    }

    pub fn str_arg(&self, key: &str) -> Option<&str> {
        self.arguments.get(key).and_then(Value::as_str)
    }

    pub fn bool_arg(&self, key: &str) -> Option<bool> {
        self.arguments.get(key).and_then(Value::as_bool)
    }

    pub fn int_arg(&self, key: &str) -> Option<i64> {
        self.arguments.get(key).and_then(Value::as_i64)
    }

    /// One-line `tool(key='value', ...)` form for history and prompts.
    /// Long string values are shortened.
    pub fn render(&self) -> String {
        let args = self
            .arguments
            .iter()
            .map(|(k, v)| match v {
                Value::String(s) => format!("{k}='{}'", shorten(s, 60)),
                other => format!("{k}={other}"),
            })
            .collect::<Vec<_>>()
            .join(", ");
        format!("{}({args})", self.tool_name)
    }
}

fn shorten(value: &str, max_chars: usize) -> String {
    let single_line = value.replace('\n', "\\n");
    if single_line.chars().count() <= max_chars {
        return single_line;
    }
    let mut out: String = single_line.chars().take(max_chars).collect();
    out.push_str("...");
    out
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RiskAssessment {
    pub tier: RiskTier,
    pub reasons: Vec<String>,
    pub requires_confirmation: bool,
    /// Set when no rule covered the tool and the fail-closed default applied.
    #[serde(default)]
    pub defaulted: bool,
}

impl RiskAssessment {
    pub fn new(tier: RiskTier, reasons: Vec<String>) -> Self {
        Self {
            tier,
            reasons,
            requires_confirmation: tier.requires_confirmation(),
            defaulted: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalDecision {
    pub approved: bool,
    pub tier: RiskTier,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolOutcome {
    pub success: bool,
    pub message: String,
    #[serde(default)]
    pub touched_paths: BTreeSet<String>,
}

impl ToolOutcome {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
            touched_paths: BTreeSet::new(),
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            touched_paths: BTreeSet::new(),
        }
    }

    pub fn cancelled() -> Self {
        Self::failure(CANCELLED_BY_USER)
    }

    pub fn is_cancelled(&self) -> bool {
        !self.success && self.message == CANCELLED_BY_USER
    }
}

/// One processed user request. Immutable once appended to memory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub turn_id: Uuid,
    pub user_input: String,
    pub invocation: Option<Invocation>,
    pub assessment: Option<RiskAssessment>,
    pub approval: Option<ApprovalDecision>,
    pub outcome: Option<ToolOutcome>,
    /// Text shown to the user for this turn.
    pub response: String,
    pub timestamp: DateTime<Utc>,
}

impl ConversationTurn {
    pub fn new(user_input: impl Into<String>) -> Self {
        Self {
            turn_id: Uuid::now_v7(),
            user_input: user_input.into(),
            invocation: None,
            assessment: None,
            approval: None,
            outcome: None,
            response: String::new(),
            timestamp: Utc::now(),
        }
    }

    pub fn succeeded(&self) -> bool {
        self.outcome.as_ref().is_some_and(|o| o.success)
    }

    pub fn audit_record(&self) -> AuditRecord {
        AuditRecord {
            timestamp: self.timestamp,
            turn_id: self.turn_id,
            user_input: self.user_input.clone(),
            tool_name: self.invocation.as_ref().map(|i| i.tool_name.clone()),
            arguments: self
                .invocation
                .as_ref()
                .map(|i| Value::Object(i.arguments.clone())),
            tier: self.assessment.as_ref().map(|a| a.tier),
            reasons: self
                .assessment
                .as_ref()
                .map(|a| a.reasons.clone())
                .unwrap_or_default(),
            approved: self.approval.map(|a| a.approved),
            success: self.outcome.as_ref().map(|o| o.success),
            message: self
                .outcome
                .as_ref()
                .map(|o| o.message.clone())
                .unwrap_or_else(|| self.response.clone()),
        }
    }
}

/// Flat, serializable view of a turn for the audit trail.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub timestamp: DateTime<Utc>,
    pub turn_id: Uuid,
    pub user_input: String,
    pub tool_name: Option<String>,
    pub arguments: Option<Value>,
    pub tier: Option<RiskTier>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub reasons: Vec<String>,
    pub approved: Option<bool>,
    pub success: Option<bool>,
    pub message: String,
}

/// Failures that stop a turn before (or at) dispatch.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PipelineError {
    #[error("{tool} is missing required parameter(s): {}", missing.join(", "))]
    MissingParameter { tool: String, missing: Vec<String> },
    #[error("could not work out which file \"{phrase}\" refers to ({argument}): {detail}")]
    AmbiguousReference {
        argument: String,
        phrase: String,
        detail: String,
    },
    #[error("unknown tool: {0}")]
    UnknownTool(String),
    #[error("{tool} failed: {message}")]
    ToolExecution { tool: String, message: String },
}

impl PipelineError {
    /// Question put back to the user when the turn cannot proceed.
    pub fn clarification(&self) -> String {
        match self {
            Self::MissingParameter { tool, missing } => format!(
                "I need more details to run {tool}: please tell me the {}.",
                missing.join(" and ")
            ),
            Self::AmbiguousReference { phrase, .. } => format!(
                "Which file do you mean by \"{phrase}\"? I have no matching recent file in this session."
            ),
            other => other.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub llm: LlmConfig,
    pub policy: PolicyConfig,
    pub agent: AgentConfig,
    pub telemetry: TelemetryConfig,
}

impl AppConfig {
    pub fn user_settings_path() -> Option<PathBuf> {
        let home = std::env::var("HOME")
            .ok()
            .or_else(|| std::env::var("USERPROFILE").ok())?;
        Some(Path::new(&home).join(".codebuddy/settings.json"))
    }

    pub fn project_settings_path(workspace: &Path) -> PathBuf {
        runtime_dir(workspace).join("settings.json")
    }

    pub fn project_local_settings_path(workspace: &Path) -> PathBuf {
        runtime_dir(workspace).join("settings.local.json")
    }

    /// Defaults, then user settings, then project settings, then local
    /// overrides. Later layers win key by key.
    pub fn load(workspace: &Path) -> Result<Self> {
        let mut merged = serde_json::to_value(Self::default())?;

        let mut paths = Vec::new();
        if let Some(user) = Self::user_settings_path() {
            paths.push(user);
        }
        paths.push(Self::project_settings_path(workspace));
        paths.push(Self::project_local_settings_path(workspace));

        for path in paths {
            if !path.exists() {
                continue;
            }
            let raw = fs::read_to_string(&path)?;
            let value: Value = serde_json::from_str(&raw)
                .map_err(|e| anyhow::anyhow!("invalid settings file {}: {e}", path.display()))?;
            merge_json_value(&mut merged, &value);
        }

        Ok(serde_json::from_value(merged)?)
    }

    pub fn ensure(workspace: &Path) -> Result<Self> {
        let path = Self::project_settings_path(workspace);
        if path.exists()
            || Self::project_local_settings_path(workspace).exists()
            || Self::user_settings_path().is_some_and(|p| p.exists())
        {
            return Self::load(workspace);
        }
        let cfg = Self::default();
        cfg.save(workspace)?;
        Ok(cfg)
    }

    pub fn save(&self, workspace: &Path) -> Result<()> {
        let path = Self::project_settings_path(workspace);
        fs::create_dir_all(
            path.parent()
                .ok_or_else(|| anyhow::anyhow!("invalid config path"))?,
        )?;
        fs::write(path, serde_json::to_vec_pretty(self)?)?;
        Ok(())
    }
}

fn merge_json_value(base: &mut Value, overlay: &Value) {
    match (base, overlay) {
        (Value::Object(base_obj), Value::Object(overlay_obj)) => {
            for (key, overlay_value) in overlay_obj {
                if let Some(base_value) = base_obj.get_mut(key) {
                    merge_json_value(base_value, overlay_value);
                } else {
                    base_obj.insert(key.clone(), overlay_value.clone());
                }
            }
        }
        (base_slot, overlay_value) => {
            *base_slot = overlay_value.clone();
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub provider: String,
    pub model: String,
    pub endpoint: String,
    pub api_key: Option<String>,
    pub api_key_env: String,
    pub temperature: f32,
    pub max_output_tokens: u32,
    pub timeout_seconds: u64,
    /// Skip the remote model entirely and answer with the rule-based client.
    pub offline: bool,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: "gemini".to_string(),
            model: "gemini-1.5-flash".to_string(),
            endpoint: "https://generativelanguage.googleapis.com/v1beta/models".to_string(),
            api_key: None,
            api_key_env: "GEMINI_API_KEY".to_string(),
            temperature: 0.1,
            max_output_tokens: 2048,
            timeout_seconds: 30,
            offline: false,
        }
    }
}

/// One shell-command pattern with the tier it forces and the reason shown.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandRule {
    pub pattern: String,
    pub tier: RiskTier,
    pub reason: String,
}

impl CommandRule {
    pub fn new(pattern: &str, tier: RiskTier, reason: &str) -> Self {
        Self {
            pattern: pattern.to_string(),
            tier,
            reason: reason.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyConfig {
    /// File names (or path components) whose deletion is HIGH risk.
    pub protected_names: Vec<String>,
    /// Directory names whose removal is HIGH risk.
    pub protected_dirs: Vec<String>,
    pub secret_paths: Vec<String>,
    pub default_branches: Vec<String>,
    pub risky_commit_words: Vec<String>,
    /// Matched case-insensitively against `run_command` input.
    pub command_rules: Vec<CommandRule>,
    pub large_file_bytes: u64,
    pub busy_dir_entries: usize,
    pub large_dir_entries: usize,
    /// When set, CRITICAL calls are approved only by typing this phrase.
    pub critical_confirmation_phrase: Option<String>,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            protected_names: [
                "main.py",
                "requirements.txt",
                ".env",
                "config",
                "database",
                ".git",
                "package.json",
                "Cargo.toml",
                "pyproject.toml",
                "setup.py",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            protected_dirs: [
                ".git",
                "node_modules",
                "__pycache__",
                ".venv",
                "venv",
                "src",
                "lib",
                "bin",
                "core",
                "system",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            secret_paths: [".ssh", ".aws", ".gnupg", ".kube"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            default_branches: ["main", "master", "production", "prod"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            risky_commit_words: [
                "wip",
                "temp",
                "test",
                "debug",
                "hack",
                "fix later",
                "todo",
                "broken",
                "experimental",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            command_rules: default_command_rules(),
            large_file_bytes: 1024 * 1024,
            busy_dir_entries: 10,
            large_dir_entries: 50,
            critical_confirmation_phrase: None,
        }
    }
}

pub fn default_command_rules() -> Vec<CommandRule> {
    use RiskTier::{Critical, High, Medium};
    vec![
        CommandRule::new(
            r"\brm\s+(?:-\S+\s+)*-[a-z]*(?:r[a-z]*f|f[a-z]*r)",
            Critical,
            "recursive force-delete (rm -rf)",
        ),
        CommandRule::new(
            r"\brm\s+(?:-\S+\s+)*(?:--recursive|-[a-z]*r[a-z]*)\s+(?:-\S+\s+)*(?:/|~|\*|\.)(?:\s|$)",
            Critical,
            "recursive delete of a root-like path",
        ),
        CommandRule::new(
            r"\b(?:sudo|doas)\b|(?:^|[;&|]\s*)su(?:\s|$)",
            Critical,
            "privilege escalation",
        ),
        CommandRule::new(
            r"\bmkfs(?:\.\w+)?\b|\bfdisk\b|\bdd\s+if=|\bformat\s+[a-z]:",
            Critical,
            "disk formatting or raw device write",
        ),
        CommandRule::new(
            r"\b(?:shutdown|reboot|halt|poweroff)\b",
            Critical,
            "changes machine power state",
        ),
        CommandRule::new(r"\bchmod\s+(?:-R\s+)?0?777\b", Critical, "makes files world-writable"),
        CommandRule::new(r":\(\)\s*\{\s*:\s*\|\s*:\s*&\s*\}", Critical, "fork bomb"),
        CommandRule::new(r">\s*/dev/(?:sd|hd|nvme)", Critical, "overwrites a block device"),
        CommandRule::new(r"\b(?:rm|del)\b", High, "deletes files"),
        CommandRule::new(r"\brmdir\b", High, "removes directories"),
        CommandRule::new(r"\b(?:mv|move)\b", High, "moves or renames files"),
        CommandRule::new(r"\b(?:chmod|chown)\b", High, "changes file permissions or ownership"),
        CommandRule::new(r"\b(?:kill|pkill|killall)\b", High, "terminates processes"),
        CommandRule::new(r"\bgit\s+reset\s+--hard\b", High, "discards local changes"),
        CommandRule::new(r"\bgit\s+clean\b", High, "deletes untracked files"),
        CommandRule::new(r"\bgit\s+push\b.*(?:--force|\s-f\b)", High, "force-pushes history"),
        CommandRule::new(r"\b(?:cp|copy)\b", Medium, "copies files"),
        CommandRule::new(r"\b(?:curl|wget)\b", Medium, "downloads from the network"),
        CommandRule::new(r"\bgit\s+push\b", Medium, "pushes to a remote"),
        CommandRule::new(
            r"\b(?:npm|pnpm|yarn|pip3?|cargo|apt(?:-get)?|brew|gem)\s+(?:install|add)\b",
            Medium,
            "installs packages",
        ),
        CommandRule::new(r"(?:^|[^>&0-9])>(?:[^>&]|$)", Medium, "redirects output into a file"),
    ]
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Capped at 10 by conversation memory.
    pub recent_files_limit: usize,
    /// Number of prior turns summarized in the model prompt.
    pub prompt_history: usize,
    pub tool_timeout_seconds: u64,
    pub python: String,
    pub audit_log: bool,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            recent_files_limit: 10,
            prompt_history: 5,
            tool_timeout_seconds: 30,
            python: "python3".to_string(),
            audit_log: true,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    pub enabled: bool,
    pub endpoint: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    fn tier_strategy() -> impl Strategy<Value = RiskTier> {
        prop_oneof![
            Just(RiskTier::Safe),
            Just(RiskTier::Low),
            Just(RiskTier::Medium),
            Just(RiskTier::High),
            Just(RiskTier::Critical),
        ]
    }

    proptest! {
        #[test]
        fn merge_json_value_is_idempotent_for_flat_objects(
            base in prop::collection::btree_map("[a-z]{1,8}", any::<i64>(), 0..12),
            overlay in prop::collection::btree_map("[a-z]{1,8}", any::<i64>(), 0..12),
        ) {
            let mut base_value = json!(base);
            let overlay_value = json!(overlay);
            merge_json_value(&mut base_value, &overlay_value);
            let once = base_value.clone();
            merge_json_value(&mut base_value, &overlay_value);
            prop_assert_eq!(base_value, once);
        }

        #[test]
        fn only_safe_skips_confirmation(tier in tier_strategy()) {
            prop_assert_eq!(tier.requires_confirmation(), tier > RiskTier::Safe);
        }

        #[test]
        fn tier_label_parses_back(tier in tier_strategy(), upper in any::<bool>()) {
            let label = if upper { tier.label().to_string() } else { tier.label().to_ascii_lowercase() };
            prop_assert_eq!(label.parse::<RiskTier>().expect("parse"), tier);
        }
    }

    #[test]
    fn risk_tier_serializes_lowercase_and_orders() {
        assert_eq!(serde_json::to_string(&RiskTier::High).expect("serialize"), "\"high\"");
        assert!(RiskTier::Safe < RiskTier::Low);
        assert!(RiskTier::Medium < RiskTier::High);
        assert!(RiskTier::High < RiskTier::Critical);
        assert_eq!(RiskTier::ALL.iter().max(), Some(&RiskTier::Critical));
        assert!("extreme".parse::<RiskTier>().is_err());
    }

    #[test]
    fn render_shortens_long_values() {
        let mut args = Arguments::new();
        args.insert("filepath".to_string(), json!("a.py"));
        args.insert("content".to_string(), json!("x".repeat(100)));
        let rendered = Invocation::new("write_file", args).render();
        assert!(rendered.starts_with("write_file(content='xxxx"));
        assert!(rendered.contains("...'"));
        assert!(rendered.ends_with("filepath='a.py')"));
    }

    #[test]
    fn audit_record_for_conversational_turn_has_null_tool_fields() {
        let mut turn = ConversationTurn::new("what does this do?");
        turn.response = "It parses routes.".to_string();
        let record = turn.audit_record();
        assert!(record.tool_name.is_none());
        assert!(record.tier.is_none());
        assert!(record.approved.is_none());
        assert_eq!(record.message, "It parses routes.");

        let value = serde_json::to_value(&record).expect("serialize");
        assert_eq!(value["tool_name"], Value::Null);
        assert!(value.get("reasons").is_none());
    }

    #[test]
    fn audit_record_carries_tier_and_outcome() {
        let mut args = Arguments::new();
        args.insert("filepath".to_string(), json!("notes.txt"));
        let mut turn = ConversationTurn::new("delete it");
        turn.invocation = Some(Invocation::new("delete_file", args));
        turn.assessment = Some(RiskAssessment::new(
            RiskTier::Low,
            vec!["deletes a file".to_string()],
        ));
        turn.approval = Some(ApprovalDecision {
            approved: false,
            tier: RiskTier::Low,
        });
        turn.outcome = Some(ToolOutcome::cancelled());

        let record = turn.audit_record();
        assert_eq!(record.tool_name.as_deref(), Some("delete_file"));
        assert_eq!(record.tier, Some(RiskTier::Low));
        assert_eq!(record.approved, Some(false));
        assert_eq!(record.success, Some(false));
        assert_eq!(record.message, CANCELLED_BY_USER);
        assert!(turn.outcome.as_ref().is_some_and(ToolOutcome::is_cancelled));
    }

    #[test]
    fn clarification_names_missing_parameters() {
        let err = PipelineError::MissingParameter {
            tool: "write_file".to_string(),
            missing: vec!["filepath".to_string(), "content".to_string()],
        };
        assert_eq!(
            err.to_string(),
            "write_file is missing required parameter(s): filepath, content"
        );
        assert!(err.clarification().contains("filepath and content"));
    }

    #[test]
    fn load_layers_project_and_local_settings() {
        let workspace = std::env::temp_dir().join(format!("codebuddy-core-test-{}", Uuid::now_v7()));
        fs::create_dir_all(runtime_dir(&workspace)).expect("runtime dir");
        fs::write(
            AppConfig::project_settings_path(&workspace),
            r#"{"llm":{"model":"gemini-2.0-flash","timeout_seconds":5},"policy":{"large_dir_entries":80}}"#,
        )
        .expect("project settings");
        fs::write(
            AppConfig::project_local_settings_path(&workspace),
            r#"{"llm":{"timeout_seconds":9}}"#,
        )
        .expect("local settings");

        let cfg = AppConfig::load(&workspace).expect("load");
        assert_eq!(cfg.llm.model, "gemini-2.0-flash");
        assert_eq!(cfg.llm.timeout_seconds, 9);
        assert_eq!(cfg.llm.api_key_env, "GEMINI_API_KEY");
        assert_eq!(cfg.policy.large_dir_entries, 80);
        assert!(!cfg.policy.command_rules.is_empty());
        assert_eq!(cfg.agent.recent_files_limit, 10);
    }

    #[test]
    fn save_then_load_roundtrips_defaults() {
        let workspace = std::env::temp_dir().join(format!("codebuddy-core-test-{}", Uuid::now_v7()));
        let cfg = AppConfig::default();
        cfg.save(&workspace).expect("save");
        assert!(AppConfig::project_settings_path(&workspace).exists());
        let loaded = AppConfig::load(&workspace).expect("load");
        assert_eq!(loaded.policy.default_branches, cfg.policy.default_branches);
        assert_eq!(loaded.llm.provider, "gemini");
    }
}
