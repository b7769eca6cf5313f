use codebuddy_core::{ApprovalDecision, Arguments, Invocation, PolicyConfig, RiskAssessment, RiskTier};
use serde::Serialize;
use serde_json::Value;
use std::io::{self, BufRead, Write};

/// Per-invocation gate state. `Pending` resolves exactly once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApprovalState {
    Pending,
    Approved,
    Rejected,
}

impl ApprovalState {
    pub fn resolve(self, approved: bool) -> Self {
        match self {
            Self::Pending if approved => Self::Approved,
            Self::Pending => Self::Rejected,
            terminal => terminal,
        }
    }

    pub fn is_approved(self) -> bool {
        self == Self::Approved
    }
}

/// Everything a prompter needs to ask the user about one call.
#[derive(Debug, Clone, Serialize)]
pub struct ApprovalRequest {
    pub tool_name: String,
    pub arguments: Arguments,
    pub tier: RiskTier,
    pub reasons: Vec<String>,
    pub title: String,
    pub warnings: Vec<String>,
    pub hint: String,
}

impl ApprovalRequest {
    pub fn new(
        invocation: &Invocation,
        assessment: &RiskAssessment,
        critical_phrase: Option<&str>,
    ) -> Self {
        let hint = match (assessment.tier, critical_phrase) {
            (RiskTier::Critical, Some(phrase)) => format!("type '{phrase}' to proceed"),
            (RiskTier::Low, _) => "[Y/n]".to_string(),
            _ => "[y/N]".to_string(),
        };
        Self {
            tool_name: invocation.tool_name.clone(),
            arguments: invocation.arguments.clone(),
            tier: assessment.tier,
            reasons: assessment.reasons.clone(),
            title: describe(invocation),
            warnings: warnings_for(assessment.tier),
            hint,
        }
    }

    pub fn render(&self) -> String {
        let mut out = format!("Approval required: {}\n", self.title);
        out.push_str(&format!("  tool: {}\n", self.tool_name));
        for (key, value) in &self.arguments {
            out.push_str(&format!("  {key}: {}\n", preview(value)));
        }
        out.push_str(&format!("  risk: {}\n", self.tier));
        for reason in &self.reasons {
            out.push_str(&format!("    - {reason}\n"));
        }
        for warning in &self.warnings {
            out.push_str(&format!("  ! {warning}\n"));
        }
        out.push_str(&format!("Proceed? {}: ", self.hint));
        out
    }
}

fn preview(value: &Value) -> String {
    match value {
        Value::String(s) => {
            let first = s.lines().next().unwrap_or_default();
            let lines = s.lines().count();
            if lines > 1 {
                format!("{first} ... ({lines} lines)")
            } else {
                first.to_string()
            }
        }
        other => other.to_string(),
    }
}

fn describe(invocation: &Invocation) -> String {
    let arg = |key: &str| invocation.str_arg(key).unwrap_or("?").to_string();
    match invocation.tool_name.as_str() {
        "write_file" => format!("Write file: {}", arg("filepath")),
        "delete_file" => format!("Delete file: {}", arg("filepath")),
        "create_folder" => format!("Create folder: {}", arg("folderpath")),
        "delete_folder" => format!("Delete folder: {}", arg("folderpath")),
        "run_command" => format!("Run command: {}", arg("command")),
        "run_python" => format!("Run Python script: {}", arg("filepath")),
        "git_add" => format!("Stage files: {}", invocation.str_arg("files").unwrap_or(".")),
        "git_commit" => format!("Git commit: {}", arg("message")),
        "git_push" => format!(
            "Git push to {}/{}",
            invocation.str_arg("remote").unwrap_or("origin"),
            invocation.str_arg("branch").unwrap_or("current branch")
        ),
        "git_pull" => "Git pull".to_string(),
        "git_branch" => format!(
            "Git branch {} {}",
            invocation.str_arg("action").unwrap_or("list"),
            invocation.str_arg("name").unwrap_or_default()
        )
        .trim_end()
        .to_string(),
        other => format!("Execute {other}"),
    }
}

fn warnings_for(tier: RiskTier) -> Vec<String> {
    let lines: &[&str] = match tier {
        RiskTier::Safe | RiskTier::Low => &[],
        RiskTier::Medium => &["This changes files or repository state."],
        RiskTier::High => &[
            "This operation affects important files.",
            "This action cannot be easily undone.",
        ],
        RiskTier::Critical => &[
            "This operation is potentially destructive.",
            "It could damage your system or data.",
            "Only proceed if you are absolutely certain.",
        ],
    };
    lines.iter().map(|s| s.to_string()).collect()
}

/// Maps a raw response line onto a decision.
///
/// `y`/`yes` approve and `n`/`no` reject, case-insensitively. Empty input
/// approves LOW and rejects everything else. `None` (end of input) rejects.
/// With a confirmation phrase configured, CRITICAL needs the exact phrase.
pub fn interpret_response(
    tier: RiskTier,
    response: Option<&str>,
    critical_phrase: Option<&str>,
) -> ApprovalState {
    let state = ApprovalState::Pending;
    let Some(raw) = response else {
        return state.resolve(false);
    };
    let trimmed = raw.trim();
    if tier == RiskTier::Critical
        && let Some(phrase) = critical_phrase
    {
        return state.resolve(trimmed == phrase);
    }
    let approved = match trimmed.to_ascii_lowercase().as_str() {
        "y" | "yes" => true,
        "" => tier == RiskTier::Low,
        _ => false,
    };
    state.resolve(approved)
}

/// Source of user consent. `Ok(None)` means input is closed.
pub trait Prompter {
    fn ask(&mut self, request: &ApprovalRequest) -> io::Result<Option<String>>;
}

/// Prompts on any reader/writer pair.
pub struct ConsolePrompter<R, W> {
    input: R,
    output: W,
}

impl<R: BufRead, W: Write> ConsolePrompter<R, W> {
    pub fn new(input: R, output: W) -> Self {
        Self { input, output }
    }

    pub fn into_output(self) -> W {
        self.output
    }
}

impl<R: BufRead, W: Write> Prompter for ConsolePrompter<R, W> {
    fn ask(&mut self, request: &ApprovalRequest) -> io::Result<Option<String>> {
        write!(self.output, "{}", request.render())?;
        self.output.flush()?;
        let mut line = String::new();
        if self.input.read_line(&mut line)? == 0 {
            return Ok(None);
        }
        Ok(Some(line))
    }
}

/// Prompts on stderr and reads from the process stdin without buffering
/// ahead, so the REPL can keep reading the same stream.
#[derive(Debug, Default)]
pub struct StdioPrompter;

impl Prompter for StdioPrompter {
    fn ask(&mut self, request: &ApprovalRequest) -> io::Result<Option<String>> {
        let mut stderr = io::stderr();
        write!(stderr, "{}", request.render())?;
        stderr.flush()?;
        let mut line = String::new();
        if io::stdin().read_line(&mut line)? == 0 {
            return Ok(None);
        }
        Ok(Some(line))
    }
}

/// Used when no user is attached: every gated call is rejected.
#[derive(Debug, Default)]
pub struct DenyAllPrompter;

impl Prompter for DenyAllPrompter {
    fn ask(&mut self, _request: &ApprovalRequest) -> io::Result<Option<String>> {
        Ok(Some("n".to_string()))
    }
}

pub struct ApprovalGate {
    prompter: Box<dyn Prompter + Send>,
    critical_phrase: Option<String>,
}

impl ApprovalGate {
    pub fn new(prompter: Box<dyn Prompter + Send>, cfg: &PolicyConfig) -> Self {
        Self {
            prompter,
            critical_phrase: cfg.critical_confirmation_phrase.clone(),
        }
    }

    pub fn set_prompter(&mut self, prompter: Box<dyn Prompter + Send>) {
        self.prompter = prompter;
    }

    /// SAFE never reaches the prompter. Prompt I/O errors reject.
    pub fn decide(&mut self, invocation: &Invocation, assessment: &RiskAssessment) -> ApprovalDecision {
        let state = if !assessment.tier.requires_confirmation() {
            ApprovalState::Pending.resolve(true)
        } else {
            let request = ApprovalRequest::new(invocation, assessment, self.critical_phrase.as_deref());
            match self.prompter.ask(&request) {
                Ok(response) => interpret_response(
                    assessment.tier,
                    response.as_deref(),
                    self.critical_phrase.as_deref(),
                ),
                Err(_) => ApprovalState::Pending.resolve(false),
            }
        };
        ApprovalDecision {
            approved: state.is_approved(),
            tier: assessment.tier,
        }
    }
}
