use crate::{PolicyError, check_path};
use codebuddy_core::{Invocation, PolicyConfig, RiskAssessment, RiskTier};
use regex::{Regex, RegexBuilder};
use std::collections::HashMap;
use std::fs;
use std::path::{Component, Path, PathBuf};

/// Lightweight facts the rules may consult. Implementations must be cheap
/// and side-effect free.
pub trait Environment {
    fn exists(&self, path: &str) -> bool;
    /// Size in bytes when `path` is a regular file.
    fn file_size(&self, path: &str) -> Option<u64>;
    /// Number of entries below `path`, recursively, when it is a directory.
    fn dir_entry_count(&self, path: &str) -> Option<usize>;
    fn current_branch(&self) -> Option<String>;
}

/// Answers environment questions from the workspace on disk.
#[derive(Debug, Clone)]
pub struct FsEnvironment {
    root: PathBuf,
}

impl FsEnvironment {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn resolve(&self, path: &str) -> PathBuf {
        let candidate = Path::new(path);
        if candidate.is_absolute() {
            candidate.to_path_buf()
        } else {
            self.root.join(candidate)
        }
    }
}

impl Environment for FsEnvironment {
    fn exists(&self, path: &str) -> bool {
        self.resolve(path).exists()
    }

    fn file_size(&self, path: &str) -> Option<u64> {
        let meta = fs::metadata(self.resolve(path)).ok()?;
        meta.is_file().then_some(meta.len())
    }

    fn dir_entry_count(&self, path: &str) -> Option<usize> {
        let dir = self.resolve(path);
        if !dir.is_dir() {
            return None;
        }
        let mut count = 0usize;
        let mut stack = vec![dir];
        while let Some(next) = stack.pop() {
            let Ok(entries) = fs::read_dir(&next) else {
                continue;
            };
            for entry in entries.flatten() {
                count += 1;
                if entry.file_type().is_ok_and(|t| t.is_dir()) {
                    stack.push(entry.path());
                }
            }
        }
        Some(count)
    }

    fn current_branch(&self) -> Option<String> {
        let head = fs::read_to_string(self.root.join(".git/HEAD")).ok()?;
        head.trim()
            .strip_prefix("ref: refs/heads/")
            .map(ToString::to_string)
    }
}

/// Rule family applied to a tool. The table in [`RiskClassifier`] maps tool
/// names onto these.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RiskRule {
    ReadOnly,
    CreateFolder,
    WriteFile,
    DeleteFile,
    DeleteFolder,
    ShellCommand,
    RunScript,
    GitStage,
    GitCommit,
    GitPush,
    GitPull,
    GitBranch,
    Fixed { tier: RiskTier, reason: String },
}

pub(crate) fn default_rules() -> HashMap<String, RiskRule> {
    [
        ("read_file", RiskRule::ReadOnly),
        ("list_files", RiskRule::ReadOnly),
        ("check_syntax", RiskRule::ReadOnly),
        ("python_lint", RiskRule::ReadOnly),
        ("analyze_complexity", RiskRule::ReadOnly),
        ("security_scan", RiskRule::ReadOnly),
        ("git_status", RiskRule::ReadOnly),
        ("git_diff", RiskRule::ReadOnly),
        ("git_log", RiskRule::ReadOnly),
        ("create_folder", RiskRule::CreateFolder),
        ("write_file", RiskRule::WriteFile),
        ("delete_file", RiskRule::DeleteFile),
        ("delete_folder", RiskRule::DeleteFolder),
        ("run_command", RiskRule::ShellCommand),
        ("run_python", RiskRule::RunScript),
        ("git_add", RiskRule::GitStage),
        ("git_commit", RiskRule::GitCommit),
        ("git_push", RiskRule::GitPush),
        ("git_pull", RiskRule::GitPull),
        ("git_branch", RiskRule::GitBranch),
    ]
    .into_iter()
    .map(|(name, rule)| (name.to_string(), rule))
    .collect()
}

struct CompiledCommandRule {
    regex: Regex,
    tier: RiskTier,
    reason: String,
}

/// Highest tier seen so far plus one reason per contributing sub-rule.
struct Findings {
    tier: RiskTier,
    reasons: Vec<String>,
}

impl Findings {
    fn new(tier: RiskTier, reason: impl Into<String>) -> Self {
        Self {
            tier,
            reasons: vec![reason.into()],
        }
    }

    fn note(&mut self, tier: RiskTier, reason: impl Into<String>) {
        self.tier = self.tier.max(tier);
        self.reasons.push(reason.into());
    }

    fn finish(self) -> RiskAssessment {
        RiskAssessment::new(self.tier, self.reasons)
    }
}

pub struct RiskClassifier {
    cfg: PolicyConfig,
    rules: HashMap<String, RiskRule>,
    command_rules: Vec<CompiledCommandRule>,
    env: Box<dyn Environment + Send + Sync>,
}

impl RiskClassifier {
    pub fn new(
        cfg: PolicyConfig,
        env: Box<dyn Environment + Send + Sync>,
    ) -> Result<Self, PolicyError> {
        let command_rules = cfg
            .command_rules
            .iter()
            .map(|rule| {
                RegexBuilder::new(&rule.pattern)
                    .case_insensitive(true)
                    .build()
                    .map(|regex| CompiledCommandRule {
                        regex,
                        tier: rule.tier,
                        reason: rule.reason.clone(),
                    })
                    .map_err(|e| PolicyError::InvalidCommandRule {
                        pattern: rule.pattern.clone(),
                        message: e.to_string(),
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            cfg,
            rules: default_rules(),
            command_rules,
            env,
        })
    }

    pub fn for_workspace(cfg: PolicyConfig, workspace: &Path) -> Result<Self, PolicyError> {
        Self::new(cfg, Box::new(FsEnvironment::new(workspace)))
    }

    pub fn with_rule(mut self, tool_name: &str, rule: RiskRule) -> Self {
        self.rules.insert(tool_name.to_string(), rule);
        self
    }

    pub fn rule_for(&self, tool_name: &str) -> Option<&RiskRule> {
        self.rules.get(tool_name)
    }

    /// Total over tool names: tools without a rule come back MEDIUM with
    /// `defaulted` set.
    pub fn classify(&self, invocation: &Invocation) -> RiskAssessment {
        let Some(rule) = self.rules.get(&invocation.tool_name) else {
            let mut assessment = RiskAssessment::new(
                RiskTier::Medium,
                vec![format!(
                    "no risk rule registered for {}; defaulting to MEDIUM",
                    invocation.tool_name
                )],
            );
            assessment.defaulted = true;
            return assessment;
        };

        let findings = match rule {
            RiskRule::ReadOnly => self.read_only(invocation),
            RiskRule::CreateFolder => self.create_folder(invocation),
            RiskRule::WriteFile => self.write_file(invocation),
            RiskRule::DeleteFile => self.delete_file(invocation),
            RiskRule::DeleteFolder => self.delete_folder(invocation),
            RiskRule::ShellCommand => self.shell_command(invocation),
            RiskRule::RunScript => self.run_script(invocation),
            RiskRule::GitStage => self.git_stage(invocation),
            RiskRule::GitCommit => self.git_commit(invocation),
            RiskRule::GitPush => self.git_push(invocation),
            RiskRule::GitPull => Findings::new(
                RiskTier::Low,
                "merges remote changes into the working tree",
            ),
            RiskRule::GitBranch => self.git_branch(invocation),
            RiskRule::Fixed { tier, reason } => Findings::new(*tier, reason.clone()),
        };
        findings.finish()
    }

    fn path_arg<'a>(&self, invocation: &'a Invocation) -> &'a str {
        ["filepath", "folderpath", "directory"]
            .iter()
            .find_map(|key| invocation.str_arg(key))
            .unwrap_or(".")
    }

    fn check_location(&self, path: &str, findings: &mut Findings) {
        match check_path(path, &self.cfg.secret_paths) {
            Ok(()) => {}
            Err(PolicyError::PathTraversal) => {
                findings.note(RiskTier::High, format!("{path} is outside the workspace"))
            }
            Err(PolicyError::SecretPath) => {
                findings.note(RiskTier::High, format!("{path} is inside a secret directory"))
            }
            Err(other) => findings.note(RiskTier::High, other.to_string()),
        }
    }

    fn protected_name<'a>(&'a self, path: &str, names: &'a [String]) -> Option<&'a str> {
        let candidate = Path::new(path);
        let stem = candidate
            .file_stem()
            .map(|s| s.to_string_lossy().to_ascii_lowercase());
        names
            .iter()
            .find(|name| {
                let name = name.to_ascii_lowercase();
                stem.as_deref() == Some(name.as_str())
                    || candidate.components().any(|c| match c {
                        Component::Normal(part) => part.to_string_lossy().eq_ignore_ascii_case(&name),
                        _ => false,
                    })
            })
            .map(String::as_str)
    }

    fn read_only(&self, invocation: &Invocation) -> Findings {
        let mut findings = Findings::new(RiskTier::Safe, "read-only operation");
        if let Some(path) = invocation
            .str_arg("filepath")
            .or_else(|| invocation.str_arg("directory"))
            && check_path(path, &self.cfg.secret_paths).is_err_and(|e| matches!(e, PolicyError::SecretPath))
        {
            findings.note(RiskTier::High, format!("reads from secret location {path}"));
        }
        findings
    }

    fn create_folder(&self, invocation: &Invocation) -> Findings {
        let path = self.path_arg(invocation);
        let mut findings = Findings::new(RiskTier::Low, format!("creates folder {path}"));
        self.check_location(path, &mut findings);
        findings
    }

    fn write_file(&self, invocation: &Invocation) -> Findings {
        let path = self.path_arg(invocation);
        let mut findings = if self.env.exists(path) {
            Findings::new(RiskTier::Medium, format!("overwrites existing file {path}"))
        } else {
            Findings::new(RiskTier::Low, format!("creates new file {path}"))
        };
        if self.env.exists(path)
            && let Some(name) = self.protected_name(path, &self.cfg.protected_names)
        {
            findings.note(
                RiskTier::Medium,
                format!("{path} matches protected name {name}"),
            );
        }
        self.check_location(path, &mut findings);
        findings
    }

    fn delete_file(&self, invocation: &Invocation) -> Findings {
        let path = self.path_arg(invocation);
        let mut findings = if self.env.exists(path) {
            Findings::new(RiskTier::Low, format!("deletes file {path}"))
        } else {
            Findings::new(RiskTier::Low, format!("{path} does not exist"))
        };
        if let Some(size) = self.env.file_size(path)
            && size > self.cfg.large_file_bytes
        {
            findings.note(
                RiskTier::Medium,
                format!("deletes a large file ({size} bytes)"),
            );
        }
        if let Some(name) = self.protected_name(path, &self.cfg.protected_names) {
            findings.note(
                RiskTier::High,
                format!("{path} matches protected name {name}"),
            );
        }
        self.check_location(path, &mut findings);
        findings
    }

    fn delete_folder(&self, invocation: &Invocation) -> Findings {
        let path = self.path_arg(invocation);
        let mut findings = Findings::new(RiskTier::Low, format!("removes folder {path}"));
        let trimmed = path.trim().trim_end_matches('/');
        if trimmed.is_empty() || trimmed == "." {
            findings.note(RiskTier::Critical, "removes the whole workspace");
        }
        if let Some(name) = self.protected_name(path, &self.cfg.protected_dirs) {
            findings.note(
                RiskTier::High,
                format!("{path} matches protected directory {name}"),
            );
        }
        if let Some(count) = self.env.dir_entry_count(path) {
            if count > self.cfg.large_dir_entries {
                findings.note(RiskTier::High, format!("folder holds {count} entries"));
            } else if count > self.cfg.busy_dir_entries {
                findings.note(RiskTier::Medium, format!("folder holds {count} entries"));
            }
        }
        self.check_location(path, &mut findings);
        findings
    }

    fn shell_command(&self, invocation: &Invocation) -> Findings {
        let command = invocation.str_arg("command").unwrap_or_default();
        let mut findings = Findings::new(RiskTier::Low, "runs a shell command");
        self.check_command(command, &mut findings);
        findings
    }

    fn check_command(&self, command: &str, findings: &mut Findings) {
        for rule in &self.command_rules {
            if !rule.regex.is_match(command) {
                continue;
            }
            let reason = if rule.tier == RiskTier::Critical {
                format!("denylisted command pattern: {}", rule.reason)
            } else {
                format!("command pattern: {}", rule.reason)
            };
            findings.note(rule.tier, reason);
        }
    }

    fn run_script(&self, invocation: &Invocation) -> Findings {
        let path = self.path_arg(invocation);
        let mut findings = Findings::new(RiskTier::Low, format!("executes Python script {path}"));
        if !self.env.exists(path) {
            findings.reasons.push(format!("{path} does not exist yet"));
        }
        if let Some(extra) = invocation.str_arg("args").map(str::trim)
            && !extra.is_empty()
        {
            findings.reasons.push(format!("passes arguments: {extra}"));
            self.check_command(extra, &mut findings);
        }
        self.check_location(path, &mut findings);
        findings
    }

    fn git_stage(&self, invocation: &Invocation) -> Findings {
        match invocation.str_arg("files").map(str::trim) {
            None | Some(".") | Some("-A") | Some("--all") | Some("") => {
                Findings::new(RiskTier::Low, "stages all changes")
            }
            Some(files) => Findings::new(RiskTier::Low, format!("stages {files}")),
        }
    }

    fn on_default_branch(&self, branch: &str) -> bool {
        self.cfg
            .default_branches
            .iter()
            .any(|b| b.eq_ignore_ascii_case(branch))
    }

    fn git_commit(&self, invocation: &Invocation) -> Findings {
        let message = invocation.str_arg("message").unwrap_or_default().trim();
        let mut findings = Findings::new(RiskTier::Low, "creates a commit");
        if message.is_empty() {
            findings.note(RiskTier::Medium, "commit message is empty");
        } else if let Some(word) = self.risky_commit_word(message) {
            findings.note(
                RiskTier::Medium,
                format!("commit message looks unfinished ({word})"),
            );
        }
        if let Some(branch) = self.env.current_branch()
            && self.on_default_branch(&branch)
        {
            findings.note(
                RiskTier::Medium,
                format!("commits directly to default branch {branch}"),
            );
        }
        findings
    }

    fn risky_commit_word<'a>(&'a self, message: &str) -> Option<&'a str> {
        let lowered = message.to_ascii_lowercase();
        let tokens: Vec<&str> = lowered
            .split(|c: char| !c.is_ascii_alphanumeric())
            .filter(|t| !t.is_empty())
            .collect();
        self.cfg
            .risky_commit_words
            .iter()
            .find(|word| {
                let word = word.to_ascii_lowercase();
                if word.contains(' ') {
                    lowered.contains(&word)
                } else {
                    tokens.iter().any(|t| *t == word)
                }
            })
            .map(String::as_str)
    }

    fn git_push(&self, invocation: &Invocation) -> Findings {
        let remote = invocation.str_arg("remote").unwrap_or("origin");
        let branch = invocation
            .str_arg("branch")
            .map(str::trim)
            .filter(|b| !b.is_empty())
            .map(ToString::to_string)
            .or_else(|| self.env.current_branch());
        let mut findings = match &branch {
            Some(branch) => Findings::new(
                RiskTier::Medium,
                format!("pushes {branch} to {remote}"),
            ),
            None => Findings::new(
                RiskTier::Medium,
                format!("pushes the current branch to {remote}"),
            ),
        };
        if let Some(branch) = &branch
            && self.on_default_branch(branch)
        {
            findings.note(
                RiskTier::High,
                format!("pushes to default branch {branch}"),
            );
        }
        if invocation.bool_arg("force") == Some(true) {
            findings.note(RiskTier::High, "force push rewrites remote history");
        }
        findings
    }

    fn git_branch(&self, invocation: &Invocation) -> Findings {
        let action = invocation
            .str_arg("action")
            .unwrap_or("list")
            .trim()
            .to_ascii_lowercase();
        let name = invocation.str_arg("name").unwrap_or_default().trim();
        match action.as_str() {
            "list" | "" => Findings::new(RiskTier::Safe, "lists branches"),
            "create" | "new" => Findings::new(RiskTier::Low, format!("creates branch {name}")),
            "switch" | "checkout" => {
                Findings::new(RiskTier::Low, format!("switches to branch {name}"))
            }
            "delete" | "remove" => {
                let mut findings =
                    Findings::new(RiskTier::Medium, format!("deletes branch {name}"));
                if self.on_default_branch(name) {
                    findings.note(
                        RiskTier::High,
                        format!("{name} is a default branch"),
                    );
                }
                findings
            }
            other => Findings::new(
                RiskTier::Medium,
                format!("unrecognized branch action {other}"),
            ),
        }
    }
}
