mod extract;
mod prompt;
mod references;

pub use extract::{Candidate, Extractor, Strategy, extract, heuristic_match, pattern_match};
pub use prompt::build_prompt;
pub use references::{PATH_ARGUMENTS, ReferenceKind, Substitution, reference_kind, resolve_references};

use anyhow::{Result, anyhow};
use codebuddy_core::{
    AppConfig, ConversationTurn, Invocation, PipelineError, RiskAssessment, ToolOutcome,
};
use codebuddy_llm::{FallbackClient, HELP_RESPONSE, LlmClient, RuleBasedClient};
use codebuddy_memory::{ConversationMemory, ExportFormat, MemoryStats};
use codebuddy_observe::Observer;
use codebuddy_policy::{ApprovalGate, Prompter, Redactor, RiskClassifier};
use codebuddy_tools::ToolRegistry;
use serde::Serialize;
use std::path::{Path, PathBuf};

/// How a turn ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TurnKind {
    /// The model answered in prose; nothing was run.
    Conversation,
    /// A parameter or reference was missing; the user is asked for it.
    Clarification,
    /// The user declined at the approval gate.
    Cancelled,
    /// The tool ran (successfully or not).
    Executed,
}

#[derive(Debug, Clone, Serialize)]
pub struct TurnReport {
    pub kind: TurnKind,
    pub response: String,
    pub turn: ConversationTurn,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

impl TurnReport {
    pub fn succeeded(&self) -> bool {
        match self.kind {
            TurnKind::Executed => self.turn.succeeded(),
            TurnKind::Cancelled => false,
            TurnKind::Conversation | TurnKind::Clarification => true,
        }
    }
}

/// Owns every stage of the pipeline and the session memory. One call to
/// [`AgentEngine::process`] is one complete turn.
pub struct AgentEngine {
    workspace: PathBuf,
    cfg: AppConfig,
    llm: Box<dyn LlmClient + Send + Sync>,
    registry: ToolRegistry,
    classifier: RiskClassifier,
    gate: ApprovalGate,
    memory: ConversationMemory,
    observer: Observer,
    redactor: Redactor,
}

impl AgentEngine {
    pub fn new(workspace: &Path, cfg: AppConfig, prompter: Box<dyn Prompter + Send>) -> Result<Self> {
        let llm = Box::new(FallbackClient::from_config(&cfg.llm)?);
        Self::with_llm(workspace, cfg, llm, prompter)
    }

    pub fn with_llm(
        workspace: &Path,
        cfg: AppConfig,
        llm: Box<dyn LlmClient + Send + Sync>,
        prompter: Box<dyn Prompter + Send>,
    ) -> Result<Self> {
        let registry = ToolRegistry::for_workspace(workspace, &cfg.agent);
        Self::with_components(workspace, cfg, llm, registry, prompter)
    }

    pub fn with_components(
        workspace: &Path,
        cfg: AppConfig,
        llm: Box<dyn LlmClient + Send + Sync>,
        registry: ToolRegistry,
        prompter: Box<dyn Prompter + Send>,
    ) -> Result<Self> {
        let classifier = RiskClassifier::for_workspace(cfg.policy.clone(), workspace)
            .map_err(|e| anyhow!("invalid policy configuration: {e}"))?;
        let gate = ApprovalGate::new(prompter, &cfg.policy);
        let mut observer = Observer::new(workspace, &cfg.telemetry)?;
        if !cfg.agent.audit_log {
            observer = observer.without_audit();
        }
        Ok(Self {
            workspace: workspace.to_path_buf(),
            memory: ConversationMemory::with_capacity(cfg.agent.recent_files_limit),
            cfg,
            llm,
            registry,
            classifier,
            gate,
            observer,
            redactor: Redactor::new(),
        })
    }

    pub fn workspace(&self) -> &Path {
        &self.workspace
    }

    pub fn config(&self) -> &AppConfig {
        &self.cfg
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    pub fn memory(&self) -> &ConversationMemory {
        &self.memory
    }

    pub fn observer(&self) -> &Observer {
        &self.observer
    }

    pub fn llm_name(&self) -> &str {
        self.llm.name()
    }

    pub fn set_verbose(&mut self, verbose: bool) {
        self.observer.set_verbose(verbose);
    }

    pub fn is_verbose(&self) -> bool {
        self.observer.is_verbose()
    }

    pub fn set_prompter(&mut self, prompter: Box<dyn Prompter + Send>) {
        self.gate.set_prompter(prompter);
    }

    pub fn clear_memory(&mut self) {
        self.memory.clear();
        self.observer.verbose_log("conversation memory cleared");
    }

    pub fn stats(&self) -> MemoryStats {
        self.memory.stats()
    }

    pub fn export_transcript(&self, format: ExportFormat, output: Option<&Path>) -> Result<PathBuf> {
        self.memory.export_transcript(&self.workspace, format, output)
    }

    /// Runs normalization, reference resolution and classification without
    /// asking for approval or running anything.
    pub fn classify_only(&self, invocation: &mut Invocation) -> Result<RiskAssessment, PipelineError> {
        self.registry.prepare(invocation)?;
        resolve_references(invocation, &self.memory)?;
        Ok(self.classifier.classify(invocation))
    }

    /// Processes one user request end to end. Never fails: every input
    /// yields a report and a turn in memory.
    pub fn process(&mut self, input: &str) -> TurnReport {
        let mut turn = ConversationTurn::new(input);
        let mut warnings = Vec::new();

        let prompt = build_prompt(
            input,
            &self.registry.descriptors(),
            &self.memory,
            self.cfg.agent.prompt_history,
            self.cfg.agent.recent_files_limit,
        );
        let raw = match self.llm.generate(&prompt) {
            Ok(text) => text,
            Err(err) => {
                warnings.push(format!("model call failed ({err:#}); using built-in responses"));
                RuleBasedClient::new().respond(&prompt)
            }
        };
        warnings.extend(self.llm.drain_notices());
        for warning in &warnings {
            self.observer.warn_log(warning);
        }

        let (first, ignored) = {
            let mut candidates = extract(&raw, &self.registry);
            let first = candidates.next();
            let ignored = candidates
                .map(|c| c.invocation.render())
                .collect::<Vec<_>>();
            (first, ignored)
        };
        let Some(candidate) = first else {
            let reply = raw.trim();
            turn.response = if reply.is_empty() {
                HELP_RESPONSE.to_string()
            } else {
                reply.to_string()
            };
            return self.finish(turn, TurnKind::Conversation, warnings);
        };
        self.observer.verbose_log(&format!(
            "extracted {} via {:?} strategy",
            candidate.invocation.render(),
            candidate.strategy
        ));
        if !ignored.is_empty() {
            self.observer.verbose_log(&format!(
                "ignoring {} further call(s): {}",
                ignored.len(),
                ignored.join("; ")
            ));
        }
        if !candidate.dropped.is_empty() {
            self.observer.verbose_log(&format!(
                "dropped positional value(s) with no parameter left: {:?}",
                candidate.dropped
            ));
        }

        let mut invocation = candidate.invocation;
        match self.registry.prepare(&mut invocation) {
            Ok(notes) => {
                for note in notes {
                    self.observer.verbose_log(&note);
                    warnings.push(note);
                }
            }
            Err(err) => {
                turn.invocation = Some(invocation);
                return self.stop_before_dispatch(turn, err, warnings);
            }
        }

        match resolve_references(&mut invocation, &self.memory) {
            Ok(substitutions) => {
                for sub in substitutions {
                    self.observer.verbose_log(&format!(
                        "resolved {}=\"{}\" to {}",
                        sub.argument, sub.phrase, sub.path
                    ));
                }
            }
            Err(err) => {
                turn.invocation = Some(invocation);
                return self.stop_before_dispatch(turn, err, warnings);
            }
        }

        let assessment = self.classifier.classify(&invocation);
        if assessment.defaulted {
            let note = assessment.reasons.join("; ");
            self.observer.warn_log(&note);
            warnings.push(note);
        }
        self.observer.verbose_log(&format!(
            "{} classified {}: {}",
            invocation.tool_name,
            assessment.tier,
            assessment.reasons.join("; ")
        ));

        let decision = self.gate.decide(&invocation, &assessment);
        turn.assessment = Some(assessment);
        turn.approval = Some(decision);
        if !decision.approved {
            turn.invocation = Some(invocation);
            turn.outcome = Some(ToolOutcome::cancelled());
            turn.response = "Operation cancelled by user.".to_string();
            return self.finish(turn, TurnKind::Cancelled, warnings);
        }

        let outcome = match self.registry.dispatch(&invocation, &mut self.memory) {
            Ok(outcome) => outcome,
            Err(err) => ToolOutcome::failure(err.to_string()),
        };
        turn.response = outcome.message.clone();
        turn.invocation = Some(invocation);
        turn.outcome = Some(outcome);
        self.finish(turn, TurnKind::Executed, warnings)
    }

    fn stop_before_dispatch(
        &mut self,
        mut turn: ConversationTurn,
        err: PipelineError,
        warnings: Vec<String>,
    ) -> TurnReport {
        match err {
            PipelineError::MissingParameter { .. } | PipelineError::AmbiguousReference { .. } => {
                self.observer.verbose_log(&format!("asking for clarification: {err}"));
                turn.response = err.clarification();
                self.finish(turn, TurnKind::Clarification, warnings)
            }
            other => {
                let outcome = ToolOutcome::failure(other.to_string());
                turn.response = outcome.message.clone();
                turn.outcome = Some(outcome);
                self.finish(turn, TurnKind::Executed, warnings)
            }
        }
    }

    fn finish(&mut self, turn: ConversationTurn, kind: TurnKind, warnings: Vec<String>) -> TurnReport {
        let mut record = turn.audit_record();
        record.user_input = self.redactor.redact(&record.user_input);
        record.message = self.redactor.redact(&record.message);
        record.arguments = record.arguments.map(|args| self.redactor.redact_value(&args));
        if let Err(err) = self.observer.record_turn(&record) {
            self.observer
                .warn_log(&format!("failed to write audit record: {err:#}"));
        }
        self.memory.record(turn.clone());
        TurnReport {
            kind,
            response: turn.response.clone(),
            turn,
            warnings,
        }
    }
}
