use crate::Cli;
use anyhow::{Result, anyhow};
use codebuddy_agent::AgentEngine;
use codebuddy_core::AppConfig;
use codebuddy_policy::{DenyAllPrompter, Prompter, StdioPrompter};
use std::io::IsTerminal;
use std::path::{Path, PathBuf};

pub(crate) fn resolve_workspace(flag: Option<&Path>) -> Result<PathBuf> {
    let workspace = match flag {
        Some(path) => path.to_path_buf(),
        None => std::env::current_dir()?,
    };
    if !workspace.is_dir() {
        return Err(anyhow!(
            "workspace {} is not a directory",
            workspace.display()
        ));
    }
    Ok(workspace)
}

/// Layered settings with command-line overrides applied on top.
pub(crate) fn load_config(workspace: &Path, cli: &Cli) -> Result<AppConfig> {
    let mut cfg = AppConfig::ensure(workspace)?;
    if cli.offline {
        cfg.llm.offline = true;
    }
    Ok(cfg)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ApprovalMode {
    Ask,
    DenyAll,
}

/// Gated calls are only ever approved by someone at a terminal.
pub(crate) fn approval_mode(no_input: bool, stdin_is_terminal: bool) -> ApprovalMode {
    if no_input || !stdin_is_terminal {
        ApprovalMode::DenyAll
    } else {
        ApprovalMode::Ask
    }
}

pub(crate) fn prompter_for(cli: &Cli) -> Box<dyn Prompter + Send> {
    match approval_mode(cli.no_input, std::io::stdin().is_terminal()) {
        ApprovalMode::Ask => Box::new(StdioPrompter),
        ApprovalMode::DenyAll => Box::new(DenyAllPrompter),
    }
}

pub(crate) fn build_engine(workspace: &Path, cli: &Cli) -> Result<AgentEngine> {
    let cfg = load_config(workspace, cli)?;
    let mut engine = AgentEngine::new(workspace, cfg, prompter_for(cli))?;
    engine.set_verbose(cli.verbose);
    Ok(engine)
}
