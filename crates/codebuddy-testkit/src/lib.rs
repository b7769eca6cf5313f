//! Scripted stand-ins for the model and the user, plus a throwaway
//! workspace, for driving the pipeline in tests.

use anyhow::{Result, anyhow};
use codebuddy_core::AppConfig;
use codebuddy_llm::LlmClient;
use codebuddy_policy::{ApprovalRequest, Prompter};
use std::collections::VecDeque;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

/// Model client that replays canned replies in order and records every
/// prompt it was given. Once the script runs out, every call errors.
#[derive(Clone)]
pub struct ScriptedLlm {
    replies: Arc<Mutex<VecDeque<String>>>,
    prompts: Arc<Mutex<Vec<String>>>,
    exhausted: String,
}

impl ScriptedLlm {
    pub fn new<I, S>(replies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            replies: Arc::new(Mutex::new(replies.into_iter().map(Into::into).collect())),
            prompts: Arc::new(Mutex::new(Vec::new())),
            exhausted: "scripted model has no replies left".to_string(),
        }
    }

    /// A client whose every call fails with `message`.
    pub fn failing(message: &str) -> Self {
        let mut llm = Self::new(Vec::<String>::new());
        llm.exhausted = message.to_string();
        llm
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().map(|p| p.clone()).unwrap_or_default()
    }

    pub fn remaining(&self) -> usize {
        self.replies.lock().map(|r| r.len()).unwrap_or_default()
    }
}

impl LlmClient for ScriptedLlm {
    fn generate(&self, prompt: &str) -> Result<String> {
        self.prompts
            .lock()
            .map_err(|_| anyhow!("prompt log poisoned"))?
            .push(prompt.to_string());
        self.replies
            .lock()
            .map_err(|_| anyhow!("reply queue poisoned"))?
            .pop_front()
            .ok_or_else(|| anyhow!("{}", self.exhausted))
    }

    fn is_available(&self) -> bool {
        true
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

/// Answers approval prompts from a queue. An exhausted queue behaves like
/// closed standard input.
#[derive(Clone, Default)]
pub struct ScriptedPrompter {
    answers: Arc<Mutex<VecDeque<Option<String>>>>,
    requests: Arc<Mutex<Vec<ApprovalRequest>>>,
    broken: bool,
}

impl ScriptedPrompter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn answer(self, line: &str) -> Self {
        if let Ok(mut answers) = self.answers.lock() {
            answers.push_back(Some(line.to_string()));
        }
        self
    }

    /// Queues an end-of-input.
    pub fn closed(self) -> Self {
        if let Ok(mut answers) = self.answers.lock() {
            answers.push_back(None);
        }
        self
    }

    /// Every prompt fails with an I/O error.
    pub fn broken() -> Self {
        Self {
            broken: true,
            ..Self::default()
        }
    }

    pub fn requests(&self) -> Vec<ApprovalRequest> {
        self.requests.lock().map(|r| r.clone()).unwrap_or_default()
    }
}

impl Prompter for ScriptedPrompter {
    fn ask(&mut self, request: &ApprovalRequest) -> io::Result<Option<String>> {
        self.requests
            .lock()
            .map_err(|_| io::Error::other("request log poisoned"))?
            .push(request.clone());
        if self.broken {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "prompt stream closed"));
        }
        let mut answers = self
            .answers
            .lock()
            .map_err(|_| io::Error::other("answer queue poisoned"))?;
        Ok(answers.pop_front().flatten())
    }
}

/// Temporary project directory, removed on drop.
pub struct TempWorkspace {
    dir: TempDir,
}

impl TempWorkspace {
    pub fn new() -> Result<Self> {
        Ok(Self {
            dir: tempfile::tempdir()?,
        })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn join(&self, rel: &str) -> PathBuf {
        self.dir.path().join(rel)
    }

    /// Offline configuration with telemetry off.
    pub fn config(&self) -> AppConfig {
        let mut cfg = AppConfig::default();
        cfg.llm.offline = true;
        cfg.telemetry.enabled = false;
        cfg
    }

    pub fn write(&self, rel: &str, content: &str) -> Result<PathBuf> {
        let path = self.join(rel);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, content)?;
        Ok(path)
    }

    pub fn read(&self, rel: &str) -> Result<String> {
        Ok(fs::read_to_string(self.join(rel))?)
    }

    pub fn exists(&self, rel: &str) -> bool {
        self.join(rel).exists()
    }
}
