mod builtin;
mod normalize;
mod shell;

use anyhow::Result;
use codebuddy_core::{AgentConfig, Arguments, Invocation, PipelineError, ToolOutcome, ToolSchema};
use codebuddy_memory::ConversationMemory;
pub use normalize::{Normalized, normalize_arguments};
use serde::Serialize;
pub use shell::{PlatformShellRunner, ShellRunResult, ShellRunner};
use std::collections::BTreeMap;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// What every tool body gets to work with.
pub struct ToolContext {
    pub workspace: PathBuf,
    pub runner: Arc<dyn ShellRunner + Send + Sync>,
    pub timeout: Duration,
    pub python: String,
}

impl ToolContext {
    pub fn new(workspace: &Path, cfg: &AgentConfig) -> Self {
        Self::with_runner(workspace, cfg, Arc::new(PlatformShellRunner))
    }

    pub fn with_runner(
        workspace: &Path,
        cfg: &AgentConfig,
        runner: Arc<dyn ShellRunner + Send + Sync>,
    ) -> Self {
        Self {
            workspace: workspace.to_path_buf(),
            runner,
            timeout: Duration::from_secs(cfg.tool_timeout_seconds.max(1)),
            python: cfg.python.clone(),
        }
    }

    /// Workspace-relative paths are joined onto the workspace root.
    pub fn resolve(&self, path: &str) -> PathBuf {
        let candidate = Path::new(path.trim());
        if candidate.is_absolute() {
            candidate.to_path_buf()
        } else {
            self.workspace.join(candidate)
        }
    }

    pub fn run_shell(&self, cmd: &str) -> Result<ShellRunResult> {
        self.runner.run(cmd, &self.workspace, self.timeout)
    }
}

pub type ToolHandler = Box<dyn Fn(&ToolContext, &Arguments) -> Result<String> + Send + Sync>;

pub struct RegisteredTool {
    pub name: String,
    pub description: String,
    pub schema: ToolSchema,
    handler: ToolHandler,
}

#[derive(Debug, Clone, Serialize)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    pub signature: String,
    pub schema: ToolSchema,
}

/// Read access to registered tool names and schemas.
pub trait ToolCatalog {
    fn schema(&self, tool_name: &str) -> Option<&ToolSchema>;

    fn contains(&self, tool_name: &str) -> bool {
        self.schema(tool_name).is_some()
    }
}

/// Name-to-callable registry. Dispatch never lets a tool body take the
/// pipeline down: errors and panics both come back as failed outcomes.
pub struct ToolRegistry {
    ctx: ToolContext,
    tools: BTreeMap<String, RegisteredTool>,
}

impl ToolRegistry {
    pub fn new(ctx: ToolContext) -> Self {
        Self {
            ctx,
            tools: BTreeMap::new(),
        }
    }

    pub fn with_builtins(ctx: ToolContext) -> Self {
        let mut registry = Self::new(ctx);
        builtin::register_builtin_tools(&mut registry);
        registry
    }

    pub fn for_workspace(workspace: &Path, cfg: &AgentConfig) -> Self {
        Self::with_builtins(ToolContext::new(workspace, cfg))
    }

    pub fn context(&self) -> &ToolContext {
        &self.ctx
    }

    pub fn register<F>(&mut self, name: &str, description: &str, schema: ToolSchema, handler: F)
    where
        F: Fn(&ToolContext, &Arguments) -> Result<String> + Send + Sync + 'static,
    {
        self.tools.insert(
            name.to_string(),
            RegisteredTool {
                name: name.to_string(),
                description: description.to_string(),
                schema,
                handler: Box::new(handler),
            },
        );
    }

    pub fn names(&self) -> Vec<&str> {
        self.tools.keys().map(String::as_str).collect()
    }

    pub fn get(&self, name: &str) -> Option<&RegisteredTool> {
        self.tools.get(name)
    }

    pub fn descriptors(&self) -> Vec<ToolDescriptor> {
        self.tools
            .values()
            .map(|tool| ToolDescriptor {
                name: tool.name.clone(),
                description: tool.description.clone(),
                signature: tool.schema.signature(&tool.name),
                schema: tool.schema.clone(),
            })
            .collect()
    }

    /// Normalizes keys, fills documented defaults, and rejects calls that
    /// still lack required parameters. Returns normalizer warnings.
    pub fn prepare(&self, invocation: &mut Invocation) -> Result<Vec<String>, PipelineError> {
        let tool = self
            .tools
            .get(&invocation.tool_name)
            .ok_or_else(|| PipelineError::UnknownTool(invocation.tool_name.clone()))?;
        let normalized = normalize_arguments(&tool.schema, &invocation.arguments);
        invocation.arguments = normalized.arguments;
        tool.schema.apply_defaults(&mut invocation.arguments);
        let missing = tool.schema.missing_required(&invocation.arguments);
        if !missing.is_empty() {
            return Err(PipelineError::MissingParameter {
                tool: invocation.tool_name.clone(),
                missing,
            });
        }
        Ok(normalized.warnings)
    }

    /// Runs the tool and feeds its declared touched path into `memory`.
    pub fn dispatch(
        &self,
        invocation: &Invocation,
        memory: &mut ConversationMemory,
    ) -> Result<ToolOutcome, PipelineError> {
        let tool = self
            .tools
            .get(&invocation.tool_name)
            .ok_or_else(|| PipelineError::UnknownTool(invocation.tool_name.clone()))?;

        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            (tool.handler)(&self.ctx, &invocation.arguments)
        }));
        let mut outcome = match result {
            Ok(Ok(message)) => ToolOutcome::ok(message),
            Ok(Err(err)) => ToolOutcome::failure(
                PipelineError::ToolExecution {
                    tool: tool.name.clone(),
                    message: format!("{err:#}"),
                }
                .to_string(),
            ),
            Err(payload) => ToolOutcome::failure(
                PipelineError::ToolExecution {
                    tool: tool.name.clone(),
                    message: format!("panicked: {}", panic_message(payload.as_ref())),
                }
                .to_string(),
            ),
        };

        if outcome.success
            && let Some(touch) = &tool.schema.touches
            && let Some(path) = invocation.str_arg(&touch.param)
        {
            outcome.touched_paths.insert(path.to_string());
            memory.note_touched(path, touch.kind);
        }
        Ok(outcome)
    }
}

impl ToolCatalog for ToolRegistry {
    fn schema(&self, tool_name: &str) -> Option<&ToolSchema> {
        self.tools.get(tool_name).map(|tool| &tool.schema)
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;
    use codebuddy_core::{ParamType, TouchKind};
    use serde_json::json;
    use std::sync::Mutex;

    #[derive(Clone, Default)]
    pub(crate) struct RecordingRunner {
        pub(crate) commands: Arc<Mutex<Vec<String>>>,
        pub(crate) reply: Arc<Mutex<ShellRunResult>>,
    }

    impl RecordingRunner {
        pub(crate) fn replying(stdout: &str, status: i32) -> Self {
            let runner = Self::default();
            *runner.reply.lock().expect("reply") = ShellRunResult {
                status: Some(status),
                stdout: stdout.to_string(),
                stderr: String::new(),
                timed_out: false,
            };
            runner
        }

        pub(crate) fn captured(&self) -> Vec<String> {
            self.commands.lock().expect("commands").clone()
        }
    }

    impl ShellRunner for RecordingRunner {
        fn run(&self, cmd: &str, _cwd: &Path, _timeout: Duration) -> Result<ShellRunResult> {
            self.commands
                .lock()
                .expect("commands")
                .push(cmd.to_string());
            Ok(self.reply.lock().expect("reply").clone())
        }
    }

    fn registry() -> (tempfile::TempDir, ToolRegistry) {
        let dir = tempfile::tempdir().expect("tempdir");
        let ctx = ToolContext::with_runner(
            dir.path(),
            &AgentConfig::default(),
            Arc::new(RecordingRunner::replying("ok", 0)),
        );
        (dir, ToolRegistry::with_builtins(ctx))
    }

    fn call(tool: &str, args: serde_json::Value) -> Invocation {
        Invocation::new(tool, args.as_object().cloned().unwrap_or_default())
    }

    #[test]
    fn unknown_tool_is_an_error_not_a_panic() {
        let (_dir, registry) = registry();
        let mut memory = ConversationMemory::new();
        let err = registry
            .dispatch(&call("summon_daemon", json!({})), &mut memory)
            .expect_err("unknown tool");
        assert_eq!(err, PipelineError::UnknownTool("summon_daemon".to_string()));
    }

    #[test]
    fn tool_errors_and_panics_are_contained() {
        let (_dir, mut registry) = registry();
        registry.register("always_fails", "fails", ToolSchema::new(), |_, _| {
            Err(anyhow!("disk on fire"))
        });
        registry.register("always_panics", "panics", ToolSchema::new(), |_, _| {
            panic!("boom")
        });
        let mut memory = ConversationMemory::new();

        let failed = registry
            .dispatch(&call("always_fails", json!({})), &mut memory)
            .expect("dispatch");
        assert!(!failed.success);
        assert_eq!(failed.message, "always_fails failed: disk on fire");

        let panicked = registry
            .dispatch(&call("always_panics", json!({})), &mut memory)
            .expect("dispatch");
        assert!(!panicked.success);
        assert!(panicked.message.contains("panicked: boom"));
    }

    #[test]
    fn successful_write_records_touched_path() {
        let (dir, registry) = registry();
        let mut memory = ConversationMemory::new();
        let outcome = registry
            .dispatch(
                &call("write_file", json!({"filepath": "notes.txt", "content": "hi"})),
                &mut memory,
            )
            .expect("dispatch");
        assert!(outcome.success, "{}", outcome.message);
        assert!(outcome.touched_paths.contains("notes.txt"));
        assert_eq!(memory.recent_files(10), vec!["notes.txt"]);
        assert_eq!(
            memory.most_recent(None).map(|e| e.kind),
            Some(TouchKind::Written)
        );
        assert_eq!(
            std::fs::read_to_string(dir.path().join("notes.txt")).expect("read"),
            "hi"
        );
    }

    #[test]
    fn read_tools_and_failures_touch_nothing() {
        let (dir, registry) = registry();
        std::fs::write(dir.path().join("a.txt"), "x").expect("seed");
        let mut memory = ConversationMemory::new();

        let read = registry
            .dispatch(&call("read_file", json!({"filepath": "a.txt"})), &mut memory)
            .expect("dispatch");
        assert!(read.success);
        assert!(read.touched_paths.is_empty());

        let failed = registry
            .dispatch(&call("delete_file", json!({"filepath": "missing.txt"})), &mut memory)
            .expect("dispatch");
        assert!(!failed.success);
        assert!(memory.recent_files(10).is_empty());
    }

    #[test]
    fn prepare_normalizes_and_reports_missing_parameters() {
        let (_dir, registry) = registry();
        let mut invocation = call("write_file", json!({"path": "a.py", "content": "x=1"}));
        let warnings = registry.prepare(&mut invocation).expect("prepare");
        assert!(warnings.is_empty());
        assert_eq!(
            invocation.arguments,
            json!({"filepath": "a.py", "content": "x=1"})
                .as_object()
                .cloned()
                .unwrap_or_default()
        );

        let mut incomplete = call("write_file", json!({"content": "x=1", "mode": "w"}));
        let err = registry.prepare(&mut incomplete).expect_err("missing filepath");
        assert_eq!(
            err,
            PipelineError::MissingParameter {
                tool: "write_file".to_string(),
                missing: vec!["filepath".to_string()],
            }
        );
    }

    #[test]
    fn prepare_fills_documented_defaults() {
        let (_dir, registry) = registry();
        let mut invocation = call("git_log", json!({"n": "3"}));
        registry.prepare(&mut invocation).expect("prepare");
        assert_eq!(invocation.int_arg("count"), Some(3));

        let mut push = call("git_push", json!({}));
        registry.prepare(&mut push).expect("prepare");
        assert_eq!(push.str_arg("remote"), Some("origin"));
        assert_eq!(push.bool_arg("force"), Some(false));
    }

    #[test]
    fn custom_tools_register_with_schema() {
        let (_dir, mut registry) = registry();
        registry.register(
            "shout",
            "Upper-cases text",
            ToolSchema::new()
                .required("text", ParamType::String, "text")
                .touches("text", TouchKind::Written),
            |_, args| {
                Ok(args
                    .get("text")
                    .and_then(|v| v.as_str())
                    .unwrap_or_default()
                    .to_uppercase())
            },
        );
        assert!(registry.contains("shout"));
        let descriptor = registry
            .descriptors()
            .into_iter()
            .find(|d| d.name == "shout")
            .expect("descriptor");
        assert_eq!(descriptor.signature, "shout(text)");

        let mut memory = ConversationMemory::new();
        let outcome = registry
            .dispatch(&call("shout", json!({"text": "hey"})), &mut memory)
            .expect("dispatch");
        assert_eq!(outcome.message, "HEY");
    }

    #[test]
    fn builtin_catalog_is_complete() {
        let (_dir, registry) = registry();
        for name in [
            "read_file",
            "write_file",
            "delete_file",
            "list_files",
            "create_folder",
            "delete_folder",
            "run_command",
            "run_python",
            "check_syntax",
            "python_lint",
            "analyze_complexity",
            "security_scan",
            "git_status",
            "git_diff",
            "git_log",
            "git_add",
            "git_commit",
            "git_push",
            "git_pull",
            "git_branch",
        ] {
            assert!(registry.contains(name), "{name} missing");
        }
        assert_eq!(registry.names().len(), 20);
    }
}
