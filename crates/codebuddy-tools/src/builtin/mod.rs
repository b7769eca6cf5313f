mod analysis;
mod exec;
mod fs;
mod git;

use crate::ToolRegistry;
use anyhow::{Result, anyhow};
use codebuddy_core::{Arguments, ParamType, ToolSchema, TouchKind};
use serde_json::json;

pub(crate) fn register_builtin_tools(registry: &mut ToolRegistry) {
    registry.register(
        "read_file",
        "Show the contents of a file with line numbers",
        file_schema("file to read"),
        fs::read_file,
    );
    registry.register(
        "write_file",
        "Create or overwrite a file with the given content",
        file_schema("file to write")
            .required("content", ParamType::String, "full file content")
            .touches("filepath", TouchKind::Written),
        fs::write_file,
    );
    registry.register(
        "delete_file",
        "Delete a single file",
        file_schema("file to delete").touches("filepath", TouchKind::Deleted),
        fs::delete_file,
    );
    registry.register(
        "list_files",
        "List the entries of a directory",
        ToolSchema::new()
            .optional("directory", ParamType::String, Some(json!(".")), "directory to list")
            .optional("recursive", ParamType::Boolean, Some(json!(false)), "descend into subdirectories")
            .alias("path", "directory")
            .alias("folder", "directory"),
        fs::list_files,
    );
    registry.register(
        "create_folder",
        "Create a directory, including missing parents",
        folder_schema("folder to create").touches("folderpath", TouchKind::Written),
        fs::create_folder,
    );
    registry.register(
        "delete_folder",
        "Delete a directory and everything below it",
        folder_schema("folder to delete").touches("folderpath", TouchKind::Deleted),
        fs::delete_folder,
    );
    registry.register(
        "run_command",
        "Run a shell command in the workspace",
        ToolSchema::new()
            .required("command", ParamType::String, "shell command line")
            .alias("cmd", "command"),
        exec::run_command,
    );
    registry.register(
        "run_python",
        "Run a Python script",
        file_schema("script to run")
            .optional("args", ParamType::String, Some(json!("")), "extra command-line arguments")
            .alias("script", "filepath"),
        exec::run_python,
    );
    registry.register(
        "check_syntax",
        "Check a Python file for syntax errors",
        file_schema("Python file to check"),
        exec::check_syntax,
    );
    registry.register(
        "python_lint",
        "Lint a Python file for style, complexity and risky patterns",
        file_schema("Python file to lint"),
        analysis::python_lint,
    );
    registry.register(
        "analyze_complexity",
        "Report line counts, function sizes and cyclomatic complexity of a Python file",
        file_schema("Python file to analyze"),
        analysis::analyze_complexity,
    );
    registry.register(
        "security_scan",
        "Scan a Python file for insecure calls and hardcoded secrets",
        file_schema("Python file to scan"),
        analysis::security_scan,
    );
    registry.register(
        "git_status",
        "Show the working tree status",
        ToolSchema::new(),
        git::status,
    );
    registry.register(
        "git_diff",
        "Show unstaged (or staged) changes",
        ToolSchema::new()
            .optional("filepath", ParamType::String, None, "limit the diff to one path")
            .optional("staged", ParamType::Boolean, Some(json!(false)), "diff the index instead"),
        git::diff,
    );
    registry.register(
        "git_log",
        "Show recent commits",
        ToolSchema::new().optional("count", ParamType::Integer, Some(json!(10)), "number of commits"),
        git::log,
    );
    registry.register(
        "git_add",
        "Stage files for commit",
        ToolSchema::new()
            .optional("files", ParamType::String, Some(json!(".")), "paths to stage")
            .alias("filepath", "files"),
        git::add,
    );
    registry.register(
        "git_commit",
        "Commit staged changes",
        ToolSchema::new()
            .required("message", ParamType::String, "commit message")
            .alias("msg", "message"),
        git::commit,
    );
    registry.register(
        "git_push",
        "Push commits to a remote",
        ToolSchema::new()
            .optional("remote", ParamType::String, Some(json!("origin")), "remote name")
            .optional("branch", ParamType::String, None, "branch to push")
            .optional("force", ParamType::Boolean, Some(json!(false)), "force with lease"),
        git::push,
    );
    registry.register(
        "git_pull",
        "Pull and merge from a remote",
        ToolSchema::new()
            .optional("remote", ParamType::String, Some(json!("origin")), "remote name")
            .optional("branch", ParamType::String, None, "branch to pull"),
        git::pull,
    );
    registry.register(
        "git_branch",
        "List, create, switch or delete branches",
        ToolSchema::new()
            .optional("action", ParamType::String, Some(json!("list")), "list|create|switch|delete")
            .optional("name", ParamType::String, None, "branch name")
            .alias("branch", "name"),
        git::branch,
    );
}

fn file_schema(description: &str) -> ToolSchema {
    ToolSchema::new()
        .required("filepath", ParamType::String, description)
        .alias("path", "filepath")
        .alias("file", "filepath")
        .alias("filename", "filepath")
}

fn folder_schema(description: &str) -> ToolSchema {
    ToolSchema::new()
        .required("folderpath", ParamType::String, description)
        .alias("path", "folderpath")
        .alias("folder", "folderpath")
        .alias("directory", "folderpath")
        .alias("dir", "folderpath")
}

fn str_arg<'a>(args: &'a Arguments, key: &str) -> Result<&'a str> {
    args.get(key)
        .and_then(|v| v.as_str())
        .filter(|s| !s.trim().is_empty())
        .ok_or_else(|| anyhow!("{key} missing"))
}

fn opt_str<'a>(args: &'a Arguments, key: &str) -> Option<&'a str> {
    args.get(key)
        .and_then(|v| v.as_str())
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

fn flag(args: &Arguments, key: &str) -> bool {
    args.get(key).and_then(|v| v.as_bool()).unwrap_or(false)
}
