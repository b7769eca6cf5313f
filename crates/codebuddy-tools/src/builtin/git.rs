use super::{flag, opt_str, str_arg};
use crate::ToolContext;
use anyhow::{Result, anyhow, bail};
use codebuddy_core::Arguments;

fn git(ctx: &ToolContext, args: &[&str]) -> Result<String> {
    let quoted = args
        .iter()
        .map(|arg| shell_words::quote(arg).into_owned())
        .collect::<Vec<_>>()
        .join(" ");
    let cmd = format!("git {quoted}");
    ctx.run_shell(&cmd)?.into_output(&cmd, ctx.timeout)
}

fn or_default(output: String, fallback: &str) -> String {
    if output.trim().is_empty() {
        fallback.to_string()
    } else {
        output
    }
}

pub(super) fn status(ctx: &ToolContext, _args: &Arguments) -> Result<String> {
    let out = git(ctx, &["status", "--short", "--branch"])?;
    // A clean tree prints only the `## branch` header.
    if out.lines().all(|line| line.starts_with("##")) {
        return Ok(format!("{}\nWorking tree clean", out.trim()).trim().to_string());
    }
    Ok(out)
}

pub(super) fn diff(ctx: &ToolContext, args: &Arguments) -> Result<String> {
    let mut argv = vec!["diff"];
    if flag(args, "staged") {
        argv.push("--cached");
    }
    if let Some(path) = opt_str(args, "filepath") {
        argv.push("--");
        argv.push(path);
    }
    Ok(or_default(git(ctx, &argv)?, "No changes"))
}

pub(super) fn log(ctx: &ToolContext, args: &Arguments) -> Result<String> {
    let count = args
        .get("count")
        .and_then(|v| v.as_i64())
        .unwrap_or(10)
        .clamp(1, 200)
        .to_string();
    Ok(or_default(
        git(ctx, &["log", "--oneline", "-n", &count])?,
        "No commits yet",
    ))
}

pub(super) fn add(ctx: &ToolContext, args: &Arguments) -> Result<String> {
    let files = opt_str(args, "files").unwrap_or(".");
    let paths = shell_words::split(files).map_err(|e| anyhow!("invalid file list: {e}"))?;
    if paths.is_empty() {
        bail!("no files to stage");
    }
    let mut argv = vec!["add", "--"];
    argv.extend(paths.iter().map(String::as_str));
    git(ctx, &argv)?;
    Ok(format!("Staged {}", paths.join(" ")))
}

pub(super) fn commit(ctx: &ToolContext, args: &Arguments) -> Result<String> {
    let message = str_arg(args, "message")?;
    let out = git(ctx, &["commit", "-m", message])?;
    Ok(or_default(out, &format!("Committed: {message}")))
}

pub(super) fn push(ctx: &ToolContext, args: &Arguments) -> Result<String> {
    let remote = opt_str(args, "remote").unwrap_or("origin");
    let mut argv = vec!["push"];
    if flag(args, "force") {
        argv.push("--force-with-lease");
    }
    argv.push(remote);
    if let Some(branch) = opt_str(args, "branch") {
        argv.push(branch);
    }
    let out = git(ctx, &argv)?;
    Ok(or_default(out, &format!("Pushed to {remote}")))
}

pub(super) fn pull(ctx: &ToolContext, args: &Arguments) -> Result<String> {
    let remote = opt_str(args, "remote").unwrap_or("origin");
    let mut argv = vec!["pull", remote];
    if let Some(branch) = opt_str(args, "branch") {
        argv.push(branch);
    }
    Ok(or_default(git(ctx, &argv)?, "Already up to date"))
}

pub(super) fn branch(ctx: &ToolContext, args: &Arguments) -> Result<String> {
    let action = opt_str(args, "action").unwrap_or("list").to_ascii_lowercase();
    if matches!(action.as_str(), "list" | "") {
        return Ok(or_default(git(ctx, &["branch", "--list"])?, "No branches yet"));
    }
    let name = opt_str(args, "name").ok_or_else(|| anyhow!("branch name required for {action}"))?;
    match action.as_str() {
        "create" | "new" => {
            git(ctx, &["branch", name])?;
            Ok(format!("Created branch {name}"))
        }
        "switch" | "checkout" => {
            git(ctx, &["checkout", name])?;
            Ok(format!("Switched to branch {name}"))
        }
        "delete" | "remove" => {
            git(ctx, &["branch", "-d", name])?;
            Ok(format!("Deleted branch {name}"))
        }
        other => bail!("unsupported branch action: {other}"),
    }
}
