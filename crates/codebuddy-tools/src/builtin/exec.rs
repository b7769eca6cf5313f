use super::{opt_str, str_arg};
use crate::ToolContext;
use anyhow::{Result, anyhow, bail};
use codebuddy_core::Arguments;
use std::path::Path;

pub(super) fn run_command(ctx: &ToolContext, args: &Arguments) -> Result<String> {
    let command = str_arg(args, "command")?;
    let output = ctx
        .run_shell(command)?
        .into_output(&format!("`{command}`"), ctx.timeout)?;
    Ok(non_empty(output, "(no output)"))
}

pub(super) fn run_python(ctx: &ToolContext, args: &Arguments) -> Result<String> {
    let path = str_arg(args, "filepath")?;
    if !ctx.resolve(path).is_file() {
        bail!("script not found: {path}");
    }
    let mut cmd = format!("{} {}", ctx.python, shell_words::quote(path));
    if let Some(extra) = opt_str(args, "args") {
        let words = shell_words::split(extra).map_err(|e| anyhow!("invalid script arguments: {e}"))?;
        for word in &words {
            cmd.push(' ');
            cmd.push_str(&shell_words::quote(word));
        }
    }
    let output = ctx.run_shell(&cmd)?.into_output(path, ctx.timeout)?;
    Ok(non_empty(output, "(script produced no output)"))
}

pub(super) fn check_syntax(ctx: &ToolContext, args: &Arguments) -> Result<String> {
    let path = str_arg(args, "filepath")?;
    let is_python = Path::new(path)
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("py"));
    if !is_python {
        bail!("syntax checking supports Python files only: {path}");
    }
    if !ctx.resolve(path).is_file() {
        bail!("file not found: {path}");
    }
    let cmd = format!("{} -m py_compile {}", ctx.python, shell_words::quote(path));
    ctx.run_shell(&cmd)?
        .into_output(&format!("syntax check of {path}"), ctx.timeout)?;
    Ok(format!("No syntax errors in {path}"))
}

fn non_empty(output: String, placeholder: &str) -> String {
    if output.trim().is_empty() {
        placeholder.to_string()
    } else {
        output
    }
}
