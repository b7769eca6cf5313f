use crate::Cli;
use crate::context::{build_engine, load_config};
use crate::output::{print_json, redact_config_for_display};
use anyhow::{Result, anyhow};
use codebuddy_core::{AppConfig, Arguments, Invocation, runtime_dir};
use serde_json::{Value, json};
use std::path::Path;

pub(crate) fn parse_arguments(raw: Option<&str>) -> Result<Arguments> {
    let Some(raw) = raw else {
        return Ok(Arguments::new());
    };
    match serde_json::from_str::<Value>(raw)? {
        Value::Object(map) => Ok(map),
        other => Err(anyhow!("--args must be a JSON object, got {other}")),
    }
}

pub(crate) fn run_classify(workspace: &Path, cli: &Cli, tool: &str, raw_args: Option<&str>) -> Result<()> {
    let engine = build_engine(workspace, cli)?;
    let mut invocation = Invocation::new(tool, parse_arguments(raw_args)?);
    let assessment = engine.classify_only(&mut invocation)?;
    if cli.json {
        print_json(&json!({
            "invocation": invocation,
            "assessment": assessment,
        }))?;
    } else {
        println!("{}", invocation.render());
        println!(
            "risk: {}{}",
            assessment.tier,
            if assessment.requires_confirmation {
                " (approval required)"
            } else {
                ""
            }
        );
        for reason in &assessment.reasons {
            println!("  - {reason}");
        }
    }
    Ok(())
}

pub(crate) fn run_tools(workspace: &Path, cli: &Cli) -> Result<()> {
    let engine = build_engine(workspace, cli)?;
    let descriptors = engine.registry().descriptors();
    if cli.json {
        print_json(&descriptors)?;
    } else {
        for tool in descriptors {
            println!("{:<48} {}", tool.signature, tool.description);
        }
    }
    Ok(())
}

pub(crate) fn run_config(workspace: &Path, cli: &Cli) -> Result<()> {
    let cfg = load_config(workspace, cli)?;
    let display = redact_config_for_display(&cfg)?;
    if cli.json {
        print_json(&json!({
            "config": display,
            "paths": {
                "user": AppConfig::user_settings_path(),
                "project": AppConfig::project_settings_path(workspace),
                "local": AppConfig::project_local_settings_path(workspace),
                "runtime": runtime_dir(workspace),
            },
        }))?;
    } else {
        println!("{}", serde_json::to_string_pretty(&display)?);
    }
    Ok(())
}
