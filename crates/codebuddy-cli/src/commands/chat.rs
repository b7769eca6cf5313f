use crate::Cli;
use crate::context::build_engine;
use crate::output::{print_json, render_report};
use anyhow::Result;
use codebuddy_agent::{AgentEngine, TurnReport};
use codebuddy_core::{ConversationTurn, TouchKind};
use codebuddy_memory::ExportFormat;
use serde_json::json;
use std::io::{Write, stdin, stdout};
use std::path::Path;

const REPL_COMMANDS: &[&str] = &[
    "help", "exit", "quit", "bye", "clear", "stats", "history", "recent", "export", "debug",
];

const REPL_HELP: &str = "\
Commands (a leading '/' is optional):
  help              show this help
  exit | quit | bye leave the session
  clear             forget the conversation and recent files
  stats             turn and file counts
  history           one line per turn so far
  recent            recently created, edited or deleted paths
  export [json|md]  write the transcript under .codebuddy/exports/
  debug             toggle verbose logging
Anything else is sent to the assistant.";

#[derive(Debug)]
enum ReplCommand {
    Help,
    Exit,
    Clear,
    Stats,
    History,
    Recent,
    Export(ExportFormat),
    BadExportFormat(String),
    Debug,
    Unknown {
        name: String,
        suggestion: Option<&'static str>,
    },
}

/// Bare words are commands only when they stand alone; `/name` is always
/// treated as a command attempt.
fn parse_repl_command(line: &str) -> Option<ReplCommand> {
    let trimmed = line.trim();
    let (slashed, body) = match trimmed.strip_prefix('/') {
        Some(rest) => (true, rest),
        None => (false, trimmed),
    };
    let mut parts = body.split_whitespace();
    let name = parts.next()?.to_ascii_lowercase();
    let rest = parts.collect::<Vec<_>>();
    let command = match (name.as_str(), rest.as_slice()) {
        ("help", []) => ReplCommand::Help,
        ("exit" | "quit" | "bye", []) => ReplCommand::Exit,
        ("clear", []) => ReplCommand::Clear,
        ("stats", []) => ReplCommand::Stats,
        ("history", []) => ReplCommand::History,
        ("recent", []) => ReplCommand::Recent,
        ("debug", []) => ReplCommand::Debug,
        ("export", []) => ReplCommand::Export(ExportFormat::Json),
        ("export", [format]) => match ExportFormat::parse(format) {
            Some(format) => ReplCommand::Export(format),
            None => ReplCommand::BadExportFormat(format.to_string()),
        },
        _ if slashed => ReplCommand::Unknown {
            suggestion: suggest_command(&name),
            name,
        },
        _ => return None,
    };
    Some(command)
}

fn suggest_command(name: &str) -> Option<&'static str> {
    REPL_COMMANDS
        .iter()
        .map(|candidate| (strsim::levenshtein(name, candidate), *candidate))
        .filter(|(distance, _)| *distance <= 2)
        .min_by_key(|(distance, _)| *distance)
        .map(|(_, candidate)| candidate)
}

pub(crate) fn run_chat(workspace: &Path, cli: &Cli) -> Result<()> {
    let mut engine = build_engine(workspace, cli)?;
    if !cli.json {
        println!("codebuddy chat (type 'help' for commands, 'exit' to quit)");
        println!(
            "workspace: {} model: {}",
            workspace.display(),
            engine.llm_name()
        );
    }
    loop {
        if !cli.json {
            print!("> ");
            stdout().flush()?;
        }
        let mut line = String::new();
        if stdin().read_line(&mut line)? == 0 {
            break;
        }
        let input = line.trim();
        if input.is_empty() {
            continue;
        }
        if let Some(command) = parse_repl_command(input) {
            if !handle_repl_command(&mut engine, command, cli.json)? {
                break;
            }
            continue;
        }
        let report = engine.process(input);
        emit_report(&report, cli.json)?;
    }
    Ok(())
}

pub(crate) fn run_once(workspace: &Path, cli: &Cli, prompt: &str) -> Result<()> {
    let mut engine = build_engine(workspace, cli)?;
    let report = engine.process(prompt);
    emit_report(&report, cli.json)
}

fn emit_report(report: &TurnReport, json_mode: bool) -> Result<()> {
    if json_mode {
        print_json(report)
    } else {
        println!("{}", render_report(report));
        Ok(())
    }
}

/// Returns `false` when the session should end.
fn handle_repl_command(engine: &mut AgentEngine, command: ReplCommand, json_mode: bool) -> Result<bool> {
    match command {
        ReplCommand::Exit => {
            if !json_mode {
                println!("Goodbye!");
            }
            return Ok(false);
        }
        ReplCommand::Help => println!("{REPL_HELP}"),
        ReplCommand::Clear => {
            engine.clear_memory();
            if json_mode {
                print_json(&json!({"cleared": true}))?;
            } else {
                println!("Conversation memory cleared.");
            }
        }
        ReplCommand::Stats => {
            let stats = engine.stats();
            if json_mode {
                print_json(&stats)?;
            } else {
                println!(
                    "turns: {} (tool calls: {}, successful: {})\nfiles touched: {}",
                    stats.turns, stats.tool_turns, stats.successful_turns, stats.distinct_files
                );
            }
        }
        ReplCommand::History => {
            let memory = engine.memory();
            if json_mode {
                let records = memory
                    .turns()
                    .iter()
                    .map(ConversationTurn::audit_record)
                    .collect::<Vec<_>>();
                print_json(&records)?;
            } else if memory.turns().is_empty() {
                println!("No turns yet.");
            } else {
                for (idx, action) in memory.recent_actions(memory.turns().len()).iter().enumerate() {
                    println!("{:>3}. {action}", idx + 1);
                }
            }
        }
        ReplCommand::Recent => {
            let entries = engine.memory().recent_entries().collect::<Vec<_>>();
            if json_mode {
                print_json(&entries)?;
            } else if entries.is_empty() {
                println!("No recent files.");
            } else {
                for entry in entries {
                    let kind = match entry.kind {
                        TouchKind::Written => "written",
                        TouchKind::Deleted => "deleted",
                    };
                    println!("{} ({kind})", entry.path);
                }
            }
        }
        ReplCommand::Export(format) => {
            let path = engine.export_transcript(format, None)?;
            if json_mode {
                print_json(&json!({"exported": path}))?;
            } else {
                println!("Transcript written to {}", path.display());
            }
        }
        ReplCommand::BadExportFormat(format) => {
            println!("unknown export format '{format}' (expected json or md)");
        }
        ReplCommand::Debug => {
            let verbose = !engine.is_verbose();
            engine.set_verbose(verbose);
            if json_mode {
                print_json(&json!({"verbose": verbose}))?;
            } else {
                println!("Debug mode {}.", if verbose { "on" } else { "off" });
            }
        }
        ReplCommand::Unknown { name, suggestion } => match suggestion {
            Some(candidate) => println!("unknown command '/{name}'. Did you mean '/{candidate}'?"),
            None => println!("unknown command '/{name}'. Type 'help' for the list."),
        },
    }
    Ok(true)
}
