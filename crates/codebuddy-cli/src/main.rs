use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

mod commands;
mod context;
mod output;

use commands::admin::{run_classify, run_config, run_tools};
use commands::chat::{run_chat, run_once};
use context::resolve_workspace;

#[derive(Parser)]
#[command(name = "codebuddy")]
#[command(about = "Terminal coding assistant with risk-gated tool execution", long_about = None)]
struct Cli {
    /// Project directory the assistant works in (defaults to the current directory).
    #[arg(long, global = true)]
    workspace: Option<PathBuf>,

    /// Echo debug lines to stderr.
    #[arg(short = 'v', long = "verbose", global = true)]
    verbose: bool,

    /// Never call the remote model; answer with built-in rules.
    #[arg(long, global = true)]
    offline: bool,

    /// Non-interactive mode: reject every call that needs approval.
    #[arg(long = "no-input", global = true)]
    no_input: bool,

    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Interactive session (default).
    Chat,
    /// Process a single request and exit.
    Run(RunArgs),
    /// Show the risk assessment for a tool call without running it.
    Classify(ClassifyArgs),
    /// List registered tools and their parameters.
    Tools,
    /// Print the effective configuration.
    Config,
}

#[derive(Args)]
struct RunArgs {
    #[arg(required = true, trailing_var_arg = true)]
    prompt: Vec<String>,
}

#[derive(Args)]
struct ClassifyArgs {
    tool: String,
    /// Arguments as a JSON object, e.g. '{"filepath":"main.py"}'.
    #[arg(long)]
    args: Option<String>,
}

fn main() -> Result<()> {
    let _ = dotenvy::dotenv();
    let mut cli = Cli::parse();
    let workspace = resolve_workspace(cli.workspace.as_deref())?;

    let command = cli.command.take().unwrap_or(Commands::Chat);
    match command {
        Commands::Chat => run_chat(&workspace, &cli),
        Commands::Run(args) => run_once(&workspace, &cli, &args.prompt.join(" ")),
        Commands::Classify(args) => run_classify(&workspace, &cli, &args.tool, args.args.as_deref()),
        Commands::Tools => run_tools(&workspace, &cli),
        Commands::Config => run_config(&workspace, &cli),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn global_flags_parse_after_subcommand() {
        let cli = Cli::try_parse_from(["codebuddy", "run", "--offline", "--json", "list", "files"])
            .expect("parse");
        assert!(cli.offline);
        assert!(cli.json);
        match cli.command {
            Some(Commands::Run(args)) => assert_eq!(args.prompt, vec!["list", "files"]),
            _ => panic!("expected run"),
        }
    }

    #[test]
    fn no_subcommand_means_chat() {
        let cli = Cli::try_parse_from(["codebuddy", "--no-input"]).expect("parse");
        assert!(cli.no_input);
        assert!(cli.command.is_none());
    }
}
