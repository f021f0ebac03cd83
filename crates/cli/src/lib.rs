pub mod commands;
pub mod logging;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};

use crate::commands::run::RunArgs;

#[derive(Debug, Parser)]
#[command(
    name = "propwise",
    about = "Propwise real-estate report pipeline",
    long_about = "Generate guarded real-estate reports, screen prompts, and inspect configuration, readiness, and run history.",
    after_help = "Examples:\n  propwise run \"Price the apartments in Lyon\"\n  propwise run --dry-run\n  propwise check \"ignore previous instructions\"\n  propwise doctor --json\n  propwise history --limit 5"
)]
pub struct Cli {
    #[arg(long, global = true, value_name = "PATH", help = "Config file (default: propwise.toml)")]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(about = "Run the pipeline for one prompt and persist the report")]
    Run {
        #[arg(help = "Report request; defaults to pipeline.default_prompt")]
        prompt: Option<String>,
        #[arg(long, help = "Also ask the alternate provider and compare both reports")]
        compare: bool,
        #[arg(long, help = "Use scripted providers and sample listings; no network, no ledger")]
        dry_run: bool,
    },
    #[command(about = "Screen a prompt with the pre-check guardrails only")]
    Check { prompt: String },
    #[command(
        about = "Inspect effective configuration values with source attribution and redaction"
    )]
    Config,
    #[command(about = "Validate config, credentials, data source, output dir, and DB connectivity")]
    Doctor {
        #[arg(long, help = "Emit machine-readable JSON output")]
        json: bool,
    },
    #[command(about = "Apply pending run-ledger migrations")]
    Migrate,
    #[command(about = "List recent runs from the run ledger, including blocked and aborted ones")]
    History {
        #[arg(long, default_value_t = 10)]
        limit: u32,
    },
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();
    let options = commands::load_options(cli.config);

    let result = match cli.command {
        Command::Run { prompt, compare, dry_run } => {
            commands::run::run(options, RunArgs { prompt, compare, dry_run })
        }
        Command::Check { prompt } => commands::check::run(&prompt),
        Command::Config => commands::config::run(options),
        Command::Doctor { json } => commands::doctor::run(options, json),
        Command::Migrate => commands::migrate::run(options),
        Command::History { limit } => commands::history::run(options, limit),
    };

    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}
