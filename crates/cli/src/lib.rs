pub mod commands;

use clap::{Parser, Subcommand};
use std::process::ExitCode;

#[derive(Debug, Parser)]
#[command(
    name = "haulr",
    about = "Haulr operator CLI",
    long_about = "Operate the Haulr request lifecycle store: migrations, config inspection, readiness checks, and one-off expiry sweeps.",
    after_help = "Examples:\n  haulr doctor --json\n  haulr config\n  haulr sweep --batch-size 50"
)]
pub struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(about = "Apply pending database migrations and return structured status output")]
    Migrate,
    #[command(
        about = "Inspect effective configuration values with source attribution and redaction"
    )]
    Config,
    #[command(about = "Validate config, DB connectivity, and migration state")]
    Doctor {
        #[arg(long, help = "Emit machine-readable JSON output")]
        json: bool,
    },
    #[command(about = "Run a single expiry sweep pass and report what changed")]
    Sweep {
        #[arg(long, help = "Override sweeper.batch_size for this pass")]
        batch_size: Option<u32>,
    },
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();

    let result = match cli.command {
        Command::Migrate => commands::migrate::run(),
        Command::Config => {
            commands::CommandResult { exit_code: 0, output: commands::config::run() }
        }
        Command::Doctor { json } => {
            let (passed, output) = commands::doctor::run(json);
            commands::CommandResult { exit_code: if passed { 0 } else { 1 }, output }
        }
        Command::Sweep { batch_size } => commands::sweep::run(batch_size),
    };

    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}
