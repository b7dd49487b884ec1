pub mod commands;

use clap::{Parser, Subcommand};
use std::process::ExitCode;

#[derive(Debug, Parser)]
#[command(
    name = "cafe",
    about = "Cafe assistant operator CLI",
    long_about = "Inspect configuration, check runtime readiness, and ask the assistant one-off questions.",
    after_help = "Examples:\n  cafe doctor --json\n  cafe config\n  cafe ask \"What pizzas do you have?\""
)]
pub struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(
        about = "Inspect effective configuration values with source attribution and redaction"
    )]
    Config,
    #[command(about = "Check config, customer database, knowledge base, and scanner readiness")]
    Doctor {
        #[arg(long, help = "Emit machine-readable JSON output")]
        json: bool,
    },
    #[command(about = "Ask one stateless question and print the answer as JSON")]
    Ask {
        #[arg(help = "The customer message to answer")]
        message: String,
    },
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();

    let result = match cli.command {
        Command::Config => {
            commands::CommandResult { exit_code: 0, output: commands::config::run() }
        }
        Command::Doctor { json } => commands::doctor::run(json),
        Command::Ask { message } => commands::ask::run(&message),
    };

    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}
