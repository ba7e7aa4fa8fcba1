use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::filter::EnvFilter;

mod commands;
mod config;

use commands::{compile::CompileCommand, disasm::DisasmCommand, run::RunCommand};

#[derive(Parser)]
#[command(name = "heron", version, about = "Heron bytecode VM")]
struct Cli {
    /// Configuration file (defaults to the nearest heron.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute a script tree and print its completion value
    Run(RunCommand),
    /// Print the bytecode of a script tree
    Disasm(DisasmCommand),
    /// Compile a script tree to a JSON unit
    Compile(CompileCommand),
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = config::load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Run(cmd) => cmd.run(&config),
        Commands::Disasm(cmd) => cmd.run(&config),
        Commands::Compile(cmd) => cmd.run(&config),
    }
}
