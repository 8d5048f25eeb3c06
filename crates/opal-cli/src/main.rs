// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]

use clap::{Parser, Subcommand};
use opal_cli::commands;
use opal_cli::config::OpalConfig;
use opal_cli::format::render_error;
use opal_error::OpalError;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "opal", version, about = "Opal command-execution tool")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable debug logging.
    #[arg(long, global = true)]
    debug: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Plan a file and execute it directly.
    Run {
        /// The `*.opl` source file.
        file: PathBuf,
        /// Function to run; omit for script mode.
        target: Option<String>,
        /// Answer every @confirm prompt with yes.
        #[arg(long)]
        yes: bool,
    },
    /// Dry run: print the planned step tree without executing.
    Plan {
        /// The `*.opl` source file.
        file: PathBuf,
        /// Function to plan; omit for script mode.
        target: Option<String>,
    },
    /// Contract artifacts: write one, or verify and execute one.
    Contract {
        #[command(subcommand)]
        command: ContractCommands,
    },
    /// Print a decorator's parameter schema, or list all decorators.
    Schema {
        /// Decorator path (e.g. `retry`, `ssh.connect`).
        decorator: Option<String>,
    },
}

#[derive(Subcommand, Debug)]
enum ContractCommands {
    /// Plan a file and write the signed contract artifact.
    Write {
        /// The `*.opl` source file.
        file: PathBuf,
        /// Function to contract; omit for script mode.
        target: Option<String>,
        /// Output path for the contract file.
        #[arg(short, long)]
        out: PathBuf,
    },
    /// Verify a contract against the current source and execute it.
    Exec {
        /// The contract file.
        contract: PathBuf,
        /// The current `*.opl` source file.
        #[arg(long)]
        source: PathBuf,
        /// Answer every @confirm prompt with yes.
        #[arg(long)]
        yes: bool,
    },
}

fn main() {
    let cli = Cli::parse();

    let default_level = if cli.debug { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    std::process::exit(match dispatch(cli) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("{}", render_error(&err));
            err.exit_code()
        }
    });
}

fn dispatch(cli: Cli) -> Result<i32, OpalError> {
    let config = OpalConfig::load_default()?;
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| OpalError::internal(format!("cannot start runtime: {e}")))?;

    match cli.command {
        Commands::Run { file, target, yes } => {
            runtime.block_on(commands::run_file(&file, target.as_deref(), yes, &config))
        }
        Commands::Plan { file, target } => {
            let rendered = commands::plan_file(&file, target.as_deref())?;
            print!("{rendered}");
            Ok(0)
        }
        Commands::Contract { command } => match command {
            ContractCommands::Write { file, target, out } => {
                let hash = commands::contract_write(&file, target.as_deref(), &out)?;
                println!("{hash}");
                Ok(0)
            }
            ContractCommands::Exec {
                contract,
                source,
                yes,
            } => runtime.block_on(commands::contract_exec(&contract, &source, yes, &config)),
        },
        Commands::Schema { decorator } => {
            let rendered = commands::schema(decorator.as_deref())?;
            println!("{rendered}");
            Ok(0)
        }
    }
}
