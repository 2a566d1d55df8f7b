//! CLI module for Coderun
//!
//! - `serve`: HTTP and websocket server
//! - `run`: execute one program and print the result
//! - `doctor`: check interpreter, container runtime and remote settings

use clap::{Parser, Subcommand};
use std::path::PathBuf;

pub mod doctor;
pub mod run;

/// Coderun sandboxed execution service
#[derive(Parser, Debug)]
#[command(name = "coderun")]
#[command(about = "Run untrusted programs in an isolated sandbox")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start the server
    Serve,
    /// Execute a source file once and print the JSON result
    Run {
        /// Source file, or `-` to read it from standard input
        file: PathBuf,
        /// Text fed to the program's standard input
        #[arg(long, default_value = "")]
        stdin: String,
    },
    /// Run system diagnostics
    Doctor,
}

/// Run the CLI command
pub async fn run(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Some(Commands::Serve) => crate::server::run().await,
        Some(Commands::Run { file, stdin }) => run::run(&file, stdin).await,
        Some(Commands::Doctor) => doctor::run().await,
        None => {
            let mut cmd = <Cli as clap::CommandFactory>::command();
            cmd.print_help()?;
            println!();
            Ok(())
        }
    }
}
