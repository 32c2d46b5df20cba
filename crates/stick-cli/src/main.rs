//! Stick - register, deploy, and manage local AI agents
//!
//! Each deployed agent runs as its own `stick-agent-server` process. This
//! binary is the controller: it edits the registry, spawns and signals
//! servers, and talks to them over HTTP.

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};

use stick_core::constants::server::DEFAULT_PORT;

mod commands;

/// Stick - local agent manager
#[derive(Parser)]
#[command(name = "stick")]
#[command(about = "Register, deploy, and manage local AI agents", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check an agent definition and print errors and warnings
    Validate {
        /// Project directory or definition file (default: current directory)
        path: Option<PathBuf>,
    },

    /// Register an agent definition without starting it
    Register {
        /// Project directory or definition file (default: current directory)
        path: Option<PathBuf>,
    },

    /// Register an agent and start its server
    Deploy {
        /// Project directory or definition file (default: current directory)
        path: Option<PathBuf>,

        /// Port for the agent server
        #[arg(short, long, default_value_t = DEFAULT_PORT)]
        port: u16,
    },

    /// Stop a running agent server
    Stop {
        /// Agent name
        name: String,
    },

    /// List registered agents and whether they are running
    List,

    /// Send one message to an agent
    ///
    /// Uses the running server when there is one, otherwise answers with an
    /// in-process runtime built from the registered definition.
    Run {
        /// Agent name
        name: String,

        /// Message to send
        #[arg(short, long)]
        message: String,
    },

    /// Stop (if running) and unregister an agent
    Remove {
        /// Agent name
        name: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Validate { path } => commands::validate(path),
        Commands::Register { path } => commands::register(path),
        Commands::Deploy { path, port } => commands::deploy(path, port).await,
        Commands::Stop { name } => commands::stop(&name),
        Commands::List => commands::list(),
        Commands::Run { name, message } => commands::run(&name, &message).await,
        Commands::Remove { name } => commands::remove(&name),
    }
}
