//! stick-agent-server - hosts one agent over HTTP

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;

use stick_core::agent::AgentDefinition;
use stick_core::constants::server::{DEFAULT_HOST, DEFAULT_PORT};
use stick_core::tools::builtin_registry;
use stick_server::{run_server, AppState, ServerConfig};

#[derive(Parser)]
#[command(name = "stick-agent-server")]
#[command(about = "Serve a single Stick agent over HTTP", long_about = None)]
struct Args {
    /// Path to the agent definition JSON
    #[arg(long)]
    config: PathBuf,

    /// Port to listen on
    #[arg(short, long, default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Address to bind
    #[arg(long, default_value = DEFAULT_HOST)]
    host: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let args = Args::parse();

    let definition = AgentDefinition::load_from_path(&args.config)?;
    let tools = builtin_registry().context("Failed to register built-in tools")?;

    tracing::info!(
        agent = %definition.name,
        version = %definition.version,
        tools = definition.tools.len(),
        "Starting agent server"
    );

    let state = AppState::new(definition, Arc::new(tools), args.port);
    run_server(
        state,
        ServerConfig {
            host: args.host,
            port: args.port,
        },
    )
    .await
}
