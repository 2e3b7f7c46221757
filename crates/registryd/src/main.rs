use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use registry_core::{ErrorMode, ExecutionMode, RegistryConfig};
use tracing::Level;

/// MCP registry daemon
#[derive(Parser)]
#[command(name = "registryd")]
#[command(version, about = "Serve the MCP model/context/protocol/data registry over HTTP")]
struct Args {
    /// JSON configuration file
    #[arg(long, env = "REGISTRY_CONFIG")]
    config: Option<PathBuf>,

    /// Listen address (host:port), overrides the configured connection
    #[arg(long)]
    listen: Option<String>,

    /// Database endpoint (mem://, surrealkv://<path>, ws://host:port)
    #[arg(long)]
    db_url: Option<String>,

    /// Error reporting: envelope or status
    #[arg(long)]
    error_mode: Option<ErrorMode>,

    /// Execution mode: inline or background
    #[arg(long)]
    execution_mode: Option<ExecutionMode>,

    /// Output logs as JSON
    #[arg(long)]
    json: bool,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,
}

fn apply_args(config: &mut RegistryConfig, args: &Args) -> Result<()> {
    if let Some(listen) = &args.listen {
        let (host, port) = listen
            .rsplit_once(':')
            .with_context(|| format!("--listen expects host:port, got {listen:?}"))?;
        config.connection.host = host.to_string();
        config.connection.port = port
            .parse()
            .with_context(|| format!("invalid port in --listen {listen:?}"))?;
    }
    if let Some(url) = &args.db_url {
        config.database.url = url.clone();
    }
    if let Some(mode) = args.error_mode {
        config.error_mode = mode;
    }
    if let Some(mode) = args.execution_mode {
        config.execution_mode = mode;
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let level = if args.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    registry_core::init_tracing(args.json, level);

    let mut config =
        RegistryConfig::load(args.config.as_deref()).context("failed to load configuration")?;
    apply_args(&mut config, &args)?;
    config.validate()?;

    tracing::info!(
        name = %config.name,
        listen = %config.listen_addr(),
        database = %config.database.url,
        execution_mode = %config.execution_mode,
        "starting registryd"
    );
    registryd::run(config).await
}
