//! deployd — the deployment manager daemon.
//!
//! # Usage
//!
//! ```text
//! deployd run --config deployd.toml --port 5200
//! deployd --log-json run
//! ```

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::info;

use deployd::Daemon;
use deployd_core::DeploydConfig;

#[derive(Parser)]
#[command(name = "deployd", about = "Deployment manager daemon")]
struct Cli {
    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the daemon.
    Run {
        /// Path to deployd.toml. Defaults apply when omitted.
        #[arg(long)]
        config: Option<PathBuf>,

        /// Port to listen on (overrides server.port).
        #[arg(long)]
        port: Option<u16>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    match cli.command {
        Command::Run { config, port } => run(config, port).await,
    }
}

fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,deployd=debug"));

    if json {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

async fn run(config_path: Option<PathBuf>, port: Option<u16>) -> anyhow::Result<()> {
    let mut config = match &config_path {
        Some(path) => DeploydConfig::from_file(path)
            .with_context(|| format!("failed to load {}", path.display()))?,
        None => DeploydConfig::default(),
    };
    if let Some(port) = port {
        config.server.port = port;
    }
    info!(config = ?config_path, port = config.server.port, "deployd starting");

    let port = config.server.port;
    let daemon = Daemon::local(config)?;
    daemon
        .serve(port, async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "failed to listen for shutdown signal");
                std::future::pending::<()>().await;
            }
            info!("shutdown signal received");
        })
        .await?;

    info!("deployd stopped");
    Ok(())
}
