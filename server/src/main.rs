//! CLI entry point for the ibdesk tool server.

use std::path::PathBuf;
use std::process;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use log::info;
use tokio::net::TcpListener;

use ibdesk::Desk;
use ibdesk::ibkr::IbkrConnector;
use ibdesk_server::commands;
use ibdesk_server::config::Config;
use ibdesk_server::rpc::{self, RpcServer};
use ibdesk_server::tools::Tools;

#[derive(Parser)]
#[command(name = "ibdesk")]
#[command(about = "Interactive Brokers desk exposed as JSON-RPC tools")]
#[command(version)]
struct Cli {
    /// Path to config.toml (optional; defaults and environment apply when absent)
    #[arg(long, default_value = "config.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Serve tools over stdin/stdout
    Stdio,

    /// Serve tools over TCP
    Serve {
        /// Listen port (overrides config and MCP_PORT)
        #[arg(long)]
        port: Option<u16>,
    },

    /// Check IBKR connection
    Status,

    /// Show current IBKR positions
    Positions,
}

#[tokio::main]
async fn main() {
    // stdout carries the stdio protocol; logs go to stderr.
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_secs()
        .target(env_logger::Target::Stderr)
        .init();

    let cli = Cli::parse();

    let config = match Config::resolve(&cli.config) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error loading config: {e}");
            process::exit(1);
        }
    };

    if let Err(e) = run(cli.command, config).await {
        eprintln!("Error: {e:#}");
        process::exit(1);
    }
}

async fn run(command: Command, config: Config) -> anyhow::Result<()> {
    let desk = Arc::new(Desk::new(
        Arc::new(IbkrConnector::new()),
        config.connect_params(),
        config.desk_settings(),
    ));
    info!(
        "Gateway {} ({:?}), read_only={}",
        config.address(),
        config.connection.trading_mode,
        desk.is_read_only()
    );

    match command {
        Command::Status => commands::check_status(&desk).await?,
        Command::Positions => commands::show_positions(&desk).await?,
        Command::Stdio => {
            let supervisor = desk.spawn_supervisor();
            let server = Arc::new(RpcServer::new(Tools::new(
                Arc::clone(&desk),
                config.service.default_exchange.clone(),
            )));
            rpc::serve_stdio(server).await.context("stdio transport failed")?;
            supervisor.stop();
        }
        Command::Serve { port } => {
            let supervisor = desk.spawn_supervisor();
            let server = Arc::new(RpcServer::new(Tools::new(
                Arc::clone(&desk),
                config.service.default_exchange.clone(),
            )));
            let port = port.unwrap_or(config.service.listen_port);
            let listener = TcpListener::bind(("0.0.0.0", port))
                .await
                .with_context(|| format!("failed to bind port {port}"))?;
            let result = rpc::serve_tcp(server, listener).await;
            supervisor.stop();
            result.context("TCP transport failed")?;
        }
    }
    Ok(())
}
