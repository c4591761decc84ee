mod cli;
mod client;
mod copypaste;
mod dnd;
mod engine;
mod ipc;
mod notify;
mod payload;
mod service;
mod staging;
mod transport;

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use cli::{Cli, Command};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Run {
            socket,
            staging_root,
            ungrab_timeout_ms,
            dnd_disabled,
            copypaste_disabled,
        } => {
            let socket = resolve_socket(socket, "run");
            let mut config = service::ServiceConfig::new(socket);
            if let Some(root) = staging_root {
                config = config.with_staging_root(root);
            }
            config.ungrab_timeout = Duration::from_millis(ungrab_timeout_ms);
            config.dnd_allowed = !dnd_disabled;
            config.cp_allowed = !copypaste_disabled;

            if let Err(e) = service::run(config).await {
                tracing::error!(error = %e, "service failed");
                eprintln!("dndcpd run: {e}");
                std::process::exit(1);
            }
        }
        Command::Status { socket, watch } => {
            let socket = resolve_socket(socket, "status");
            if let Err(e) = client::status(&socket, watch).await {
                tracing::error!(error = %e, "status failed");
                eprintln!("dndcpd status: {e}");
                std::process::exit(1);
            }
        }
    }
}

fn resolve_socket(explicit: Option<PathBuf>, command: &str) -> PathBuf {
    match explicit {
        Some(path) => path,
        None => service::default_socket_path().unwrap_or_else(|e| {
            eprintln!("dndcpd {command}: {e}");
            std::process::exit(1);
        }),
    }
}
