//! repowatch — command-line client for the repowatch status daemon.

use clap::{Parser, Subcommand};
use repowatch_daemon_protocol::{Method, Request, Response, PROTOCOL_VERSION};
use std::env;
use std::path::PathBuf;

mod client;

#[derive(Parser)]
#[command(name = "repowatch", about = "Query the repowatch status daemon", version)]
struct Cli {
    /// Socket path (defaults to $REPOWATCH_DAEMON_SOCKET or ~/.repowatch/daemon.sock).
    #[arg(long, global = true)]
    socket: Option<PathBuf>,

    #[command(subcommand)]
    command: CliCommand,
}

#[derive(Subcommand)]
enum CliCommand {
    /// Show repository status for a path (defaults to the current directory).
    Status { path: Option<PathBuf> },
    /// Show cache statistics.
    Stats,
    /// Invalidate the cache entry for a path (defaults to the current directory).
    Invalidate { path: Option<PathBuf> },
    /// Clear the whole status cache.
    InvalidateAll,
    /// Check daemon health.
    Health,
    /// Ask the daemon to shut down.
    Shutdown,
}

fn main() {
    let cli = Cli::parse();
    if let Err(err) = run(cli) {
        eprintln!("repowatch: {}", err);
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<(), String> {
    let socket = client::socket_path(cli.socket)?;
    let (method, id, params) = match &cli.command {
        CliCommand::Status { path } => (Method::GetStatus, "status", Some(path_params(path)?)),
        CliCommand::Stats => (Method::GetCacheStatistics, "stats", None),
        CliCommand::Invalidate { path } => (
            Method::InvalidateCacheEntry,
            "invalidate",
            Some(path_params(path)?),
        ),
        CliCommand::InvalidateAll => (Method::InvalidateAllCacheEntries, "invalidate-all", None),
        CliCommand::Health => (Method::GetHealth, "health", None),
        CliCommand::Shutdown => (Method::Shutdown, "shutdown", None),
    };

    let request = Request {
        protocol_version: PROTOCOL_VERSION,
        method,
        id: Some(id.to_string()),
        params,
    };
    render(client::send_request(&socket, request)?)
}

fn path_params(path: &Option<PathBuf>) -> Result<serde_json::Value, String> {
    let path = match path {
        Some(path) => path.clone(),
        None => env::current_dir()
            .map_err(|err| format!("Failed to resolve current directory: {}", err))?,
    };
    Ok(serde_json::json!({ "path": path.to_string_lossy() }))
}

fn render(response: Response) -> Result<(), String> {
    if response.ok {
        let data = response.data.unwrap_or(serde_json::Value::Null);
        let pretty = serde_json::to_string_pretty(&data)
            .map_err(|err| format!("Failed to render response: {}", err))?;
        println!("{}", pretty);
        Ok(())
    } else {
        Err(response
            .error
            .map(|err| format!("{}: {}", err.code, err.message))
            .unwrap_or_else(|| "daemon returned an unspecified error".to_string()))
    }
}
