mod config;
mod jsonrpc;
mod server;
mod tools;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use config::Settings;
use server::McpServer;
use snh48_roster::{HttpMemberSource, Roster, SnapshotCache};
use std::io;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "snh48-mcp")]
#[command(about = "Read-only SQL over the SNH48 member roster", long_about = None)]
struct Cli {
    #[command(flatten)]
    settings: Settings,
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve the MCP tools over stdio (default)
    Serve,
    /// Run one SELECT and print the rows as JSON
    Query { sql: String },
    /// Refetch the roster from the API and rebuild the database
    Refresh,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli.settings);

    let settings = cli.settings;
    let source = HttpMemberSource::new(settings.source_config())
        .context("failed to build member api client")?;
    let cache = SnapshotCache::new(&settings.cache_file);
    let roster = Roster::open(source, cache).context("failed to load member roster")?;

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => {
            info!(
                event = "mcp_server_starting",
                members = roster.record_count(),
                cache_ttl_secs = settings.cache_ttl.as_secs_f64(),
                cache_file = %settings.cache_file.display()
            );
            let server = McpServer::new(Arc::new(roster), settings.cache_ttl);
            server::serve(&server, io::stdin().lock(), io::stdout().lock())?;
        }
        Commands::Query { sql } => {
            let rows = tools::query_members(&roster, settings.cache_ttl, &sql);
            println!("{}", serde_json::to_string_pretty(&rows)?);
        }
        Commands::Refresh => {
            let report = tools::refresh_members(&roster);
            if !report.success {
                warn!(event = "refresh_failed", message = %report.message);
            }
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
    }

    Ok(())
}

/// Logs go to stderr; stdout carries the protocol.
fn init_logging(settings: &Settings) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(settings.log_level()));
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_ansi(false)
        .finish();
    if let Err(err) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("log_init_error: {err}");
    }
}
