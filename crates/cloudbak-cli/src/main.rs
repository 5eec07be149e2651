//! cloudbak CLI - Encrypted backup of local trees to object storage
//!
//! Provides commands for:
//! - Scanning sources and running transfer sessions
//! - Restoring from the bucket, or test-restoring against local files
//! - Verifying the bucket against the database
//! - Inspecting status and configuration

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod commands;
mod confirm;
mod context;
mod notify;
mod output;

use cloudbak_core::config::{Config, LoggingConfig};
use commands::{
    backup::BackupCommand, completions::CompletionsCommand, config::ConfigCommand,
    restore::RestoreCommand, scan::ScanCommand, status::StatusCommand, verify::VerifyCommand,
};
use context::GlobalArgs;
use output::OutputFormat;

#[derive(Debug, Parser)]
#[command(
    name = "cloudbak",
    version,
    about = "Encrypted, session-bounded backups to object storage"
)]
pub struct Cli {
    /// Output in JSON format
    #[arg(long, global = true)]
    json: bool,

    /// Verbose output (can be repeated: -v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Use alternate config file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Minimal output
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Show what would be done without uploading, deleting or writing
    #[arg(long, global = true)]
    dry_run: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Scan sources, then upload changes and remove deleted files
    Backup(BackupCommand),
    /// Scan sources without transferring anything
    Scan(ScanCommand),
    /// Restore files from the bucket
    Restore(RestoreCommand),
    /// Compare the bucket with the database
    Verify(VerifyCommand),
    /// Show inventory status
    Status(StatusCommand),
    /// View and manage configuration
    #[command(subcommand)]
    Config(ConfigCommand),
    /// Generate shell completions
    Completions(CompletionsCommand),
}

/// Log filter: `RUST_LOG` first, then `-v`/`-q`, then the config file
fn log_filter(verbose: u8, quiet: bool, configured: &str) -> EnvFilter {
    let level = match (verbose, quiet) {
        (0, true) => "warn",
        (0, false) => configured,
        (1, _) => "debug",
        _ => "trace",
    };
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level))
}

fn init_logging(cli: &Cli, logging: &LoggingConfig) {
    let filter = log_filter(cli.verbose, cli.quiet, &logging.level);
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false);

    match (logging.format.as_str(), logging.timestamps) {
        ("json", _) => builder.json().init(),
        (_, true) => builder.init(),
        (_, false) => builder.without_time().init(),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config_path = cli.config.clone().unwrap_or_else(Config::default_path);
    // Logging settings come from the file when it parses; commands report
    // configuration problems themselves
    let logging = Config::load(&config_path)
        .map(|c| c.logging)
        .unwrap_or_default();
    init_logging(&cli, &logging);

    let global = GlobalArgs {
        format: if cli.json {
            OutputFormat::Json
        } else {
            OutputFormat::Human
        },
        quiet: cli.quiet,
        dry_run: cli.dry_run,
        config_path,
    };

    match &cli.command {
        Commands::Backup(cmd) => cmd.execute(&global).await,
        Commands::Scan(cmd) => cmd.execute(&global).await,
        Commands::Restore(cmd) => cmd.execute(&global).await,
        Commands::Verify(cmd) => cmd.execute(&global).await,
        Commands::Status(cmd) => cmd.execute(&global).await,
        Commands::Config(cmd) => cmd.execute(&global).await,
        Commands::Completions(cmd) => cmd.execute(),
    }
}
