//! respawn CLI

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;

mod cmd;

/// respawn - restart a dev server on source changes, without port races
#[derive(Parser)]
#[command(name = "respawn")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the server and restart it whenever sources change
    Run {
        /// Config file (default: ./respawn.toml if present)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Port the server listens on
        #[arg(long)]
        port: Option<u16>,

        /// Directory to watch (repeatable; replaces the configured list)
        #[arg(long = "watch", value_name = "DIR")]
        watch: Vec<PathBuf>,

        /// File extension to watch (repeatable)
        #[arg(long = "ext", value_name = "EXT")]
        extensions: Vec<String>,

        /// Quiet period before restarting, in milliseconds
        #[arg(long)]
        debounce_ms: Option<u64>,

        /// Working directory of the server
        #[arg(long)]
        cwd: Option<PathBuf>,

        /// Also write logs to this file
        #[arg(long)]
        log_file: Option<PathBuf>,

        /// Server command and arguments
        #[arg(last = true, value_name = "COMMAND")]
        command: Vec<String>,
    },
    /// Validate the configuration and print it
    Check {
        /// Config file (default: ./respawn.toml if present)
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
    /// Report whether a port is free
    Probe {
        port: u16,

        /// Keep polling up to this many milliseconds
        #[arg(long, default_value = "0")]
        wait_ms: u64,

        /// Interface to bind when probing
        #[arg(long, default_value = "127.0.0.1")]
        host: String,
    },
    /// Write a default respawn.toml in the current directory
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    let log_file = match &cli.command {
        Commands::Run { log_file, .. } => log_file.clone(),
        _ => None,
    };
    let _log_guard = cli_lib::logging::init(log_file.as_deref())?;

    match cli.command {
        Commands::Run {
            config,
            port,
            watch,
            extensions,
            debounce_ms,
            cwd,
            command,
            ..
        } => {
            let overrides = cli_lib::ConfigOverrides {
                port,
                watch,
                extensions,
                debounce_ms,
                working_dir: cwd,
                command,
            };
            cmd::run::run(config, overrides).await?;
        }
        Commands::Check { config } => cmd::check::run(config)?,
        Commands::Probe {
            port,
            wait_ms,
            host,
        } => return cmd::probe::run(port, wait_ms, &host).await,
        Commands::Init { force } => cmd::init::run(force)?,
    }

    Ok(ExitCode::SUCCESS)
}
