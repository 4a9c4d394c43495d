//! ChainFS Command Line Interface
//!
//! Creates and formats disk images and runs the interactive shell over them.

use anyhow::Result;
use clap::{Parser, Subcommand};
use log::{info, LevelFilter};
use std::path::PathBuf;

mod commands;

/// ChainFS - a Unix-style filesystem inside a single disk image file
#[derive(Parser)]
#[command(
    name = "chainfs",
    about = "ChainFS command-line interface",
    version = env!("CARGO_PKG_VERSION"),
    author = "ChainFS Contributors"
)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Enable debug output
    #[arg(short, long, global = true)]
    debug: bool,

    /// JSON configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Disk image, overriding the configuration
    #[arg(long, global = true)]
    disk: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a new, unformatted disk image
    Create(commands::create::CreateArgs),

    /// Format a disk image with ChainFS
    Format(commands::format::FormatArgs),

    /// Open an interactive shell on a disk image
    Shell,

    /// Run a file of shell commands
    Run(commands::shell::RunArgs),
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging based on verbosity level
    let log_level = if cli.debug {
        LevelFilter::Debug
    } else if cli.verbose {
        LevelFilter::Info
    } else {
        LevelFilter::Warn
    };

    env_logger::Builder::new()
        .filter_level(log_level)
        .init();

    info!("ChainFS CLI v{} starting...", env!("CARGO_PKG_VERSION"));

    let config = commands::load_config(cli.config.as_deref(), cli.disk)?;

    match cli.command {
        Commands::Create(args) => commands::create::run(args, config),
        Commands::Format(args) => commands::format::run(args, config),
        Commands::Shell => commands::shell::run_interactive(config),
        Commands::Run(args) => commands::shell::run_script(args, config),
    }
}
