//! Format command for ChainFS disk images

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use log::info;
use std::io::Write;

use chainfs::{FileBackedStore, FileSystem, FsConfig};

/// Format a disk image with ChainFS
#[derive(Parser, Debug)]
#[command(about = "Format a disk image with ChainFS")]
pub struct FormatArgs {
    /// Block size in bytes (defaults to the configured one)
    #[arg(short, long)]
    pub block_size: Option<u32>,

    /// Force formatting without confirmation
    #[arg(short, long)]
    pub force: bool,
}

pub fn run(args: FormatArgs, config: FsConfig) -> Result<()> {
    let path = config.disk_path.clone();
    if !path.is_file() {
        return Err(anyhow!(
            "Disk image {} does not exist; create it first",
            path.display()
        ));
    }
    let block_size = args.block_size.unwrap_or(config.block_size);

    // Confirm before formatting
    if !args.force {
        println!("WARNING: This will format {} as ChainFS.", path.display());
        println!("This operation will DESTROY ALL DATA in the image!");
        print!("Are you sure you want to continue? [y/N] ");
        std::io::stdout().flush()?;

        let mut input = String::new();
        std::io::stdin().read_line(&mut input)?;

        if !input.trim().eq_ignore_ascii_case("y") {
            println!("Operation cancelled.");
            return Ok(());
        }
    }

    info!("Formatting {} with {}-byte blocks...", path.display(), block_size);

    let mut fs = FileSystem::new(FileBackedStore::new(&path), config);
    fs.format(block_size)
        .with_context(|| format!("Failed to format {}", path.display()))?;
    let stats = fs.statfs()?;
    fs.unmount()?;

    println!(
        "{}: {} blocks of {} bytes, {} free",
        path.display(),
        stats.block_count,
        stats.block_size,
        stats.free_blocks
    );
    info!("Successfully formatted {} as ChainFS", path.display());
    Ok(())
}
