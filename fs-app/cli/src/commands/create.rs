//! Create command for new ChainFS disk images

use anyhow::{Context, Result};
use clap::Parser;
use log::info;

use chainfs::{FileBackedStore, FileSystem, FsConfig};

/// Create a zero-filled disk image
#[derive(Parser, Debug)]
#[command(about = "Create a new, unformatted disk image")]
pub struct CreateArgs {
    /// Size of the image in MiB
    #[arg(short, long, default_value_t = 1)]
    pub size_mb: u64,

    /// Format the image right away with the configured block size
    #[arg(short, long)]
    pub format: bool,
}

pub fn run(args: CreateArgs, config: FsConfig) -> Result<()> {
    let path = config.disk_path.clone();
    let block_size = config.block_size;
    let size = args
        .size_mb
        .checked_mul(1024 * 1024)
        .context("Requested size is too large")?;

    let mut fs = FileSystem::new(FileBackedStore::new(&path), config);
    fs.create_disk(size)
        .with_context(|| format!("Failed to create disk image {}", path.display()))?;
    info!("Created {} ({} MiB)", path.display(), args.size_mb);

    if args.format {
        fs.format(block_size)
            .with_context(|| format!("Failed to format {}", path.display()))?;
        info!("Formatted {} with {}-byte blocks", path.display(), block_size);
    }
    fs.unmount()?;

    println!("{}: {} bytes", path.display(), size);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_create_and_format() {
        let dir = TempDir::new().unwrap();
        let config = FsConfig {
            disk_path: dir.path().join("disk.img"),
            ..FsConfig::default()
        };
        run(CreateArgs { size_mb: 1, format: true }, config.clone()).unwrap();

        let mut fs = FileSystem::new(FileBackedStore::new(&config.disk_path), config);
        fs.mount().unwrap();
        assert_eq!(fs.statfs().unwrap().capacity, 1 << 20);
    }

    #[test]
    fn test_tiny_image_is_rejected() {
        let dir = TempDir::new().unwrap();
        let config = FsConfig {
            disk_path: dir.path().join("disk.img"),
            ..FsConfig::default()
        };
        assert!(run(CreateArgs { size_mb: 0, format: false }, config).is_err());
    }
}
