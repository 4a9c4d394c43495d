//! Subcommands of the `chainfs` binary

pub mod create;
pub mod format;
pub mod shell;

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

use chainfs::FsConfig;

/// Load the configuration file if one was given, then apply the `--disk`
/// override
pub fn load_config(path: Option<&Path>, disk: Option<PathBuf>) -> Result<FsConfig> {
    let mut config = match path {
        Some(path) => FsConfig::load(path)
            .with_context(|| format!("Failed to load configuration {}", path.display()))?,
        None => FsConfig::default(),
    };
    if let Some(disk) = disk {
        config.disk_path = disk;
    }
    log::debug!("Using disk image {}", config.disk_path.display());
    Ok(config)
}
