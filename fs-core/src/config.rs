//! Runtime configuration for ChainFS
//!
//! Configuration is read from a JSON file; every field is optional and falls
//! back to the defaults below.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{FsError, Result};
use crate::layout::{MAX_BLOCK_SIZE, MIN_BLOCK_SIZE};

/// Seed account created when a disk is formatted
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserSeed {
    /// Login name
    pub name: String,
    /// Plain-text password, hashed before it reaches the disk
    pub password: String,
}

/// Filesystem configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FsConfig {
    /// Disk image file
    pub disk_path: PathBuf,
    /// Block size used by `format`
    pub block_size: u32,
    /// Data block slots per file index table
    pub index_table_capacity: u16,
    /// Maximum number of concurrently open files
    pub max_open_files: usize,
    /// Number of blocks kept in the block cache
    pub cache_blocks: usize,
    /// Accounts created by `format`
    pub users: Vec<UserSeed>,
}

impl Default for FsConfig {
    fn default() -> Self {
        Self {
            disk_path: PathBuf::from("./disk.img"),
            block_size: 512,
            index_table_capacity: 16,
            max_open_files: 8,
            cache_blocks: 64,
            users: vec![UserSeed {
                name: "root".to_string(),
                password: "root".to_string(),
            }],
        }
    }
}

impl FsConfig {
    /// Load and validate a configuration file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        let config: FsConfig = serde_json::from_str(&text).map_err(|e| {
            FsError::InvalidArgument(format!("config {}: {}", path.as_ref().display(), e))
        })?;
        config.validate()?;
        log::debug!("CONFIG: loaded {:?}", config);
        Ok(config)
    }

    /// Check the geometry and table limits
    pub fn validate(&self) -> Result<()> {
        check_geometry(self.block_size, self.index_table_capacity)?;
        if self.max_open_files == 0 {
            return Err(FsError::InvalidArgument(
                "max_open_files must be at least 1".to_string(),
            ));
        }
        if self.cache_blocks == 0 {
            return Err(FsError::InvalidArgument(
                "cache_blocks must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Validate a block size / index table capacity pair
pub fn check_geometry(block_size: u32, index_capacity: u16) -> Result<()> {
    if !block_size.is_power_of_two() || !(MIN_BLOCK_SIZE..=MAX_BLOCK_SIZE).contains(&block_size) {
        return Err(FsError::InvalidArgument(format!(
            "block size {} must be a power of two between {} and {}",
            block_size, MIN_BLOCK_SIZE, MAX_BLOCK_SIZE
        )));
    }
    // Slots plus the `next` pointer must fit in one block
    if index_capacity == 0 || (index_capacity as u32 + 1) * 4 > block_size {
        return Err(FsError::InvalidArgument(format!(
            "index table capacity {} does not fit a {}-byte block",
            index_capacity, block_size
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_partial_config_uses_defaults() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, r#"{{ "block_size": 1024, "max_open_files": 4 }}"#).unwrap();

        let config = FsConfig::load(file.path()).unwrap();
        assert_eq!(config.block_size, 1024);
        assert_eq!(config.max_open_files, 4);
        assert_eq!(config.index_table_capacity, 16);
        assert_eq!(config.users.len(), 1);
    }

    #[test]
    fn test_geometry_limits() {
        assert!(check_geometry(512, 16).is_ok());
        assert!(check_geometry(512, 127).is_ok());
        assert!(check_geometry(512, 128).is_err());
        assert!(check_geometry(600, 16).is_err());
        assert!(check_geometry(256, 16).is_err());
        assert!(check_geometry(4096, 0).is_err());
    }

    #[test]
    fn test_malformed_config_is_rejected() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "not json").unwrap();
        assert!(matches!(
            FsConfig::load(file.path()),
            Err(FsError::InvalidArgument(_))
        ));
    }
}
