//! ChainFS Core - a Unix-style filesystem simulated on one flat disk image
//!
//! The crate is layered leaf-first:
//!
//! - [`blockdev`]: the byte-addressable backing store (file or memory)
//! - [`cache`]: a write-through LRU block cache over the store
//! - [`free_stack`]: the grouped free block stack
//! - [`format`]: explicit little-endian encodings of every on-disk record
//! - [`layout`]: disk geometry and the create/format/mount lifecycle
//! - [`modules::access`]: permission bits, users and trust groups
//! - [`vfs`]: the [`FileSystem`] engine with path resolution, directory
//!   operations, chained-index file I/O and the open file table
//!
//! ```no_run
//! use chainfs::{FileBackedStore, FileSystem, FsConfig};
//!
//! # fn main() -> chainfs::Result<()> {
//! let mut fs = FileSystem::new(FileBackedStore::new("disk.img"), FsConfig::default());
//! fs.create_disk(1 << 20)?;
//! fs.format(512)?;
//! fs.mkdir("a")?;
//! fs.touch("a/b.txt")?;
//! fs.open("w", "a/b.txt")?;
//! fs.write("a/b.txt", b"hello")?;
//! fs.close("a/b.txt")?;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]
#![warn(rust_2018_idioms)]

pub mod blockdev;
pub mod cache;
pub mod config;
pub mod error;
pub mod format;
pub mod free_stack;
pub mod layout;
pub mod modules;
pub mod vfs;

// Re-export the types front ends need
pub use blockdev::{BackingStore, FileBackedStore, MemoryStore};
pub use config::FsConfig;
pub use error::{Error, FsError, Resource, Result};
pub use format::EntryKind;
pub use layout::FsStats;
pub use vfs::{FileStat, FileSystem, ListEntry, SeekMode};

/// Re-export common types and traits
pub mod prelude {
    pub use crate::blockdev::BackingStore;
    pub use crate::error::Result;
    pub use crate::vfs::FileSystem;
}
