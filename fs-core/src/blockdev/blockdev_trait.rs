//! Backing store trait definitions for ChainFS

use std::io;
use thiserror::Error;

/// Error type for backing store operations
#[derive(Error, Debug)]
pub enum StoreError {
    /// Host I/O failure
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    /// There is no image to open
    #[error("Disk image does not exist")]
    Missing,
    /// The store has not been opened
    #[error("Store is not open")]
    NotOpen,
    /// The store must be closed for this operation
    #[error("Store is already open")]
    AlreadyOpen,
    /// An access falls outside the image
    #[error("Access out of bounds: {len} bytes at offset {offset} (size {size})")]
    OutOfBounds {
        /// Position of the access
        offset: u64,
        /// Bytes requested
        len: usize,
        /// Image size
        size: u64,
    },
}

/// Result type for backing store operations
pub type Result<T> = std::result::Result<T, StoreError>;

/// A flat, byte-addressable disk image.
///
/// The store performs no interpretation of the bytes it holds; every offset
/// is owned by the filesystem engine. Reads and writes happen at the current
/// position and advance it.
pub trait BackingStore {
    /// Open an existing image. Fails with [`StoreError::Missing`] when there is
    /// nothing to open. Opening an open store is a no-op.
    fn open(&mut self) -> Result<()>;

    /// Close the image. Closing a closed store is a no-op.
    fn close(&mut self) -> Result<()>;

    /// Whether the store is currently open
    fn is_open(&self) -> bool;

    /// Create (or recreate) a zero-filled image of `size` bytes. The store must
    /// be closed.
    fn init_with_size(&mut self, size: u64) -> Result<()>;

    /// Total size of the image in bytes
    fn size(&self) -> Result<u64>;

    /// Move the position to `pos` bytes from the start
    fn seek_absolute(&mut self, pos: u64) -> Result<()>;

    /// Move the position by `delta` bytes
    fn seek_relative(&mut self, delta: i64) -> Result<()>;

    /// Fill `buf` from the current position
    fn read_bytes(&mut self, buf: &mut [u8]) -> Result<()>;

    /// Write all of `data` at the current position
    fn write_bytes(&mut self, data: &[u8]) -> Result<()>;

    /// Flush pending writes to stable storage
    fn sync(&mut self) -> Result<()> {
        Ok(())
    }
}
