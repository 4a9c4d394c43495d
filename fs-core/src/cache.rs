//! Block cache implementation for ChainFS
//!
//! Sits between the engine and the backing store. Whole blocks are cached in
//! an LRU keyed by block number; every write goes straight through to the
//! store before returning, so the cache never holds state the disk lacks.

use lru::LruCache;
use std::num::NonZeroUsize;
use thiserror::Error;

use crate::blockdev::{BackingStore, StoreError};
use crate::layout::HEADER_SIZE;

/// Error type for cache operations
#[derive(Error, Debug)]
pub enum CacheError {
    /// The backing store failed
    #[error("Backing store error: {0}")]
    Store(#[from] StoreError),
    /// Block number (first) is 0 or not below the block count (second)
    #[error("Invalid block number: {0} (disk has {1} blocks)")]
    InvalidBlockNumber(u32, u32),
    /// A block access runs past the end of the block
    #[error("Access of {len} bytes at offset {offset} crosses a {block_size}-byte block")]
    OutOfBlock {
        /// Offset within the block
        offset: usize,
        /// Bytes requested
        len: usize,
        /// Configured block size
        block_size: usize,
    },
    /// A header access runs past the header region
    #[error("Header access of {len} bytes at offset {offset} leaves the header")]
    OutOfHeader {
        /// Offset within the header
        offset: usize,
        /// Bytes requested
        len: usize,
    },
}

/// Result type for cache operations
pub type Result<T> = std::result::Result<T, CacheError>;

/// A write-through block cache over a [`BackingStore`]
pub struct BlockCache<S: BackingStore> {
    store: S,
    cache: LruCache<u32, Vec<u8>>,
    block_size: usize,
    block_count: u32,
}

impl<S: BackingStore> BlockCache<S> {
    /// Create a new block cache with the given capacity (in number of blocks).
    /// Block addressing is unusable until [`BlockCache::configure`] is called.
    pub fn new(store: S, capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            store,
            cache: LruCache::new(capacity),
            block_size: 0,
            block_count: 0,
        }
    }

    /// Set the geometry and drop every cached block
    pub fn configure(&mut self, block_size: usize, block_count: u32) {
        self.block_size = block_size;
        self.block_count = block_count;
        self.cache.clear();
    }

    /// Block size in bytes
    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// Number of addressable blocks
    pub fn block_count(&self) -> u32 {
        self.block_count
    }

    /// The underlying store
    pub fn store(&self) -> &S {
        &self.store
    }

    /// The underlying store, mutably. Callers bypassing the cache must
    /// [`BlockCache::clear`] afterwards.
    pub fn store_mut(&mut self) -> &mut S {
        &mut self.store
    }

    /// Drop every cached block
    pub fn clear(&mut self) {
        self.cache.clear();
    }

    /// Number of blocks currently cached
    pub fn cached_blocks(&self) -> usize {
        self.cache.len()
    }

    fn block_offset(&self, bno: u32) -> u64 {
        HEADER_SIZE as u64 + bno as u64 * self.block_size as u64
    }

    fn check(&self, bno: u32, offset: usize, len: usize) -> Result<()> {
        if bno >= self.block_count {
            return Err(CacheError::InvalidBlockNumber(bno, self.block_count));
        }
        if offset + len > self.block_size {
            return Err(CacheError::OutOfBlock {
                offset,
                len,
                block_size: self.block_size,
            });
        }
        Ok(())
    }

    fn load(&mut self, bno: u32) -> Result<&mut Vec<u8>> {
        if !self.cache.contains(&bno) {
            let mut block = vec![0u8; self.block_size];
            self.store.seek_absolute(self.block_offset(bno))?;
            self.store.read_bytes(&mut block)?;
            self.cache.put(bno, block);
        }
        // Present: either found or inserted just above
        Ok(self
            .cache
            .get_mut(&bno)
            .ok_or(CacheError::InvalidBlockNumber(bno, self.block_count))?)
    }

    /// Copy `buf.len()` bytes starting `offset` bytes into block `bno`
    pub fn read(&mut self, bno: u32, offset: usize, buf: &mut [u8]) -> Result<()> {
        self.check(bno, offset, buf.len())?;
        let block = self.load(bno)?;
        buf.copy_from_slice(&block[offset..offset + buf.len()]);
        Ok(())
    }

    /// Read a whole block
    pub fn read_block(&mut self, bno: u32) -> Result<Vec<u8>> {
        let mut block = vec![0u8; self.block_size];
        self.read(bno, 0, &mut block)?;
        Ok(block)
    }

    /// Write `data` starting `offset` bytes into block `bno`
    pub fn write(&mut self, bno: u32, offset: usize, data: &[u8]) -> Result<()> {
        self.check(bno, offset, data.len())?;
        self.store.seek_absolute(self.block_offset(bno) + offset as u64)?;
        self.store.write_bytes(data)?;

        if data.len() == self.block_size {
            self.cache.put(bno, data.to_vec());
        } else if let Some(block) = self.cache.get_mut(&bno) {
            block[offset..offset + data.len()].copy_from_slice(data);
        }
        Ok(())
    }

    /// Zero a whole block
    pub fn zero(&mut self, bno: u32) -> Result<()> {
        let zeros = vec![0u8; self.block_size];
        self.write(bno, 0, &zeros)
    }

    /// Read from the header region in front of block 0
    pub fn read_header(&mut self, offset: usize, buf: &mut [u8]) -> Result<()> {
        if offset + buf.len() > HEADER_SIZE {
            return Err(CacheError::OutOfHeader {
                offset,
                len: buf.len(),
            });
        }
        self.store.seek_absolute(offset as u64)?;
        self.store.read_bytes(buf)?;
        Ok(())
    }

    /// Write into the header region in front of block 0
    pub fn write_header(&mut self, offset: usize, data: &[u8]) -> Result<()> {
        if offset + data.len() > HEADER_SIZE {
            return Err(CacheError::OutOfHeader {
                offset,
                len: data.len(),
            });
        }
        self.store.seek_absolute(offset as u64)?;
        self.store.write_bytes(data)?;
        Ok(())
    }

    /// Flush the store
    pub fn sync(&mut self) -> Result<()> {
        self.store.sync()?;
        Ok(())
    }
}
