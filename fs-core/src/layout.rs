//! On-disk layout and disk lifecycle for ChainFS
//!
//! ```text
//! 0        4        5        8                                  1024
//! | capacity | marker | rsvd | superblock + crc ...             | block 0 | block 1 | ...
//! ```
//!
//! Block `b` of size `S` occupies `[HEADER_SIZE + b*S, HEADER_SIZE + (b+1)*S)`.
//! Block 0 is never allocated, so 0 can mean "none" in every on-disk pointer.

use std::io::Cursor;

use crate::blockdev::{BackingStore, StoreError};
use crate::cache::BlockCache;
use crate::config::{check_geometry, UserSeed};
use crate::error::{FsError, Result};
use crate::format::{
    DirectoryTable, DiskHeader, FileIndexTable, Inode, Superblock, DIR_ENTRY_SIZE,
    DISK_HEADER_SIZE, INODE_SIZE,
};
use crate::free_stack::{FreeBlockStack, FreeSegment, SegmentStore};
use crate::modules::access::UserTable;

/// Bytes in front of block 0: disk header plus superblock
pub const HEADER_SIZE: usize = 1024;
/// Smallest supported block size
pub const MIN_BLOCK_SIZE: u32 = 512;
/// Largest supported block size
pub const MAX_BLOCK_SIZE: u32 = 4096;
/// Fewest blocks a disk may have and still hold a root directory and data
pub const MIN_BLOCKS: u32 = 8;

/// Position of a file byte within the index chain
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChainPosition {
    /// Links to follow from the head table
    pub hop: u64,
    /// Slot within that table
    pub slot: usize,
    /// Byte offset within the data block
    pub in_block: usize,
}

/// Geometry of a formatted disk
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Layout {
    /// Block size in bytes
    pub block_size: u32,
    /// Slots per file index table
    pub index_capacity: u16,
    /// Number of addressable blocks
    pub block_count: u32,
}

impl Layout {
    /// Compute the layout of a disk of `capacity` bytes
    pub fn new(capacity: u64, block_size: u32, index_capacity: u16) -> Result<Self> {
        check_geometry(block_size, index_capacity)?;
        let blocks = capacity.saturating_sub(HEADER_SIZE as u64) / block_size as u64;
        if blocks < MIN_BLOCKS as u64 {
            return Err(FsError::InvalidArgument(format!(
                "a {}-byte disk holds only {} blocks of {} bytes",
                capacity, blocks, block_size
            )));
        }
        Ok(Self {
            block_size,
            index_capacity,
            block_count: blocks.min(u32::MAX as u64) as u32,
        })
    }

    /// Store offset of block `bno`
    pub fn block_offset(&self, bno: u32) -> u64 {
        HEADER_SIZE as u64 + bno as u64 * self.block_size as u64
    }

    /// Entries per directory table
    pub fn dir_capacity(&self) -> usize {
        self.block_size as usize / DIR_ENTRY_SIZE
    }

    /// Bytes addressed by one index table
    pub fn link_span(&self) -> u64 {
        self.index_capacity as u64 * self.block_size as u64
    }

    /// Map a file byte offset onto the index chain
    pub fn locate(&self, offset: u64) -> ChainPosition {
        let block = offset / self.block_size as u64;
        ChainPosition {
            hop: block / self.index_capacity as u64,
            slot: (block % self.index_capacity as u64) as usize,
            in_block: (offset % self.block_size as u64) as usize,
        }
    }
}

impl<S: BackingStore> SegmentStore for BlockCache<S> {
    fn load_segment(&mut self, bno: u32) -> Result<FreeSegment> {
        let block = self.read_block(bno)?;
        Ok(FreeSegment::read_from(&mut Cursor::new(block))?)
    }

    fn store_segment(&mut self, bno: u32, segment: &FreeSegment) -> Result<()> {
        let block = FreeBlockStack::encode_segment(segment, self.block_size())?;
        self.write(bno, 0, &block)?;
        Ok(())
    }
}

/// Filesystem-wide counters reported by `statfs`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FsStats {
    /// Disk capacity in bytes
    pub capacity: u32,
    /// Block size in bytes
    pub block_size: u32,
    /// Addressable blocks
    pub block_count: u32,
    /// Blocks on the free stack
    pub free_blocks: u32,
    /// Slots per file index table
    pub index_capacity: u16,
    /// Registered users
    pub users: usize,
}

/// A disk image and the metadata of the filesystem on it.
///
/// All structural state lives in the in-memory [`Superblock`]; nothing reaches
/// the disk until [`DiskFs::update`] is called.
pub struct DiskFs<S: BackingStore> {
    cache: BlockCache<S>,
    capacity: u32,
    superblock: Option<Superblock>,
}

impl<S: BackingStore> DiskFs<S> {
    /// Wrap a backing store. Nothing is read until `mount` or `format`.
    pub fn new(store: S, cache_blocks: usize) -> Self {
        Self {
            cache: BlockCache::new(store, cache_blocks),
            capacity: 0,
            superblock: None,
        }
    }

    /// The block cache (and through it the store)
    pub fn cache(&self) -> &BlockCache<S> {
        &self.cache
    }

    /// Whether a filesystem is mounted
    pub fn is_mounted(&self) -> bool {
        self.superblock.is_some()
    }

    fn sb(&self) -> Result<&Superblock> {
        self.superblock.as_ref().ok_or(FsError::NotMounted)
    }

    fn sb_mut(&mut self) -> Result<&mut Superblock> {
        self.superblock.as_mut().ok_or(FsError::NotMounted)
    }

    /// Geometry of the mounted filesystem
    pub fn layout(&self) -> Result<Layout> {
        let sb = self.sb()?;
        Ok(Layout {
            block_size: sb.block_size,
            index_capacity: sb.index_capacity,
            block_count: sb.block_count,
        })
    }

    /// Block holding the root directory's inode
    pub fn root_inode(&self) -> Result<u32> {
        Ok(self.sb()?.root_inode)
    }

    /// User table of the mounted filesystem
    pub fn users(&self) -> Result<&UserTable> {
        Ok(&self.sb()?.users)
    }

    /// User table, mutably; call [`DiskFs::update`] to persist changes
    pub fn users_mut(&mut self) -> Result<&mut UserTable> {
        Ok(&mut self.sb_mut()?.users)
    }

    /// Initialize the backing store with `size` bytes and mark it unformatted
    pub fn create_disk(&mut self, size: u64) -> Result<()> {
        if size < HEADER_SIZE as u64 + MIN_BLOCKS as u64 * MIN_BLOCK_SIZE as u64
            || size > u32::MAX as u64
        {
            return Err(FsError::InvalidArgument(format!(
                "disk size {} is out of range",
                size
            )));
        }

        self.superblock = None;
        let store = self.cache.store_mut();
        store.close()?;
        store.init_with_size(size)?;
        store.open()?;

        let mut header = Vec::with_capacity(DISK_HEADER_SIZE);
        DiskHeader {
            capacity: size as u32,
            formatted: false,
        }
        .write_to(&mut header)?;
        self.cache.write_header(0, &header)?;
        self.cache.sync()?;
        self.cache.clear();
        self.capacity = size as u32;

        log::info!("LAYOUT: created {}-byte disk (unformatted)", size);
        Ok(())
    }

    fn open_store(&mut self) -> Result<DiskHeader> {
        match self.cache.store_mut().open() {
            Ok(()) => {}
            Err(StoreError::Missing) => {
                return Err(FsError::MountFailure("disk image does not exist".to_string()))
            }
            Err(e) => return Err(FsError::MountFailure(e.to_string())),
        }
        let mut raw = [0u8; DISK_HEADER_SIZE];
        self.cache.read_header(0, &mut raw)?;
        let header = DiskHeader::read_from(&mut Cursor::new(&raw[..]))?;
        self.capacity = header.capacity;
        Ok(header)
    }

    /// Lay a fresh filesystem onto the disk: seed the free stack, create the
    /// root directory and the seed accounts, then clear the unformatted marker
    pub fn format(
        &mut self,
        block_size: u32,
        index_capacity: u16,
        seeds: &[UserSeed],
    ) -> Result<()> {
        let header = self.open_store()?;
        let layout = Layout::new(header.capacity as u64, block_size, index_capacity)?;
        self.cache.configure(block_size as usize, layout.block_count);

        let mut free = FreeBlockStack::new(layout.block_count);
        free.seed(&mut self.cache)?;

        let root_inode = free.allocate(&mut self.cache)?;
        let root_dir = free.allocate(&mut self.cache)?;
        let table = DirectoryTable::with_links(layout.dir_capacity(), root_inode, root_inode);
        self.cache
            .write(root_dir, 0, &table.encode(block_size as usize)?)?;
        self.cache.zero(root_inode)?;
        self.cache
            .write(root_inode, 0, &Inode::new_directory(root_dir, 0).to_bytes())?;

        let mut users = UserTable::default();
        for seed in seeds {
            users.add_user(&seed.name, &seed.password)?;
        }

        self.superblock = Some(Superblock {
            block_size,
            index_capacity,
            block_count: layout.block_count,
            root_inode,
            free,
            users,
        });
        self.update()?;

        let mut marker = Vec::with_capacity(DISK_HEADER_SIZE);
        DiskHeader {
            capacity: header.capacity,
            formatted: true,
        }
        .write_to(&mut marker)?;
        self.cache.write_header(0, &marker)?;
        self.cache.sync()?;

        log::info!(
            "LAYOUT FORMAT: block_size={}, block_count={}, index_capacity={}, root_inode={}",
            block_size,
            layout.block_count,
            index_capacity,
            root_inode
        );
        Ok(())
    }

    /// Open the disk and load its superblock
    pub fn mount(&mut self) -> Result<()> {
        self.superblock = None;
        let header = self.open_store()?;
        if !header.formatted {
            return Err(FsError::Unformatted);
        }

        let mut raw = vec![0u8; HEADER_SIZE - DISK_HEADER_SIZE];
        self.cache.read_header(DISK_HEADER_SIZE, &mut raw)?;
        let sb = Superblock::read_from(&raw).map_err(|e| match e {
            FsError::MountFailure(_) => e,
            other => FsError::MountFailure(format!("superblock is corrupt: {}", other)),
        })?;

        let layout = Layout::new(header.capacity as u64, sb.block_size, sb.index_capacity)
            .map_err(|e| FsError::MountFailure(e.to_string()))?;
        if layout.block_count != sb.block_count || sb.root_inode == 0 || sb.root_inode >= sb.block_count {
            return Err(FsError::MountFailure(
                "superblock does not match disk geometry".to_string(),
            ));
        }

        self.cache.configure(sb.block_size as usize, sb.block_count);
        log::info!(
            "LAYOUT MOUNT: block_size={}, block_count={}, free={}, root_inode={}",
            sb.block_size,
            sb.block_count,
            sb.free.free_blocks(),
            sb.root_inode
        );
        self.superblock = Some(sb);
        Ok(())
    }

    /// Persist the superblock and close the store
    pub fn unmount(&mut self) -> Result<()> {
        if self.superblock.is_some() {
            self.update()?;
        }
        self.superblock = None;
        self.cache.clear();
        self.cache.store_mut().close()?;
        log::info!("LAYOUT: unmounted");
        Ok(())
    }

    /// Write the in-memory superblock to disk
    pub fn update(&mut self) -> Result<()> {
        let bytes = self.sb()?.to_bytes()?;
        self.cache.write_header(DISK_HEADER_SIZE, &bytes)?;
        log::trace!("LAYOUT: superblock flushed ({} bytes)", bytes.len());
        Ok(())
    }

    /// Take a block off the free stack and zero it
    pub fn allocate(&mut self) -> Result<u32> {
        let sb = self.superblock.as_mut().ok_or(FsError::NotMounted)?;
        let bno = sb.free.allocate(&mut self.cache)?;
        self.cache.zero(bno)?;
        Ok(bno)
    }

    /// Return a block to the free stack
    pub fn free(&mut self, bno: u32) -> Result<()> {
        let sb = self.superblock.as_mut().ok_or(FsError::NotMounted)?;
        sb.free.free(&mut self.cache, bno)
    }

    /// Read `buf.len()` bytes at `offset` within block `bno`
    pub fn read(&mut self, bno: u32, offset: usize, buf: &mut [u8]) -> Result<()> {
        Ok(self.cache.read(bno, offset, buf)?)
    }

    /// Write `data` at `offset` within block `bno`
    pub fn write(&mut self, bno: u32, offset: usize, data: &[u8]) -> Result<()> {
        Ok(self.cache.write(bno, offset, data)?)
    }

    /// Read the inode stored in block `bno`
    pub fn read_inode(&mut self, bno: u32) -> Result<Inode> {
        let mut raw = [0u8; INODE_SIZE];
        self.cache.read(bno, 0, &mut raw)?;
        Ok(Inode::read_from(&mut Cursor::new(&raw[..]))?)
    }

    /// Write an inode into block `bno`
    pub fn write_inode(&mut self, bno: u32, inode: &Inode) -> Result<()> {
        Ok(self.cache.write(bno, 0, &inode.to_bytes())?)
    }

    /// Read the directory table stored in block `bno`
    pub fn read_dir(&mut self, bno: u32) -> Result<DirectoryTable> {
        let layout = self.layout()?;
        let block = self.cache.read_block(bno)?;
        Ok(DirectoryTable::decode(&block, layout.dir_capacity())?)
    }

    /// Write a directory table into block `bno`
    pub fn write_dir(&mut self, bno: u32, table: &DirectoryTable) -> Result<()> {
        let block = table.encode(self.cache.block_size())?;
        Ok(self.cache.write(bno, 0, &block)?)
    }

    /// Read the file index table stored in block `bno`
    pub fn read_index(&mut self, bno: u32) -> Result<FileIndexTable> {
        let layout = self.layout()?;
        let block = self.cache.read_block(bno)?;
        Ok(FileIndexTable::decode(&block, layout.index_capacity as usize)?)
    }

    /// Write a file index table into block `bno`
    pub fn write_index(&mut self, bno: u32, table: &FileIndexTable) -> Result<()> {
        let block = table.encode(self.cache.block_size())?;
        Ok(self.cache.write(bno, 0, &block)?)
    }

    /// Filesystem counters
    pub fn statfs(&self) -> Result<FsStats> {
        let sb = self.sb()?;
        Ok(FsStats {
            capacity: self.capacity,
            block_size: sb.block_size,
            block_count: sb.block_count,
            free_blocks: sb.free.free_blocks(),
            index_capacity: sb.index_capacity,
            users: sb.users.iter().count(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blockdev::{FileBackedStore, MemoryStore};
    use crate::config::FsConfig;
    use tempfile::tempdir;

    fn formatted(size: u64) -> DiskFs<MemoryStore> {
        let mut disk = DiskFs::new(MemoryStore::new(), 16);
        disk.create_disk(size).unwrap();
        disk.format(512, 16, &FsConfig::default().users).unwrap();
        disk
    }

    #[test]
    fn test_locate() {
        let layout = Layout::new(1 << 20, 512, 16).unwrap();
        assert_eq!(layout.block_count, 2046);
        assert_eq!(layout.dir_capacity(), 16);

        let pos = layout.locate(0);
        assert_eq!((pos.hop, pos.slot, pos.in_block), (0, 0, 0));
        let pos = layout.locate(512 * 16 - 1);
        assert_eq!((pos.hop, pos.slot, pos.in_block), (0, 15, 511));
        let pos = layout.locate(512 * 16);
        assert_eq!((pos.hop, pos.slot, pos.in_block), (1, 0, 0));
        assert_eq!(layout.block_offset(3), 1024 + 3 * 512);
    }

    #[test]
    fn test_superblock_fits_header() {
        let disk = formatted(1 << 20);
        let bytes = disk.sb().unwrap().to_bytes().unwrap();
        assert!(DISK_HEADER_SIZE + bytes.len() <= HEADER_SIZE);
    }

    #[test]
    fn test_unformatted_disk_refuses_mount() {
        let mut disk = DiskFs::new(MemoryStore::new(), 16);
        disk.create_disk(1 << 20).unwrap();
        assert_eq!(disk.cache().store().bytes().unwrap()[4], 0xFF);
        assert!(matches!(disk.mount(), Err(FsError::Unformatted)));

        let mut missing = DiskFs::new(MemoryStore::new(), 16);
        assert!(matches!(missing.mount(), Err(FsError::MountFailure(_))));
    }

    #[test]
    fn test_format_creates_root() {
        let mut disk = formatted(1 << 20);
        let root = disk.root_inode().unwrap();
        assert_eq!(root, 1);

        let inode = disk.read_inode(root).unwrap();
        assert!(inode.is_dir());
        let table = disk.read_dir(inode.content).unwrap();
        assert_eq!(table.len(), 2);
        assert_eq!(table.get(0).unwrap().inode, root);
        assert_eq!(table.get(1).unwrap().inode, root);

        let stats = disk.statfs().unwrap();
        assert_eq!(stats.free_blocks, stats.block_count - 3);
        assert_eq!(stats.users, 1);
    }

    #[test]
    fn test_mount_after_format_on_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("disk.img");

        let mut disk = DiskFs::new(FileBackedStore::new(&path), 16);
        disk.create_disk(1 << 20).unwrap();
        disk.format(1024, 32, &FsConfig::default().users).unwrap();
        let bno = disk.allocate().unwrap();
        disk.write(bno, 10, b"persist").unwrap();
        disk.update().unwrap();
        let free_before = disk.statfs().unwrap().free_blocks;
        disk.unmount().unwrap();

        let mut disk = DiskFs::new(FileBackedStore::new(&path), 16);
        disk.mount().unwrap();
        assert_eq!(disk.layout().unwrap().block_size, 1024);
        assert_eq!(disk.statfs().unwrap().free_blocks, free_before);
        let mut buf = [0u8; 7];
        disk.read(bno, 10, &mut buf).unwrap();
        assert_eq!(&buf, b"persist");
        assert_eq!(disk.users().unwrap().verify_user("root", "root"), 1);
    }

    #[test]
    fn test_corrupt_superblock_fails_mount() {
        let mut disk = formatted(1 << 20);
        disk.cache.write_header(DISK_HEADER_SIZE + 20, &[0xEE; 4]).unwrap();
        assert!(matches!(disk.mount(), Err(FsError::MountFailure(_))));
    }

    #[test]
    fn test_create_disk_limits() {
        let mut disk = DiskFs::new(MemoryStore::new(), 4);
        assert!(disk.create_disk(2048).is_err());
        assert!(matches!(disk.format(512, 16, &[]), Err(FsError::MountFailure(_))));
    }
}
