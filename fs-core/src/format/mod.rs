//! ChainFS on-disk record formats
//!
//! Every record has an explicit little-endian encoding. Nothing is written by
//! casting memory, so the layout below is the contract:
//!
//! | record          | bytes                                                     |
//! |-----------------|-----------------------------------------------------------|
//! | disk header     | `capacity u32`, `marker u8` (0xFF unformatted), 3 reserved |
//! | inode           | `content u32`, `flags u8`, `owner u8`, reserved `u16`, `size u32` |
//! | directory entry | `inode u32`, `name [u8; 28]` NUL padded                   |
//! | file index      | `slots [u32; capacity]`, `next u32`                       |

use arrayref::array_ref;
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{self, Cursor, Read, Write};

use crate::error::{FsError, Resource, Result};
use crate::free_stack::FreeBlockStack;
use crate::modules::access::{Permissions, UserTable};

/// Magic number for the ChainFS superblock
pub const CHAINFS_MAGIC: &[u8; 4] = b"CHFS";
/// Current superblock version
pub const FS_VERSION: u16 = 1;

/// Size of the disk header that precedes the superblock
pub const DISK_HEADER_SIZE: usize = 8;
/// Marker byte of a disk that has never been formatted
pub const UNFORMATTED_MARKER: u8 = 0xFF;
/// Marker byte of a formatted disk
pub const FORMATTED_MARKER: u8 = 0x00;

/// Width of the on-disk name field
pub const NAME_FIELD_LEN: usize = 28;
/// Longest name that fits the field with its terminator
pub const MAX_NAME_LEN: usize = NAME_FIELD_LEN - 1;
/// Size of one directory entry
pub const DIR_ENTRY_SIZE: usize = 4 + NAME_FIELD_LEN;
/// Size of one inode record
pub const INODE_SIZE: usize = 12;

/// Kind bits of the inode flag byte
pub const KIND_MASK: u8 = 0xC0;
/// Kind bits of a directory
pub const KIND_DIRECTORY: u8 = 0x40;
/// Kind bits of a regular file
pub const KIND_FILE: u8 = 0x00;

/// What an inode describes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    /// A directory whose content block is a directory table
    Directory,
    /// A regular file whose content block heads its index chain
    File,
}

/// Fixed 8-byte header at the start of every disk image
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiskHeader {
    /// Total disk capacity in bytes
    pub capacity: u32,
    /// Whether `format` has completed on this disk
    pub formatted: bool,
}

impl DiskHeader {
    /// Write the header (exactly [`DISK_HEADER_SIZE`] bytes)
    pub fn write_to<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        writer.write_u32::<LittleEndian>(self.capacity)?;
        writer.write_u8(if self.formatted {
            FORMATTED_MARKER
        } else {
            UNFORMATTED_MARKER
        })?;
        writer.write_all(&[0u8; 3])
    }

    /// Read a header
    pub fn read_from<R: Read>(reader: &mut R) -> io::Result<Self> {
        let capacity = reader.read_u32::<LittleEndian>()?;
        let marker = reader.read_u8()?;
        let mut reserved = [0u8; 3];
        reader.read_exact(&mut reserved)?;
        Ok(Self {
            capacity,
            formatted: marker != UNFORMATTED_MARKER,
        })
    }
}

/// On-disk inode. Each inode occupies a block of its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Inode {
    /// Directory table block, or head of the file index chain
    pub content: u32,
    /// Kind bits (top two) and permission bits (low six)
    pub flags: u8,
    /// Owning uid
    pub owner: u8,
    /// Logical byte length of a file's content
    pub size: u32,
}

impl Inode {
    /// A directory with `rwx` for owner and other
    pub fn new_directory(content: u32, owner: u8) -> Self {
        Self {
            content,
            flags: KIND_DIRECTORY | Permissions::ALL.bits(),
            owner,
            size: 0,
        }
    }

    /// An empty regular file with `rwx` for owner and other
    pub fn new_file(content: u32, owner: u8) -> Self {
        Self {
            content,
            flags: KIND_FILE | Permissions::ALL.bits(),
            owner,
            size: 0,
        }
    }

    /// Kind encoded in the flag byte
    pub fn kind(&self) -> EntryKind {
        if self.flags & KIND_MASK == KIND_DIRECTORY {
            EntryKind::Directory
        } else {
            EntryKind::File
        }
    }

    /// Whether this inode is a directory
    pub fn is_dir(&self) -> bool {
        self.kind() == EntryKind::Directory
    }

    /// Permission bits
    pub fn permissions(&self) -> Permissions {
        Permissions::from_bits(self.flags)
    }

    /// Replace the permission bits, keeping the kind bits
    pub fn set_permissions(&mut self, perms: Permissions) {
        self.flags = (self.flags & KIND_MASK) | perms.bits();
    }

    /// Write the inode (exactly [`INODE_SIZE`] bytes)
    pub fn write_to<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        writer.write_u32::<LittleEndian>(self.content)?;
        writer.write_u8(self.flags)?;
        writer.write_u8(self.owner)?;
        writer.write_u16::<LittleEndian>(0)?;
        writer.write_u32::<LittleEndian>(self.size)
    }

    /// Read an inode
    pub fn read_from<R: Read>(reader: &mut R) -> io::Result<Self> {
        let content = reader.read_u32::<LittleEndian>()?;
        let flags = reader.read_u8()?;
        let owner = reader.read_u8()?;
        let _reserved = reader.read_u16::<LittleEndian>()?;
        let size = reader.read_u32::<LittleEndian>()?;
        Ok(Self {
            content,
            flags,
            owner,
            size,
        })
    }

    /// Encode into a fresh buffer
    pub fn to_bytes(&self) -> [u8; INODE_SIZE] {
        let mut buf = [0u8; INODE_SIZE];
        // A 12-byte cursor cannot overflow
        let _ = self.write_to(&mut Cursor::new(&mut buf[..]));
        buf
    }
}

/// Check that `name` can be stored as a directory entry
pub fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() || name == "." || name == ".." {
        return Err(FsError::InvalidArgument(format!("'{}' is not a valid name", name)));
    }
    if name.contains('/') || name.contains('\0') {
        return Err(FsError::InvalidArgument(format!(
            "'{}' contains a reserved character",
            name
        )));
    }
    if name.len() > MAX_NAME_LEN {
        return Err(FsError::InvalidArgument(format!(
            "'{}' is longer than {} bytes",
            name, MAX_NAME_LEN
        )));
    }
    Ok(())
}

/// Encode a NUL padded fixed-width name field
pub(crate) fn write_name<W: Write>(writer: &mut W, name: &str, width: usize) -> io::Result<()> {
    let bytes = name.as_bytes();
    let len = bytes.len().min(width - 1);
    writer.write_all(&bytes[..len])?;
    writer.write_all(&vec![0u8; width - len])
}

/// Decode a NUL padded fixed-width name field
pub(crate) fn read_name(raw: &[u8]) -> io::Result<String> {
    let end = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
    String::from_utf8(raw[..end].to_vec())
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
}

/// Directory entry structure
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    /// Block holding the entry's inode; 0 marks the end of the table
    pub inode: u32,
    /// Entry name
    pub name: String,
}

impl DirEntry {
    /// Create a new directory entry
    pub fn new(inode: u32, name: &str) -> Self {
        Self {
            inode,
            name: name.to_string(),
        }
    }

    /// Write directory entry (exactly [`DIR_ENTRY_SIZE`] bytes)
    pub fn write_to<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        writer.write_u32::<LittleEndian>(self.inode)?;
        write_name(writer, &self.name, NAME_FIELD_LEN)
    }

    /// Decode one entry from a [`DIR_ENTRY_SIZE`] slice
    pub fn decode(buf: &[u8]) -> io::Result<Self> {
        if buf.len() < DIR_ENTRY_SIZE {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "short directory entry",
            ));
        }
        let inode = Cursor::new(buf).read_u32::<LittleEndian>()?;
        let name = read_name(array_ref![buf, 4, NAME_FIELD_LEN])?;
        Ok(Self { inode, name })
    }
}

/// A directory's entry table.
///
/// On disk the table is a fixed array of slots ended by the first slot whose
/// inode is 0. In memory only the valid prefix is kept, so the "no gaps
/// before the sentinel" invariant holds by construction and removal shifts
/// every later entry down by one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryTable {
    entries: Vec<DirEntry>,
    capacity: usize,
}

impl DirectoryTable {
    /// An empty table with room for `capacity` entries
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Vec::with_capacity(capacity),
            capacity,
        }
    }

    /// A fresh directory table holding `.` and `..`
    pub fn with_links(capacity: usize, self_inode: u32, parent_inode: u32) -> Self {
        let mut table = Self::new(capacity);
        table.entries.push(DirEntry::new(self_inode, "."));
        table.entries.push(DirEntry::new(parent_inode, ".."));
        table
    }

    /// Number of valid entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the table has no valid entries
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Slot count
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Whether every slot is taken
    pub fn is_full(&self) -> bool {
        self.entries.len() >= self.capacity
    }

    /// Entry at `index`
    pub fn get(&self, index: usize) -> Option<&DirEntry> {
        self.entries.get(index)
    }

    /// Index of the entry named exactly `name`
    pub fn find(&self, name: &str) -> Option<usize> {
        self.entries.iter().position(|e| e.name == name)
    }

    /// Valid entries in table order
    pub fn iter(&self) -> impl Iterator<Item = &DirEntry> {
        self.entries.iter()
    }

    /// Entries other than `.` and `..`
    pub fn children(&self) -> impl Iterator<Item = &DirEntry> {
        self.entries
            .iter()
            .filter(|e| e.name != "." && e.name != "..")
    }

    /// Place an entry in the first free slot
    pub fn push(&mut self, entry: DirEntry) -> Result<usize> {
        if self.is_full() {
            return Err(FsError::Full(Resource::Directory));
        }
        if entry.inode == 0 {
            return Err(FsError::InvalidArgument(
                "directory entry must reference an inode".to_string(),
            ));
        }
        self.entries.push(entry);
        Ok(self.entries.len() - 1)
    }

    /// Remove the entry at `index`, compacting the table
    pub fn remove(&mut self, index: usize) -> Option<DirEntry> {
        if index < self.entries.len() {
            Some(self.entries.remove(index))
        } else {
            None
        }
    }

    /// Change the name of the entry at `index`
    pub fn rename(&mut self, index: usize, name: &str) -> Option<()> {
        let entry = self.entries.get_mut(index)?;
        entry.name = name.to_string();
        Some(())
    }

    /// Point the entry at `index` to another inode
    pub fn relink(&mut self, index: usize, inode: u32) -> Option<()> {
        let entry = self.entries.get_mut(index)?;
        entry.inode = inode;
        Some(())
    }

    /// Encode into a block-sized buffer
    pub fn encode(&self, block_size: usize) -> io::Result<Vec<u8>> {
        let mut block = vec![0u8; block_size];
        let mut cursor = Cursor::new(&mut block[..]);
        for entry in &self.entries {
            entry.write_to(&mut cursor)?;
        }
        Ok(block)
    }

    /// Decode a table, stopping at the first sentinel slot
    pub fn decode(block: &[u8], capacity: usize) -> io::Result<Self> {
        let mut table = Self::new(capacity);
        for slot in block.chunks_exact(DIR_ENTRY_SIZE).take(capacity) {
            let entry = DirEntry::decode(slot)?;
            if entry.inode == 0 {
                break;
            }
            table.entries.push(entry);
        }
        Ok(table)
    }
}

/// One link of a file's index chain
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileIndexTable {
    /// Data block numbers; 0 means not yet allocated
    pub slots: Vec<u32>,
    /// Next table in the chain; 0 ends the chain
    pub next: u32,
}

impl FileIndexTable {
    /// An empty table with `capacity` unallocated slots
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: vec![0; capacity],
            next: 0,
        }
    }

    /// Allocated data blocks, in slot order
    pub fn data_blocks(&self) -> impl Iterator<Item = u32> + '_ {
        self.slots.iter().copied().filter(|&b| b != 0)
    }

    /// Encode into a block-sized buffer
    pub fn encode(&self, block_size: usize) -> io::Result<Vec<u8>> {
        let mut block = vec![0u8; block_size];
        let mut cursor = Cursor::new(&mut block[..]);
        for &slot in &self.slots {
            cursor.write_u32::<LittleEndian>(slot)?;
        }
        cursor.write_u32::<LittleEndian>(self.next)?;
        Ok(block)
    }

    /// Decode a table of `capacity` slots
    pub fn decode(block: &[u8], capacity: usize) -> io::Result<Self> {
        let mut cursor = Cursor::new(block);
        let mut slots = Vec::with_capacity(capacity);
        for _ in 0..capacity {
            slots.push(cursor.read_u32::<LittleEndian>()?);
        }
        let next = cursor.read_u32::<LittleEndian>()?;
        Ok(Self { slots, next })
    }
}

/// Filesystem metadata stored right after the disk header
#[derive(Debug, Clone)]
pub struct Superblock {
    /// Block size in bytes
    pub block_size: u32,
    /// Slots per file index table
    pub index_capacity: u16,
    /// Number of addressable blocks
    pub block_count: u32,
    /// Block holding the root directory's inode
    pub root_inode: u32,
    /// Free block allocator state
    pub free: FreeBlockStack,
    /// Credentials and trust groups
    pub users: UserTable,
}

impl Superblock {
    /// Write the superblock followed by its CRC32
    pub fn write_to<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        let mut body = Vec::new();
        body.write_all(CHAINFS_MAGIC)?;
        body.write_u16::<LittleEndian>(FS_VERSION)?;
        body.write_u16::<LittleEndian>(self.block_size as u16)?;
        body.write_u16::<LittleEndian>(self.index_capacity)?;
        body.write_u32::<LittleEndian>(self.block_count)?;
        body.write_u32::<LittleEndian>(self.root_inode)?;
        self.free.write_to(&mut body)?;
        self.users.write_to(&mut body)?;

        let crc = crc32fast::hash(&body);
        writer.write_all(&body)?;
        writer.write_u32::<LittleEndian>(crc)
    }

    /// Encode into a fresh buffer
    pub fn to_bytes(&self) -> io::Result<Vec<u8>> {
        let mut buf = Vec::new();
        self.write_to(&mut buf)?;
        Ok(buf)
    }

    /// Read and verify a superblock
    pub fn read_from(buf: &[u8]) -> Result<Self> {
        let mut cursor = Cursor::new(buf);
        let mut magic = [0u8; 4];
        cursor.read_exact(&mut magic)?;
        if &magic != CHAINFS_MAGIC {
            return Err(FsError::MountFailure("bad superblock magic".to_string()));
        }
        let version = cursor.read_u16::<LittleEndian>()?;
        if version != FS_VERSION {
            return Err(FsError::MountFailure(format!(
                "unsupported superblock version {}",
                version
            )));
        }
        let block_size = cursor.read_u16::<LittleEndian>()? as u32;
        let index_capacity = cursor.read_u16::<LittleEndian>()?;
        let block_count = cursor.read_u32::<LittleEndian>()?;
        let root_inode = cursor.read_u32::<LittleEndian>()?;
        let mut free = FreeBlockStack::read_from(&mut cursor)?;
        free.set_block_count(block_count);
        let users = UserTable::read_from(&mut cursor)?;

        let body_len = cursor.position() as usize;
        let crc = cursor.read_u32::<LittleEndian>()?;
        if crc32fast::hash(&buf[..body_len]) != crc {
            return Err(FsError::MountFailure("superblock checksum mismatch".to_string()));
        }

        Ok(Self {
            block_size,
            index_capacity,
            block_count,
            root_inode,
            free,
            users,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_marker() {
        let mut buf = Vec::new();
        DiskHeader {
            capacity: 1 << 20,
            formatted: false,
        }
        .write_to(&mut buf)
        .unwrap();
        assert_eq!(buf.len(), DISK_HEADER_SIZE);
        assert_eq!(&buf[..4], &(1u32 << 20).to_le_bytes());
        assert_eq!(buf[4], UNFORMATTED_MARKER);

        let header = DiskHeader::read_from(&mut Cursor::new(&buf)).unwrap();
        assert!(!header.formatted);
        assert_eq!(header.capacity, 1 << 20);
    }

    #[test]
    fn test_inode_kind_bits() {
        let dir = Inode::new_directory(7, 1);
        assert_eq!(dir.flags, 0x7f);
        assert!(dir.is_dir());

        let mut file = Inode::new_file(9, 2);
        assert_eq!(file.flags, 0x3f);
        assert_eq!(file.kind(), EntryKind::File);

        file.set_permissions(Permissions::from_bits(0));
        assert_eq!(file.kind(), EntryKind::File);
        assert_eq!(file.flags & !KIND_MASK, 0);

        let decoded = Inode::read_from(&mut Cursor::new(dir.to_bytes())).unwrap();
        assert_eq!(decoded, dir);
    }

    #[test]
    fn test_directory_compaction() {
        let mut table = DirectoryTable::with_links(16, 3, 3);
        for (i, name) in ["a", "b", "c", "d"].iter().enumerate() {
            table.push(DirEntry::new(10 + i as u32, name)).unwrap();
        }
        assert_eq!(table.len(), 6);

        table.remove(3).unwrap();
        let names: Vec<_> = table.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, [".", "..", "a", "c", "d"]);

        // The encoded table ends with a sentinel right after the last entry
        let block = table.encode(512).unwrap();
        let sentinel = &block[5 * DIR_ENTRY_SIZE..5 * DIR_ENTRY_SIZE + 4];
        assert_eq!(sentinel, &[0, 0, 0, 0]);

        let decoded = DirectoryTable::decode(&block, 16).unwrap();
        assert_eq!(decoded, table);
    }

    #[test]
    fn test_remove_last_slot_of_full_table() {
        let mut table = DirectoryTable::new(4);
        for i in 0..4 {
            table.push(DirEntry::new(i + 1, &format!("e{}", i))).unwrap();
        }
        assert!(matches!(
            table.push(DirEntry::new(9, "x")),
            Err(FsError::Full(Resource::Directory))
        ));

        assert_eq!(table.remove(3).unwrap().name, "e3");
        assert_eq!(table.len(), 3);
        assert!(table.remove(3).is_none());
    }

    #[test]
    fn test_decode_stops_at_sentinel() {
        let mut block = DirectoryTable::with_links(16, 5, 2).encode(512).unwrap();
        // Garbage after the sentinel must not be picked up
        let stray = DirEntry::new(44, "stray");
        stray
            .write_to(&mut Cursor::new(&mut block[3 * DIR_ENTRY_SIZE..]))
            .unwrap();

        let table = DirectoryTable::decode(&block, 16).unwrap();
        assert_eq!(table.len(), 2);
        assert!(table.find("stray").is_none());
    }

    #[test]
    fn test_name_validation() {
        assert!(validate_name("notes.txt").is_ok());
        assert!(validate_name(&"n".repeat(MAX_NAME_LEN)).is_ok());
        assert!(validate_name(&"n".repeat(MAX_NAME_LEN + 1)).is_err());
        assert!(validate_name("..").is_err());
        assert!(validate_name("a/b").is_err());
        assert!(validate_name("").is_err());
    }

    #[test]
    fn test_index_table_layout() {
        let mut table = FileIndexTable::new(4);
        table.slots[1] = 77;
        table.next = 12;
        let block = table.encode(512).unwrap();
        assert_eq!(&block[4..8], &77u32.to_le_bytes());
        assert_eq!(&block[16..20], &12u32.to_le_bytes());
        assert_eq!(table.data_blocks().collect::<Vec<_>>(), [77]);
        assert_eq!(FileIndexTable::decode(&block, 4).unwrap(), table);
    }
}
