//! Open file table
//!
//! A bounded set of handles keyed by inode block number. A file can be open
//! at most once; the cached inode is written back on close when the handle
//! changed it.

use crate::blockdev::BackingStore;
use crate::error::{FsError, Resource, Result};
use crate::format::Inode;
use crate::modules::access::{check_access, OpenMode};

use super::FileSystem;

/// How `seek` interprets its offset
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeekMode {
    /// Offset from the start of the file
    Absolute,
    /// Offset from the current cursor
    Relative,
}

/// An open file
#[derive(Debug, Clone)]
pub struct FileHandle {
    /// Inode block number; unique while open
    pub id: u32,
    /// Name the file was opened under
    pub name: String,
    /// Cached inode
    pub inode: Inode,
    /// Byte offset of the next read or write, never past `inode.size`
    pub cursor: u64,
    /// Granted access
    pub mode: OpenMode,
    /// Whether `inode` differs from the copy on disk
    pub dirty: bool,
}

/// Fixed-size table of open handles
#[derive(Debug, Clone)]
pub struct OpenFileTable {
    slots: Vec<Option<FileHandle>>,
}

impl OpenFileTable {
    /// A table with room for `capacity` handles
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: vec![None; capacity],
        }
    }

    /// Maximum number of handles
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Number of open handles
    pub fn len(&self) -> usize {
        self.slots.iter().flatten().count()
    }

    /// Whether nothing is open
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether inode `id` is open
    pub fn is_open(&self, id: u32) -> bool {
        self.get(id).is_some()
    }

    /// Handle of inode `id`
    pub fn get(&self, id: u32) -> Option<&FileHandle> {
        self.slots.iter().flatten().find(|h| h.id == id)
    }

    /// Handle of inode `id`, mutably
    pub fn get_mut(&mut self, id: u32) -> Option<&mut FileHandle> {
        self.slots.iter_mut().flatten().find(|h| h.id == id)
    }

    /// Open handles in slot order
    pub fn iter(&self) -> impl Iterator<Item = &FileHandle> {
        self.slots.iter().flatten()
    }

    /// Install a handle in the first free slot
    pub fn insert(&mut self, handle: FileHandle) -> Result<usize> {
        if self.is_open(handle.id) {
            return Err(FsError::AlreadyOpen(handle.name));
        }
        let slot = self
            .slots
            .iter()
            .position(Option::is_none)
            .ok_or(FsError::Full(Resource::OpenFileTable))?;
        self.slots[slot] = Some(handle);
        Ok(slot)
    }

    /// Release the handle of inode `id`
    pub fn remove(&mut self, id: u32) -> Option<FileHandle> {
        self.slots
            .iter_mut()
            .find(|slot| slot.as_ref().map_or(false, |h| h.id == id))
            .and_then(Option::take)
    }

    /// Release every handle
    pub fn drain(&mut self) -> Vec<FileHandle> {
        self.slots.iter_mut().filter_map(Option::take).collect()
    }
}

impl<S: BackingStore> FileSystem<S> {
    /// Open table of this session
    pub fn open_files(&self) -> &OpenFileTable {
        &self.open_files
    }

    /// Open the file at `path` with mode `r`, `w` or `rw`
    pub fn open(&mut self, mode: &str, path: &str) -> Result<()> {
        let mode = OpenMode::parse(mode)?;
        let location = self.resolve(path)?;
        let id = location.entry.inode;
        let inode = self.disk.read_inode(id)?;
        if inode.is_dir() {
            return Err(FsError::IsADirectory(path.to_string()));
        }
        if self.open_files.is_open(id) {
            return Err(FsError::AlreadyOpen(path.to_string()));
        }
        if !check_access(
            self.disk.users()?,
            inode.permissions(),
            inode.owner,
            self.session,
            mode.required_bits(),
        ) {
            return Err(FsError::PermissionDenied(path.to_string()));
        }

        self.open_files.insert(FileHandle {
            id,
            name: location.entry.name,
            inode,
            cursor: 0,
            mode,
            dirty: false,
        })?;
        log::debug!("OPEN: '{}' (inode {}) mode {}", path, id, mode);
        Ok(())
    }

    /// Close the file at `path`, writing its inode back if it changed
    pub fn close(&mut self, path: &str) -> Result<()> {
        let id = self.resolve(path)?.entry.inode;
        let handle = self
            .open_files
            .remove(id)
            .ok_or_else(|| FsError::NotOpen(path.to_string()))?;
        if handle.dirty {
            self.disk.write_inode(id, &handle.inode)?;
        }
        log::debug!("CLOSE: '{}' (inode {}, dirty={})", path, id, handle.dirty);
        Ok(())
    }

    /// Flush and release every handle
    pub(crate) fn close_all(&mut self) -> Result<()> {
        for handle in self.open_files.drain() {
            if handle.dirty {
                self.disk.write_inode(handle.id, &handle.inode)?;
            }
        }
        Ok(())
    }

    fn handle_id(&mut self, path: &str) -> Result<u32> {
        let id = self.resolve(path)?.entry.inode;
        if self.open_files.is_open(id) {
            Ok(id)
        } else {
            Err(FsError::NotOpen(path.to_string()))
        }
    }

    /// Read up to `len` bytes at the cursor. Reads stop at the end of the
    /// file without error.
    pub fn read(&mut self, path: &str, len: usize) -> Result<Vec<u8>> {
        let id = self.handle_id(path)?;
        let (inode, cursor, mode) = match self.open_files.get(id) {
            Some(h) => (h.inode, h.cursor, h.mode),
            None => return Err(FsError::NotOpen(path.to_string())),
        };
        if !mode.read {
            return Err(FsError::PermissionDenied(path.to_string()));
        }

        let available = (inode.size as u64).saturating_sub(cursor);
        let mut buf = vec![0u8; len.min(available as usize)];
        let n = self.read_at(&inode, cursor, &mut buf)?;
        buf.truncate(n);

        if let Some(handle) = self.open_files.get_mut(id) {
            handle.cursor += n as u64;
        }
        Ok(buf)
    }

    /// Write `data` at the cursor, growing the file as needed
    pub fn write(&mut self, path: &str, data: &[u8]) -> Result<usize> {
        let id = self.handle_id(path)?;
        let (mut inode, cursor, mode) = match self.open_files.get(id) {
            Some(h) => (h.inode, h.cursor, h.mode),
            None => return Err(FsError::NotOpen(path.to_string())),
        };
        if !mode.write {
            return Err(FsError::PermissionDenied(path.to_string()));
        }

        let before = inode.size;
        let n = self.write_at(&mut inode, cursor, data)?;

        if let Some(handle) = self.open_files.get_mut(id) {
            handle.cursor += n as u64;
            if inode.size != before {
                handle.inode = inode;
                handle.dirty = true;
            }
        }
        Ok(n)
    }

    /// Move the cursor, clamped to `[0, size]`. Returns the new cursor.
    pub fn seek(&mut self, path: &str, mode: SeekMode, offset: i64) -> Result<u64> {
        let id = self.handle_id(path)?;
        let handle = self
            .open_files
            .get_mut(id)
            .ok_or_else(|| FsError::NotOpen(path.to_string()))?;
        let base = match mode {
            SeekMode::Absolute => 0,
            SeekMode::Relative => handle.cursor as i64,
        };
        let target = base.saturating_add(offset);
        handle.cursor = target.clamp(0, handle.inode.size as i64) as u64;
        Ok(handle.cursor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vfs::tests::mounted;

    #[test]
    fn test_open_uniqueness() {
        let mut fs = mounted();
        fs.touch("f").unwrap();

        fs.open("r", "f").unwrap();
        assert!(matches!(fs.open("w", "f"), Err(FsError::AlreadyOpen(_))));
        fs.close("f").unwrap();
        assert!(matches!(fs.close("f"), Err(FsError::NotOpen(_))));
        assert!(matches!(fs.read("f", 1), Err(FsError::NotOpen(_))));
    }

    #[test]
    fn test_table_full() {
        let mut fs = mounted();
        let capacity = fs.open_files().capacity();
        for i in 0..=capacity {
            fs.touch(&format!("f{}", i)).unwrap();
        }
        for i in 0..capacity {
            fs.open("r", &format!("f{}", i)).unwrap();
        }
        assert!(matches!(
            fs.open("r", &format!("f{}", capacity)),
            Err(FsError::Full(Resource::OpenFileTable))
        ));

        fs.close("f0").unwrap();
        fs.open("r", &format!("f{}", capacity)).unwrap();
    }

    #[test]
    fn test_mode_is_enforced() {
        let mut fs = mounted();
        fs.touch("f").unwrap();
        fs.open("w", "f").unwrap();
        fs.write("f", b"abc").unwrap();
        assert!(matches!(fs.read("f", 3), Err(FsError::PermissionDenied(_))));
        fs.close("f").unwrap();

        fs.open("r", "f").unwrap();
        assert!(matches!(fs.write("f", b"x"), Err(FsError::PermissionDenied(_))));
        assert_eq!(fs.read("f", 10).unwrap(), b"abc");
    }

    #[test]
    fn test_directories_cannot_be_opened() {
        let mut fs = mounted();
        fs.mkdir("d").unwrap();
        assert!(matches!(fs.open("r", "d"), Err(FsError::IsADirectory(_))));
        assert!(matches!(fs.open("r", "/"), Err(FsError::IsADirectory(_))));
        assert!(matches!(fs.open("q", "d"), Err(FsError::InvalidArgument(_))));
    }

    #[test]
    fn test_seek_clamps() {
        let mut fs = mounted();
        fs.touch("f").unwrap();
        fs.open("rw", "f").unwrap();
        fs.write("f", b"0123456789").unwrap();

        assert_eq!(fs.seek("f", SeekMode::Absolute, 4).unwrap(), 4);
        assert_eq!(fs.read("f", 3).unwrap(), b"456");
        assert_eq!(fs.seek("f", SeekMode::Relative, -2).unwrap(), 5);
        assert_eq!(fs.seek("f", SeekMode::Relative, 100).unwrap(), 10);
        assert_eq!(fs.seek("f", SeekMode::Absolute, -7).unwrap(), 0);
        assert!(fs.read("f", 0).unwrap().is_empty());
    }

    #[test]
    fn test_dirty_until_close() {
        let mut fs = mounted();
        fs.touch("f").unwrap();
        fs.open("w", "f").unwrap();
        fs.write("f", b"hello").unwrap();

        let id = fs.resolve("f").unwrap().entry.inode;
        let handle = fs.open_files().get(id).unwrap();
        assert!(handle.dirty);
        assert_eq!(handle.inode.size as u64, handle.cursor);
        // The on-disk inode only changes on close
        assert_eq!(fs.stat("f").unwrap().size, 0);

        fs.close("f").unwrap();
        assert_eq!(fs.stat("f").unwrap().size, 5);
    }

    #[test]
    fn test_remount_flushes_dirty_handles() {
        let mut fs = mounted();
        fs.touch("f").unwrap();
        fs.open("w", "f").unwrap();
        fs.write("f", b"hello").unwrap();

        fs.mount().unwrap();
        assert!(fs.open_files().is_empty());
        assert_eq!(fs.stat("f").unwrap().size, 5);
        fs.open("r", "f").unwrap();
        assert_eq!(fs.read("f", 16).unwrap(), b"hello");
    }

    #[test]
    fn test_permission_bits_gate_open() {
        let mut fs = mounted();
        fs.login("root", "root").unwrap();
        fs.add_user("bob", "pw").unwrap();
        fs.touch("secret").unwrap();
        fs.chmod("o", "-", "secret").unwrap();
        fs.logout().unwrap();

        fs.login("bob", "pw").unwrap();
        assert!(matches!(
            fs.open("r", "secret"),
            Err(FsError::PermissionDenied(_))
        ));
        fs.logout().unwrap();

        fs.login("root", "root").unwrap();
        fs.grant_trust("bob").unwrap();
        fs.logout().unwrap();

        fs.login("bob", "pw").unwrap();
        fs.open("r", "secret").unwrap();
    }
}
