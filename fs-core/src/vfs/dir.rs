//! Directory operations

use crate::blockdev::BackingStore;
use crate::error::{FsError, Resource, Result};
use crate::format::{validate_name, DirEntry, DirectoryTable, EntryKind, Inode};
use crate::modules::access::{apply_chmod, owner_class_applies, Permissions};

use super::path::DirFrame;
use super::FileSystem;

/// One line of `ls`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListEntry {
    /// Entry name
    pub name: String,
    /// Directory or file
    pub kind: EntryKind,
    /// Inode block
    pub inode: u32,
    /// Owning uid
    pub owner: u8,
    /// Permission bits
    pub permissions: Permissions,
    /// File size in bytes (0 for directories)
    pub size: u32,
}

/// Result of `stat`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileStat {
    /// Entry name
    pub name: String,
    /// Directory or file
    pub kind: EntryKind,
    /// Inode block
    pub inode: u32,
    /// Directory table block or head of the index chain
    pub content: u32,
    /// Owning uid
    pub owner: u8,
    /// Permission bits
    pub permissions: Permissions,
    /// Size in bytes as recorded on disk
    pub size: u32,
}

impl<S: BackingStore> FileSystem<S> {
    fn current(&self) -> Result<&DirFrame> {
        self.cwd.last().ok_or(FsError::NotMounted)
    }

    /// Create `name` in the working directory
    fn create_here(&mut self, name: &str, kind: EntryKind) -> Result<u32> {
        validate_name(name)?;
        let parent = self.current()?.clone();
        let mut table = self.disk.read_dir(parent.content)?;
        if table.find(name).is_some() {
            return Err(FsError::AlreadyExists(name.to_string()));
        }
        if table.is_full() {
            return Err(FsError::Full(Resource::Directory));
        }

        let inode_block = self.disk.allocate()?;
        let content = match self.disk.allocate() {
            Ok(bno) => bno,
            Err(e) => {
                self.disk.free(inode_block)?;
                return Err(e);
            }
        };
        let inode = match kind {
            EntryKind::Directory => {
                let dir_capacity = self.disk.layout()?.dir_capacity();
                let links = DirectoryTable::with_links(dir_capacity, inode_block, parent.inode);
                self.disk.write_dir(content, &links)?;
                Inode::new_directory(content, self.session)
            }
            // A zeroed block is an empty index table
            EntryKind::File => Inode::new_file(content, self.session),
        };
        self.disk.write_inode(inode_block, &inode)?;

        table.push(DirEntry::new(inode_block, name))?;
        self.disk.write_dir(parent.content, &table)?;
        self.disk.update()?;
        log::debug!(
            "DIR: created {:?} '{}' (inode {}) in directory block {}",
            kind,
            name,
            inode_block,
            parent.content
        );
        Ok(inode_block)
    }

    fn create(&mut self, path: &str, kind: EntryKind) -> Result<u32> {
        let (frames, name) = self.resolve_parent(path)?;
        self.with_directory(frames, |fs| fs.create_here(&name, kind))
    }

    /// Create a directory
    pub fn mkdir(&mut self, path: &str) -> Result<()> {
        self.create(path, EntryKind::Directory).map(|_| ())
    }

    /// Create an empty file
    pub fn touch(&mut self, path: &str) -> Result<()> {
        self.create(path, EntryKind::File).map(|_| ())
    }

    /// Remove the entry at `index` of the working directory and write the
    /// compacted table back
    fn unlink_here(&mut self, index: usize) -> Result<DirEntry> {
        let dir = self.current()?.content;
        let mut table = self.disk.read_dir(dir)?;
        let entry = table
            .remove(index)
            .ok_or_else(|| FsError::Corrupt(format!("no entry {} in block {}", index, dir)))?;
        self.disk.write_dir(dir, &table)?;
        Ok(entry)
    }

    /// Remove a file and release its blocks
    pub fn rm(&mut self, path: &str) -> Result<()> {
        let location = self.resolve(path)?;
        if location.is_link() {
            return Err(FsError::InvalidArgument(format!("cannot remove '{}'", path)));
        }
        let id = location.entry.inode;
        let inode = self.disk.read_inode(id)?;
        if inode.is_dir() {
            return Err(FsError::IsADirectory(path.to_string()));
        }
        if self.open_files.is_open(id) {
            return Err(FsError::Busy(path.to_string()));
        }

        self.release_chain(inode.content)?;
        self.disk.free(id)?;
        let index = location.index;
        self.with_directory(location.frames, |fs| fs.unlink_here(index))?;
        self.disk.update()?;
        log::debug!("DIR: removed file '{}' (inode {})", path, id);
        Ok(())
    }

    fn subtree_has_open_file(&mut self, content: u32) -> Result<bool> {
        let table = self.disk.read_dir(content)?;
        for entry in table.children() {
            if self.open_files.is_open(entry.inode) {
                return Ok(true);
            }
            let inode = self.disk.read_inode(entry.inode)?;
            if inode.is_dir() && self.subtree_has_open_file(inode.content)? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Release everything below the working directory, leaving its table
    /// block itself to the caller
    fn clear_here(&mut self) -> Result<()> {
        let frame = self.current()?.clone();
        let table = self.disk.read_dir(frame.content)?;
        if table.find("..").is_none() {
            // Root-like table with nothing to descend into
            return Ok(());
        }
        for entry in table.children() {
            let inode = self.disk.read_inode(entry.inode)?;
            if inode.is_dir() {
                let mut inside = self.cwd.clone();
                inside.push(DirFrame {
                    name: entry.name.clone(),
                    inode: entry.inode,
                    content: inode.content,
                });
                self.with_directory(inside, |fs| fs.clear_here())?;
                self.disk.free(inode.content)?;
            } else {
                self.release_chain(inode.content)?;
            }
            self.disk.free(entry.inode)?;
        }
        Ok(())
    }

    /// Remove a directory and everything below it
    pub fn rmdir(&mut self, path: &str) -> Result<()> {
        let location = self.resolve(path)?;
        if location.is_link() {
            return Err(FsError::InvalidArgument(format!("cannot remove '{}'", path)));
        }
        let id = location.entry.inode;
        let inode = self.disk.read_inode(id)?;
        if !inode.is_dir() {
            return Err(FsError::NotADirectory(path.to_string()));
        }
        if self.cwd.iter().any(|f| f.inode == id) {
            return Err(FsError::Busy(path.to_string()));
        }
        if self.subtree_has_open_file(inode.content)? {
            return Err(FsError::Busy(path.to_string()));
        }

        let mut inside = location.frames.clone();
        inside.push(DirFrame {
            name: location.entry.name.clone(),
            inode: id,
            content: inode.content,
        });
        self.with_directory(inside, |fs| fs.clear_here())?;
        self.disk.free(inode.content)?;
        self.disk.free(id)?;
        let index = location.index;
        self.with_directory(location.frames, |fs| fs.unlink_here(index))?;
        self.disk.update()?;
        log::debug!("DIR: removed directory '{}' (inode {})", path, id);
        Ok(())
    }

    /// Give an entry a new name within its directory
    pub fn rename(&mut self, path: &str, new_name: &str) -> Result<()> {
        validate_name(new_name)?;
        let location = self.resolve(path)?;
        if location.is_link() {
            return Err(FsError::InvalidArgument(format!("cannot rename '{}'", path)));
        }
        let dir = location.dir();
        let mut table = self.disk.read_dir(dir)?;
        if table.find(new_name).is_some() {
            return Err(FsError::AlreadyExists(new_name.to_string()));
        }
        table.rename(location.index, new_name);
        self.disk.write_dir(dir, &table)?;

        // Keep the working directory stack's names current
        let id = location.entry.inode;
        for frame in self.cwd.iter_mut().filter(|f| f.inode == id) {
            frame.name = new_name.to_string();
        }
        if let Some(handle) = self.open_files.get_mut(id) {
            handle.name = new_name.to_string();
        }
        Ok(())
    }

    /// Move an entry into the directory `dst`, keeping its name
    pub fn mv(&mut self, src: &str, dst: &str) -> Result<()> {
        let location = self.resolve(src)?;
        if location.is_link() {
            return Err(FsError::InvalidArgument(format!("cannot move '{}'", src)));
        }
        let target = self.resolve_directory(dst)?;
        let id = location.entry.inode;
        if target.iter().any(|f| f.inode == id) {
            return Err(FsError::InvalidArgument(format!(
                "cannot move '{}' into itself",
                src
            )));
        }
        let dest = target.last().ok_or(FsError::NotMounted)?.clone();
        if dest.content == location.dir() {
            return Ok(());
        }

        let mut dest_table = self.disk.read_dir(dest.content)?;
        if dest_table.find(&location.entry.name).is_some() {
            return Err(FsError::AlreadyExists(location.entry.name));
        }
        dest_table.push(location.entry.clone())?;
        self.disk.write_dir(dest.content, &dest_table)?;
        let index = location.index;
        self.with_directory(location.frames, |fs| fs.unlink_here(index))?;

        let inode = self.disk.read_inode(id)?;
        if inode.is_dir() {
            let mut links = self.disk.read_dir(inode.content)?;
            if let Some(parent) = links.find("..") {
                links.relink(parent, dest.inode);
                self.disk.write_dir(inode.content, &links)?;
            }
            // A moved ancestor of the working directory changes its path
            if let Some(pos) = self.cwd.iter().position(|f| f.inode == id) {
                let tail = self.cwd.split_off(pos);
                self.cwd = target;
                self.cwd.extend(tail);
            }
        }
        self.disk.update()?;
        log::debug!("DIR: moved '{}' into '{}'", src, dst);
        Ok(())
    }

    fn list_entry(&mut self, entry: &DirEntry) -> Result<ListEntry> {
        let inode = self.disk.read_inode(entry.inode)?;
        Ok(ListEntry {
            name: entry.name.clone(),
            kind: inode.kind(),
            inode: entry.inode,
            owner: inode.owner,
            permissions: inode.permissions(),
            size: inode.size,
        })
    }

    /// List a directory, or a single file; `None` lists the working directory
    pub fn ls(&mut self, path: Option<&str>) -> Result<Vec<ListEntry>> {
        let content = match path {
            None => self.current()?.content,
            Some(path) => {
                let location = self.resolve(path)?;
                let inode = self.disk.read_inode(location.entry.inode)?;
                if !inode.is_dir() {
                    return Ok(vec![self.list_entry(&location.entry)?]);
                }
                inode.content
            }
        };
        let table = self.disk.read_dir(content)?;
        table.iter().map(|e| self.list_entry(e)).collect()
    }

    /// Change the working directory
    pub fn cd(&mut self, path: &str) -> Result<()> {
        self.cwd = self.resolve_directory(path)?;
        Ok(())
    }

    /// Metadata of the entry at `path`
    pub fn stat(&mut self, path: &str) -> Result<FileStat> {
        let location = self.resolve(path)?;
        let inode = self.disk.read_inode(location.entry.inode)?;
        Ok(FileStat {
            name: location.entry.name,
            kind: inode.kind(),
            inode: location.entry.inode,
            content: inode.content,
            owner: inode.owner,
            permissions: inode.permissions(),
            size: inode.size,
        })
    }

    /// Set the permission bits of the classes in `who` to exactly `how`
    pub fn chmod(&mut self, who: &str, how: &str, path: &str) -> Result<()> {
        let location = self.resolve(path)?;
        let id = location.entry.inode;
        let mut inode = self.disk.read_inode(id)?;
        if !owner_class_applies(self.disk.users()?, inode.owner, self.session) {
            return Err(FsError::PermissionDenied(path.to_string()));
        }
        let perms = apply_chmod(inode.permissions(), who, how)?;
        inode.set_permissions(perms);
        self.disk.write_inode(id, &inode)?;
        if let Some(handle) = self.open_files.get_mut(id) {
            handle.inode.set_permissions(perms);
        }
        log::debug!("ACCESS: '{}' is now {}", path, perms);
        Ok(())
    }

    /// Copy the file `src` into the directory `dst`, keeping its name
    pub fn cp(&mut self, src: &str, dst: &str) -> Result<()> {
        let location = self.resolve(src)?;
        // An open handle may hold a size the disk has not seen yet
        let source = match self.open_files.get(location.entry.inode) {
            Some(handle) => handle.inode,
            None => self.disk.read_inode(location.entry.inode)?,
        };
        if source.is_dir() {
            return Err(FsError::InvalidArgument(format!(
                "'{}' is a directory; only files can be copied",
                src
            )));
        }
        let target = self.resolve_directory(dst)?;
        let name = location.entry.name;

        let copy = self.with_directory(target, |fs| fs.create_here(&name, EntryKind::File))?;
        let mut inode = self.disk.read_inode(copy)?;
        let copied = self.copy_content(&source, &mut inode);
        inode.set_permissions(source.permissions());
        self.disk.write_inode(copy, &inode)?;
        copied?;
        log::debug!("DIR: copied '{}' into '{}' ({} bytes)", src, dst, inode.size);
        Ok(())
    }
}
