//! Backing store implementations for ChainFS

mod blockdev_trait;

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

// Re-export the backing store trait and related types
pub use self::blockdev_trait::{BackingStore, Result, StoreError};

/// A backing store kept in a regular file on the host filesystem
#[derive(Debug)]
pub struct FileBackedStore {
    path: PathBuf,
    file: Option<File>,
}

impl FileBackedStore {
    /// Create a handle for the image at `path`. Nothing is touched on disk
    /// until [`BackingStore::open`] or [`BackingStore::init_with_size`].
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            file: None,
        }
    }

    /// Path of the image file
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn file(&mut self) -> Result<&mut File> {
        self.file.as_mut().ok_or(StoreError::NotOpen)
    }
}

impl BackingStore for FileBackedStore {
    fn open(&mut self) -> Result<()> {
        if self.file.is_some() {
            return Ok(());
        }
        if !self.path.is_file() {
            return Err(StoreError::Missing);
        }
        let file = OpenOptions::new().read(true).write(true).open(&self.path)?;
        log::debug!("STORE: opened {}", self.path.display());
        self.file = Some(file);
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        if let Some(file) = self.file.take() {
            file.sync_all()?;
            log::debug!("STORE: closed {}", self.path.display());
        }
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.file.is_some()
    }

    fn init_with_size(&mut self, size: u64) -> Result<()> {
        if self.file.is_some() {
            return Err(StoreError::AlreadyOpen);
        }
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&self.path)?;

        // Set file length; the host fills the gap with zeros
        file.set_len(size)?;
        file.sync_all()?;
        log::info!("STORE: initialized {} with {} bytes", self.path.display(), size);
        Ok(())
    }

    fn size(&self) -> Result<u64> {
        match &self.file {
            Some(file) => Ok(file.metadata()?.len()),
            None => Err(StoreError::NotOpen),
        }
    }

    fn seek_absolute(&mut self, pos: u64) -> Result<()> {
        self.file()?.seek(SeekFrom::Start(pos))?;
        Ok(())
    }

    fn seek_relative(&mut self, delta: i64) -> Result<()> {
        self.file()?.seek(SeekFrom::Current(delta))?;
        Ok(())
    }

    fn read_bytes(&mut self, buf: &mut [u8]) -> Result<()> {
        self.file()?.read_exact(buf)?;
        Ok(())
    }

    fn write_bytes(&mut self, data: &[u8]) -> Result<()> {
        let file = self.file()?;
        file.write_all(data)?;
        file.flush()?;
        Ok(())
    }

    fn sync(&mut self) -> Result<()> {
        self.file()?.sync_all()?;
        Ok(())
    }
}

/// A backing store held entirely in memory.
///
/// Behaves like [`FileBackedStore`] (it must be initialized before it can be
/// opened) and is what the unit tests and benches run against.
#[derive(Debug, Default)]
pub struct MemoryStore {
    data: Option<Vec<u8>>,
    pos: u64,
    open: bool,
}

impl MemoryStore {
    /// Create an empty, uninitialized store
    pub fn new() -> Self {
        Self::default()
    }

    /// Raw image bytes, if the store has been initialized
    pub fn bytes(&self) -> Option<&[u8]> {
        self.data.as_deref()
    }

    fn check(&self, len: usize) -> Result<u64> {
        if !self.open {
            return Err(StoreError::NotOpen);
        }
        let size = self.data.as_ref().map_or(0, |d| d.len() as u64);
        if self.pos + len as u64 > size {
            return Err(StoreError::OutOfBounds {
                offset: self.pos,
                len,
                size,
            });
        }
        Ok(self.pos)
    }
}

impl BackingStore for MemoryStore {
    fn open(&mut self) -> Result<()> {
        if self.data.is_none() {
            return Err(StoreError::Missing);
        }
        self.open = true;
        self.pos = 0;
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.open = false;
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.open
    }

    fn init_with_size(&mut self, size: u64) -> Result<()> {
        if self.open {
            return Err(StoreError::AlreadyOpen);
        }
        self.data = Some(vec![0u8; size as usize]);
        self.pos = 0;
        Ok(())
    }

    fn size(&self) -> Result<u64> {
        if !self.open {
            return Err(StoreError::NotOpen);
        }
        Ok(self.data.as_ref().map_or(0, |d| d.len() as u64))
    }

    fn seek_absolute(&mut self, pos: u64) -> Result<()> {
        if !self.open {
            return Err(StoreError::NotOpen);
        }
        self.pos = pos;
        Ok(())
    }

    fn seek_relative(&mut self, delta: i64) -> Result<()> {
        if !self.open {
            return Err(StoreError::NotOpen);
        }
        let pos = self.pos as i64 + delta;
        if pos < 0 {
            return Err(StoreError::OutOfBounds {
                offset: 0,
                len: 0,
                size: self.size()?,
            });
        }
        self.pos = pos as u64;
        Ok(())
    }

    fn read_bytes(&mut self, buf: &mut [u8]) -> Result<()> {
        let start = self.check(buf.len())? as usize;
        if let Some(data) = &self.data {
            buf.copy_from_slice(&data[start..start + buf.len()]);
        }
        self.pos += buf.len() as u64;
        Ok(())
    }

    fn write_bytes(&mut self, data: &[u8]) -> Result<()> {
        let start = self.check(data.len())? as usize;
        if let Some(image) = &mut self.data {
            image[start..start + data.len()].copy_from_slice(data);
        }
        self.pos += data.len() as u64;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_file_store_operations() {
        let temp_dir = tempdir().unwrap();
        let file_path = temp_dir.path().join("test_disk.img");

        let mut store = FileBackedStore::new(&file_path);
        assert!(matches!(store.open(), Err(StoreError::Missing)));

        store.init_with_size(4096).unwrap();
        store.open().unwrap();
        assert_eq!(store.size().unwrap(), 4096);

        store.seek_absolute(100).unwrap();
        store.write_bytes(b"chained").unwrap();
        store.seek_relative(-7).unwrap();
        let mut buf = [0u8; 7];
        store.read_bytes(&mut buf).unwrap();
        assert_eq!(&buf, b"chained");

        // Reopen and make sure the bytes survived
        store.close().unwrap();
        store.open().unwrap();
        store.seek_absolute(100).unwrap();
        let mut again = [0u8; 7];
        store.read_bytes(&mut again).unwrap();
        assert_eq!(&again, b"chained");
    }

    #[test]
    fn test_init_requires_closed_store() {
        let temp_dir = tempdir().unwrap();
        let mut store = FileBackedStore::new(temp_dir.path().join("busy.img"));
        store.init_with_size(1024).unwrap();
        store.open().unwrap();
        assert!(matches!(store.init_with_size(1024), Err(StoreError::AlreadyOpen)));
    }

    #[test]
    fn test_memory_store_bounds() {
        let mut store = MemoryStore::new();
        assert!(matches!(store.open(), Err(StoreError::Missing)));

        store.init_with_size(16).unwrap();
        assert!(matches!(store.write_bytes(b"x"), Err(StoreError::NotOpen)));
        store.open().unwrap();

        store.seek_absolute(12).unwrap();
        store.write_bytes(b"abcd").unwrap();
        assert!(matches!(
            store.write_bytes(b"e"),
            Err(StoreError::OutOfBounds { offset: 16, .. })
        ));
        assert_eq!(&store.bytes().unwrap()[12..], b"abcd");
    }
}
