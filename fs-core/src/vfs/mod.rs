//! The ChainFS engine
//!
//! [`FileSystem`] owns the disk, the working directory, the open file table
//! and the login session, and exposes the command surface used by front ends.
//! Every operation runs to completion before returning and reports failures as
//! [`FsError`] values; none of them leaves the engine unusable.

mod dir;
mod file;
mod open_table;
mod path;

use crate::blockdev::BackingStore;
use crate::config::FsConfig;
use crate::error::{FsError, Result};
use crate::layout::{DiskFs, FsStats};
use crate::modules::access::UserTable;

pub use dir::{FileStat, ListEntry};
pub use open_table::{FileHandle, OpenFileTable, SeekMode};
pub use path::{frames_to_path, split_path, DirFrame, Location};

/// A mounted (or mountable) filesystem and its session state
pub struct FileSystem<S: BackingStore> {
    disk: DiskFs<S>,
    config: FsConfig,
    cwd: Vec<DirFrame>,
    open_files: OpenFileTable,
    session: u8,
}

impl<S: BackingStore> FileSystem<S> {
    /// Create an engine over `store`. Call [`FileSystem::mount`] or
    /// [`FileSystem::create_disk`] before anything else.
    pub fn new(store: S, config: FsConfig) -> Self {
        Self {
            disk: DiskFs::new(store, config.cache_blocks),
            open_files: OpenFileTable::new(config.max_open_files),
            config,
            cwd: Vec::new(),
            session: 0,
        }
    }

    /// Active configuration
    pub fn config(&self) -> &FsConfig {
        &self.config
    }

    /// The disk underneath
    pub fn disk(&self) -> &DiskFs<S> {
        &self.disk
    }

    /// Whether a filesystem is mounted
    pub fn is_mounted(&self) -> bool {
        self.disk.is_mounted()
    }

    fn root_frames(&mut self) -> Result<Vec<DirFrame>> {
        let root = self.disk.root_inode()?;
        let inode = self.disk.read_inode(root)?;
        Ok(vec![DirFrame {
            name: String::new(),
            inode: root,
            content: inode.content,
        }])
    }

    fn reset_session(&mut self) {
        self.open_files = OpenFileTable::new(self.config.max_open_files);
        self.session = 0;
        self.cwd.clear();
    }

    /// Initialize the backing store with `size` bytes, unformatted
    pub fn create_disk(&mut self, size: u64) -> Result<()> {
        self.reset_session();
        self.disk.create_disk(size)
    }

    /// Format the disk with the given block size. Everything on it is lost.
    pub fn format(&mut self, block_size: u32) -> Result<()> {
        self.reset_session();
        self.disk.format(
            block_size,
            self.config.index_table_capacity,
            &self.config.users,
        )?;
        self.cwd = self.root_frames()?;
        Ok(())
    }

    /// Mount the disk. [`FsError::Unformatted`] and [`FsError::MountFailure`]
    /// mean the caller has to format first. Remounting flushes open handles
    /// like `unmount` does.
    pub fn mount(&mut self) -> Result<()> {
        if self.is_mounted() {
            self.close_all()?;
            self.disk.update()?;
        }
        self.reset_session();
        self.disk.mount()?;
        self.cwd = self.root_frames()?;
        Ok(())
    }

    /// Flush open handles and the superblock, then close the disk
    pub fn unmount(&mut self) -> Result<()> {
        if self.is_mounted() {
            self.close_all()?;
        }
        self.reset_session();
        self.disk.unmount()
    }

    /// Write the superblock to disk
    pub fn update(&mut self) -> Result<()> {
        self.disk.update()
    }

    /// Filesystem counters
    pub fn statfs(&self) -> Result<FsStats> {
        self.disk.statfs()
    }

    /// Absolute path of the working directory
    pub fn pwd(&self) -> String {
        frames_to_path(&self.cwd)
    }

    /// Logged in uid, 0 when there is no session
    pub fn session(&self) -> u8 {
        self.session
    }

    /// Name of the logged in user
    pub fn whoami(&self) -> Option<String> {
        let users = self.disk.users().ok()?;
        users.get(self.session).map(|u| u.name.clone())
    }

    /// User table of the mounted filesystem
    pub fn users(&self) -> Result<&UserTable> {
        self.disk.users()
    }

    /// Check credentials; 0 on failure
    pub fn verify_user(&self, name: &str, password: &str) -> u8 {
        self.disk
            .users()
            .map_or(0, |users| users.verify_user(name, password))
    }

    /// Whether `subject` trusts `target`
    pub fn is_trusted(&self, subject: u8, target: u8) -> bool {
        self.disk
            .users()
            .map_or(false, |users| users.is_trusted(subject, target))
    }

    /// Start a session
    pub fn login(&mut self, name: &str, password: &str) -> Result<u8> {
        let uid = self.verify_user(name, password);
        if uid == 0 {
            log::warn!("SESSION: failed login for '{}'", name);
            return Err(FsError::PermissionDenied(name.to_string()));
        }
        if self.session != 0 && self.session != uid {
            self.logout()?;
        }
        self.session = uid;
        log::info!("SESSION: '{}' logged in as uid {}", name, uid);
        Ok(uid)
    }

    /// End the session: flush and close every handle, then write the
    /// superblock
    pub fn logout(&mut self) -> Result<()> {
        if self.session == 0 {
            return Err(FsError::NoSession);
        }
        self.close_all()?;
        self.disk.update()?;
        log::info!("SESSION: uid {} logged out", self.session);
        self.session = 0;
        Ok(())
    }

    /// Register a user; only uid 1 may do this
    pub fn add_user(&mut self, name: &str, password: &str) -> Result<u8> {
        match self.session {
            0 => return Err(FsError::NoSession),
            1 => {}
            _ => return Err(FsError::PermissionDenied("useradd".to_string())),
        }
        let uid = self.disk.users_mut()?.add_user(name, password)?;
        self.disk.update()?;
        Ok(uid)
    }

    fn uid_of(&self, name: &str) -> Result<u8> {
        self.disk
            .users()?
            .find(name)
            .map(|u| u.uid)
            .ok_or_else(|| FsError::InvalidArgument(format!("no user named '{}'", name)))
    }

    /// Let the logged in user trust `name`
    pub fn grant_trust(&mut self, name: &str) -> Result<()> {
        if self.session == 0 {
            return Err(FsError::NoSession);
        }
        let target = self.uid_of(name)?;
        self.disk.users_mut()?.grant_trust(self.session, target)?;
        self.disk.update()
    }

    /// Withdraw the logged in user's trust in `name`
    pub fn revoke_trust(&mut self, name: &str) -> Result<()> {
        if self.session == 0 {
            return Err(FsError::NoSession);
        }
        let target = self.uid_of(name)?;
        self.disk.users_mut()?.revoke_trust(self.session, target)?;
        self.disk.update()
    }
}
