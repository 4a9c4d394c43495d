use std::fmt;
use std::io;
use thiserror::Error;

use crate::blockdev::StoreError;
use crate::cache::CacheError;

/// A bounded resource that can run out
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resource {
    /// A directory entry table
    Directory,
    /// The open file table
    OpenFileTable,
    /// Free blocks on the disk
    Disk,
    /// The user credential table
    UserTable,
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Resource::Directory => write!(f, "directory"),
            Resource::OpenFileTable => write!(f, "open file table"),
            Resource::Disk => write!(f, "disk"),
            Resource::UserTable => write!(f, "user table"),
        }
    }
}

/// Filesystem error type
///
/// Every variant carries enough context to be shown to the user as-is; none of
/// them is fatal to the session.
#[derive(Debug, Error)]
pub enum FsError {
    /// The final path component does not exist
    #[error("'{0}': no such file or directory")]
    NotFound(String),

    /// An intermediate path component does not exist or is not a directory
    #[error("'{0}': no such directory")]
    NoSuchDirectory(String),

    /// Duplicate name on create, rename or move
    #[error("'{0}': already exists")]
    AlreadyExists(String),

    /// A bounded table or the disk is exhausted
    #[error("{0} full")]
    Full(Resource),

    /// Operation on a file that has no open handle
    #[error("'{0}': not open")]
    NotOpen(String),

    /// Second open of an already open file
    #[error("'{0}': already open")]
    AlreadyOpen(String),

    /// Malformed argument or unknown option
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The target was expected to be a directory
    #[error("'{0}': not a directory")]
    NotADirectory(String),

    /// The target was expected to be a regular file
    #[error("'{0}': is a directory")]
    IsADirectory(String),

    /// Permission bits or handle mode forbid the access
    #[error("'{0}': permission denied")]
    PermissionDenied(String),

    /// The target is in use (open file, current directory)
    #[error("'{0}': resource busy")]
    Busy(String),

    /// The disk carries the unformatted marker
    #[error("disk is not formatted")]
    Unformatted,

    /// The disk could not be opened or its superblock is unreadable
    #[error("mount failed: {0}")]
    MountFailure(String),

    /// No filesystem is mounted
    #[error("no filesystem mounted")]
    NotMounted,

    /// The operation needs a logged in user
    #[error("no user logged in")]
    NoSession,

    /// On-disk structures are inconsistent
    #[error("filesystem is corrupt: {0}")]
    Corrupt(String),

    /// Backing store error
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Block cache error
    #[error("block cache error: {0}")]
    Cache(#[from] CacheError),

    /// I/O error while encoding or decoding records
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl FsError {
    /// Whether this error means the disk must be (re)formatted before use
    pub fn needs_format(&self) -> bool {
        matches!(self, FsError::Unformatted | FsError::MountFailure(_))
    }
}

/// Shorthand used throughout the crate
pub type Error = FsError;

/// Result type for filesystem operations
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages_name_the_failing_segment() {
        assert_eq!(
            FsError::NoSuchDirectory("docs".to_string()).to_string(),
            "'docs': no such directory"
        );
        assert_eq!(
            FsError::NotFound("b.txt".to_string()).to_string(),
            "'b.txt': no such file or directory"
        );
        assert_eq!(FsError::Full(Resource::OpenFileTable).to_string(), "open file table full");
    }

    #[test]
    fn test_store_errors_convert() {
        let err: FsError = StoreError::Missing.into();
        assert!(matches!(err, FsError::Store(StoreError::Missing)));
        assert!(FsError::Unformatted.needs_format());
        assert!(!err.needs_format());
    }
}
