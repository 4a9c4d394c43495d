//! ChainFS feature modules
//!
//! Features layered over the core engine. Access control (permission bits,
//! users and trust groups) is the only one so far.

pub mod access;

// Re-export access control types
pub use access::{
    apply_chmod, check_access, Class, OpenMode, Permissions, UserRecord, UserTable,
};
